// THEORY:
// Lookup-table classification is strictly per pixel, so sensor noise shows up as
// isolated misclassified pixels ("speckles") and ragged region edges. The
// despeckler is a 3x3 majority vote: every interior pixel takes the class that
// holds the most of the nine pixels in its neighborhood, itself included.
//
// When two or more classes tie for the most votes the pixel keeps its original
// class.
//
// Border pixels have an incomplete neighborhood and are copied through unchanged.
// The vote reads from the input and writes to a fresh buffer, so earlier
// decisions never influence later ones.

use crate::core_modules::indexed_image::IndexedImage;

pub fn despeckle(indexed: &IndexedImage) -> IndexedImage {
    let width = indexed.width();
    let height = indexed.height();
    let mut output = indexed.clone();

    if width < 3 || height < 3 {
        return output;
    }

    // Nine votes fit in a byte; only the nine neighborhood classes are ever touched.
    let mut votes = [0u8; 256];
    let mut neighborhood = [0u8; 9];

    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let mut slot = 0;
            for ny in y - 1..=y + 1 {
                for nx in x - 1..=x + 1 {
                    neighborhood[slot] = indexed.get(nx, ny);
                    slot += 1;
                }
            }

            let mut leader = neighborhood[0];
            for &class in &neighborhood {
                votes[class as usize] += 1;
                if votes[class as usize] > votes[leader as usize] {
                    leader = class;
                }
            }

            let best = votes[leader as usize];
            let tied = neighborhood
                .iter()
                .any(|&class| class != leader && votes[class as usize] == best);

            output.set(x, y, if tied { indexed.get(x, y) } else { leader });

            for &class in &neighborhood {
                votes[class as usize] = 0;
            }
        }
    }

    output
}
