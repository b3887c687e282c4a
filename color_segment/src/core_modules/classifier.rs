// THEORY:
// The classifier is the first stage of the per-frame pipeline. It walks the raw
// BGR frame once, turns each pixel into a 12-bit bucket key, and reads the winning
// color set straight out of the precomputed `ColorSetMap`. Two results come out of
// the same pass:
// 1.  the `IndexedImage`, one palette index per pixel, which feeds the despeckler
//     and the blob extractor;
// 2.  the rendered segmented image, written back into the frame buffer in place:
//     every pixel is repainted with its class's display color (black for background).
//
// The stage is stateless and deterministic: the same frame, map and palette always
// produce the same output.

use crate::core_modules::color_set::BACKGROUND_RGB;
use crate::core_modules::color_set_map::{ColorSetMap, quantize};
use crate::core_modules::frame::{BYTES_PER_PIXEL, Frame};
use crate::core_modules::indexed_image::IndexedImage;

/// Classifies every pixel of `frame` and repaints it with `palette`.
///
/// `palette[i]` is the RGB display color of palette index `i`; indices outside
/// the palette are painted as background.
pub fn classify(frame: &mut Frame, map: &ColorSetMap, palette: &[[u8; 3]]) -> IndexedImage {
    let width = frame.width();
    let height = frame.height();
    let mut indexed = IndexedImage::new(width, height);

    for y in 0..height {
        let out_row = indexed.row_mut(y);
        let row = frame.row_mut(y);

        for (pixel, index_out) in row.chunks_exact_mut(BYTES_PER_PIXEL).zip(out_row.iter_mut()) {
            let (blue, green, red) = (pixel[0], pixel[1], pixel[2]);
            let index = map.get(quantize(red, green, blue));
            *index_out = index;

            let [r, g, b] = palette.get(index as usize).copied().unwrap_or(BACKGROUND_RGB);
            pixel[0] = b;
            pixel[1] = g;
            pixel[2] = r;
        }
    }

    indexed
}
