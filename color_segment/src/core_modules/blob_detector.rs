// THEORY:
// The `BlobDetector` is the engine of the spatial grouping layer. It turns the
// per-pixel class map produced by the classifier (and optionally the despeckler)
// into a list of `ColorArea`s: maximal 4-connected regions of one class.
//
// Key architectural principles & algorithm steps:
// 1.  **Owned Working Copy**: The fill consumes the class map by clearing every pixel
//     it claims. It therefore runs on a private copy, leaving the caller's indexed
//     image intact for visualization.
// 2.  **Row-Major Seeding**: Pixels are scanned top-to-bottom, left-to-right. Every
//     pixel that is still non-zero in the working copy seeds a new region.
// 3.  **Iterative Flood Fill**: Each region is grown with an explicit stack rather
//     than recursion, so a frame-sized uniform region cannot exhaust the call stack.
//     A pixel is cleared the moment it is pushed, so it is visited, and counted,
//     exactly once.
// 4.  **Data Aggregation**: Every claimed pixel is folded into the region's
//     `ColorArea` (area, coordinate sums, bounding box); the centroid is finalized
//     once the stack is empty.
// 5.  **Filtering & Ordering**: Regions smaller than the minimum blob size are
//     discarded and the rest are sorted largest first.
// 6.  **Stateless Utility**: Like the other stages, the detector has no memory of
//     previous frames.

use crate::core_modules::color_area::ColorArea;
use crate::core_modules::color_set::ColorSet;
use crate::core_modules::indexed_image::IndexedImage;

pub mod blob_detector {
    use super::*; // Make types from the parent module available.

    /// The main function of the spatial analysis layer.
    /// Finds every connected region of non-background pixels in `indexed`.
    pub fn find_color_areas(
        indexed: &IndexedImage,
        color_sets: &[ColorSet],
        min_blob_size: usize,
    ) -> Vec<ColorArea> {
        let width = indexed.width();
        let height = indexed.height();

        // --- 1. Working Copy ---
        let mut work = indexed.pixels().to_vec();
        let mut stack: Vec<(usize, usize)> = Vec::new();
        let mut areas: Vec<ColorArea> = Vec::new();

        // --- 2. Seeding & Region Growing ---
        for y in 0..height {
            for x in 0..width {
                let class = work[y * width + x];
                if class == 0 {
                    continue;
                }

                let name = color_sets
                    .get(class as usize - 1)
                    .map(|set| set.name.clone())
                    .unwrap_or_default();
                let mut area = ColorArea::new(name);
                flood(&mut work, width, height, x, y, &mut stack, &mut area);
                areas.push(area);
            }
        }

        // --- 3. Filtering & Ordering ---
        areas.retain(|area| area.area >= min_blob_size);
        areas.sort_by(|left, right| right.area.cmp(&left.area));
        areas
    }

    /// Claims every pixel 4-connected to (start_x, start_y) with the same class.
    fn flood(
        work: &mut [u8],
        width: usize,
        height: usize,
        start_x: usize,
        start_y: usize,
        stack: &mut Vec<(usize, usize)>,
        area: &mut ColorArea,
    ) {
        let class = work[start_y * width + start_x];
        work[start_y * width + start_x] = 0;
        stack.push((start_x, start_y));

        while let Some((x, y)) = stack.pop() {
            area.add_pixel(x as u32, y as u32);

            // Check all 4 direct neighbors (not diagonals).
            let mut visit = |nx: usize, ny: usize| {
                let index = ny * width + nx;
                if work[index] == class {
                    work[index] = 0;
                    stack.push((nx, ny));
                }
            };
            if x > 0 {
                visit(x - 1, y);
            }
            if x + 1 < width {
                visit(x + 1, y);
            }
            if y > 0 {
                visit(x, y - 1);
            }
            if y + 1 < height {
                visit(x, y + 1);
            }
        }

        area.complete();
    }
}

#[cfg(test)]
mod tests {
    use super::blob_detector::find_color_areas;
    use super::*;
    use crate::core_modules::color_definition::ColorDefinition;
    use std::collections::HashSet;

    fn sets(names: &[&str]) -> Vec<ColorSet> {
        names
            .iter()
            .map(|name| ColorSet::new(ColorDefinition::from_ycbcr(*name, 100, 100, 100).with_sigmas(5, 5, 5)))
            .collect()
    }

    fn image(width: usize, rows: &[&[u8]]) -> IndexedImage {
        let pixels = rows.iter().flat_map(|row| row.iter().copied()).collect();
        IndexedImage::from_pixels(width, rows.len(), pixels).unwrap()
    }

    #[test]
    fn separate_regions_become_separate_areas() {
        let indexed = image(
            5,
            &[
                &[1, 1, 0, 2, 2],
                &[1, 0, 0, 0, 2],
                &[0, 0, 1, 0, 2],
                &[0, 0, 1, 1, 0],
            ],
        );
        let areas = find_color_areas(&indexed, &sets(&["Red", "Blue"]), 1);

        assert_eq!(areas.len(), 3);
        assert_eq!(areas.iter().map(|a| a.area).sum::<usize>(), indexed.foreground_count());
        assert!(areas.windows(2).all(|pair| pair[0].area >= pair[1].area));

        let blue = areas.iter().find(|a| a.name == "Blue").unwrap();
        assert_eq!(blue.area, 4);
        assert_eq!((blue.min_x, blue.max_x, blue.min_y, blue.max_y), (3, 4, 0, 2));
    }

    #[test]
    fn diagonal_neighbors_are_not_connected() {
        let indexed = image(2, &[&[1, 0], &[0, 1]]);
        let areas = find_color_areas(&indexed, &sets(&["Red"]), 1);
        assert_eq!(areas.len(), 2);
    }

    #[test]
    fn adjacent_classes_do_not_merge() {
        let indexed = image(4, &[&[1, 1, 2, 2]]);
        let areas = find_color_areas(&indexed, &sets(&["Red", "Blue"]), 1);
        assert_eq!(areas.len(), 2);
        assert!(areas.iter().all(|a| a.area == 2));
    }

    #[test]
    fn small_areas_are_filtered() {
        let indexed = image(5, &[&[1, 0, 1, 1, 1]]);
        let areas = find_color_areas(&indexed, &sets(&["Red"]), 2);
        assert_eq!(areas.len(), 1);
        assert_eq!(areas[0].area, 3);
    }

    #[test]
    fn input_buffer_is_not_consumed() {
        let indexed = image(3, &[&[1, 1, 1]]);
        let before = indexed.clone();
        let _ = find_color_areas(&indexed, &sets(&["Red"]), 1);
        assert_eq!(indexed, before);
    }

    #[test]
    fn large_uniform_region_is_one_area() {
        let width = 640;
        let height = 480;
        let indexed = IndexedImage::from_pixels(width, height, vec![1; width * height]).unwrap();
        let areas = find_color_areas(&indexed, &sets(&["Floor"]), 1);

        assert_eq!(areas.len(), 1);
        assert_eq!(areas[0].area, width * height);
        assert_eq!((areas[0].center_x, areas[0].center_y), (319, 239));
    }

    #[test]
    fn areas_are_complete_and_disjoint() {
        // A deterministic pseudo-random class map.
        let width = 37;
        let height = 23;
        let mut seed = 0x2545_f491_u32;
        let pixels: Vec<u8> = (0..width * height)
            .map(|_| {
                seed ^= seed << 13;
                seed ^= seed >> 17;
                seed ^= seed << 5;
                (seed % 4) as u8
            })
            .collect();
        let indexed = IndexedImage::from_pixels(width, height, pixels).unwrap();

        let areas = find_color_areas(&indexed, &sets(&["A", "B", "C"]), 1);
        assert_eq!(areas.iter().map(|a| a.area).sum::<usize>(), indexed.foreground_count());

        // Re-derive each area's pixel set and check disjointness and containment.
        let mut claimed = HashSet::new();
        let mut work = indexed.pixels().to_vec();
        for y in 0..height {
            for x in 0..width {
                let class = work[y * width + x];
                if class == 0 {
                    continue;
                }
                let mut region = Vec::new();
                let mut stack = vec![(x, y)];
                work[y * width + x] = 0;
                while let Some((cx, cy)) = stack.pop() {
                    region.push((cx as u32, cy as u32));
                    let neighbors = [
                        (cx.wrapping_sub(1), cy),
                        (cx + 1, cy),
                        (cx, cy.wrapping_sub(1)),
                        (cx, cy + 1),
                    ];
                    for (nx, ny) in neighbors {
                        if nx < width && ny < height && work[ny * width + nx] == class {
                            work[ny * width + nx] = 0;
                            stack.push((nx, ny));
                        }
                    }
                }
                let area = areas
                    .iter()
                    .find(|a| a.area == region.len() && region.iter().all(|&(px, py)| a.contains(px, py)))
                    .expect("every region has a matching area");
                assert!(region.iter().all(|&(px, py)| area.contains(px, py)));
                for pixel in region {
                    assert!(claimed.insert(pixel), "pixel {pixel:?} claimed twice");
                }
            }
        }
        assert_eq!(claimed.len(), indexed.foreground_count());
    }
}
