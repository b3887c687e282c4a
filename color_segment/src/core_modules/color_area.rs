// THEORY:
// A `ColorArea` is the primary output of the blob extraction layer. It represents a
// single, contiguous region of one color class within a single frame: a "blob."
//
// Key architectural principles:
// 1.  **Incremental Aggregation**: The flood fill never stores the pixels it visits.
//     Each pixel is folded into running totals (`add_pixel`): area, coordinate sums
//     and the bounding box. `complete` turns the sums into a centroid once the
//     region is exhausted.
// 2.  **Stateless Data Container**: Like the frame and indexed image, a `ColorArea`
//     has no memory of previous frames. It describes one blob at one moment.
// 3.  **Published Shape**: Only the summary fields are serialized; the accumulators
//     are an implementation detail of the fill.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// One connected region of a single color class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorArea {
    /// The name of the color set the region belongs to.
    pub name: String,
    /// The number of pixels in the region.
    pub area: usize,
    /// The centroid, truncated to whole pixels.
    pub center_x: u32,
    pub center_y: u32,
    /// The inclusive bounding box.
    pub min_x: u32,
    pub max_x: u32,
    pub min_y: u32,
    pub max_y: u32,
    #[serde(skip)]
    x_accum: u64,
    #[serde(skip)]
    y_accum: u64,
}

impl ColorArea {
    /// An empty area, ready for `add_pixel`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            area: 0,
            center_x: 0,
            center_y: 0,
            min_x: u32::MAX,
            max_x: 0,
            min_y: u32::MAX,
            max_y: 0,
            x_accum: 0,
            y_accum: 0,
        }
    }

    /// Folds one pixel into the running totals and grows the bounding box.
    pub fn add_pixel(&mut self, x: u32, y: u32) {
        self.x_accum += x as u64;
        self.y_accum += y as u64;
        self.area += 1;

        self.min_x = self.min_x.min(x);
        self.max_x = self.max_x.max(x);
        self.min_y = self.min_y.min(y);
        self.max_y = self.max_y.max(y);
    }

    /// Finalizes the centroid. An area that never received a pixel collapses to an
    /// all-zero record.
    pub fn complete(&mut self) {
        if self.area == 0 {
            self.center_x = 0;
            self.center_y = 0;
            self.min_x = 0;
            self.max_x = 0;
            self.min_y = 0;
            self.max_y = 0;
        } else {
            self.center_x = (self.x_accum / self.area as u64) as u32;
            self.center_y = (self.y_accum / self.area as u64) as u32;
        }
    }

    /// Whether (x, y) lies inside the bounding box.
    pub fn contains(&self, x: u32, y: u32) -> bool {
        (self.min_x..=self.max_x).contains(&x) && (self.min_y..=self.max_y).contains(&y)
    }
}

/// The blobs found in one frame, largest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoundColorAreas {
    pub timestamp: SystemTime,
    pub areas: Vec<ColorArea>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_pixel_tracks_box_and_centroid() {
        let mut area = ColorArea::new("Red");
        for (x, y) in [(2, 3), (3, 3), (2, 4), (3, 4)] {
            area.add_pixel(x, y);
        }
        area.complete();

        assert_eq!(area.area, 4);
        assert_eq!((area.center_x, area.center_y), (2, 3));
        assert_eq!((area.min_x, area.max_x, area.min_y, area.max_y), (2, 3, 3, 4));
        assert!(area.contains(3, 4));
        assert!(!area.contains(4, 4));
    }

    #[test]
    fn empty_area_collapses_to_zero() {
        let mut area = ColorArea::new("Nothing");
        area.complete();
        assert_eq!(area.area, 0);
        assert_eq!((area.min_x, area.max_x, area.min_y, area.max_y), (0, 0, 0, 0));
        assert_eq!((area.center_x, area.center_y), (0, 0));
    }

    #[test]
    fn accumulators_are_not_serialized() {
        let mut area = ColorArea::new("Red");
        area.add_pixel(1, 1);
        area.complete();
        let json = serde_json::to_value(&area).unwrap();
        assert!(json.get("x_accum").is_none());
        assert_eq!(json["area"], 1);
    }
}
