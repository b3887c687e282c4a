// THEORY:
// Typing YCbCr numbers by hand is a poor way to teach the segmenter a color. The
// sampler learns a `ColorDefinition` from a rectangle of a live frame instead: the
// mean of the region becomes the sample and twice the per-channel standard
// deviation becomes the tolerance, so roughly 95% of the region's pixels fall
// inside one sigma-ellipsoid of the new definition.

use crate::core_modules::color_definition::{ColorDefinition, YCbCr};
use crate::core_modules::frame::Frame;
use crate::error::{SegmentError, SegmentResult};
use serde::{Deserialize, Serialize};

/// Fewer pixels than this cannot be generalized into a color.
pub const MIN_SAMPLE_PIXELS: usize = 17;

/// A rectangle in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub left: usize,
    pub top: usize,
    pub width: usize,
    pub height: usize,
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.left, self.top)
    }
}

/// Per-channel histogram of one YCbCr component.
struct Projection {
    counts: [u32; 256],
    sum: f64,
}

impl Projection {
    fn new() -> Self {
        Self {
            counts: [0; 256],
            sum: 0.0,
        }
    }

    fn add(&mut self, value: i32) {
        let value = value.clamp(0, 255);
        self.counts[value as usize] += 1;
        self.sum += value as f64;
    }

    fn mean(&self, count: usize) -> f64 {
        self.sum / count as f64
    }

    fn std_dev(&self, count: usize) -> f64 {
        let mean = self.mean(count);
        let accum: f64 = self
            .counts
            .iter()
            .enumerate()
            .map(|(value, &n)| {
                let offset = value as f64 - mean;
                offset * offset * n as f64
            })
            .sum();
        (accum / count as f64).sqrt()
    }

    fn sigma(&self, count: usize) -> i32 {
        (2.0 * self.std_dev(count)).round().max(1.0) as i32
    }
}

/// Learns a color definition named `name` from `region` of `frame`.
pub fn sample_region(name: &str, frame: &Frame, region: Region) -> SegmentResult<ColorDefinition> {
    let name = name.trim();
    if name.is_empty() {
        return Err(SegmentError::InvalidColorDefinition(
            "a sampled color needs a name".into(),
        ));
    }

    let right = region.left.checked_add(region.width);
    let bottom = region.top.checked_add(region.height);
    match (right, bottom) {
        (Some(right), Some(bottom)) if right <= frame.width() && bottom <= frame.height() => {}
        _ => {
            return Err(SegmentError::RegionOutOfBounds {
                region: region.to_string(),
                width: frame.width(),
                height: frame.height(),
            });
        }
    }

    let count = region.width * region.height;
    if count < MIN_SAMPLE_PIXELS {
        return Err(SegmentError::RegionTooSmall(count));
    }

    let mut y_projection = Projection::new();
    let mut cb_projection = Projection::new();
    let mut cr_projection = Projection::new();

    for y in region.top..region.top + region.height {
        for x in region.left..region.left + region.width {
            let [blue, green, red] = frame.bgr(x, y);
            let pixel = YCbCr::from_rgb(red, green, blue);
            y_projection.add(pixel.y);
            cb_projection.add(pixel.cb);
            cr_projection.add(pixel.cr);
        }
    }

    let definition = ColorDefinition::from_ycbcr(
        name,
        y_projection.mean(count).round() as i32,
        cb_projection.mean(count).round() as i32,
        cr_projection.mean(count).round() as i32,
    )
    .with_sigmas(
        y_projection.sigma(count),
        cb_projection.sigma(count),
        cr_projection.sigma(count),
    );

    tracing::debug!(
        name,
        %region,
        y = definition.y,
        cb = definition.cb,
        cr = definition.cr,
        "sampled color definition"
    );

    Ok(definition)
}
