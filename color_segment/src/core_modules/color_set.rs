// THEORY:
// A `ColorSet` is one logical output class of the segmenter ("Red Ball", "Floor").
// Real objects rarely have a single color under real lighting, so a set is an
// ordered list of `ColorDefinition` samples that together describe the class.
//
// A pixel's score against a set treats every definition as an independent chance
// of "not matching" and multiplies them together. One perfect match drives the
// product of non-matches to zero and the set claims the pixel outright.

use crate::core_modules::color_definition::{ColorDefinition, YCbCr};
use serde::{Deserialize, Serialize};

/// The color painted for background (palette index 0).
pub const BACKGROUND_RGB: [u8; 3] = [0, 0, 0];

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ColorSet {
    pub name: String,
    pub colors: Vec<ColorDefinition>,
}

impl ColorSet {
    /// Starts a new set named after its first definition.
    pub fn new(first: ColorDefinition) -> Self {
        Self {
            name: first.name.clone(),
            colors: vec![first],
        }
    }

    /// The product over all definitions of `1 - distance`.
    ///
    /// A value of zero (or below) means at least one definition matched perfectly.
    /// Scanning stops as soon as that happens.
    pub fn non_match(&self, pixel: YCbCr, threshold: f64) -> f64 {
        let mut inverse = 1.0;
        for color in &self.colors {
            inverse *= 1.0 - color.distance(pixel, threshold);
            if inverse <= 0.0 {
                break;
            }
        }
        inverse
    }

    /// The color this set is rendered with in the segmented image: the RGB
    /// view of its first definition.
    pub fn display_rgb(&self) -> [u8; 3] {
        self.colors.first().map(ColorDefinition::rgb).unwrap_or(BACKGROUND_RGB)
    }
}

/// Builds the render palette: index 0 is background, index `i` is set `i - 1`.
pub fn palette(color_sets: &[ColorSet]) -> Vec<[u8; 3]> {
    std::iter::once(BACKGROUND_RGB)
        .chain(color_sets.iter().map(ColorSet::display_rgb))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn red() -> ColorDefinition {
        ColorDefinition::from_rgb("Red", 255, 0, 0).with_sigmas(10, 10, 10)
    }

    #[test]
    fn exact_member_zeroes_the_non_match_product() {
        let mut set = ColorSet::new(ColorDefinition::from_rgb("Red", 0, 0, 255).with_sigmas(4, 4, 4));
        let mut second = red();
        second.name = set.name.clone();
        set.colors.push(second.clone());

        assert_eq!(set.non_match(second.ycbcr(), 1.0), 0.0);
    }

    #[test]
    fn partial_members_multiply() {
        let set = ColorSet::new(red());
        let near = YCbCr { y: 81 + 20, cb: 90, cr: 240 };
        let single = 1.0 - red().distance(near, 1.0);
        assert!((set.non_match(near, 1.0) - single).abs() < 1e-12);
        assert!(single > 0.0 && single < 1.0);
    }

    #[test]
    fn palette_starts_with_background() {
        let sets = vec![ColorSet::new(red()), ColorSet::new(ColorDefinition::from_rgb("Blue", 0, 0, 255).with_sigmas(4, 4, 4))];
        let palette = palette(&sets);
        assert_eq!(palette.len(), 3);
        assert_eq!(palette[0], BACKGROUND_RGB);
        assert_eq!(palette[1], [255, 0, 0]);
        assert_eq!(palette[2], [0, 0, 255]);
    }
}
