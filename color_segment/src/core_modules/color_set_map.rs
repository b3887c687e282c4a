// THEORY:
// Scoring every pixel of every frame against every color definition would cost
// an `exp` per definition per pixel. The `ColorSetMap` moves that work out of the
// hot path: the RGB cube is quantized to 16 levels per channel (4096 buckets) and
// each bucket is classified once, whenever the configuration changes. Classifying
// a frame is then one table lookup per pixel.
//
// Entry semantics:
// - 0 always means "no set wins" (background).
// - `i > 0` is a 1-based index into the configured color sets.
//
// A set with a perfect member match claims the bucket outright and stops the scan,
// so earlier sets win ties. Partial matches compete on their aggregate score
// (strictly greater wins) but only claim the bucket when partial matches are
// enabled and the score reaches `THREE_SIGMA`; weaker partial matches stay
// background.

use crate::config::Settings;
use crate::core_modules::color_definition::{THREE_SIGMA, YCbCr};
use crate::core_modules::color_set::ColorSet;

/// 12-bit RGB: 4 bits per channel.
pub const COLOR_SET_MAP_SIZE: usize = 4096;

/// Precomputed bucket → palette index table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorSetMap {
    entries: Box<[u8; COLOR_SET_MAP_SIZE]>,
}

impl Default for ColorSetMap {
    fn default() -> Self {
        Self::empty()
    }
}

impl ColorSetMap {
    /// A table that classifies everything as background.
    pub fn empty() -> Self {
        Self {
            entries: Box::new([0; COLOR_SET_MAP_SIZE]),
        }
    }

    /// Classifies every quantized color against `color_sets`.
    ///
    /// Callers must keep `color_sets.len()` within `u8::MAX`; the configuration
    /// store enforces this.
    pub fn build(color_sets: &[ColorSet], settings: &Settings) -> Self {
        let mut map = Self::empty();
        let threshold = settings.threshold;

        for (key, entry) in map.entries.iter_mut().enumerate() {
            let [red, green, blue] = expand_key(key);
            let pixel = YCbCr::from_rgb(red, green, blue);

            let mut best_score = 0.0;
            let mut best_index = 0u8;

            for (i, set) in color_sets.iter().enumerate().take(u8::MAX as usize) {
                let index = (i + 1) as u8;
                let inverse = set.non_match(pixel, threshold);

                if inverse <= 0.0 {
                    best_index = index;
                    break;
                }

                let score = 1.0 - inverse;
                if score > best_score {
                    best_score = score;
                    if settings.show_partial_matches && score >= THREE_SIGMA {
                        best_index = index;
                    }
                }
            }

            *entry = best_index;
        }

        map
    }

    /// Palette index for a 12-bit key.
    pub fn get(&self, key: usize) -> u8 {
        self.entries[key & (COLOR_SET_MAP_SIZE - 1)]
    }

    /// Palette index for a full 8-bit RGB pixel.
    pub fn lookup(&self, red: u8, green: u8, blue: u8) -> u8 {
        self.get(quantize(red, green, blue))
    }

    pub fn entries(&self) -> &[u8] {
        &self.entries[..]
    }
}

/// Rounds each channel to the nearest 16-step bucket and packs R, G, B nibbles
/// into a 12-bit key. `v + 7` saturates at 255 so bright channels land in the top
/// bucket instead of wrapping to 0.
pub fn quantize(red: u8, green: u8, blue: u8) -> usize {
    let bucket = |v: u8| (v.saturating_add(7) & 0xF0) as usize;
    (bucket(red) << 4) | bucket(green) | (bucket(blue) >> 4)
}

/// The representative 8-bit color of a bucket, by nibble replication.
pub fn expand_key(key: usize) -> [u8; 3] {
    let nibble = |shift: usize| {
        let v = ((key >> shift) & 0xF) as u8;
        v | (v << 4)
    };
    [nibble(8), nibble(4), nibble(0)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::color_definition::{ColorDefinition, TWO_SIGMA};

    fn settings(threshold: f64, show_partial_matches: bool) -> Settings {
        Settings {
            threshold,
            show_partial_matches,
            ..Settings::default()
        }
    }

    fn red_set() -> ColorSet {
        ColorSet::new(ColorDefinition::from_rgb("Red", 255, 0, 0).with_sigmas(10, 10, 10))
    }

    #[test]
    fn quantize_rounds_to_nearest_bucket() {
        assert_eq!(quantize(0, 0, 0), 0x000);
        assert_eq!(quantize(255, 0, 0), 0xF00);
        assert_eq!(quantize(0, 255, 0), 0x0F0);
        assert_eq!(quantize(0, 0, 255), 0x00F);
        assert_eq!(quantize(8, 9, 24), 0x011);
        assert_eq!(quantize(250, 250, 250), 0xFFF);
    }

    #[test]
    fn expand_key_replicates_nibbles() {
        assert_eq!(expand_key(0xF00), [255, 0, 0]);
        assert_eq!(expand_key(0x1A5), [0x11, 0xAA, 0x55]);
        for key in 0..COLOR_SET_MAP_SIZE {
            let [r, g, b] = expand_key(key);
            assert_eq!(r as usize, ((key >> 8) & 0xF) * 17);
            assert_eq!(g as usize, ((key >> 4) & 0xF) * 17);
            assert_eq!(b as usize, (key & 0xF) * 17);
        }
        // The low half of the range maps back onto its own bucket.
        assert_eq!(quantize(0x88, 0x44, 0x00), 0x840);
    }

    #[test]
    fn empty_configuration_maps_to_background() {
        let map = ColorSetMap::build(&[], &Settings::default());
        assert!(map.entries().iter().all(|&index| index == 0));
    }

    #[test]
    fn exact_match_claims_bucket() {
        let map = ColorSetMap::build(&[red_set()], &settings(1.0, true));
        assert_eq!(map.lookup(255, 0, 0), 1);
        assert_eq!(map.lookup(0, 0, 0), 0);
        assert_eq!(map.lookup(255, 255, 255), 0);
    }

    #[test]
    fn earlier_set_wins_exact_ties() {
        let mut second = red_set();
        second.name = "Crimson".into();
        second.colors[0].name = "Crimson".into();

        let map = ColorSetMap::build(&[red_set(), second], &settings(1.0, true));
        assert_eq!(map.lookup(255, 0, 0), 1);
    }

    #[test]
    fn partial_matches_need_the_setting() {
        // A bucket a little outside the threshold: not an exact match, but a
        // strong partial one.
        let def = ColorDefinition::from_ycbcr("Sample", 100, 100, 100).with_sigmas(10, 10, 10);
        let sets = vec![ColorSet::new(def.clone())];

        let key = (0..COLOR_SET_MAP_SIZE)
            .find(|&key| {
                let [r, g, b] = expand_key(key);
                let score = def.distance(YCbCr::from_rgb(r, g, b), 1.0);
                score < 1.0 && score > TWO_SIGMA
            })
            .expect("a near bucket exists");

        let with_partial = ColorSetMap::build(&sets, &settings(1.0, true));
        let without_partial = ColorSetMap::build(&sets, &settings(1.0, false));
        assert_eq!(with_partial.get(key), 1);
        assert_eq!(without_partial.get(key), 0);
    }

    #[test]
    fn threshold_widens_exact_region() {
        let narrow = ColorSetMap::build(&[red_set()], &settings(0.0, false));
        let wide = ColorSetMap::build(&[red_set()], &settings(25.0, false));
        let count = |map: &ColorSetMap| map.entries().iter().filter(|&&i| i == 1).count();
        assert!(count(&wide) > count(&narrow));
    }
}
