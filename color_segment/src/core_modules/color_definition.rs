// THEORY:
// The `ColorDefinition` is the most fundamental unit of the color model. It is a
// named color sample held canonically in YCbCr space, together with a per-channel
// tolerance (sigma) that describes how far a pixel may stray from the sample and
// still be considered "the same color."
//
// Key architectural principles:
// 1.  **Two Views, One Truth**: A definition is created either from an RGB triple or
//     from a YCbCr triple. `validate` derives the other view so that both are always
//     available: YCbCr for matching, RGB for rendering the segmented image.
// 2.  **Soft Matching**: `distance` is not a boolean test. It returns a confidence in
//     [0, 1]: a perfect 1.0 inside the threshold ellipsoid and a Gaussian falloff
//     outside it. `ColorSet` combines these scores into a per-class score.
// 3.  **Integer Channels**: Like the sensor data it is compared against, every channel
//     is an 8-bit quantity stored as an integer. Identity comparisons (`same_color`)
//     rely on this exactness.

use serde::{Deserialize, Serialize};

/// e^-(1/2): the score of a pixel exactly one sigma beyond the threshold.
pub const ONE_SIGMA: f64 = 0.606_530_659_712_633_4;
/// e^-(4/2)
pub const TWO_SIGMA: f64 = 0.135_335_283_236_612_7;
/// e^-(9/2)
pub const THREE_SIGMA: f64 = 0.011_108_996_538_242_306;

/// A pixel or color sample in BT.601 studio-swing YCbCr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct YCbCr {
    pub y: i32,
    pub cb: i32,
    pub cr: i32,
}

impl YCbCr {
    /// BT.601 forward transform from 8-bit RGB.
    pub fn from_rgb(red: u8, green: u8, blue: u8) -> Self {
        let r = red as f64 / 255.0;
        let g = green as f64 / 255.0;
        let b = blue as f64 / 255.0;

        Self {
            y: (16.0 + r * 65.481 + g * 128.553 + b * 24.966).round() as i32,
            cb: (128.0 + r * -37.797 + g * -74.203 + b * 112.000).round() as i32,
            cr: (128.0 + r * 112.000 + g * -93.786 + b * -18.214).round() as i32,
        }
    }

    /// BT.601 inverse transform, clamped to the displayable 8-bit range.
    pub fn to_rgb(self) -> [u8; 3] {
        let y = (self.y - 16) as f64;
        let cb = (self.cb - 128) as f64;
        let cr = (self.cr - 128) as f64;

        let clamp = |v: f64| v.round().clamp(0.0, 255.0) as u8;
        [
            clamp((298.082 * y + 408.583 * cr) / 256.0),
            clamp((298.082 * y - 100.291 * cb - 208.120 * cr) / 256.0),
            clamp((298.082 * y + 516.411 * cb) / 256.0),
        ]
    }
}

/// A named color sample with a per-channel tolerance.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorDefinition {
    /// The name of the color set this definition belongs to.
    pub name: String,
    pub y: i32,
    pub cb: i32,
    pub cr: i32,
    pub sigma_y: i32,
    pub sigma_cb: i32,
    pub sigma_cr: i32,
    /// Derived by `validate`; used to paint the segmented image.
    pub r: i32,
    pub g: i32,
    pub b: i32,
}

impl ColorDefinition {
    /// Creates a definition from a YCbCr sample; the RGB view is derived immediately.
    pub fn from_ycbcr(name: impl Into<String>, y: i32, cb: i32, cr: i32) -> Self {
        let mut definition = Self {
            name: name.into(),
            y,
            cb,
            cr,
            ..Self::default()
        };
        definition.validate();
        definition
    }

    /// Creates a definition from an RGB sample; the YCbCr view is derived immediately.
    pub fn from_rgb(name: impl Into<String>, r: u8, g: u8, b: u8) -> Self {
        let mut definition = Self {
            name: name.into(),
            r: r as i32,
            g: g as i32,
            b: b as i32,
            ..Self::default()
        };
        definition.validate();
        definition
    }

    pub fn with_sigmas(mut self, sigma_y: i32, sigma_cb: i32, sigma_cr: i32) -> Self {
        self.sigma_y = sigma_y;
        self.sigma_cb = sigma_cb;
        self.sigma_cr = sigma_cr;
        self
    }

    /// Brings the RGB and YCbCr views back in sync and reports whether the
    /// definition is usable.
    ///
    /// When Y, Cb and Cr are all non-positive the RGB triple is the source of
    /// truth and YCbCr is derived from it. Otherwise RGB is derived from YCbCr,
    /// unless the stored RGB already maps to the stored YCbCr, in which case it is
    /// kept as is. Validating twice therefore never changes a definition.
    /// A definition with an empty name or any non-positive sigma is invalid.
    pub fn validate(&mut self) -> bool {
        if self.y <= 0 && self.cb <= 0 && self.cr <= 0 {
            let ycbcr = YCbCr::from_rgb(channel(self.r), channel(self.g), channel(self.b));
            self.y = ycbcr.y;
            self.cb = ycbcr.cb;
            self.cr = ycbcr.cr;
        } else if !self.rgb_matches_ycbcr() {
            let [r, g, b] = self.ycbcr().to_rgb();
            self.r = r as i32;
            self.g = g as i32;
            self.b = b as i32;
        }

        if self.sigma_y <= 0 || self.sigma_cb <= 0 || self.sigma_cr <= 0 {
            return false;
        }
        !self.name.is_empty()
    }

    fn rgb_matches_ycbcr(&self) -> bool {
        let in_range = [self.r, self.g, self.b].iter().all(|&v| (0..=255).contains(&v));
        in_range && YCbCr::from_rgb(channel(self.r), channel(self.g), channel(self.b)) == self.ycbcr()
    }

    pub fn ycbcr(&self) -> YCbCr {
        YCbCr {
            y: self.y,
            cb: self.cb,
            cr: self.cr,
        }
    }

    pub fn rgb(&self) -> [u8; 3] {
        [channel(self.r), channel(self.g), channel(self.b)]
    }

    /// Scores how well `pixel` matches this definition.
    ///
    /// The squared, sigma-normalized distance is reduced by `threshold`; anything
    /// at or inside the threshold is a perfect 1.0, anything beyond falls off as
    /// `exp(-d / 2)`. Sigmas must be positive (see `validate`).
    pub fn distance(&self, pixel: YCbCr, threshold: f64) -> f64 {
        let dy = (pixel.y - self.y) as f64 / self.sigma_y as f64;
        let dcb = (pixel.cb - self.cb) as f64 / self.sigma_cb as f64;
        let dcr = (pixel.cr - self.cr) as f64 / self.sigma_cr as f64;

        let square = (dy * dy + dcb * dcb + dcr * dcr) - threshold;
        if square <= 0.0 {
            1.0
        } else {
            (-square / 2.0).exp()
        }
    }

    /// Identity by name: the definition belongs to the set called `name`.
    pub fn same_name(&self, name: &str) -> bool {
        self.name == name
    }

    /// Identity by name and sample value.
    pub fn same_color(&self, other: &ColorDefinition) -> bool {
        self.name == other.name && self.y == other.y && self.cb == other.cb && self.cr == other.cr
    }

    /// A copy of this definition with a wider luma tolerance, leaving the chroma
    /// tolerances alone. Useful when lighting changes shift brightness but not hue.
    pub fn widened_luma(&self) -> Self {
        let mut widened = self.clone();
        widened.sigma_y = if self.sigma_y < 1 {
            2
        } else {
            3 * self.sigma_y / 2
        };
        widened
    }
}

fn channel(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}
