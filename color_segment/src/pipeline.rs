// THEORY:
// The `pipeline` module is the synchronous, top-level API of the segmentation engine.
// It chains the per-frame stages into a single call: a frame goes in, a
// `SegmentationReport` comes out. It knows nothing about threads, channels or
// frame sources; the coordinator runs it on a blocking worker with an immutable
// snapshot of the configuration.
//
// Key architectural principles:
// 1.  **Snapshot In, Report Out**: `ProcessingParameters` is a frozen copy of the
//     color sets, settings and lookup table taken when the pass started. Edits made
//     to the live configuration during the pass are not visible here.
// 2.  **Two Views of One Classification**: the rendered image shows the raw
//     per-pixel classification. The indexed buffer handed to blob extraction (and
//     published alongside the image) is the despeckled one when despeckling is on.

use crate::config::Settings;
use crate::core_modules::blob_detector::blob_detector;
use crate::core_modules::classifier::classify;
use crate::core_modules::color_set::{ColorSet, palette};
use crate::core_modules::color_set_map::ColorSetMap;
use crate::core_modules::despeckle::despeckle;
use crate::core_modules::frame::Frame;
use serde::Serialize;
use std::sync::Arc;
use std::time::SystemTime;

// Re-export key data structures for the public API.
pub use crate::core_modules::color_area::{ColorArea, FoundColorAreas};
pub use crate::core_modules::indexed_image::IndexedImage;

/// Everything a pass needs, frozen at the moment the pass was started.
#[derive(Debug, Clone)]
pub struct ProcessingParameters {
    pub colors: Vec<ColorSet>,
    pub settings: Settings,
    pub color_set_map: Arc<ColorSetMap>,
}

/// The rendered segmentation of one frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegmentedImage {
    pub timestamp: SystemTime,
    pub width: usize,
    pub height: usize,
    pub stride: usize,
    /// The frame repainted with palette colors, BGR24 with the source stride.
    #[serde(skip)]
    pub frame: Vec<u8>,
    /// One palette index per pixel, row-major, after the optional despeckle.
    #[serde(skip)]
    pub segmented: Vec<u8>,
}

/// The primary output of the pipeline for a single frame.
#[derive(Debug, Clone)]
pub struct SegmentationReport {
    pub segmented_image: SegmentedImage,
    pub found_color_areas: FoundColorAreas,
}

pub struct SegmentationPipeline {
    params: ProcessingParameters,
    palette: Vec<[u8; 3]>,
}

impl SegmentationPipeline {
    pub fn new(params: ProcessingParameters) -> Self {
        let palette = palette(&params.colors);
        Self { params, palette }
    }

    pub fn params(&self) -> &ProcessingParameters {
        &self.params
    }

    pub fn generate_report(&self, mut frame: Frame) -> SegmentationReport {
        // Stage 1: Classification (also renders the frame in place)
        let classified = classify(&mut frame, &self.params.color_set_map, &self.palette);

        // Stage 2: Optional Noise Suppression
        let indexed = if self.params.settings.despeckle {
            despeckle(&classified)
        } else {
            classified
        };

        // Stage 3: Spatial Grouping
        let areas = blob_detector::find_color_areas(
            &indexed,
            &self.params.colors,
            self.params.settings.min_blob_size,
        );

        tracing::trace!(
            width = frame.width(),
            height = frame.height(),
            areas = areas.len(),
            "segmentation pass complete"
        );

        let timestamp = frame.timestamp();
        SegmentationReport {
            segmented_image: SegmentedImage {
                timestamp,
                width: frame.width(),
                height: frame.height(),
                stride: frame.stride(),
                frame: frame.into_data(),
                segmented: indexed.into_pixels(),
            },
            found_color_areas: FoundColorAreas { timestamp, areas },
        }
    }
}
