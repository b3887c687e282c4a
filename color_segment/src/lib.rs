// THEORY:
// This file is the main entry point for the `color_segment` library crate.
// It follows the standard Rust convention of using `lib.rs` to define the public
// API exposed to external consumers (like the `segment_tester` binary).
//
// Two levels of API are offered. `SegmentationPipeline` is the synchronous engine:
// frame in, segmented image and found color areas out. `ColorSegmentService` wraps
// it in an actor that owns the live configuration, admits one pass at a time and
// publishes results through `watch` channels. The `core_modules` hold the
// individual stages (color model, classifier, despeckler, blob detector) and are
// public for callers that want to compose them differently.

pub mod config;
pub mod coordinator;
pub mod core_modules;
pub mod error;
pub mod pipeline;

pub use config::{ColorSegmentConfig, Settings};
pub use coordinator::{
    ColorSegmentHandle, ColorSegmentService, FrameSource, ProcessOutcome, ProcessingState, ServiceSnapshot,
};
pub use core_modules::color_definition::ColorDefinition;
pub use core_modules::color_sampler::Region;
pub use core_modules::color_set::ColorSet;
pub use core_modules::frame::Frame;
pub use error::{SegmentError, SegmentResult};
pub use pipeline::{
    ColorArea, FoundColorAreas, ProcessingParameters, SegmentationPipeline, SegmentationReport, SegmentedImage,
};
