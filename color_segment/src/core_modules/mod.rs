pub mod blob_detector;
pub mod classifier;
pub mod color_area;
pub mod color_definition;
pub mod color_sampler;
pub mod color_set;
pub mod color_set_map;
pub mod despeckle;
pub mod frame;
pub mod indexed_image;
pub mod utils;
