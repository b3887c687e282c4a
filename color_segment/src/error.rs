use thiserror::Error;

/// Everything that can go wrong between a configuration edit and a published pass.
#[derive(Debug, Error)]
pub enum SegmentError {
    #[error("color definition is invalid: {0}")]
    InvalidColorDefinition(String),
    #[error("color set already contains an entry for: {0}")]
    DuplicateColorDefinition(String),
    #[error("color set list does not contain an entry for: {0}")]
    UnknownColorSet(String),
    #[error("color set does not contain a definition for: {0}")]
    UnknownColorDefinition(String),
    #[error("too many color sets: at most {0} can be indexed")]
    TooManyColorSets(usize),

    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    #[error("sample region {region} lies outside the {width}x{height} frame")]
    RegionOutOfBounds {
        region: String,
        width: usize,
        height: usize,
    },
    #[error("sample region holds {0} pixels, too small to generalize a color")]
    RegionTooSmall(usize),

    #[error("frame source failed: {0}")]
    FrameSource(String),
    #[error("processing pass failed: {0}")]
    PassFailed(String),
    #[error("color segment service is no longer running")]
    ServiceClosed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Image(#[from] image::ImageError),
}

pub type SegmentResult<T> = Result<T, SegmentError>;
