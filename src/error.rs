use thiserror::Error;

// Main Application Error Type

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("Configuration Error: {0}")]
    Config(#[from] ConfigError),
    #[error("Detection Error: {0}")]
    Detection(#[from] DetectionError),
    #[error("Image Error: {0}")]
    Image(#[from] image::ImageError),
    #[error("Serialization Error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Detection driver is no longer running")]
    DriverStopped,
}

// Configuration Error Type, raised once at load or reload time
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("Colour range for {0} is malformed: {1}")]
    MalformedColorRange(String, String),
    #[error("No colour ranges configured for {0}")]
    MissingColorRange(String),
    #[error("ROI for {0} lies outside the {1}x{2} viewport")]
    RoiOutOfBounds(String, u32, u32),
    #[error("Invalid parameter {0}: {1}")]
    InvalidParameter(&'static str, String),
}

// Per-cycle detection failures. These are logged and degrade to "not found";
// they never stop the detection loop.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectionError {
    #[error("Invariant violated: {0}")]
    InvariantViolation(String),
    #[error("Buffer of {actual} cells does not match {width}x{height}")]
    DimensionMismatch {
        width: u32,
        height: u32,
        actual: usize,
    },
}
