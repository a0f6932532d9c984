pub mod common;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod pipeline;

pub use common::{BoundingBox, Frame, Point};
pub use config::DetectionConfig;
pub use coordinator::{Coordinator, CoordinatorBuilder, FrameSource};
pub use error::{ConfigError, DetectionError, VisionError};
pub use pipeline::detection::{DetectionEngine, DetectionHandle, DetectionSnapshot, Entity, EntityCategory};
