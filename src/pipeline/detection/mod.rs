//! Frame-to-snapshot detection: colour matching, region extraction, bar
//! calibration, entity clustering, marker lookup and target selection.

pub mod avoidance;
pub mod calibrator;
pub mod cluster;
pub mod color;
pub mod core;
pub mod engine;
pub mod marker;
pub mod mask;
pub mod regions;
pub mod selector;
pub mod snapshot;

pub use avoidance::{AvoidanceRegistry, ExclusionZone};
pub use calibrator::{ActorBars, ActorTracker, BarCalibrator, BarKind, BarState, CalibrationPhase, OverlayState};
pub use cluster::EntityClusterer;
pub use color::{ColorSpaceConverter, Hsv, HsvFrame};
pub use self::core::{ColorRange, DetectionContext, Entity, EntityCategory, RoiSpec};
pub use engine::{DetectionEngine, DetectionHandle};
pub use marker::{MarkerLocator, MarkerReading, MarkerSource, NOT_FOUND_DISTANCE};
pub use mask::Mask;
pub use regions::{ConnectedRegionExtractor, Region};
pub use selector::TargetSelector;
pub use snapshot::{CycleStage, CycleTimings, DetectionSnapshot};
