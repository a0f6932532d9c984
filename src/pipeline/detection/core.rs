use crate::common::{BoundingBox, Frame, Point};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use super::color::{Hsv, HsvFrame};

/// Inclusive HSV window. Hue is in degrees `[0, 360)`, saturation and value in
/// `[0, 255]`. A window never wraps past hue 0: callers split such hues into
/// two ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorRange {
    pub low_h: u16,
    pub low_s: u8,
    pub low_v: u8,
    pub high_h: u16,
    pub high_s: u8,
    pub high_v: u8,
}

impl ColorRange {
    pub fn new(low: (u16, u8, u8), high: (u16, u8, u8)) -> Self {
        Self {
            low_h: low.0,
            low_s: low.1,
            low_v: low.2,
            high_h: high.0,
            high_s: high.1,
            high_v: high.2,
        }
    }

    /// True for fully opaque pixels inside every bound.
    #[inline]
    pub fn contains(&self, pixel: Hsv) -> bool {
        pixel.opaque
            && (self.low_h..=self.high_h).contains(&pixel.h)
            && (self.low_s..=self.high_s).contains(&pixel.s)
            && (self.low_v..=self.high_v).contains(&pixel.v)
    }

    pub fn validate(&self, owner: &str) -> Result<(), ConfigError> {
        let malformed = |reason: String| ConfigError::MalformedColorRange(owner.to_string(), reason);
        if self.high_h >= 360 {
            return Err(malformed(format!("hue {} is not below 360", self.high_h)));
        }
        if self.low_h > self.high_h {
            return Err(malformed(format!(
                "hue {}..={} is inverted",
                self.low_h, self.high_h
            )));
        }
        if self.low_s > self.high_s {
            return Err(malformed(format!(
                "saturation {}..={} is inverted",
                self.low_s, self.high_s
            )));
        }
        if self.low_v > self.high_v {
            return Err(malformed(format!(
                "value {}..={} is inverted",
                self.low_v, self.high_v
            )));
        }
        Ok(())
    }
}

/// Colour category a detected thing belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityCategory {
    /// Yellow-named creatures that only fight back
    PassiveCreature,
    /// Red-named creatures that attack on sight
    AggressiveCreature,
    /// Violet-named event creatures
    SpecialCreature,
    TargetMarker,
}

impl EntityCategory {
    pub fn name(&self) -> &'static str {
        match self {
            EntityCategory::PassiveCreature => "passive",
            EntityCategory::AggressiveCreature => "aggressive",
            EntityCategory::SpecialCreature => "special",
            EntityCategory::TargetMarker => "target_marker",
        }
    }
}

impl fmt::Display for EntityCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A categorised thing seen during one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub category: EntityCategory,
    pub bounds: BoundingBox,
}

impl Entity {
    pub fn new(category: EntityCategory, bounds: BoundingBox) -> Self {
        Self { category, bounds }
    }

    pub fn interaction_point(&self) -> Point {
        self.bounds.bottom_center()
    }
}

/// Rectangle given by its edges. Negative edges count back from the far side
/// of the frame, so `max_y = -100` stops 100 rows above the bottom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoiSpec {
    pub min_x: i32,
    pub min_y: i32,
    pub max_x: i32,
    pub max_y: i32,
}

impl RoiSpec {
    pub fn new(min_x: i32, min_y: i32, max_x: i32, max_y: i32) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Resolves relative edges against a frame and clips to it. `None` when
    /// nothing of the ROI remains.
    pub fn resolve(&self, width: u32, height: u32) -> Option<BoundingBox> {
        let edge = |value: i32, extent: u32| -> i64 {
            if value < 0 {
                i64::from(extent) + i64::from(value)
            } else {
                i64::from(value)
            }
        };
        let x0 = edge(self.min_x, width).max(0);
        let y0 = edge(self.min_y, height).max(0);
        let x1 = edge(self.max_x, width).min(i64::from(width));
        let y1 = edge(self.max_y, height).min(i64::from(height));
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(BoundingBox::new(
            i32::try_from(x0).ok()?,
            i32::try_from(y0).ok()?,
            u32::try_from(x1 - x0).ok()?,
            u32::try_from(y1 - y0).ok()?,
        ))
    }
}

/// Everything a cycle's stages share: the read-only HSV view of the frame and
/// where the avatar stands.
#[derive(Clone)]
pub struct DetectionContext {
    pub hsv: Arc<HsvFrame>,
    pub dimensions: (u32, u32),
    pub viewport_center: Point,
    pub processing_start: Instant,
}

impl DetectionContext {
    pub fn new(frame: &Frame, hsv: HsvFrame) -> Self {
        Self {
            hsv: Arc::new(hsv),
            dimensions: frame.dimensions(),
            viewport_center: frame.viewport_center(),
            processing_start: Instant::now(),
        }
    }

    pub fn resolve(&self, roi: &RoiSpec) -> Option<BoundingBox> {
        roi.resolve(self.dimensions.0, self.dimensions.1)
    }
}
