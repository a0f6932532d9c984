use chrono::{DateTime, Utc};
use image::{DynamicImage, RgbaImage};
use std::sync::Arc;
use uuid::Uuid;

use super::geometry::{BoundingBox, Point};

/// One captured screen image. Immutable for the whole detection cycle; cloning
/// shares the pixel buffer.
#[derive(Clone)]
pub struct Frame {
    frame_id: Uuid,
    image: Arc<RgbaImage>,
    captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(image: RgbaImage, captured_at: DateTime<Utc>, frame_id: Uuid) -> Self {
        Self {
            frame_id,
            image: Arc::new(image),
            captured_at,
        }
    }

    /// Frame stamped with a fresh id and the current time.
    pub fn capture(image: RgbaImage) -> Self {
        Self::new(image, Utc::now(), Uuid::new_v4())
    }

    pub fn from_dynamic(image: DynamicImage) -> Self {
        Self::capture(image.to_rgba8())
    }

    pub fn id(&self) -> Uuid {
        self.frame_id
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn bounds(&self) -> BoundingBox {
        let (width, height) = self.dimensions();
        BoundingBox::new(0, 0, width, height)
    }

    /// The avatar is always drawn here, so distances from it stand in for
    /// distances from the player.
    pub fn viewport_center(&self) -> Point {
        let (width, height) = self.dimensions();
        Point::new((width / 2) as i32, (height / 2) as i32)
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("frame_id", &self.frame_id)
            .field("dimensions", &self.dimensions())
            .field("captured_at", &self.captured_at)
            .finish()
    }
}
