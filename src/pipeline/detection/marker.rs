use crate::common::{BoundingBox, Point};
use crate::config::MarkerConfig;
use crate::error::DetectionError;
use serde::Serialize;
use tracing::{debug, warn};

use super::core::{ColorRange, DetectionContext};
use super::mask::Mask;
use super::regions::{ConnectedRegionExtractor, Region};

/// Distance reported when no marker is on screen. Larger than any reach a
/// caller could sensibly ask for.
pub const NOT_FOUND_DISTANCE: f64 = 9999.0;

/// Which colour the marker was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerSource {
    Primary,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MarkerReading {
    pub bounds: BoundingBox,
    pub position: Point,
    pub area: u32,
    /// Distance from `position` to the viewport centre, where the avatar stands
    pub distance: f64,
    pub source: MarkerSource,
}

/// Finds the selection marker floating over the current target.
#[derive(Debug, Clone)]
pub struct MarkerLocator {
    config: MarkerConfig,
}

impl MarkerLocator {
    pub fn new(config: MarkerConfig) -> Self {
        Self { config }
    }

    /// Largest primary-coloured region above the pixel floor, else the largest
    /// fallback-coloured one. A colour that fails to scan is logged and
    /// skipped.
    pub fn locate(&self, context: &DetectionContext) -> Option<MarkerReading> {
        let (width, height) = context.dimensions;
        let area = self.config.search_area.resolve(width, height)?;

        let candidates = [
            (MarkerSource::Primary, &self.config.primary),
            (MarkerSource::Fallback, &self.config.fallback),
        ];
        for (source, ranges) in candidates {
            match self.largest_region(context, area, ranges) {
                Ok(Some(region)) => {
                    let position = region.bounds.center();
                    let reading = MarkerReading {
                        bounds: region.bounds,
                        position,
                        area: region.area,
                        distance: position.distance_to(&context.viewport_center),
                        source,
                    };
                    debug!(?source, x = position.x, y = position.y, distance = reading.distance, "Marker located");
                    return Some(reading);
                }
                Ok(None) => {}
                Err(e) => warn!("Marker scan for {:?} colour treated as not found: {}", source, e),
            }
        }
        None
    }

    /// Distance to the marker, or [`NOT_FOUND_DISTANCE`].
    pub fn distance(&self, context: &DetectionContext) -> f64 {
        self.locate(context)
            .map(|reading| reading.distance)
            .unwrap_or(NOT_FOUND_DISTANCE)
    }

    fn largest_region(
        &self,
        context: &DetectionContext,
        area: BoundingBox,
        ranges: &[ColorRange],
    ) -> Result<Option<Region>, DetectionError> {
        if ranges.is_empty() {
            return Ok(None);
        }
        let mask = Mask::build(&context.hsv, area, ranges, &self.config.morphology)?;
        let regions = ConnectedRegionExtractor::new().extract(&mask);
        // first of equal areas wins, so the result is stable in scan order
        let largest = regions.into_iter().fold(None::<Region>, |best, region| match best {
            Some(b) if b.area >= region.area => Some(b),
            _ => Some(region),
        });
        Ok(largest.filter(|region| region.area > self.config.min_pixels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Frame;
    use crate::pipeline::detection::color::ColorSpaceConverter;
    use image::{ImageBuffer, Rgba, RgbaImage};

    const RED: Rgba<u8> = Rgba([246, 90, 106, 255]);
    const BLUE: Rgba<u8> = Rgba([135, 152, 208, 255]);

    fn fill(img: &mut RgbaImage, bounds: BoundingBox, colour: Rgba<u8>) {
        for y in bounds.y..bounds.bottom() {
            for x in bounds.x..bounds.right() {
                img.put_pixel(x as u32, y as u32, colour);
            }
        }
    }

    fn context(img: RgbaImage) -> DetectionContext {
        let frame = Frame::capture(img);
        let hsv = ColorSpaceConverter::new().convert(&frame);
        DetectionContext::new(&frame, hsv)
    }

    fn blank() -> RgbaImage {
        ImageBuffer::from_pixel(400, 300, Rgba([0, 0, 0, 255]))
    }

    #[test]
    fn largest_region_wins_over_first_found() {
        let mut img = blank();
        fill(&mut img, BoundingBox::new(110, 60, 5, 5), RED);
        fill(&mut img, BoundingBox::new(200, 100, 10, 8), RED);
        let reading = MarkerLocator::new(MarkerConfig::default())
            .locate(&context(img))
            .unwrap();
        assert_eq!(reading.bounds, BoundingBox::new(200, 100, 10, 8));
        assert_eq!(reading.area, 80);
        assert_eq!(reading.position, Point::new(205, 104));
        assert_eq!(reading.source, MarkerSource::Primary);
        let expected = Point::new(205, 104).distance_to(&Point::new(200, 150));
        assert!((reading.distance - expected).abs() < 1e-9);
    }

    #[test]
    fn falls_back_to_secondary_colour() {
        let mut img = blank();
        fill(&mut img, BoundingBox::new(150, 80, 6, 6), BLUE);
        let reading = MarkerLocator::new(MarkerConfig::default())
            .locate(&context(img))
            .unwrap();
        assert_eq!(reading.source, MarkerSource::Fallback);
    }

    #[test]
    fn primary_wins_even_when_fallback_is_larger() {
        let mut img = blank();
        fill(&mut img, BoundingBox::new(110, 60, 6, 6), RED);
        fill(&mut img, BoundingBox::new(200, 100, 12, 12), BLUE);
        let reading = MarkerLocator::new(MarkerConfig::default())
            .locate(&context(img))
            .unwrap();
        assert_eq!(reading.source, MarkerSource::Primary);
        assert_eq!(reading.bounds, BoundingBox::new(110, 60, 6, 6));
    }

    #[test]
    fn small_regions_do_not_count() {
        let mut img = blank();
        // 4x5 = 20 pixels, not above the floor
        fill(&mut img, BoundingBox::new(150, 80, 4, 5), RED);
        let locator = MarkerLocator::new(MarkerConfig::default());
        let ctx = context(img);
        assert!(locator.locate(&ctx).is_none());
        assert_eq!(locator.distance(&ctx), NOT_FOUND_DISTANCE);
    }

    #[test]
    fn outside_search_area_is_ignored() {
        let mut img = blank();
        fill(&mut img, BoundingBox::new(10, 250, 10, 10), RED);
        assert!(MarkerLocator::new(MarkerConfig::default())
            .locate(&context(img))
            .is_none());
    }
}
