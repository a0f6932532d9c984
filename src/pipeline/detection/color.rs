use crate::common::{BoundingBox, Frame};
use crate::error::DetectionError;
use image::Rgba;
use rayon::prelude::*;

/// One pixel in hue (degrees), saturation and value. `opaque` is false for any
/// pixel with alpha below 255.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Hsv {
    pub h: u16,
    pub s: u8,
    pub v: u8,
    pub opaque: bool,
}

impl Hsv {
    pub fn new(h: u16, s: u8, v: u8, opaque: bool) -> Self {
        Self { h, s, v, opaque }
    }

    pub fn from_rgba(pixel: &Rgba<u8>) -> Self {
        let [r, g, b, a] = pixel.0;
        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        let delta = (max - min) as f32;

        let s = if max == 0 {
            0
        } else {
            (delta * 255.0 / max as f32).round() as u8
        };

        let h = if delta == 0.0 {
            0.0
        } else if max == r {
            60.0 * ((g as f32 - b as f32) / delta)
        } else if max == g {
            60.0 * ((b as f32 - r as f32) / delta) + 120.0
        } else {
            60.0 * ((r as f32 - g as f32) / delta) + 240.0
        };
        let h = (h.rem_euclid(360.0).round() as u16) % 360;

        Self {
            h,
            s,
            v: max,
            opaque: a == 255,
        }
    }
}

/// Row-major HSV copy of a whole frame. Read-only once built, so every
/// category can scan it from its own worker.
#[derive(Debug, Clone)]
pub struct HsvFrame {
    width: u32,
    height: u32,
    pixels: Vec<Hsv>,
}

impl HsvFrame {
    pub fn from_pixels(width: u32, height: u32, pixels: Vec<Hsv>) -> Result<Self, DetectionError> {
        if pixels.len() != width as usize * height as usize {
            return Err(DetectionError::DimensionMismatch {
                width,
                height,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bounds(&self) -> BoundingBox {
        BoundingBox::new(0, 0, self.width, self.height)
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> Hsv {
        self.pixels[y as usize * self.width as usize + x as usize]
    }

    pub fn row(&self, y: u32) -> &[Hsv] {
        let start = y as usize * self.width as usize;
        &self.pixels[start..start + self.width as usize]
    }
}

/// Converts captured frames into the HSV form every matcher works on.
#[derive(Debug, Clone, Copy, Default)]
pub struct ColorSpaceConverter;

impl ColorSpaceConverter {
    pub fn new() -> Self {
        Self
    }

    pub fn convert(&self, frame: &Frame) -> HsvFrame {
        let image = frame.image();
        let (width, height) = image.dimensions();
        let pixels: Vec<Hsv> = image
            .as_raw()
            .par_chunks_exact(4)
            .map(|px| Hsv::from_rgba(&Rgba([px[0], px[1], px[2], px[3]])))
            .collect();

        HsvFrame {
            width,
            height,
            pixels,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, RgbaImage};

    #[test]
    fn primaries_map_to_expected_hues() {
        assert_eq!(Hsv::from_rgba(&Rgba([255, 0, 0, 255])), Hsv::new(0, 255, 255, true));
        assert_eq!(Hsv::from_rgba(&Rgba([0, 255, 0, 255])), Hsv::new(120, 255, 255, true));
        assert_eq!(Hsv::from_rgba(&Rgba([0, 0, 255, 255])), Hsv::new(240, 255, 255, true));
        assert_eq!(Hsv::from_rgba(&Rgba([128, 128, 128, 255])), Hsv::new(0, 0, 128, true));
    }

    #[test]
    fn name_colours_land_in_default_windows() {
        // passive label yellow and the red selection marker
        let passive = Hsv::from_rgba(&Rgba([234, 234, 149, 255]));
        assert_eq!((passive.h, passive.v), (60, 234));
        assert_eq!(passive.s, 93);
        let marker = Hsv::from_rgba(&Rgba([246, 90, 106, 255]));
        assert_eq!(marker.h, 354);
    }

    #[test]
    fn alpha_below_full_is_not_opaque() {
        assert!(!Hsv::from_rgba(&Rgba([10, 20, 30, 254])).opaque);
    }

    #[test]
    fn convert_preserves_layout() {
        let mut img: RgbaImage = ImageBuffer::from_pixel(4, 3, Rgba([0, 0, 0, 255]));
        img.put_pixel(3, 2, Rgba([0, 0, 255, 255]));
        let hsv = ColorSpaceConverter::new().convert(&Frame::capture(img));
        assert_eq!((hsv.width(), hsv.height()), (4, 3));
        assert_eq!(hsv.get(3, 2).h, 240);
        assert_eq!(hsv.get(0, 0).v, 0);
    }

    #[test]
    fn mismatched_buffer_is_rejected() {
        let err = HsvFrame::from_pixels(2, 2, vec![Hsv::default(); 3]).unwrap_err();
        assert_eq!(
            err,
            DetectionError::DimensionMismatch {
                width: 2,
                height: 2,
                actual: 3
            }
        );
    }
}
