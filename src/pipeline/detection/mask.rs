use crate::common::{BoundingBox, Point};
use crate::config::MorphologyConfig;
use crate::error::DetectionError;

use super::color::HsvFrame;
use super::core::ColorRange;

/// Binary membership mask over one ROI of a frame. Coordinates passed to
/// `get`/`set` are local to the ROI; `origin` maps them back to the screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    origin: BoundingBox,
    cells: Vec<bool>,
}

impl Mask {
    pub fn empty() -> Self {
        Self {
            origin: BoundingBox::default(),
            cells: Vec::new(),
        }
    }

    pub fn from_cells(origin: BoundingBox, cells: Vec<bool>) -> Result<Self, DetectionError> {
        if cells.len() as u64 != origin.area() {
            return Err(DetectionError::DimensionMismatch {
                width: origin.width,
                height: origin.height,
                actual: cells.len(),
            });
        }
        Ok(Self { origin, cells })
    }

    /// Raw (unsmoothed) membership of every pixel of `roi` in any of `ranges`.
    /// `roi` must already be clipped to the frame.
    pub fn threshold(
        hsv: &HsvFrame,
        roi: BoundingBox,
        ranges: &[ColorRange],
    ) -> Result<Self, DetectionError> {
        if roi.is_empty() {
            return Ok(Self::empty());
        }
        if hsv.bounds().intersection(&roi) != Some(roi) {
            return Err(DetectionError::InvariantViolation(format!(
                "ROI {:?} extends past the {}x{} frame",
                roi,
                hsv.width(),
                hsv.height()
            )));
        }

        let x0 = roi.x as usize;
        let x1 = x0 + roi.width as usize;
        let mut cells = Vec::with_capacity(roi.area() as usize);
        for y in roi.y as u32..roi.bottom() as u32 {
            let row = &hsv.row(y)[x0..x1];
            cells.extend(
                row.iter()
                    .map(|&px| ranges.iter().any(|range| range.contains(px))),
            );
        }
        Ok(Self { origin: roi, cells })
    }

    /// Thresholds and then denoises according to `morphology`.
    pub fn build(
        hsv: &HsvFrame,
        roi: BoundingBox,
        ranges: &[ColorRange],
        morphology: &MorphologyConfig,
    ) -> Result<Self, DetectionError> {
        let mut mask = Self::threshold(hsv, roi, ranges)?;
        mask.smooth(morphology);
        Ok(mask)
    }

    pub fn origin(&self) -> BoundingBox {
        self.origin
    }

    pub fn width(&self) -> u32 {
        self.origin.width
    }

    pub fn height(&self) -> u32 {
        self.origin.height
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> bool {
        self.cells[y as usize * self.origin.width as usize + x as usize]
    }

    pub fn set(&mut self, x: u32, y: u32, on: bool) {
        let index = y as usize * self.origin.width as usize + x as usize;
        self.cells[index] = on;
    }

    pub fn count_on(&self) -> usize {
        self.cells.iter().filter(|&&on| on).count()
    }

    /// Screen coordinates of every "on" pixel in row-major order.
    pub fn on_points(&self) -> Vec<Point> {
        let width = self.origin.width as usize;
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, &on)| on)
            .map(|(i, _)| {
                Point::new(
                    self.origin.x + (i % width) as i32,
                    self.origin.y + (i / width) as i32,
                )
            })
            .collect()
    }

    /// Opening removes speckle; closing, when enabled, bridges the
    /// anti-aliasing gaps inside continuous fills.
    pub fn smooth(&mut self, morphology: &MorphologyConfig) {
        let kernel = morphology.kernel;
        if self.is_empty() || kernel <= 1 {
            return;
        }
        for _ in 0..morphology.iterations {
            self.open(kernel);
        }
        if morphology.close {
            for _ in 0..morphology.iterations {
                self.close(kernel);
            }
        }
    }

    pub fn open(&mut self, kernel: u32) {
        self.erode(kernel);
        self.dilate(kernel);
    }

    pub fn close(&mut self, kernel: u32) {
        self.dilate(kernel);
        self.erode(kernel);
    }

    /// Square-kernel erosion. Pixels beyond the ROI border are treated as on,
    /// so shapes touching the border are not eaten from outside.
    pub fn erode(&mut self, kernel: u32) {
        let (before, after) = kernel_reach(kernel);
        self.filter(before, after, Reduce::All);
    }

    /// Square-kernel dilation with the reflected kernel, so that `erode`
    /// followed by `dilate` is a true opening for even kernels too.
    pub fn dilate(&mut self, kernel: u32) {
        let (before, after) = kernel_reach(kernel);
        self.filter(after, before, Reduce::Any);
    }

    // A square kernel is separable: filter rows, then columns.
    fn filter(&mut self, before: usize, after: usize, reduce: Reduce) {
        let width = self.origin.width as usize;
        let height = self.origin.height as usize;
        let mut line = Vec::with_capacity(width.max(height));

        for y in 0..height {
            line.clear();
            line.extend_from_slice(&self.cells[y * width..(y + 1) * width]);
            let filtered = filter_line(&line, before, after, reduce);
            self.cells[y * width..(y + 1) * width].copy_from_slice(&filtered);
        }
        for x in 0..width {
            line.clear();
            line.extend((0..height).map(|y| self.cells[y * width + x]));
            let filtered = filter_line(&line, before, after, reduce);
            for (y, on) in filtered.into_iter().enumerate() {
                self.cells[y * width + x] = on;
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Reduce {
    All,
    Any,
}

// Anchor sits at the kernel centre, as in the usual structuring-element convention.
fn kernel_reach(kernel: u32) -> (usize, usize) {
    let kernel = kernel.max(1) as usize;
    let anchor = kernel / 2;
    (anchor, kernel - 1 - anchor)
}

fn filter_line(line: &[bool], before: usize, after: usize, reduce: Reduce) -> Vec<bool> {
    let mut prefix = Vec::with_capacity(line.len() + 1);
    prefix.push(0usize);
    for &on in line {
        let last = *prefix.last().unwrap_or(&0);
        prefix.push(last + on as usize);
    }

    (0..line.len())
        .map(|i| {
            let start = i.saturating_sub(before);
            let end = (i + after + 1).min(line.len());
            let on = prefix[end] - prefix[start];
            match reduce {
                Reduce::All => on == end - start,
                Reduce::Any => on > 0,
            }
        })
        .collect()
}
