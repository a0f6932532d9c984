use serde::{Deserialize, Serialize};

/// Screen-space pixel coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point
    pub fn distance_to(&self, other: &Point) -> f64 {
        let dx = (self.x - other.x) as f64;
        let dy = (self.y - other.y) as f64;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Axis-aligned rectangle in screen pixels. `width`/`height` count pixels, so a
/// single pixel has a 1x1 box and an empty box covers nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Tight box around a set of points, `None` when the set is empty.
    pub fn from_points<'a, I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a Point>,
    {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
        for p in iter {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        Some(Self::new(
            min_x,
            min_y,
            (max_x - min_x) as u32 + 1,
            (max_y - min_y) as u32 + 1,
        ))
    }

    /// Square box of side `2 * half_extent` centred on `point`.
    pub fn around(point: Point, half_extent: u32) -> Self {
        let half = i32::try_from(half_extent).unwrap_or(i32::MAX);
        let side = half_extent.saturating_mul(2);
        Self::new(point.x.saturating_sub(half), point.y.saturating_sub(half), side, side)
    }

    /// Exclusive right edge
    pub fn right(&self) -> i32 {
        self.x.saturating_add_unsigned(self.width)
    }

    /// Exclusive bottom edge
    pub fn bottom(&self) -> i32 {
        self.y.saturating_add_unsigned(self.height)
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn center(&self) -> Point {
        Point::new(
            self.x + (self.width / 2) as i32,
            self.y + (self.height / 2) as i32,
        )
    }

    /// Horizontal centre of the bottom pixel row: where the labelled thing
    /// touches the ground, and therefore where a click interacts with it.
    pub fn bottom_center(&self) -> Point {
        Point::new(
            self.x + (self.width / 2) as i32,
            self.y + self.height.saturating_sub(1) as i32,
        )
    }

    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.x && point.x < self.right() && point.y >= self.y && point.y < self.bottom()
    }

    /// Strict axis-aligned overlap; boxes that merely share an edge do not overlap.
    pub fn overlaps(&self, other: &BoundingBox) -> bool {
        self.x < other.right()
            && self.right() > other.x
            && self.y < other.bottom()
            && self.bottom() > other.y
    }

    pub fn intersection(&self, other: &BoundingBox) -> Option<BoundingBox> {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.right().min(other.right());
        let y1 = self.bottom().min(other.bottom());
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(BoundingBox::new(x0, y0, x1.abs_diff(x0), y1.abs_diff(y0)))
    }

    /// Expands the box by `amount` in total along each axis, keeping it centred.
    pub fn grow(&self, amount: u32) -> BoundingBox {
        let half = (amount / 2) as i32;
        BoundingBox::new(
            self.x.saturating_sub(half),
            self.y.saturating_sub(half),
            self.width.saturating_add(amount),
            self.height.saturating_add(amount),
        )
    }

    pub fn translate(&self, dx: i32, dy: i32) -> BoundingBox {
        BoundingBox::new(self.x + dx, self.y + dy, self.width, self.height)
    }
}
