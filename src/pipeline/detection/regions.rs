use crate::common::BoundingBox;
use serde::Serialize;

use super::mask::Mask;

/// A maximal 4-connected group of "on" pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Region {
    /// Screen-space bounds
    pub bounds: BoundingBox,
    /// Number of "on" pixels, not the box area
    pub area: u32,
}

/// Labels connected components of a mask. Only edge neighbours connect, so two
/// pixels touching at a corner stay apart: any "off" pixel between components
/// separates them.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectedRegionExtractor;

impl ConnectedRegionExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Components in row-major order of their first pixel.
    pub fn extract(&self, mask: &Mask) -> Vec<Region> {
        if mask.is_empty() {
            return Vec::new();
        }
        let width = mask.width();
        let height = mask.height();
        let origin = mask.origin();
        let mut visited = vec![false; width as usize * height as usize];
        let mut stack = Vec::new();
        let mut regions = Vec::new();

        for y in 0..height {
            for x in 0..width {
                let index = y as usize * width as usize + x as usize;
                if visited[index] || !mask.get(x, y) {
                    continue;
                }

                visited[index] = true;
                stack.push((x, y));
                let (mut min_x, mut min_y, mut max_x, mut max_y) = (x, y, x, y);
                let mut area = 0u32;

                while let Some((cx, cy)) = stack.pop() {
                    area += 1;
                    min_x = min_x.min(cx);
                    max_x = max_x.max(cx);
                    min_y = min_y.min(cy);
                    max_y = max_y.max(cy);

                    let neighbours = [
                        (cx.wrapping_sub(1), cy),
                        (cx + 1, cy),
                        (cx, cy.wrapping_sub(1)),
                        (cx, cy + 1),
                    ];
                    for (nx, ny) in neighbours {
                        if nx >= width || ny >= height {
                            continue;
                        }
                        let n = ny as usize * width as usize + nx as usize;
                        if !visited[n] && mask.get(nx, ny) {
                            visited[n] = true;
                            stack.push((nx, ny));
                        }
                    }
                }

                regions.push(Region {
                    bounds: BoundingBox::new(
                        origin.x + min_x as i32,
                        origin.y + min_y as i32,
                        max_x - min_x + 1,
                        max_y - min_y + 1,
                    ),
                    area,
                });
            }
        }

        regions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask(origin: (i32, i32), rows: &[&str]) -> Mask {
        let height = rows.len() as u32;
        let width = rows[0].len() as u32;
        let cells = rows
            .iter()
            .flat_map(|row| row.chars().map(|c| c == '#'))
            .collect();
        Mask::from_cells(BoundingBox::new(origin.0, origin.1, width, height), cells).unwrap()
    }

    #[test]
    fn separate_blobs_stay_separate() {
        let regions = ConnectedRegionExtractor::new().extract(&mask(
            (0, 0),
            &["##..#", "##..#", ".....", "###.."],
        ));
        assert_eq!(regions.len(), 3);
        assert_eq!(regions[0].bounds, BoundingBox::new(0, 0, 2, 2));
        assert_eq!(regions[0].area, 4);
        assert_eq!(regions[1].bounds, BoundingBox::new(4, 0, 1, 2));
        assert_eq!(regions[2].bounds, BoundingBox::new(0, 3, 3, 1));
    }

    #[test]
    fn diagonal_contact_does_not_merge() {
        let regions = ConnectedRegionExtractor::new().extract(&mask((0, 0), &["#.", ".#"]));
        assert_eq!(regions.len(), 2);
    }

    #[test]
    fn concave_shape_is_one_region_with_pixel_area() {
        let regions = ConnectedRegionExtractor::new().extract(&mask(
            (10, 20),
            &["#...#", "#...#", "#####"],
        ));
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].bounds, BoundingBox::new(10, 20, 5, 3));
        assert_eq!(regions[0].area, 9);
    }

    #[test]
    fn empty_mask_has_no_regions() {
        assert!(ConnectedRegionExtractor::new().extract(&Mask::empty()).is_empty());
    }
}
