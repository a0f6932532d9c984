use crate::common::{BoundingBox, Point};
use crate::config::ClusterConfig;
use tracing::debug;

/// Groups the scattered pixels of a name label into one box per label.
///
/// Points are first chained into column groups by horizontal proximity, then
/// every group is cut into rows wherever the vertical gap is too wide. That
/// keeps two labels stacked above each other apart while joining the letters
/// of a single label.
#[derive(Debug, Clone)]
pub struct EntityClusterer {
    config: ClusterConfig,
}

impl EntityClusterer {
    pub fn new(config: ClusterConfig) -> Self {
        Self { config }
    }

    /// Candidate boxes that pass the size window and lie outside the dead zone.
    pub fn cluster(&self, points: &[Point]) -> Vec<BoundingBox> {
        let raw = self.raw_clusters(points);
        let total = raw.len();
        let accepted: Vec<BoundingBox> = raw.into_iter().filter(|b| self.accepts(b)).collect();
        debug!(
            points = points.len(),
            clusters = total,
            accepted = accepted.len(),
            "Clustered entity points"
        );
        accepted
    }

    /// Every cluster before filtering, ordered by column group then row.
    pub fn raw_clusters(&self, points: &[Point]) -> Vec<BoundingBox> {
        if points.is_empty() {
            return Vec::new();
        }

        let mut sorted = points.to_vec();
        sorted.sort_unstable_by_key(|p| (p.x, p.y));

        let x_gap = self.config.x_gap as i64;
        let mut clusters = Vec::new();
        let mut start = 0;
        for i in 1..=sorted.len() {
            let split = i == sorted.len()
                || (sorted[i].x as i64 - sorted[i - 1].x as i64) > x_gap;
            if split {
                self.split_rows(&mut sorted[start..i], &mut clusters);
                start = i;
            }
        }
        clusters
    }

    fn split_rows(&self, group: &mut [Point], clusters: &mut Vec<BoundingBox>) {
        group.sort_unstable_by_key(|p| (p.y, p.x));

        let y_gap = self.config.y_gap as i64;
        let mut start = 0;
        for i in 1..=group.len() {
            let split = i == group.len() || (group[i].y as i64 - group[i - 1].y as i64) > y_gap;
            if split {
                if let Some(bounds) = BoundingBox::from_points(group[start..i].iter()) {
                    clusters.push(bounds);
                }
                start = i;
            }
        }
    }

    pub fn accepts(&self, bounds: &BoundingBox) -> bool {
        self.config.window.admits(bounds)
            && self.config.dead_zone.intersection(bounds) != Some(*bounds)
    }
}
