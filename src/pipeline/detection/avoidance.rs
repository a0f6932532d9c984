use crate::common::BoundingBox;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::debug;

/// A rectangle to stay away from until its time-to-live runs out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExclusionZone {
    pub bounds: BoundingBox,
    pub created_at: Instant,
    pub ttl: Duration,
}

impl ExclusionZone {
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) >= self.ttl
    }
}

/// Places that recently failed to yield a target. Expiry is lazy: zones are
/// only dropped by `sweep`, and lookups ignore expired zones on their own.
///
/// Every operation takes the same lock, so a lookup never sees a half-done
/// sweep or insert.
#[derive(Debug, Default)]
pub struct AvoidanceRegistry {
    zones: Mutex<Vec<ExclusionZone>>,
}

impl AvoidanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // The zone list stays consistent even if a holder panicked.
    fn zones(&self) -> MutexGuard<'_, Vec<ExclusionZone>> {
        self.zones.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add(&self, bounds: BoundingBox, ttl: Duration) {
        self.add_at(bounds, ttl, Instant::now());
    }

    pub fn add_at(&self, bounds: BoundingBox, ttl: Duration, now: Instant) {
        debug!(?bounds, ttl_ms = ttl.as_millis() as u64, "Exclusion zone added");
        self.zones().push(ExclusionZone {
            bounds,
            created_at: now,
            ttl,
        });
    }

    /// True when `bounds` overlaps any zone that is still live.
    pub fn is_excluded(&self, bounds: &BoundingBox) -> bool {
        self.is_excluded_at(bounds, Instant::now())
    }

    pub fn is_excluded_at(&self, bounds: &BoundingBox, now: Instant) -> bool {
        self.zones()
            .iter()
            .any(|zone| !zone.is_expired(now) && zone.bounds.overlaps(bounds))
    }

    /// Drops expired zones and returns how many went.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut zones = self.zones();
        let before = zones.len();
        zones.retain(|zone| !zone.is_expired(now));
        let removed = before - zones.len();
        if removed > 0 {
            debug!(removed, remaining = zones.len(), "Swept expired exclusion zones");
        }
        removed
    }

    /// Live zones, oldest first.
    pub fn active_zones(&self) -> Vec<ExclusionZone> {
        let now = Instant::now();
        self.zones()
            .iter()
            .filter(|zone| !zone.is_expired(now))
            .copied()
            .collect()
    }

    pub fn clear(&self) {
        self.zones().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn excluded_until_ttl_has_fully_elapsed() {
        let registry = AvoidanceRegistry::new();
        let zone = BoundingBox::new(100, 100, 20, 20);
        let start = Instant::now();
        registry.add_at(zone, Duration::from_millis(500), start);

        assert!(registry.is_excluded_at(&zone, start));
        assert!(registry.is_excluded_at(&zone, start + Duration::from_millis(499)));
        assert!(!registry.is_excluded_at(&zone, start + Duration::from_millis(500)));
    }

    #[test]
    fn only_overlapping_bounds_are_excluded() {
        let registry = AvoidanceRegistry::new();
        let start = Instant::now();
        registry.add_at(BoundingBox::new(100, 100, 20, 20), Duration::from_secs(5), start);

        assert!(registry.is_excluded_at(&BoundingBox::new(119, 119, 1, 1), start));
        // sharing an edge is not overlapping
        assert!(!registry.is_excluded_at(&BoundingBox::new(120, 100, 5, 5), start));
        assert!(!registry.is_excluded_at(&BoundingBox::new(0, 0, 10, 10), start));
    }

    #[test]
    fn sweep_drops_only_expired_zones() {
        let registry = AvoidanceRegistry::new();
        let start = Instant::now();
        registry.add_at(BoundingBox::new(0, 0, 10, 10), Duration::from_millis(100), start);
        registry.add_at(BoundingBox::new(50, 50, 10, 10), Duration::from_secs(60), start);

        assert_eq!(registry.sweep_at(start + Duration::from_millis(50)), 0);
        assert_eq!(registry.sweep_at(start + Duration::from_millis(150)), 1);
        assert!(registry.is_excluded_at(&BoundingBox::new(55, 55, 1, 1), start));
        assert_eq!(registry.active_zones().len(), 1);
    }

    #[test]
    fn concurrent_adds_and_sweeps_are_safe() {
        let registry = Arc::new(AvoidanceRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for j in 0..100 {
                        let bounds = BoundingBox::new(i * 100, j, 5, 5);
                        registry.add(bounds, Duration::from_secs(60));
                        assert!(registry.is_excluded(&bounds));
                        registry.sweep();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.active_zones().len(), 800);
    }
}
