use crate::common::{BoundingBox, Point};
use std::time::Instant;

use super::avoidance::AvoidanceRegistry;
use super::core::{Entity, EntityCategory};

/// Picks the closest reachable entity that is not in an exclusion zone.
/// Distances are measured from `origin`, normally the viewport centre.
#[derive(Debug, Clone, Copy)]
pub struct TargetSelector<'a> {
    origin: Point,
    registry: &'a AvoidanceRegistry,
}

impl<'a> TargetSelector<'a> {
    pub fn new(origin: Point, registry: &'a AvoidanceRegistry) -> Self {
        Self { origin, registry }
    }

    pub fn select(&self, candidates: &[Entity], max_reach: f64) -> Option<Entity> {
        self.select_at(candidates, max_reach, Instant::now())
    }

    /// Nearest survivor by interaction point; on equal distance the earlier
    /// candidate wins.
    pub fn select_at(&self, candidates: &[Entity], max_reach: f64, now: Instant) -> Option<Entity> {
        let mut best: Option<(f64, Entity)> = None;
        for candidate in candidates {
            let point = candidate.interaction_point();
            let distance = point.distance_to(&self.origin);
            if distance > max_reach {
                continue;
            }
            if self
                .registry
                .is_excluded_at(&BoundingBox::new(point.x, point.y, 1, 1), now)
            {
                continue;
            }
            match best {
                Some((closest, _)) if closest <= distance => {}
                _ => best = Some((distance, *candidate)),
            }
        }
        best.map(|(_, entity)| entity)
    }

    /// Nearest candidate of `category` only.
    pub fn select_category(
        &self,
        entities: &[Entity],
        category: EntityCategory,
        max_reach: f64,
    ) -> Option<Entity> {
        let candidates: Vec<Entity> = entities
            .iter()
            .filter(|entity| entity.category == category)
            .copied()
            .collect();
        self.select(&candidates, max_reach)
    }

    /// Tries each category in turn and returns the first that yields a target.
    pub fn select_preferred(
        &self,
        entities: &[Entity],
        priority: &[EntityCategory],
        max_reach: f64,
    ) -> Option<Entity> {
        priority
            .iter()
            .find_map(|category| self.select_category(entities, *category, max_reach))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const CENTER: Point = Point { x: 640, y: 360 };

    /// 40x10 box whose interaction point lands on `(x, y)`.
    fn entity_at(category: EntityCategory, x: i32, y: i32) -> Entity {
        Entity::new(category, BoundingBox::new(x - 20, y - 9, 40, 10))
    }

    fn scenario() -> Vec<Entity> {
        vec![
            entity_at(EntityCategory::PassiveCreature, CENTER.x + 481, CENTER.y),
            entity_at(EntityCategory::PassiveCreature, CENTER.x, CENTER.y + 263),
            entity_at(EntityCategory::PassiveCreature, CENTER.x + 14, CENTER.y),
        ]
    }

    #[test]
    fn nearest_within_reach_then_next_after_exclusion() {
        let registry = AvoidanceRegistry::new();
        let candidates = scenario();
        let selector = TargetSelector::new(CENTER, &registry);

        let first = selector.select(&candidates, 325.0).unwrap();
        assert_eq!(first, candidates[2]);

        registry.add(first.bounds, Duration::from_secs(10));
        let second = selector.select(&candidates, 325.0).unwrap();
        assert_eq!(second, candidates[1]);
    }

    #[test]
    fn nothing_within_reach_yields_none() {
        let registry = AvoidanceRegistry::new();
        let selector = TargetSelector::new(CENTER, &registry);
        assert!(selector.select(&scenario(), 10.0).is_none());
        assert!(selector.select(&[], 1000.0).is_none());
    }

    #[test]
    fn equal_distances_keep_input_order() {
        let registry = AvoidanceRegistry::new();
        let selector = TargetSelector::new(CENTER, &registry);
        let left = entity_at(EntityCategory::PassiveCreature, CENTER.x - 50, CENTER.y);
        let right = entity_at(EntityCategory::PassiveCreature, CENTER.x + 50, CENTER.y);
        assert_eq!(selector.select(&[left, right], 325.0), Some(left));
        assert_eq!(selector.select(&[right, left], 325.0), Some(right));
    }

    #[test]
    fn expired_exclusion_no_longer_blocks() {
        let registry = AvoidanceRegistry::new();
        let selector = TargetSelector::new(CENTER, &registry);
        let candidate = entity_at(EntityCategory::PassiveCreature, CENTER.x + 14, CENTER.y);
        let start = Instant::now();
        registry.add_at(candidate.bounds, Duration::from_millis(200), start);

        assert!(selector.select_at(&[candidate], 325.0, start).is_none());
        assert_eq!(
            selector.select_at(&[candidate], 325.0, start + Duration::from_millis(200)),
            Some(candidate)
        );
    }

    #[test]
    fn preferred_categories_are_tried_in_order() {
        let registry = AvoidanceRegistry::new();
        let selector = TargetSelector::new(CENTER, &registry);
        let passive = entity_at(EntityCategory::PassiveCreature, CENTER.x + 5, CENTER.y);
        let aggressive = entity_at(EntityCategory::AggressiveCreature, CENTER.x + 200, CENTER.y);
        let entities = [passive, aggressive];

        let priority = [EntityCategory::AggressiveCreature, EntityCategory::PassiveCreature];
        assert_eq!(selector.select_preferred(&entities, &priority, 325.0), Some(aggressive));
        assert_eq!(selector.select_preferred(&entities, &priority, 100.0), Some(passive));
        assert_eq!(
            selector.select_category(&entities, EntityCategory::SpecialCreature, 325.0),
            None
        );
    }

    #[test]
    fn never_returns_out_of_reach_or_excluded() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..200 {
            let registry = AvoidanceRegistry::new();
            let candidates: Vec<Entity> = (0..rng.random_range(0..20))
                .map(|_| {
                    entity_at(
                        EntityCategory::PassiveCreature,
                        rng.random_range(0..1280),
                        rng.random_range(0..720),
                    )
                })
                .collect();
            for candidate in candidates.iter().filter(|_| rng.random_bool(0.3)) {
                registry.add(candidate.bounds, Duration::from_secs(60));
            }
            let reach = rng.random_range(10.0..800.0);
            let selector = TargetSelector::new(CENTER, &registry);
            let picked = selector.select(&candidates, reach);
            assert_eq!(picked, selector.select(&candidates, reach));
            if let Some(entity) = picked {
                let point = entity.interaction_point();
                assert!(point.distance_to(&CENTER) <= reach);
                assert!(!registry.is_excluded(&BoundingBox::new(point.x, point.y, 1, 1)));
            }
        }
    }
}
