use crate::common::Point;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::calibrator::ActorBars;
use super::core::{Entity, EntityCategory};
use super::marker::{MarkerReading, NOT_FOUND_DISTANCE};

/// Stages of one detection cycle, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStage {
    Convert,
    Bars,
    Entities,
    Marker,
    Selection,
}

/// Wall time spent per stage of a cycle, in microseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleTimings {
    stages_us: IndexMap<CycleStage, u64>,
    total_us: u64,
}

impl CycleTimings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a stage, accumulating if it ran more than once
    pub fn record(&mut self, stage: CycleStage, duration: Duration) {
        *self.stages_us.entry(stage).or_insert(0) += duration.as_micros() as u64;
    }

    /// Time `work` as `stage` and hand back its result
    pub fn measure<T>(&mut self, stage: CycleStage, work: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let result = work();
        self.record(stage, start.elapsed());
        result
    }

    pub fn finalize(&mut self, start_time: Instant) {
        self.total_us = start_time.elapsed().as_micros() as u64;
    }

    pub fn stage_us(&self, stage: CycleStage) -> u64 {
        self.stages_us.get(&stage).copied().unwrap_or(0)
    }

    pub fn stages(&self) -> &IndexMap<CycleStage, u64> {
        &self.stages_us
    }

    pub fn total_us(&self) -> u64 {
        self.total_us
    }
}

/// Everything one cycle saw. Published whole and never changed afterwards,
/// so readers cannot observe a half-finished cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionSnapshot {
    /// Number of cycles completed before this one was published; 0 for the
    /// initial empty snapshot
    pub sequence: u64,
    pub frame_id: Option<Uuid>,
    pub captured_at: Option<DateTime<Utc>>,
    pub timestamp: DateTime<Utc>,
    pub viewport_center: Point,
    pub player: ActorBars,
    pub target: ActorBars,
    pub entities: Vec<Entity>,
    pub marker: Option<MarkerReading>,
    pub best_target: Option<Entity>,
    pub timings: CycleTimings,
}

impl DetectionSnapshot {
    /// Snapshot published before any frame has been processed.
    pub fn empty() -> Self {
        Self {
            sequence: 0,
            frame_id: None,
            captured_at: None,
            timestamp: Utc::now(),
            viewport_center: Point::default(),
            player: ActorBars::closed(),
            target: ActorBars::closed(),
            entities: Vec::new(),
            marker: None,
            best_target: None,
            timings: CycleTimings::new(),
        }
    }

    pub fn entities_of(&self, category: EntityCategory) -> impl Iterator<Item = &Entity> + '_ {
        self.entities.iter().filter(move |e| e.category == category)
    }

    pub fn marker_distance(&self) -> f64 {
        self.marker
            .map(|marker| marker.distance)
            .unwrap_or(NOT_FOUND_DISTANCE)
    }

    pub fn has_target(&self) -> bool {
        self.marker.is_some() || self.target.is_open()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::BoundingBox;

    #[test]
    fn timings_accumulate_per_stage() {
        let mut timings = CycleTimings::new();
        timings.record(CycleStage::Entities, Duration::from_micros(150));
        timings.record(CycleStage::Entities, Duration::from_micros(50));
        let value = timings.measure(CycleStage::Marker, || 7);
        assert_eq!(value, 7);
        assert_eq!(timings.stage_us(CycleStage::Entities), 200);
        assert_eq!(timings.stage_us(CycleStage::Bars), 0);
        assert_eq!(
            timings.stages().keys().copied().collect::<Vec<_>>(),
            vec![CycleStage::Entities, CycleStage::Marker]
        );
    }

    #[test]
    fn empty_snapshot_reports_nothing() {
        let snapshot = DetectionSnapshot::empty();
        assert_eq!(snapshot.sequence, 0);
        assert!(snapshot.entities.is_empty());
        assert_eq!(snapshot.marker_distance(), NOT_FOUND_DISTANCE);
        assert!(!snapshot.has_target());
    }

    #[test]
    fn entities_filter_by_category() {
        let mut snapshot = DetectionSnapshot::empty();
        snapshot.entities = vec![
            Entity::new(EntityCategory::PassiveCreature, BoundingBox::new(0, 0, 20, 5)),
            Entity::new(EntityCategory::AggressiveCreature, BoundingBox::new(50, 0, 20, 5)),
            Entity::new(EntityCategory::PassiveCreature, BoundingBox::new(90, 0, 20, 5)),
        ];
        assert_eq!(snapshot.entities_of(EntityCategory::PassiveCreature).count(), 2);
        assert_eq!(snapshot.entities_of(EntityCategory::SpecialCreature).count(), 0);
    }

    #[test]
    fn serializes_to_json() {
        let value = serde_json::to_value(DetectionSnapshot::empty()).unwrap();
        assert_eq!(value["player"]["overlay"], "closed");
        assert!(value["marker"].is_null());
    }
}
