use crate::common::{BoundingBox, Frame, Point};
use crate::config::{CategoryConfig, DetectionConfig};
use crate::error::{ConfigError, DetectionError, VisionError};
use chrono::Utc;
use futures::future::{self, Ready};
use rayon::prelude::*;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tower::Service;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::avoidance::AvoidanceRegistry;
use super::calibrator::ActorTracker;
use super::cluster::EntityClusterer;
use super::color::ColorSpaceConverter;
use super::core::{DetectionContext, Entity, EntityCategory};
use super::marker::MarkerLocator;
use super::mask::Mask;
use super::selector::TargetSelector;
use super::snapshot::{CycleStage, CycleTimings, DetectionSnapshot};

/// Side of the box registered around a marker before growth is applied.
pub const MARKER_EXCLUSION_EXTENT: u32 = 40;

/// Runs detection cycles and publishes their snapshots.
///
/// The engine owns all cross-cycle state (bar calibration and the avoidance
/// registry). Consumers only see it through a [`DetectionHandle`], which
/// reads published snapshots and registers exclusions.
pub struct DetectionEngine {
    config: DetectionConfig,
    converter: ColorSpaceConverter,
    clusterer: EntityClusterer,
    marker: MarkerLocator,
    player: ActorTracker,
    target: ActorTracker,
    registry: Arc<AvoidanceRegistry>,
    sequence: u64,
    last_frame: Option<Uuid>,
    publisher: watch::Sender<Arc<DetectionSnapshot>>,
}

impl DetectionEngine {
    pub fn new(config: DetectionConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let (publisher, _) = watch::channel(Arc::new(DetectionSnapshot::empty()));
        info!(
            categories = config.entities.len(),
            max_reach = config.targeting.max_reach,
            "Detection engine created"
        );
        Ok(Self {
            converter: ColorSpaceConverter::new(),
            clusterer: EntityClusterer::new(config.cluster),
            marker: MarkerLocator::new(config.marker.clone()),
            player: ActorTracker::new("player", &config.player, &config.calibration),
            target: ActorTracker::new("target", &config.target, &config.calibration),
            registry: Arc::new(AvoidanceRegistry::new()),
            sequence: 0,
            last_frame: None,
            publisher,
            config,
        })
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    pub fn handle(&self) -> DetectionHandle {
        DetectionHandle {
            snapshots: self.publisher.subscribe(),
            registry: Arc::clone(&self.registry),
        }
    }

    pub fn snapshot(&self) -> Arc<DetectionSnapshot> {
        self.publisher.borrow().clone()
    }

    /// True when `frame` is the one the last cycle already ran on.
    pub fn is_stale(&self, frame: &Frame) -> bool {
        self.last_frame == Some(frame.id())
    }

    /// Swaps in a new configuration between cycles. An invalid one is
    /// rejected and the current configuration stays in force.
    pub fn apply_config(&mut self, config: DetectionConfig) -> Result<(), ConfigError> {
        if let Err(e) = config.validate() {
            warn!("Rejected configuration, keeping last known good: {}", e);
            return Err(e);
        }
        self.clusterer = EntityClusterer::new(config.cluster);
        self.marker = MarkerLocator::new(config.marker.clone());
        self.player.reconfigure(&config.player, &config.calibration);
        self.target.reconfigure(&config.target, &config.calibration);
        self.config = config;
        info!("Detection configuration applied");
        Ok(())
    }

    /// Runs one full cycle against `frame` and publishes the result.
    pub fn run_cycle(&mut self, frame: &Frame) -> Arc<DetectionSnapshot> {
        let start = Instant::now();
        let mut timings = CycleTimings::new();

        let swept = self.registry.sweep();
        if swept > 0 {
            debug!(swept, "Expired exclusion zones dropped");
        }

        let hsv = timings.measure(CycleStage::Convert, || self.converter.convert(frame));
        let context = DetectionContext::new(frame, hsv);

        let (player_widths, target_widths) = timings.measure(CycleStage::Bars, || {
            rayon::join(
                || self.player.measure(&context, &self.config.player),
                || self.target.measure(&context, &self.config.target),
            )
        });
        let player = self.player.observe(&player_widths);
        let target = self.target.observe(&target_widths);

        let mut entities = timings.measure(CycleStage::Entities, || {
            let categories: Vec<(&EntityCategory, &CategoryConfig)> =
                self.config.entities.iter().collect();
            categories
                .par_iter()
                .map(|(category, settings)| {
                    detect_entities(&context, **category, settings, &self.config, &self.clusterer)
                        .unwrap_or_else(|e| {
                            warn!("{} detection treated as not found: {}", category, e);
                            Vec::new()
                        })
                })
                .collect::<Vec<_>>()
                .into_iter()
                .flatten()
                .collect::<Vec<Entity>>()
        });

        let marker = timings.measure(CycleStage::Marker, || self.marker.locate(&context));
        if let Some(reading) = marker {
            entities.push(Entity::new(EntityCategory::TargetMarker, reading.bounds));
        }

        let best_target = timings.measure(CycleStage::Selection, || {
            TargetSelector::new(context.viewport_center, &self.registry).select_preferred(
                &entities,
                &self.config.targeting.priority,
                self.config.targeting.max_reach,
            )
        });

        timings.finalize(start);
        self.sequence += 1;
        self.last_frame = Some(frame.id());

        let snapshot = Arc::new(DetectionSnapshot {
            sequence: self.sequence,
            frame_id: Some(frame.id()),
            captured_at: Some(frame.captured_at()),
            timestamp: Utc::now(),
            viewport_center: context.viewport_center,
            player,
            target,
            entities,
            marker,
            best_target,
            timings,
        });
        debug!(
            sequence = snapshot.sequence,
            entities = snapshot.entities.len(),
            marker = snapshot.marker.is_some(),
            total_us = snapshot.timings.total_us(),
            "Detection cycle complete"
        );

        self.publisher.send_replace(Arc::clone(&snapshot));
        snapshot
    }
}

fn detect_entities(
    context: &DetectionContext,
    category: EntityCategory,
    settings: &CategoryConfig,
    config: &DetectionConfig,
    clusterer: &EntityClusterer,
) -> Result<Vec<Entity>, DetectionError> {
    let Some(roi) = context.resolve(&config.entity_roi) else {
        return Ok(Vec::new());
    };
    let mask = Mask::build(&context.hsv, roi, &settings.colors, &settings.morphology)?;
    let entities: Vec<Entity> = clusterer
        .cluster(&mask.on_points())
        .into_iter()
        .map(|bounds| Entity::new(category, bounds))
        .collect();
    debug!(%category, count = entities.len(), "Entities detected");
    Ok(entities)
}

/// Tower Service implementation so the engine composes with tower layers
impl Service<Frame> for DetectionEngine {
    type Response = Arc<DetectionSnapshot>;
    type Error = VisionError;
    type Future = Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, frame: Frame) -> Self::Future {
        future::ready(Ok(self.run_cycle(&frame)))
    }
}

/// Consumer-side access to the engine: published snapshots plus the
/// avoidance registry. Cheap to clone; never blocks on a running cycle.
#[derive(Clone)]
pub struct DetectionHandle {
    snapshots: watch::Receiver<Arc<DetectionSnapshot>>,
    registry: Arc<AvoidanceRegistry>,
}

impl DetectionHandle {
    /// Latest published snapshot; stale if no cycle has finished since the
    /// last call.
    pub fn get_snapshot(&self) -> Arc<DetectionSnapshot> {
        self.snapshots.borrow().clone()
    }

    /// Waits for the next published snapshot.
    pub async fn changed(&mut self) -> Result<Arc<DetectionSnapshot>, VisionError> {
        self.snapshots
            .changed()
            .await
            .map_err(|_| VisionError::DriverStopped)?;
        Ok(self.snapshots.borrow_and_update().clone())
    }

    pub fn register_exclusion(&self, bounds: BoundingBox, ttl_millis: u64) {
        self.registry.add(bounds, Duration::from_millis(ttl_millis));
    }

    /// Excludes a 2x2 box around a point, e.g. where a click went nowhere.
    pub fn register_point_exclusion(&self, point: Point, ttl_millis: u64) {
        self.register_exclusion(BoundingBox::around(point, 1), ttl_millis);
    }

    /// Excludes the area around the current marker, grown by `growth` pixels.
    /// Returns false when no marker is on screen.
    pub fn register_marker_exclusion(&self, growth: u32, ttl_millis: u64) -> bool {
        let Some(marker) = self.get_snapshot().marker else {
            return false;
        };
        let bounds = BoundingBox::around(marker.position, MARKER_EXCLUSION_EXTENT / 2).grow(growth);
        self.register_exclusion(bounds, ttl_millis);
        true
    }

    pub fn is_excluded(&self, bounds: &BoundingBox) -> bool {
        self.registry.is_excluded(bounds)
    }

    pub fn select_best_target(&self, category: EntityCategory, max_reach: f64) -> Option<Entity> {
        let snapshot = self.get_snapshot();
        TargetSelector::new(snapshot.viewport_center, &self.registry).select_category(
            &snapshot.entities,
            category,
            max_reach,
        )
    }

    pub fn select_preferred_target(
        &self,
        priority: &[EntityCategory],
        max_reach: f64,
    ) -> Option<Entity> {
        let snapshot = self.get_snapshot();
        TargetSelector::new(snapshot.viewport_center, &self.registry).select_preferred(
            &snapshot.entities,
            priority,
            max_reach,
        )
    }
}
