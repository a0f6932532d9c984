use crate::config::{ActorConfig, CalibrationConfig};
use crate::error::DetectionError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

use super::core::DetectionContext;
use super::mask::Mask;
use super::regions::ConnectedRegionExtractor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarKind {
    Hp,
    Mp,
    Fp,
}

impl fmt::Display for BarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BarKind::Hp => "hp",
            BarKind::Mp => "mp",
            BarKind::Fp => "fp",
        })
    }
}

/// Where the ceiling gate stands after the latest observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationPhase {
    /// Width just changed (or nothing observed yet)
    Idle,
    /// Width has repeated at least once; counting toward the window
    StableCounting,
    /// This observation committed a new ceiling
    Committed,
}

/// Counts consecutive unchanged widths and decides when a stable width may
/// become the new ceiling.
#[derive(Debug, Clone)]
pub struct StabilityGate {
    window: u32,
    phase: CalibrationPhase,
    stable_frames: u32,
    previous_width: u32,
}

impl StabilityGate {
    pub fn new(window: u32) -> Self {
        Self {
            window,
            phase: CalibrationPhase::Idle,
            stable_frames: 0,
            previous_width: 0,
        }
    }

    pub fn phase(&self) -> CalibrationPhase {
        self.phase
    }

    pub fn stable_frames(&self) -> u32 {
        self.stable_frames
    }

    pub fn set_window(&mut self, window: u32) {
        self.window = window;
    }

    /// Feeds one cycle's width. Returns true when the width has been stable
    /// for the whole window and beats `ceiling`; the counter restarts then.
    pub fn observe(&mut self, width: u32, ceiling: u32) -> bool {
        if width == self.previous_width {
            self.stable_frames += 1;
            self.phase = CalibrationPhase::StableCounting;
        } else {
            self.stable_frames = 0;
            self.previous_width = width;
            self.phase = CalibrationPhase::Idle;
        }

        if self.stable_frames >= self.window && width > ceiling {
            self.stable_frames = 0;
            self.phase = CalibrationPhase::Committed;
            return true;
        }
        false
    }
}

/// Calibrated reading of one bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BarState {
    pub observed_width: u32,
    /// Widest width ever accepted; never decreases
    pub max_width_ever: u32,
    /// Always within `0..=100`
    pub percentage: u8,
    pub stable_frame_count: u32,
    pub phase: CalibrationPhase,
}

impl Default for BarState {
    fn default() -> Self {
        Self {
            observed_width: 0,
            max_width_ever: 0,
            percentage: 0,
            stable_frame_count: 0,
            phase: CalibrationPhase::Idle,
        }
    }
}

/// Turns a bar's detected width into a percentage by learning the bar's full
/// width from what it sees, since that depends on UI scale.
#[derive(Debug, Clone)]
pub struct BarCalibrator {
    state: BarState,
    gate: StabilityGate,
}

impl BarCalibrator {
    pub fn new(stability_window: u32) -> Self {
        Self {
            state: BarState::default(),
            gate: StabilityGate::new(stability_window),
        }
    }

    pub fn state(&self) -> BarState {
        self.state
    }

    pub fn set_stability_window(&mut self, window: u32) {
        self.gate.set_window(window);
    }

    /// Any width above the ceiling raises it at once, so within this
    /// calibrator the gate never finds a stable run above the ceiling and
    /// `Committed` is not reported. The gate still tracks the stable count.
    pub fn observe(&mut self, width: u32) -> BarState {
        let mut ceiling = self.state.max_width_ever;
        self.gate.observe(width, ceiling);
        // A stale ceiling must never push the percentage past 100.
        if width > ceiling {
            debug!(width, previous = ceiling, "Bar ceiling raised");
            ceiling = width;
        }

        let percentage = if ceiling == 0 {
            0
        } else {
            (width as f64 / ceiling as f64 * 100.0).round().clamp(0.0, 100.0) as u8
        };

        self.state = BarState {
            observed_width: width,
            max_width_ever: ceiling,
            percentage,
            stable_frame_count: self.gate.stable_frames(),
            phase: self.gate.phase(),
        };
        self.state
    }
}

/// Whether an actor's bar overlay is on screen at all. `Closed` is distinct
/// from a bar that reads zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayState {
    Open,
    Closed,
}

/// Published view of one actor's bars.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActorBars {
    pub overlay: OverlayState,
    pub bars: IndexMap<BarKind, BarState>,
    pub alive: bool,
    /// Full HP, no MP and no FP: how non-player characters present
    pub npc: bool,
}

impl ActorBars {
    pub fn closed() -> Self {
        Self {
            overlay: OverlayState::Closed,
            bars: IndexMap::new(),
            alive: false,
            npc: false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.overlay == OverlayState::Open
    }

    /// `None` while the overlay is closed or the bar is not tracked.
    pub fn percentage(&self, kind: BarKind) -> Option<u8> {
        if !self.is_open() {
            return None;
        }
        self.bars.get(&kind).map(|bar| bar.percentage)
    }
}

/// Widest plausible region of `ranges` in the actor's ROI, 0 when none.
pub fn measure_bar_width(
    context: &DetectionContext,
    actor: &ActorConfig,
    kind: BarKind,
) -> Result<u32, DetectionError> {
    let Some(ranges) = actor.bars.get(&kind) else {
        return Ok(0);
    };
    let Some(roi) = context.resolve(&actor.roi) else {
        return Ok(0);
    };

    let mask = Mask::build(&context.hsv, roi, ranges, &actor.morphology)?;
    let width = ConnectedRegionExtractor::new()
        .extract(&mask)
        .iter()
        .filter(|region| actor.window.admits(&region.bounds))
        .map(|region| region.bounds.width)
        .max()
        .unwrap_or(0);

    if width > roi.width {
        return Err(DetectionError::InvariantViolation(format!(
            "{} bar width {} exceeds its ROI width {}",
            kind, width, roi.width
        )));
    }
    Ok(width)
}

/// Cross-cycle calibration state for one actor's bars.
#[derive(Debug, Clone)]
pub struct ActorTracker {
    name: &'static str,
    calibrators: IndexMap<BarKind, BarCalibrator>,
    closed_after: u32,
    zero_cycles: u32,
    overlay: OverlayState,
}

impl ActorTracker {
    pub fn new(name: &'static str, actor: &ActorConfig, calibration: &CalibrationConfig) -> Self {
        let calibrators = actor
            .bars
            .keys()
            .map(|kind| (*kind, BarCalibrator::new(calibration.stability_window)))
            .collect();
        Self {
            name,
            calibrators,
            closed_after: calibration.closed_after,
            zero_cycles: 0,
            overlay: OverlayState::Closed,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Applies a reloaded configuration. Bars that are still configured keep
    /// their learned ceilings.
    pub fn reconfigure(&mut self, actor: &ActorConfig, calibration: &CalibrationConfig) {
        let mut calibrators = IndexMap::new();
        for kind in actor.bars.keys() {
            let mut calibrator = self
                .calibrators
                .shift_remove(kind)
                .unwrap_or_else(|| BarCalibrator::new(calibration.stability_window));
            calibrator.set_stability_window(calibration.stability_window);
            calibrators.insert(*kind, calibrator);
        }
        self.calibrators = calibrators;
        self.closed_after = calibration.closed_after;
    }

    /// Measures every configured bar. Read-only, so actors can be measured in
    /// parallel. A failed measurement is logged and reads as "no bar".
    pub fn measure(&self, context: &DetectionContext, actor: &ActorConfig) -> IndexMap<BarKind, u32> {
        self.calibrators
            .keys()
            .map(|kind| {
                let width = measure_bar_width(context, actor, *kind).unwrap_or_else(|e| {
                    warn!("{} {} bar treated as not found: {}", self.name, kind, e);
                    0
                });
                (*kind, width)
            })
            .collect()
    }

    pub fn observe(&mut self, widths: &IndexMap<BarKind, u32>) -> ActorBars {
        let mut bars = IndexMap::new();
        for (kind, calibrator) in self.calibrators.iter_mut() {
            let width = widths.get(kind).copied().unwrap_or(0);
            bars.insert(*kind, calibrator.observe(width));
        }

        let all_zero = bars.values().all(|bar| bar.observed_width == 0);
        if all_zero {
            self.zero_cycles = self.zero_cycles.saturating_add(1);
            if self.zero_cycles >= self.closed_after && self.overlay == OverlayState::Open {
                info!("{} bar overlay closed", self.name);
                self.overlay = OverlayState::Closed;
            }
        } else {
            self.zero_cycles = 0;
            if self.overlay == OverlayState::Closed {
                info!("{} bar overlay opened", self.name);
                self.overlay = OverlayState::Open;
            }
        }

        let percentage = |kind: BarKind| bars.get(&kind).map(|bar| bar.percentage);
        let alive = percentage(BarKind::Hp).unwrap_or(0) > 0;
        let npc = percentage(BarKind::Hp) == Some(100)
            && percentage(BarKind::Mp).unwrap_or(0) == 0
            && percentage(BarKind::Fp).unwrap_or(0) == 0;

        ActorBars {
            overlay: self.overlay,
            bars,
            alive,
            npc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn calibration() -> CalibrationConfig {
        CalibrationConfig::default()
    }

    #[test]
    fn first_sighting_sets_ceiling_and_half_width_reads_fifty() {
        let mut calibrator = BarCalibrator::new(30);
        let first = calibrator.observe(90);
        assert_eq!(first.max_width_ever, 90);
        assert_eq!(first.percentage, 100);

        let second = calibrator.observe(45);
        assert_eq!(second.percentage, 50);
        assert_eq!(second.max_width_ever, 90);
    }

    #[test]
    fn zero_ceiling_reads_zero() {
        let mut calibrator = BarCalibrator::new(30);
        let state = calibrator.observe(0);
        assert_eq!(state.max_width_ever, 0);
        assert_eq!(state.percentage, 0);
    }

    #[test]
    fn percentage_stays_bounded_and_ceiling_never_drops() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..50 {
            let mut calibrator = BarCalibrator::new(rng.random_range(1..40));
            let mut last_ceiling = 0;
            for _ in 0..500 {
                let width = if rng.random_bool(0.3) {
                    calibrator.state().observed_width
                } else {
                    rng.random_range(0..400)
                };
                let state = calibrator.observe(width);
                assert!(state.percentage <= 100);
                assert!(state.max_width_ever >= last_ceiling);
                assert!(state.max_width_ever >= state.observed_width);
                last_ceiling = state.max_width_ever;
            }
        }
    }

    #[test]
    fn stable_counter_resets_on_change() {
        let mut calibrator = BarCalibrator::new(30);
        calibrator.observe(50);
        calibrator.observe(50);
        let state = calibrator.observe(50);
        assert_eq!(state.stable_frame_count, 2);
        assert_eq!(state.phase, CalibrationPhase::StableCounting);

        let state = calibrator.observe(49);
        assert_eq!(state.stable_frame_count, 0);
        assert_eq!(state.phase, CalibrationPhase::Idle);
    }

    #[test]
    fn calibrator_raises_ceiling_before_the_gate_can_commit() {
        let mut calibrator = BarCalibrator::new(3);
        calibrator.observe(80);
        for _ in 0..20 {
            let state = calibrator.observe(120);
            assert_eq!(state.max_width_ever, 120);
            assert_eq!(state.percentage, 100);
            assert_ne!(state.phase, CalibrationPhase::Committed);
        }
        assert_eq!(calibrator.state().stable_frame_count, 19);
    }

    #[test]
    fn gate_commits_only_after_full_window_above_ceiling() {
        let mut gate = StabilityGate::new(30);
        assert!(!gate.observe(80, 100));
        // the first 120 resets the count, the next 29 raise it to 29
        for _ in 0..30 {
            assert!(!gate.observe(120, 100));
        }
        assert_eq!(gate.stable_frames(), 29);
        assert!(gate.observe(120, 100));
        assert_eq!(gate.phase(), CalibrationPhase::Committed);
        assert_eq!(gate.stable_frames(), 0);

        // a stable run below the ceiling never commits
        let mut gate = StabilityGate::new(3);
        for _ in 0..10 {
            assert!(!gate.observe(50, 100));
        }
        assert_eq!(gate.phase(), CalibrationPhase::StableCounting);
    }

    fn actor_with_bars(kinds: &[BarKind]) -> ActorConfig {
        let mut actor = ActorConfig::player();
        actor.bars.retain(|kind, _| kinds.contains(kind));
        actor
    }

    fn widths(entries: &[(BarKind, u32)]) -> IndexMap<BarKind, u32> {
        entries.iter().copied().collect()
    }

    #[test]
    fn overlay_closes_after_five_empty_cycles() {
        let actor = actor_with_bars(&[BarKind::Hp, BarKind::Mp]);
        let mut tracker = ActorTracker::new("target", &actor, &calibration());

        let bars = tracker.observe(&widths(&[(BarKind::Hp, 100), (BarKind::Mp, 0)]));
        assert!(bars.is_open());
        assert_eq!(bars.percentage(BarKind::Hp), Some(100));

        for cycle in 1..=5 {
            let bars = tracker.observe(&widths(&[(BarKind::Hp, 0), (BarKind::Mp, 0)]));
            if cycle < 5 {
                assert!(bars.is_open(), "still open on empty cycle {cycle}");
                assert_eq!(bars.percentage(BarKind::Hp), Some(0));
            } else {
                assert_eq!(bars.overlay, OverlayState::Closed);
                assert_eq!(bars.percentage(BarKind::Hp), None);
            }
        }

        let bars = tracker.observe(&widths(&[(BarKind::Hp, 50), (BarKind::Mp, 0)]));
        assert!(bars.is_open());
        assert_eq!(bars.percentage(BarKind::Hp), Some(50));
    }

    #[test]
    fn npc_and_alive_flags_follow_percentages() {
        let actor = actor_with_bars(&[BarKind::Hp, BarKind::Mp]);
        let mut tracker = ActorTracker::new("target", &actor, &calibration());
        let bars = tracker.observe(&widths(&[(BarKind::Hp, 120), (BarKind::Mp, 0)]));
        assert!(bars.alive);
        assert!(bars.npc);

        let bars = tracker.observe(&widths(&[(BarKind::Hp, 60), (BarKind::Mp, 0)]));
        assert!(bars.alive);
        assert!(!bars.npc);
    }

    #[test]
    fn reconfigure_keeps_learned_ceilings() {
        let actor = actor_with_bars(&[BarKind::Hp, BarKind::Mp]);
        let mut tracker = ActorTracker::new("player", &actor, &calibration());
        tracker.observe(&widths(&[(BarKind::Hp, 200), (BarKind::Mp, 150)]));

        let reloaded = actor_with_bars(&[BarKind::Hp, BarKind::Fp]);
        tracker.reconfigure(&reloaded, &calibration());
        let bars = tracker.observe(&widths(&[(BarKind::Hp, 100), (BarKind::Fp, 10)]));
        assert_eq!(bars.bars[&BarKind::Hp].max_width_ever, 200);
        assert_eq!(bars.percentage(BarKind::Hp), Some(50));
        assert!(!bars.bars.contains_key(&BarKind::Mp));
        assert_eq!(bars.percentage(BarKind::Fp), Some(100));
    }
}
