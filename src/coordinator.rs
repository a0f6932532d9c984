use crate::{
    common::Frame,
    config::DetectionConfig,
    error::{ConfigError, VisionError},
    pipeline::detection::{DetectionEngine, DetectionHandle},
};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Where the driver gets frames from. Must not block: return `None` when no
/// frame is available yet.
pub trait FrameSource: Send + Sync + 'static {
    fn latest_frame(&self) -> Option<Frame>;
}

impl FrameSource for watch::Receiver<Option<Frame>> {
    fn latest_frame(&self) -> Option<Frame> {
        self.borrow().clone()
    }
}

/// Owns the detection driver task. Dropping it stops the driver.
pub struct Coordinator {
    driver_task: tokio::task::JoinHandle<()>,
    cancel_token: CancellationToken,
    config_tx: watch::Sender<DetectionConfig>,
    handle: DetectionHandle,
}

impl Coordinator {
    fn new(engine: DetectionEngine, source: Box<dyn FrameSource>) -> Self {
        let cancel_token = CancellationToken::new();
        let (config_tx, config_rx) = watch::channel(engine.config().clone());
        let handle = engine.handle();

        Self {
            driver_task: Self::start_driver_task(engine, source, config_rx, cancel_token.clone()),
            cancel_token,
            config_tx,
            handle,
        }
    }

    fn start_driver_task(
        mut engine: DetectionEngine,
        source: Box<dyn FrameSource>,
        mut config_rx: watch::Receiver<DetectionConfig>,
        cancel_token: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = Self::ticker(engine.config().driver.poll_interval_ms);
            let mut config_open = true;
            info!("Detection driver started");

            loop {
                tokio::select! {
                    biased;
                    _ = cancel_token.cancelled() => break,
                    changed = config_rx.changed(), if config_open => {
                        if changed.is_err() {
                            config_open = false;
                            continue;
                        }
                        let next = config_rx.borrow_and_update().clone();
                        let interval = next.driver.poll_interval_ms;
                        let interval_changed = interval != engine.config().driver.poll_interval_ms;
                        if engine.apply_config(next).is_ok() && interval_changed {
                            ticker = Self::ticker(interval);
                        }
                    }
                    _ = ticker.tick() => match source.latest_frame() {
                        None => debug!("No frame available, cycle skipped"),
                        Some(frame) if engine.is_stale(&frame) => {
                            debug!(frame_id = %frame.id(), "Frame already processed, cycle skipped")
                        }
                        Some(frame) => {
                            engine.run_cycle(&frame);
                        }
                    },
                }
            }
            info!("Detection driver stopped");
        })
    }

    fn ticker(poll_interval_ms: u64) -> tokio::time::Interval {
        let mut ticker = tokio::time::interval(Duration::from_millis(poll_interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker
    }

    pub fn handle(&self) -> DetectionHandle {
        self.handle.clone()
    }

    /// Queues a configuration for the driver to pick up between cycles.
    /// Invalid configurations are refused here and never reach the driver.
    pub fn reload_config(&self, config: DetectionConfig) -> Result<(), VisionError> {
        if let Err(e) = config.validate() {
            warn!("Configuration reload refused: {}", e);
            return Err(e.into());
        }
        self.config_tx.send_replace(config);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        !self.driver_task.is_finished()
    }

    pub fn stop(&self) {
        self.cancel_token.cancel();
    }

    /// Waits for the driver to exit after `stop`.
    pub async fn join(&mut self) -> Result<(), VisionError> {
        (&mut self.driver_task)
            .await
            .map_err(|_| VisionError::DriverStopped)
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.stop();
    }
}

pub struct CoordinatorBuilder {
    configuration: DetectionConfig,
    source: Option<Box<dyn FrameSource>>,
}

impl CoordinatorBuilder {
    pub fn new(configuration: DetectionConfig) -> Self {
        Self {
            configuration,
            source: None,
        }
    }

    // Overrides the configured driver poll interval.
    pub fn poll_interval_ms(mut self, poll_interval_ms: u64) -> Self {
        self.configuration.driver.poll_interval_ms = poll_interval_ms;
        self
    }

    // Overrides the configured reach for the snapshot's best target.
    pub fn max_reach(mut self, max_reach: f64) -> Self {
        self.configuration.targeting.max_reach = max_reach;
        self
    }

    pub fn frame_source(mut self, source: impl FrameSource) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Result<Coordinator, VisionError> {
        let source = self.source.ok_or(ConfigError::InvalidParameter(
            "frame_source",
            "no frame source set".to_string(),
        ))?;
        let engine = DetectionEngine::new(self.configuration)?;
        Ok(Coordinator::new(engine, source))
    }
}
