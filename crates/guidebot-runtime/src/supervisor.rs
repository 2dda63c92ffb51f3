//! [`WatchdogLoop`] – periodic stall check with forced recovery.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use guidebot_kernel::watchdog::DEFAULT_STUCK_THRESHOLD;
use guidebot_kernel::{StateMachine, StuckStateDetector, Verdict};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Something that can pull the robot back to a known-good state.
#[async_trait]
pub trait Recovery: Send + Sync {
    /// Cancel in-flight work and force the robot to `Idle`.
    async fn force_reset(&self);
}

#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    pub tick: Duration,
    pub stuck_threshold: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(5),
            stuck_threshold: DEFAULT_STUCK_THRESHOLD,
        }
    }
}

pub struct WatchdogLoop {
    config: WatchdogConfig,
    state: Arc<StateMachine>,
}

impl WatchdogLoop {
    pub fn new(config: WatchdogConfig, state: Arc<StateMachine>) -> Self {
        Self { config, state }
    }

    /// Tick until `shutdown` fires, resetting through `recovery` on a stall.
    pub async fn run(self, recovery: Arc<dyn Recovery>, shutdown: CancellationToken) {
        let mut detector = StuckStateDetector::new(self.config.stuck_threshold);
        let mut ticker = tokio::time::interval(self.config.tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                now = ticker.tick() => {
                    let state = self.state.current();
                    match detector.observe(&state, now.into_std()) {
                        Verdict::Healthy => {}
                        Verdict::Stuck { kind, stalled_for } => {
                            error!(?kind, ?stalled_for, state = %state, "Watchdog: state stuck, forcing reset");
                            recovery.force_reset().await;
                            detector.clear();
                        }
                    }
                }
            }
        }
        debug!("Watchdog: stopped");
    }
}
