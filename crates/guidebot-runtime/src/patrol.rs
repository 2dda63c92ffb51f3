//! [`PatrolLoop`] – proactive sales tour of the shop floor.
//!
//! The loop visits every saved location except the home base in shuffled
//! order, speaks a promotional message at each stop, then waits before moving
//! on.  It owns the floor while it runs: the autonomy scheduler is stopped on
//! start and restarted on exit.  The tour ends the moment the state machine
//! leaves `Idle` / `Autonomous`, which is how a customer interrupts it.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use guidebot_hal::{Movement, Speech};
use guidebot_kernel::StateMachine;
use guidebot_types::{ApplicationState, StateKind};
use rand::seq::SliceRandom;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::autonomy::AutonomyScheduler;
use crate::navigation::NavigationOrchestrator;
use crate::phrases;

#[derive(Debug, Clone)]
pub struct PatrolConfig {
    /// Pause at each stop before moving to the next one.
    pub interval: Duration,
    /// Delay between arrival and the promotional message.
    pub speak_delay: Duration,
    /// Location → promotional message; other stops use a default template.
    pub promo_messages: BTreeMap<String, String>,
    pub language: String,
}

impl Default for PatrolConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(120),
            speak_delay: Duration::from_secs(3),
            promo_messages: BTreeMap::new(),
            language: "ja-JP".to_string(),
        }
    }
}

pub struct PatrolLoop {
    config: PatrolConfig,
    state: Arc<StateMachine>,
    navigation: Arc<NavigationOrchestrator>,
    movement: Arc<dyn Movement>,
    speech: Arc<dyn Speech>,
    autonomy: Arc<AutonomyScheduler>,
    /// Generation and token of the tour in progress.
    running: Mutex<Option<(u64, CancellationToken)>>,
    generation: AtomicU64,
    shutdown: CancellationToken,
}

impl PatrolLoop {
    pub fn new(
        config: PatrolConfig,
        state: Arc<StateMachine>,
        navigation: Arc<NavigationOrchestrator>,
        movement: Arc<dyn Movement>,
        speech: Arc<dyn Speech>,
        autonomy: Arc<AutonomyScheduler>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            navigation,
            movement,
            speech,
            autonomy,
            running: Mutex::new(None),
            generation: AtomicU64::new(0),
            shutdown,
        }
    }

    /// Begin touring.  Returns `false` when already patrolling, when the
    /// robot is busy, or when there is nowhere to go.
    pub fn start(self: &Arc<Self>) -> bool {
        if !self.state.is_roaming() || self.stops().is_empty() {
            warn!("PatrolLoop: nothing to patrol or robot busy");
            return false;
        }
        let (generation, token) = {
            let mut running = self.running();
            if running.as_ref().is_some_and(|(_, t)| !t.is_cancelled()) {
                return false;
            }
            let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
            let token = self.shutdown.child_token();
            *running = Some((generation, token.clone()));
            (generation, token)
        };
        self.autonomy.stop();
        info!("PatrolLoop: started");

        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => debug!("PatrolLoop: cancelled"),
                _ = this.tour() => {}
            }
            this.finish(generation);
        });
        true
    }

    /// End the tour and halt the drive base.
    pub async fn stop(&self) {
        let running = self.running().take();
        if let Some((_, token)) = running {
            token.cancel();
            self.movement.stop_movement().await;
            info!("PatrolLoop: stopped");
        }
    }

    pub fn is_active(&self) -> bool {
        self.running().as_ref().is_some_and(|(_, t)| !t.is_cancelled())
    }

    async fn tour(&self) {
        loop {
            let mut stops = self.stops();
            stops.shuffle(&mut rand::thread_rng());

            for location in stops {
                if !self.state.is_roaming() {
                    info!(state = %self.state.current(), "PatrolLoop: interrupted");
                    return;
                }

                let task = format!("巡回中: {location}");
                if !self.navigation.roam(&location, &task).await {
                    info!(%location, "PatrolLoop: could not reach stop, ending tour");
                    return;
                }

                if !self.hold(self.config.speak_delay).await {
                    return;
                }
                let message = self
                    .config
                    .promo_messages
                    .get(&location)
                    .cloned()
                    .unwrap_or_else(|| phrases::patrol_promo(&location));
                self.speech.speak(&message, &self.config.language).await;

                if self.state.current() == ApplicationState::autonomous(&task) {
                    self.state.transition(ApplicationState::Idle);
                }
                if !self.hold(self.config.interval).await {
                    return;
                }
            }
        }
    }

    /// Sleep for `duration`; `false` as soon as the state leaves
    /// `Idle` / `Autonomous`.
    async fn hold(&self, duration: Duration) -> bool {
        let mut changes = self.state.subscribe();
        if !self.state.is_roaming() {
            return false;
        }
        let sleep = tokio::time::sleep(duration);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                change = changes.recv() => match change {
                    Ok(change) if !matches!(change.to.kind(), StateKind::Idle | StateKind::Autonomous) => {
                        info!(state = %change.to, "PatrolLoop: interrupted");
                        return false;
                    }
                    Ok(_) | Err(RecvError::Lagged(_)) => {
                        if !self.state.is_roaming() {
                            return false;
                        }
                    }
                    Err(RecvError::Closed) => return false,
                },
            }
        }
    }

    // A tour that was stopped and replaced must leave its successor alone.
    fn finish(&self, generation: u64) {
        {
            let mut running = self.running();
            match running.as_ref().map(|(current, _)| *current) {
                Some(current) if current != generation => {
                    debug!(generation, "PatrolLoop: superseded tour finished");
                    return;
                }
                Some(_) => {
                    running.take();
                }
                None => {}
            }
        }
        if self.state.current_kind() == StateKind::Autonomous {
            self.state.transition(ApplicationState::Idle);
        }
        info!("PatrolLoop: finished");
        if !self.shutdown.is_cancelled() && self.state.is_roaming() {
            self.autonomy.start();
        }
    }

    fn stops(&self) -> Vec<String> {
        let home = &self.navigation.config().home_base;
        self.navigation
            .locations()
            .into_iter()
            .filter(|l| l != home)
            .collect()
    }

    fn running(&self) -> MutexGuard<'_, Option<(u64, CancellationToken)>> {
        self.running.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
