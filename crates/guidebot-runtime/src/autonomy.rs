//! Self-directed behaviour while nobody is talking to the robot.
//!
//! [`BehaviorScheduler`] maps the hour of day to an energy level and picks
//! persona idle behaviours.  [`AutonomyScheduler`] wakes at a random interval,
//! decides what to do with [`AutonomyScheduler::decide`] (pure) and carries it
//! out through the navigation orchestrator.

use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Timelike;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use guidebot_hal::{Movement, Speech};
use guidebot_kernel::StateMachine;
use guidebot_types::{ApplicationState, StateKind};
use rand::Rng;
use rand::seq::SliceRandom;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::navigation::NavigationOrchestrator;

// ─────────────────────────────────────────────────────────────────────────────
// Persona
// ─────────────────────────────────────────────────────────────────────────────

/// Something the robot likes to do in a given zone.
#[derive(Debug, Clone, PartialEq)]
pub struct IdleBehavior {
    pub zone: String,
    pub action: String,
    pub speak_text: Option<String>,
}

impl IdleBehavior {
    pub fn new(zone: impl Into<String>, action: impl Into<String>, speak_text: Option<&str>) -> Self {
        Self {
            zone: zone.into(),
            action: action.into(),
            speak_text: speak_text.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Persona {
    /// Hour of day (0–23) → probability of running a scheduled behaviour.
    pub energy_by_hour: BTreeMap<u32, f32>,
    pub idle_behaviors: Vec<IdleBehavior>,
}

impl Default for Persona {
    fn default() -> Self {
        Self {
            energy_by_hour: BTreeMap::from([(9, 0.5), (10, 0.8), (12, 0.3), (14, 0.9), (18, 0.4)]),
            idle_behaviors: vec![
                IdleBehavior::new("甘品エリア", "look_at_products", Some("わぁ、このケーキ美味しそう…")),
                IdleBehavior::new("窓際", "hum_song", Some("ふんふんふ〜ん♪")),
            ],
        }
    }
}

/// Energy used when the persona configures no hours.
pub const DEFAULT_ENERGY: f32 = 0.5;

pub struct BehaviorScheduler {
    persona: Persona,
}

impl BehaviorScheduler {
    pub fn new(persona: Persona) -> Self {
        Self { persona }
    }

    /// Energy of the configured hour nearest to `hour`; ties go to the
    /// earlier hour.
    pub fn energy_at(&self, hour: u32) -> f32 {
        self.persona
            .energy_by_hour
            .iter()
            .min_by_key(|(h, _)| h.abs_diff(hour))
            .map(|(_, energy)| *energy)
            .unwrap_or(DEFAULT_ENERGY)
    }

    /// A random idle behaviour, with probability equal to the energy at `hour`.
    pub fn next_idle_behavior<R: Rng>(&self, hour: u32, rng: &mut R) -> Option<IdleBehavior> {
        let roll: f32 = rng.gen_range(0.0..1.0);
        if roll > self.energy_at(hour) {
            return None;
        }
        self.persona.idle_behaviors.choose(rng).cloned()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Decisions
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct AutonomyConfig {
    pub enabled: bool,
    pub idle_talk_enabled: bool,
    /// Evaluations happen at a random delay in `[interval_min, interval_max)`.
    pub interval_min: Duration,
    pub interval_max: Duration,
    /// No autonomous action this soon after a guided arrival.
    pub arrival_cooldown: Duration,
    /// Minimum spacing between two idle-talk utterances.
    pub talk_period: Duration,
    pub language: String,
}

impl Default for AutonomyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            idle_talk_enabled: true,
            interval_min: Duration::from_secs(10),
            interval_max: Duration::from_secs(30),
            arrival_cooldown: Duration::from_secs(30),
            talk_period: Duration::from_secs(60),
            language: "ja-JP".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AutonomyAction {
    /// A persona behaviour at a known zone.
    Scheduled(IdleBehavior),
    Wander(String),
    Patrol(String),
    /// Turn in place by a few degrees.
    IdleTurn(i32),
}

/// Everything [`AutonomyScheduler::decide`] looks at.
pub struct Observation<'a> {
    pub state: &'a ApplicationState,
    pub last_arrival: Option<Instant>,
    pub now: Instant,
    pub hour: u32,
    pub zones: &'a [String],
}

// ─────────────────────────────────────────────────────────────────────────────
// AutonomyScheduler
// ─────────────────────────────────────────────────────────────────────────────

pub struct AutonomyScheduler {
    config: AutonomyConfig,
    behaviors: BehaviorScheduler,
    state: Arc<StateMachine>,
    navigation: Arc<NavigationOrchestrator>,
    movement: Arc<dyn Movement>,
    speech: Arc<dyn Speech>,
    talk_limiter: DefaultDirectRateLimiter,
    last_talk: Mutex<Option<String>>,
    running: Mutex<Option<CancellationToken>>,
    shutdown: CancellationToken,
}

impl AutonomyScheduler {
    pub fn new(
        config: AutonomyConfig,
        persona: Persona,
        state: Arc<StateMachine>,
        navigation: Arc<NavigationOrchestrator>,
        movement: Arc<dyn Movement>,
        speech: Arc<dyn Speech>,
        shutdown: CancellationToken,
    ) -> Self {
        let period = config.talk_period.max(Duration::from_millis(1));
        let quota = Quota::with_period(period)
            .unwrap_or_else(|| Quota::per_minute(NonZeroU32::MIN))
            .allow_burst(NonZeroU32::MIN);
        Self {
            config,
            behaviors: BehaviorScheduler::new(persona),
            state,
            navigation,
            movement,
            speech,
            talk_limiter: RateLimiter::direct(quota),
            last_talk: Mutex::new(None),
            running: Mutex::new(None),
            shutdown,
        }
    }

    /// Pick the next action, or `None` when autonomy must stay quiet.
    pub fn decide<R: Rng>(&self, obs: &Observation<'_>, rng: &mut R) -> Option<AutonomyAction> {
        if !self.config.enabled {
            return None;
        }
        if !matches!(obs.state.kind(), StateKind::Idle | StateKind::Autonomous) {
            return None;
        }
        if let Some(arrival) = obs.last_arrival
            && obs.now.saturating_duration_since(arrival) < self.config.arrival_cooldown
        {
            return None;
        }

        let zones: Vec<&String> = obs.zones.iter().filter(|z| is_valid_zone(z)).collect();

        if let Some(behavior) = self.behaviors.next_idle_behavior(obs.hour, rng)
            && zones.iter().any(|z| **z == behavior.zone)
        {
            return Some(AutonomyAction::Scheduled(behavior));
        }

        let roll: f32 = rng.gen_range(0.0..1.0);
        let zone = zones.choose(rng).map(|z| (*z).clone());
        match (roll, zone) {
            (r, Some(zone)) if r < 0.2 => Some(AutonomyAction::Wander(zone)),
            (r, Some(zone)) if r < 0.4 => Some(AutonomyAction::Patrol(zone)),
            (r, None) if r < 0.4 => None,
            _ => Some(AutonomyAction::IdleTurn(rng.gen_range(-30..30))),
        }
    }

    /// Start the evaluation loop.  Returns `false` when disabled or already
    /// running.
    pub fn start(self: &Arc<Self>) -> bool {
        if !self.config.enabled || self.shutdown.is_cancelled() {
            return false;
        }
        let token = {
            let mut running = self.running();
            if running.as_ref().is_some_and(|t| !t.is_cancelled()) {
                return false;
            }
            let token = self.shutdown.child_token();
            *running = Some(token.clone());
            token
        };
        info!("AutonomyScheduler: started");
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run(token).await });
        true
    }

    pub fn stop(&self) {
        if let Some(token) = self.running().take() {
            token.cancel();
            info!("AutonomyScheduler: stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running().as_ref().is_some_and(|t| !t.is_cancelled())
    }

    /// A person showed up.  When roaming, stop wandering and hand control to
    /// the greeting flow by returning `true`.
    pub async fn handle_person_detected(&self) -> bool {
        if !self.state.is_roaming() {
            return false;
        }
        info!("AutonomyScheduler: person detected, yielding");
        self.stop();
        self.navigation.cancel();
        self.movement.stop_movement().await;
        true
    }

    /// Speak `text` unless idle talk is off, the robot is navigating, the
    /// text repeats the last one, or the rate limit is exhausted.
    pub async fn try_speak(&self, text: &str) -> bool {
        if !self.config.idle_talk_enabled || self.state.current_kind() == StateKind::Navigating {
            return false;
        }
        {
            let mut last = self.last_talk.lock().unwrap_or_else(|p| p.into_inner());
            if last.as_deref() == Some(text) || self.talk_limiter.check().is_err() {
                return false;
            }
            *last = Some(text.to_string());
        }
        self.speech.speak(text, &self.config.language).await
    }

    async fn run(&self, token: CancellationToken) {
        loop {
            let delay = {
                let mut rng = rand::thread_rng();
                let min = self.config.interval_min.as_millis() as u64;
                let max = (self.config.interval_max.as_millis() as u64).max(min + 1);
                Duration::from_millis(rng.gen_range(min..max))
            };
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            tokio::select! {
                _ = token.cancelled() => break,
                _ = self.tick() => {}
            }
        }
        debug!("AutonomyScheduler: loop exited");
    }

    async fn tick(&self) {
        let state = self.state.current();
        let zones = self.movement.locations();
        let action = {
            let obs = Observation {
                state: &state,
                last_arrival: self.navigation.last_arrival(),
                now: Instant::now(),
                hour: chrono::Local::now().hour(),
                zones: &zones,
            };
            self.decide(&obs, &mut rand::thread_rng())
        };
        let Some(action) = action else {
            debug!(state = %state, "AutonomyScheduler: nothing to do");
            return;
        };
        info!(?action, "AutonomyScheduler: acting");

        match action {
            AutonomyAction::Scheduled(behavior) => {
                let task = format!("スケジュール: {}", behavior.action);
                if self.roam(&behavior.zone, &task).await
                    && let Some(text) = &behavior.speak_text
                {
                    self.try_speak(text).await;
                }
                self.settle(&task);
            }
            AutonomyAction::Wander(zone) => {
                let task = format!("散歩中: {zone}");
                self.roam(&zone, &task).await;
                self.settle(&task);
            }
            AutonomyAction::Patrol(zone) => {
                let task = format!("巡回移動: {zone}");
                self.roam(&zone, &task).await;
                self.settle(&task);
            }
            AutonomyAction::IdleTurn(degrees) => {
                if let Err(e) = self.movement.turn_by(degrees, 0.5).await {
                    debug!(error = %e, "AutonomyScheduler: idle turn failed");
                }
            }
        }
    }

    async fn roam(&self, zone: &str, task: &str) -> bool {
        self.navigation.roam(zone, task).await
    }

    // Back to Idle, unless someone else already took over.
    fn settle(&self, task: &str) {
        if self.state.current() == ApplicationState::autonomous(task) {
            self.state.transition(ApplicationState::Idle);
        }
    }

    fn running(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.running.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn is_valid_zone(zone: &str) -> bool {
    !zone.trim().is_empty() && !zone.to_lowercase().contains("no name")
}

#[cfg(test)]
mod tests {
    use super::*;
    use guidebot_hal::{HOME_BASE, SimCommand, SimRobot, SimSpeech};
    use guidebot_middleware::{EventBus, NavigationAwaiter, Topic, TurnAwaiter};
    use guidebot_types::EventPayload;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use crate::flags::SessionFlags;
    use crate::navigation::NavigationConfig;

    struct Rig {
        scheduler: Arc<AutonomyScheduler>,
        state: Arc<StateMachine>,
        robot: Arc<SimRobot>,
        speech: Arc<SimSpeech>,
    }

    fn rig(config: AutonomyConfig) -> Rig {
        let bus = EventBus::default();
        let robot = Arc::new(SimRobot::new(bus.clone(), ["窓際", "レジ", HOME_BASE]));
        let speech = Arc::new(SimSpeech::new());
        let state = Arc::new(StateMachine::new());
        let navigation = Arc::new(NavigationOrchestrator::new(
            NavigationConfig::default(),
            Arc::clone(&state),
            robot.clone(),
            speech.clone(),
            Arc::new(NavigationAwaiter::new()),
            Arc::new(TurnAwaiter::new()),
            Arc::new(SessionFlags::new()),
        ));
        let mut rx = bus.subscribe_to(Topic::Navigation);
        let router = Arc::clone(&navigation);
        tokio::spawn(async move {
            while let Some(event) = rx.next().await {
                if let EventPayload::NavigationStatus { location, status } = event.payload {
                    router.on_navigation_status(&location, &status);
                }
            }
        });
        let scheduler = Arc::new(AutonomyScheduler::new(
            config,
            Persona::default(),
            Arc::clone(&state),
            navigation,
            robot.clone(),
            speech.clone(),
            CancellationToken::new(),
        ));
        Rig {
            scheduler,
            state,
            robot,
            speech,
        }
    }

    fn zones() -> Vec<String> {
        vec!["窓際".to_string(), "レジ".to_string(), "no name 3".to_string()]
    }

    #[test]
    fn energy_uses_nearest_configured_hour() {
        let scheduler = BehaviorScheduler::new(Persona::default());
        assert_eq!(scheduler.energy_at(10), 0.8);
        assert_eq!(scheduler.energy_at(15), 0.9);
        assert_eq!(scheduler.energy_at(23), 0.4);
        assert_eq!(scheduler.energy_at(11), 0.8);

        let empty = BehaviorScheduler::new(Persona {
            energy_by_hour: BTreeMap::new(),
            idle_behaviors: Vec::new(),
        });
        assert_eq!(empty.energy_at(12), DEFAULT_ENERGY);
    }

    #[test]
    fn zero_energy_never_schedules() {
        let scheduler = BehaviorScheduler::new(Persona {
            energy_by_hour: BTreeMap::from([(12, 0.0)]),
            ..Persona::default()
        });
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            assert!(scheduler.next_idle_behavior(12, &mut rng).is_none());
        }
    }

    #[tokio::test]
    async fn decide_respects_state_and_cooldown() {
        let rig = rig(AutonomyConfig::default());
        let zones = zones();
        let now = Instant::now();
        let mut rng = StdRng::seed_from_u64(1);

        for state in [
            ApplicationState::navigating("レジ"),
            ApplicationState::Arrived {
                location_id: "レジ".into(),
                display_name: "レジ".into(),
                announcement: None,
                listen_after_arrival: true,
            },
            ApplicationState::listening(),
            ApplicationState::Reasoning,
        ] {
            let obs = Observation {
                state: &state,
                last_arrival: None,
                now,
                hour: 14,
                zones: &zones,
            };
            assert!(rig.scheduler.decide(&obs, &mut rng).is_none(), "{state}");
        }

        let cooling = Observation {
            state: &ApplicationState::Idle,
            last_arrival: Some(now),
            now: now + Duration::from_secs(29),
            hour: 14,
            zones: &zones,
        };
        for _ in 0..20 {
            assert!(rig.scheduler.decide(&cooling, &mut rng).is_none());
        }
    }

    #[tokio::test]
    async fn decide_only_targets_valid_zones() {
        let rig = rig(AutonomyConfig::default());
        let zones = zones();
        let now = Instant::now();
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..200 {
            let obs = Observation {
                state: &ApplicationState::Idle,
                last_arrival: Some(now),
                now: now + Duration::from_secs(31),
                hour: 14,
                zones: &zones,
            };
            match rig.scheduler.decide(&obs, &mut rng) {
                Some(AutonomyAction::Scheduled(b)) => assert_eq!(b.zone, "窓際"),
                Some(AutonomyAction::Wander(z)) | Some(AutonomyAction::Patrol(z)) => {
                    assert!(z == "窓際" || z == "レジ", "{z}")
                }
                Some(AutonomyAction::IdleTurn(d)) => assert!((-30..30).contains(&d)),
                None => panic!("Idle past the cooldown always acts when zones exist"),
            }
        }
    }

    #[tokio::test]
    async fn disabled_scheduler_never_starts() {
        let rig = rig(AutonomyConfig {
            enabled: false,
            ..AutonomyConfig::default()
        });
        assert!(!rig.scheduler.start());
        assert!(!rig.scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn loop_acts_and_stops_on_cancel() {
        let rig = rig(AutonomyConfig::default());
        assert!(rig.scheduler.start());
        assert!(!rig.scheduler.start());

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(!rig.robot.commands().is_empty());

        rig.scheduler.stop();
        assert!(!rig.scheduler.is_running());
        tokio::time::sleep(Duration::from_secs(5)).await;
        let settled = rig.robot.commands().len();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(rig.robot.commands().len(), settled);
    }

    #[tokio::test]
    async fn person_detection_preempts_roaming() {
        let rig = rig(AutonomyConfig::default());
        rig.scheduler.start();
        rig.state.force_transition(ApplicationState::autonomous("散歩中: 窓際"));

        assert!(rig.scheduler.handle_person_detected().await);
        assert!(!rig.scheduler.is_running());
        assert_eq!(rig.robot.commands().last(), Some(&SimCommand::Stop));

        rig.state.force_transition(ApplicationState::listening());
        assert!(!rig.scheduler.handle_person_detected().await);
    }

    #[tokio::test]
    async fn idle_talk_is_rate_limited_and_never_repeats() {
        let rig = rig(AutonomyConfig::default());
        assert!(rig.scheduler.try_speak("ふんふんふ〜ん♪").await);
        assert!(!rig.scheduler.try_speak("別の話").await);
        assert!(!rig.scheduler.try_speak("ふんふんふ〜ん♪").await);
        assert_eq!(rig.speech.spoken().len(), 1);
    }

    #[tokio::test]
    async fn idle_talk_is_silent_while_navigating_or_disabled() {
        let navigating = rig(AutonomyConfig::default());
        navigating
            .state
            .force_transition(ApplicationState::navigating("レジ"));
        assert!(!navigating.scheduler.try_speak("こんにちは").await);
        assert!(navigating.speech.spoken().is_empty());

        let quiet = rig(AutonomyConfig {
            idle_talk_enabled: false,
            ..AutonomyConfig::default()
        });
        assert!(!quiet.scheduler.try_speak("こんにちは").await);
        assert!(quiet.speech.spoken().is_empty());
    }
}
