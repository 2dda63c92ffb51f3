//! [`NavigationOrchestrator`] – guided tours, retries, arrival handling.
//!
//! A guided navigation runs as one sequential task:
//!
//! 1. resolve the spoken destination against the saved locations;
//! 2. enter `Navigating` and arm the [`NavigationAwaiter`] *before* `go_to`;
//! 3. on `abort`, retry after a short apology until the retry budget is
//!    spent, then give up and go `Idle`;
//! 4. on `complete`, turn to face the customer, enter `Arrived`, speak the
//!    announcement, and either continue to the next queued stop or resume
//!    `Listening`.
//!
//! After arrival a linger timer returns the robot to base if nothing else
//! happens.  Autonomous movement goes through [`NavigationOrchestrator::roam`]
//! which skips retries and arrival handling.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use guidebot_hal::{HOME_BASE, Movement, Speech};
use guidebot_kernel::StateMachine;
use guidebot_middleware::{ArrivalOutcome, NavigationAwaiter, TurnAwaiter};
use guidebot_types::{ApplicationState, MovementStatus, NavStatus, ToolResult};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::flags::SessionFlags;
use crate::phrases;

#[derive(Debug, Clone)]
pub struct NavigationConfig {
    pub home_base: String,
    pub language: String,
    /// Bound on a single `go_to` attempt.
    pub arrival_timeout: Duration,
    /// Attempts are abandoned once this many aborts have been seen.
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub turn_degrees: i32,
    pub turn_velocity: f32,
    pub turn_timeout: Duration,
    /// Quiet period after which the robot leaves and heads home.
    pub linger: Duration,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            home_base: HOME_BASE.to_string(),
            language: "ja-JP".to_string(),
            arrival_timeout: Duration::from_secs(60),
            max_retries: 3,
            retry_delay: Duration::from_secs(3),
            turn_degrees: 180,
            turn_velocity: 0.5,
            turn_timeout: Duration::from_secs(10),
            linger: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Stop {
    location: String,
    announcement: Option<String>,
}

enum Leg {
    Arrived,
    Failed(String),
}

#[derive(Default)]
struct NavInner {
    retry_count: u32,
    pending: Option<Stop>,
    queue: VecDeque<Stop>,
    away_from_base: bool,
    last_arrival: Option<Instant>,
    linger: Option<JoinHandle<()>>,
}

pub struct NavigationOrchestrator {
    config: NavigationConfig,
    state: Arc<StateMachine>,
    movement: Arc<dyn Movement>,
    speech: Arc<dyn Speech>,
    awaiter: Arc<NavigationAwaiter>,
    turns: Arc<TurnAwaiter>,
    flags: Arc<SessionFlags>,
    inner: Mutex<NavInner>,
}

impl NavigationOrchestrator {
    pub fn new(
        config: NavigationConfig,
        state: Arc<StateMachine>,
        movement: Arc<dyn Movement>,
        speech: Arc<dyn Speech>,
        awaiter: Arc<NavigationAwaiter>,
        turns: Arc<TurnAwaiter>,
        flags: Arc<SessionFlags>,
    ) -> Self {
        Self {
            config,
            state,
            movement,
            speech,
            awaiter,
            turns,
            flags,
            inner: Mutex::new(NavInner::default()),
        }
    }

    pub fn config(&self) -> &NavigationConfig {
        &self.config
    }

    /// Known locations, home base included.
    pub fn locations(&self) -> Vec<String> {
        self.movement.locations()
    }

    /// Exact match, then case-insensitive, then case-insensitive substring.
    pub fn resolve_destination(&self, name: &str) -> Option<String> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        let locations = self.locations();
        if let Some(exact) = locations.iter().find(|l| l.as_str() == name) {
            return Some(exact.clone());
        }
        let wanted = name.to_lowercase();
        locations
            .iter()
            .find(|l| l.to_lowercase() == wanted)
            .or_else(|| locations.iter().find(|l| l.to_lowercase().contains(&wanted)))
            .cloned()
    }

    /// Guide the customer to `destination`, then through any queued stops.
    pub async fn navigate(self: &Arc<Self>, destination: &str, announcement: Option<String>) -> ToolResult {
        let Some(location) = self.resolve_destination(destination) else {
            warn!(destination, "NavigationOrchestrator: unknown destination");
            return ToolResult::fail(format!(
                "目的地 '{destination}' は存在しません。利用可能: {}",
                self.locations().join(", ")
            ));
        };
        self.cancel_linger();

        let mut stop = Stop {
            location,
            announcement,
        };
        loop {
            match self.guide_leg(&stop).await {
                Leg::Failed(message) => return ToolResult::fail(message),
                Leg::Arrived => match self.next_queued() {
                    Some(next) => stop = next,
                    None => {
                        if self.inner().away_from_base {
                            self.arm_linger();
                        }
                        return ToolResult::ok(format!("目的地 '{}' に到着しました", stop.location));
                    }
                },
            }
        }
    }

    /// Queue a follow-up stop for the current tour.
    pub fn enqueue(&self, destination: impl Into<String>, announcement: Option<String>) {
        let stop = Stop {
            location: destination.into(),
            announcement,
        };
        debug!(location = %stop.location, "NavigationOrchestrator: queued stop");
        self.inner().queue.push_back(stop);
    }

    pub fn queued(&self) -> usize {
        self.inner().queue.len()
    }

    /// Drive to `location` on the robot's own initiative.
    ///
    /// Runs in `Autonomous { task }`; no retries, no arrival handling, and
    /// the state is left for the caller.  Returns `true` on arrival.
    pub async fn roam(&self, location: &str, task: &str) -> bool {
        let target = ApplicationState::autonomous(task);
        if self.state.current() != target && !self.state.transition(target) {
            debug!(location, "NavigationOrchestrator: roam refused by state machine");
            return false;
        }
        let ticket = self.awaiter.arm();
        if let Err(e) = self.movement.go_to(location).await {
            warn!(location, error = %e, "NavigationOrchestrator: roam go_to failed");
            return false;
        }
        let outcome = ticket.wait_outcome(self.config.arrival_timeout).await;
        debug!(location, ?outcome, "NavigationOrchestrator: roam finished");
        outcome.arrived()
    }

    /// Clear session flags, drive home, and go `Idle` on arrival.
    pub async fn return_to_base(&self) -> bool {
        info!("NavigationOrchestrator: returning to base");
        self.flags.clear();
        self.cancel_linger();
        {
            let mut inner = self.inner();
            inner.pending = None;
            inner.queue.clear();
            inner.retry_count = 0;
        }

        let home = self.config.home_base.clone();
        let target = ApplicationState::navigating(home.clone());
        if !self.state.transition(target.clone()) {
            self.state.force_transition(target.clone());
        }

        let ticket = self.awaiter.arm();
        let outcome = match self.movement.go_to(&home).await {
            Ok(()) => ticket.wait_outcome(self.config.arrival_timeout).await,
            Err(e) => {
                warn!(error = %e, "NavigationOrchestrator: go_to home failed");
                ArrivalOutcome::Aborted
            }
        };

        if outcome.arrived() {
            self.inner().away_from_base = false;
        }
        // Someone else may have taken over while we were driving.
        if self.state.current() == target {
            self.state.transition(ApplicationState::Idle);
        }
        outcome.arrived()
    }

    /// Route a `goTo` status callback.
    pub fn on_navigation_status(&self, location: &str, status: &NavStatus) {
        let delivered = self.awaiter.on_status_event(location, status);
        match status {
            NavStatus::Obstacle => info!(location, "NavigationOrchestrator: obstacle detected"),
            NavStatus::Complete | NavStatus::Abort if !delivered => {
                debug!(location, %status, "NavigationOrchestrator: status for navigation we did not start");
            }
            NavStatus::Complete | NavStatus::Abort => {}
            other => debug!(location, status = %other, "NavigationOrchestrator: progress"),
        }
    }

    /// Route a movement completion callback.
    pub fn on_movement_status(&self, status: &MovementStatus) {
        self.turns.on_movement_status(status);
    }

    /// When the robot last reached a guided destination.
    pub fn last_arrival(&self) -> Option<Instant> {
        self.inner().last_arrival
    }

    /// Drop every pending wait, timer and queued stop.
    pub fn cancel(&self) {
        self.cancel_linger();
        self.awaiter.cancel();
        self.turns.cancel();
        let mut inner = self.inner();
        inner.pending = None;
        inner.queue.clear();
        inner.retry_count = 0;
    }

    /// Start the linger timer: if the state has not changed when it fires,
    /// go `Idle`, heading home first when away from base.
    pub fn arm_linger(self: &Arc<Self>) {
        let revision = self.state.revision();
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(this.config.linger).await;
            if this.state.revision() != revision {
                return;
            }
            // Detach first: return_to_base cancels the linger handle.
            let away = {
                let mut inner = this.inner();
                inner.linger.take();
                inner.away_from_base
            };
            info!(away, "NavigationOrchestrator: linger expired");
            if away {
                this.return_to_base().await;
            } else {
                this.state.transition(ApplicationState::Idle);
            }
        });
        if let Some(previous) = self.inner().linger.replace(handle) {
            previous.abort();
        }
    }

    pub fn cancel_linger(&self) {
        if let Some(handle) = self.inner().linger.take() {
            handle.abort();
        }
    }

    async fn guide_leg(&self, stop: &Stop) -> Leg {
        let target = ApplicationState::Navigating {
            destination_id: stop.location.clone(),
            display_name: stop.location.clone(),
            pending_announcement: stop.announcement.clone(),
        };
        if !self.state.transition(target.clone()) {
            self.state.force_transition(target);
        }
        {
            let mut inner = self.inner();
            inner.pending = Some(stop.clone());
            inner.retry_count = 0;
        }
        info!(location = %stop.location, "NavigationOrchestrator: guiding");

        loop {
            let ticket = self.awaiter.arm();
            if let Err(e) = self.movement.go_to(&stop.location).await {
                self.clear_pending();
                return Leg::Failed(format!("移動を開始できませんでした: {e}"));
            }

            match ticket.wait_outcome(self.config.arrival_timeout).await {
                ArrivalOutcome::Complete => {
                    self.inner().retry_count = 0;
                    if stop.location == self.config.home_base {
                        self.clear_pending();
                        self.inner().away_from_base = false;
                        self.state.transition(ApplicationState::Idle);
                        return Leg::Arrived;
                    }
                    self.face_customer().await;
                    self.handle_arrival(stop).await;
                    return Leg::Arrived;
                }
                ArrivalOutcome::Aborted => {
                    if self.flags.user_ended() {
                        self.clear_pending();
                        self.state.transition(ApplicationState::Idle);
                        return Leg::Failed("お客様の指示で案内を中止しました".to_string());
                    }
                    let retries = {
                        let mut inner = self.inner();
                        inner.retry_count += 1;
                        inner.retry_count
                    };
                    if retries >= self.config.max_retries {
                        warn!(location = %stop.location, retries, "NavigationOrchestrator: giving up");
                        self.speech.speak(phrases::NAV_GIVE_UP, &self.config.language).await;
                        self.clear_pending();
                        self.inner().retry_count = 0;
                        self.state.transition(ApplicationState::Idle);
                        return Leg::Failed("目的地への移動に失敗しました".to_string());
                    }
                    warn!(location = %stop.location, retries, "NavigationOrchestrator: aborted, retrying");
                    self.speech.speak(phrases::NAV_RETRY, &self.config.language).await;
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                ArrivalOutcome::TimedOut => {
                    warn!(location = %stop.location, "NavigationOrchestrator: arrival timed out");
                    self.clear_pending();
                    return Leg::Failed("目的地への移動に失敗またはタイムアウトしました".to_string());
                }
                ArrivalOutcome::Superseded => {
                    debug!(location = %stop.location, "NavigationOrchestrator: wait superseded");
                    return Leg::Failed("案内が中断されました".to_string());
                }
            }
        }
    }

    // The turn outcome does not matter; arrival proceeds either way.
    async fn face_customer(&self) {
        let ticket = self.turns.arm();
        if let Err(e) = self
            .movement
            .turn_by(self.config.turn_degrees, self.config.turn_velocity)
            .await
        {
            warn!(error = %e, "NavigationOrchestrator: post-arrival turn failed");
            return;
        }
        match ticket.wait(self.config.turn_timeout).await {
            Ok(status) => debug!(%status, "NavigationOrchestrator: turn finished"),
            Err(e) => warn!(?e, "NavigationOrchestrator: turn did not finish"),
        }
    }

    async fn handle_arrival(&self, stop: &Stop) {
        let has_next = {
            let mut inner = self.inner();
            inner.pending = None;
            inner.away_from_base = true;
            inner.last_arrival = Some(Instant::now());
            !inner.queue.is_empty()
        };

        let arrived = ApplicationState::Arrived {
            location_id: stop.location.clone(),
            display_name: stop.location.clone(),
            announcement: stop.announcement.clone(),
            listen_after_arrival: !has_next,
        };
        if !self.state.transition(arrived.clone()) {
            self.state.force_transition(arrived);
        }
        info!(location = %stop.location, "NavigationOrchestrator: arrived");

        let text = stop
            .announcement
            .clone()
            .unwrap_or_else(|| phrases::arrived_at(&stop.location));
        self.speech.speak(&text, &self.config.language).await;

        if !has_next && !self.state.transition(ApplicationState::listening()) {
            self.state.force_transition(ApplicationState::listening());
        }
    }

    fn next_queued(&self) -> Option<Stop> {
        loop {
            let stop = self.inner().queue.pop_front()?;
            match self.resolve_destination(&stop.location) {
                Some(location) => {
                    return Some(Stop {
                        location,
                        announcement: stop.announcement,
                    });
                }
                None => warn!(location = %stop.location, "NavigationOrchestrator: skipping unknown queued stop"),
            }
        }
    }

    fn clear_pending(&self) {
        self.inner().pending = None;
    }

    fn inner(&self) -> MutexGuard<'_, NavInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use guidebot_hal::{SimCommand, SimRobot, SimSpeech};
    use guidebot_middleware::{EventBus, Topic};
    use guidebot_types::{EventPayload, StateKind};

    struct Rig {
        nav: Arc<NavigationOrchestrator>,
        robot: Arc<SimRobot>,
        speech: Arc<SimSpeech>,
        state: Arc<StateMachine>,
        flags: Arc<SessionFlags>,
    }

    /// Wire a navigator to a simulated robot and pump bus events into it.
    fn rig() -> Rig {
        let bus = EventBus::default();
        let robot = Arc::new(
            SimRobot::new(bus.clone(), ["メンズトップス", "レジ", "靴下", HOME_BASE])
                .with_travel_time(Duration::from_secs(5)),
        );
        let speech = Arc::new(SimSpeech::new());
        let state = Arc::new(StateMachine::new());
        let flags = Arc::new(SessionFlags::new());
        let nav = Arc::new(NavigationOrchestrator::new(
            NavigationConfig::default(),
            Arc::clone(&state),
            robot.clone(),
            speech.clone(),
            Arc::new(NavigationAwaiter::new()),
            Arc::new(TurnAwaiter::new()),
            Arc::clone(&flags),
        ));

        let mut nav_rx = bus.subscribe_to(Topic::Navigation);
        let mut move_rx = bus.subscribe_to(Topic::Movement);
        let router = Arc::clone(&nav);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(event) = nav_rx.next() => {
                        if let EventPayload::NavigationStatus { location, status } = event.payload {
                            router.on_navigation_status(&location, &status);
                        }
                    }
                    Some(event) = move_rx.next() => {
                        if let EventPayload::Movement(status) = event.payload {
                            router.on_movement_status(&status);
                        }
                    }
                    else => break,
                }
            }
        });

        Rig {
            nav,
            robot,
            speech,
            state,
            flags,
        }
    }

    #[tokio::test]
    async fn resolve_destination_prefers_exact_then_fuzzy() {
        let rig = rig();
        assert_eq!(rig.nav.resolve_destination("レジ").as_deref(), Some("レジ"));
        assert_eq!(rig.nav.resolve_destination("HOME BASE").as_deref(), Some(HOME_BASE));
        assert_eq!(rig.nav.resolve_destination("メンズ").as_deref(), Some("メンズトップス"));
        assert!(rig.nav.resolve_destination("屋上").is_none());
        assert!(rig.nav.resolve_destination("  ").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_destination_never_moves() {
        let rig = rig();
        let result = rig.nav.navigate("屋上", None).await;
        assert!(!result.success);
        assert!(result.message.contains("利用可能"));
        assert!(rig.robot.destinations().is_empty());
        assert_eq!(rig.state.current(), ApplicationState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn arrival_turns_announces_and_listens() {
        let rig = rig();
        let mut changes = rig.state.subscribe();
        let result = rig.nav.navigate("メンズ", Some("こちらがメンズです".into())).await;

        assert!(result.success, "{}", result.message);
        assert_eq!(rig.state.current(), ApplicationState::listening());
        assert_eq!(rig.speech.spoken(), vec!["こちらがメンズです".to_string()]);
        assert!(rig.robot.commands().contains(&SimCommand::TurnBy {
            degrees: 180,
            velocity: 0.5
        }));
        assert!(rig.nav.last_arrival().is_some());

        let kinds: Vec<StateKind> = std::iter::from_fn(|| changes.try_recv().ok())
            .map(|c| c.to.kind())
            .collect();
        assert_eq!(
            kinds,
            vec![StateKind::Navigating, StateKind::Arrived, StateKind::Listening]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn abort_twice_then_complete_retries_twice() {
        let rig = rig();
        rig.robot.script_navigation([NavStatus::Abort, NavStatus::Abort]);

        let result = rig.nav.navigate("レジ", None).await;

        assert!(result.success);
        assert_eq!(rig.robot.destinations().len(), 3);
        let retries = rig
            .speech
            .spoken()
            .iter()
            .filter(|s| s.as_str() == phrases::NAV_RETRY)
            .count();
        assert_eq!(retries, 2);
        assert_eq!(rig.state.previous().map(|s| s.kind()), Some(StateKind::Arrived));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_retry_budget() {
        let rig = rig();
        rig.robot
            .script_navigation([NavStatus::Abort, NavStatus::Abort, NavStatus::Abort]);

        let result = rig.nav.navigate("レジ", None).await;

        assert!(!result.success);
        assert_eq!(rig.state.current(), ApplicationState::Idle);
        assert_eq!(rig.speech.spoken().last().map(String::as_str), Some(phrases::NAV_GIVE_UP));
        assert_eq!(rig.robot.destinations().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn abort_after_user_ended_goes_idle_without_retry() {
        let rig = rig();
        rig.flags.mark_user_ended();
        rig.robot.script_navigation([NavStatus::Abort]);

        let result = rig.nav.navigate("レジ", None).await;

        assert!(!result.success);
        assert_eq!(rig.robot.destinations().len(), 1);
        assert_eq!(rig.state.current(), ApplicationState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn queued_stops_are_chained() {
        let rig = rig();
        rig.nav.enqueue("靴下", None);

        let result = rig.nav.navigate("レジ", None).await;

        assert!(result.success);
        assert_eq!(rig.robot.destinations(), vec!["レジ".to_string(), "靴下".to_string()]);
        assert_eq!(rig.nav.queued(), 0);
        assert_eq!(rig.state.current(), ApplicationState::listening());
    }

    #[tokio::test(start_paused = true)]
    async fn linger_returns_to_base_when_nothing_happens() {
        let rig = rig();
        rig.nav.navigate("レジ", None).await;

        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(rig.robot.destinations().last().map(String::as_str), Some(HOME_BASE));
        assert_eq!(rig.state.current(), ApplicationState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn linger_is_ignored_after_state_change() {
        let rig = rig();
        rig.nav.navigate("レジ", None).await;
        assert!(rig.state.transition(ApplicationState::Reasoning));

        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(rig.robot.destinations(), vec!["レジ".to_string()]);
        assert_eq!(rig.state.current(), ApplicationState::Reasoning);
    }

    #[tokio::test(start_paused = true)]
    async fn roam_stays_autonomous_and_skips_arrival() {
        let rig = rig();
        assert!(rig.nav.roam("靴下", "散歩").await);
        assert_eq!(rig.state.current(), ApplicationState::autonomous("散歩"));
        assert!(rig.speech.spoken().is_empty());
        assert!(rig.nav.last_arrival().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn roam_refused_while_guiding() {
        let rig = rig();
        rig.state.force_transition(ApplicationState::navigating("レジ"));
        assert!(!rig.nav.roam("靴下", "散歩").await);
        assert!(rig.robot.destinations().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn return_to_base_goes_idle() {
        let rig = rig();
        rig.state.force_transition(ApplicationState::listening());
        rig.flags.request_staff("x");

        assert!(rig.nav.return_to_base().await);

        assert_eq!(rig.state.current(), ApplicationState::Idle);
        assert!(rig.flags.take_staff_call().is_none());
        assert_eq!(rig.robot.destinations(), vec![HOME_BASE.to_string()]);
    }
}
