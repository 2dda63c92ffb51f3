//! In-process simulation of the robot for headless runs and tests.
//!
//! [`SimRobot`] accepts movement commands, records them, and publishes the
//! status callbacks a real drive base would emit on the
//! [`EventBus`].  Navigation outcomes can be scripted so tests can exercise
//! retry paths:
//!
//! ```rust
//! use std::time::Duration;
//! use guidebot_hal::{Movement, SimRobot};
//! use guidebot_middleware::{EventBus, Topic};
//! use guidebot_types::NavStatus;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let bus = EventBus::default();
//! let mut nav = bus.subscribe_to(Topic::Navigation);
//! let robot = SimRobot::new(bus.clone(), ["レジ", "home base"])
//!     .with_travel_time(Duration::from_millis(10));
//! robot.script_navigation([NavStatus::Abort]);
//!
//! robot.go_to("レジ").await.unwrap();
//! let _going = nav.recv().await.unwrap();
//! let outcome = nav.recv().await.unwrap();
//! # let _ = outcome;
//! # }
//! ```
//!
//! [`SimSpeech`] records every utterance and replays scripted transcripts.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use guidebot_middleware::EventBus;
use guidebot_types::{EventPayload, GuideError, MovementStatus, NavStatus, RobotEvent};
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::movement::Movement;
use crate::speech::{Speech, Transcript};

const SOURCE: &str = "guidebot-hal::sim";

/// A command received by [`SimRobot`], in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum SimCommand {
    GoTo(String),
    Stop,
    TurnBy { degrees: i32, velocity: f32 },
    TiltHead(i32),
}

// ────────────────────────────────────────────────────────────────────────────
// SimRobot
// ────────────────────────────────────────────────────────────────────────────

/// Simulated drive base.
///
/// Each `go_to` publishes `going` immediately and the next scripted outcome
/// (default `complete`) after the travel time.  Unknown locations abort.
/// `stop_movement` and any newer command cancel outcomes still in flight.
pub struct SimRobot {
    bus: EventBus,
    locations: Vec<String>,
    travel_time: Duration,
    turn_time: Duration,
    script: Mutex<VecDeque<NavStatus>>,
    commands: Mutex<Vec<SimCommand>>,
    epoch: Arc<AtomicU64>,
}

impl SimRobot {
    pub fn new<I, S>(bus: EventBus, locations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            bus,
            locations: locations.into_iter().map(Into::into).collect(),
            travel_time: Duration::from_millis(200),
            turn_time: Duration::from_millis(50),
            script: Mutex::new(VecDeque::new()),
            commands: Mutex::new(Vec::new()),
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_travel_time(mut self, travel_time: Duration) -> Self {
        self.travel_time = travel_time;
        self
    }

    pub fn with_turn_time(mut self, turn_time: Duration) -> Self {
        self.turn_time = turn_time;
        self
    }

    /// Queue outcomes for the next `go_to` calls, in order.
    pub fn script_navigation(&self, outcomes: impl IntoIterator<Item = NavStatus>) {
        lock(&self.script).extend(outcomes);
    }

    /// Every command received so far.
    pub fn commands(&self) -> Vec<SimCommand> {
        lock(&self.commands).clone()
    }

    /// Destinations of every `go_to`, in order.
    pub fn destinations(&self) -> Vec<String> {
        lock(&self.commands)
            .iter()
            .filter_map(|c| match c {
                SimCommand::GoTo(location) => Some(location.clone()),
                _ => None,
            })
            .collect()
    }

    /// Publish a person-detection verdict, as the camera pipeline would.
    pub fn detect_person(&self, present: bool) {
        let _ = self
            .bus
            .publish(RobotEvent::new(SOURCE, EventPayload::PersonDetected(present)));
    }

    fn record(&self, command: SimCommand) {
        debug!(?command, "SimRobot: command");
        lock(&self.commands).push(command);
    }

    fn bump_epoch(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    fn publish_later(&self, delay: Duration, event: RobotEvent) {
        let epoch = self.epoch.load(Ordering::SeqCst);
        let current = Arc::clone(&self.epoch);
        let bus = self.bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if current.load(Ordering::SeqCst) == epoch {
                let _ = bus.publish(event);
            }
        });
    }
}

#[async_trait]
impl Movement for SimRobot {
    async fn go_to(&self, location: &str) -> Result<(), GuideError> {
        self.record(SimCommand::GoTo(location.to_string()));
        self.bump_epoch();

        let outcome = if self.locations.iter().any(|l| l == location) {
            lock(&self.script).pop_front().unwrap_or(NavStatus::Complete)
        } else {
            NavStatus::Abort
        };
        info!(location, %outcome, "SimRobot: goTo");

        let _ = self.bus.publish(RobotEvent::new(
            SOURCE,
            EventPayload::NavigationStatus {
                location: location.to_string(),
                status: NavStatus::Going,
            },
        ));
        self.publish_later(
            self.travel_time,
            RobotEvent::new(
                SOURCE,
                EventPayload::NavigationStatus {
                    location: location.to_string(),
                    status: outcome,
                },
            ),
        );
        Ok(())
    }

    async fn stop_movement(&self) {
        self.record(SimCommand::Stop);
        self.bump_epoch();
    }

    async fn turn_by(&self, degrees: i32, velocity: f32) -> Result<(), GuideError> {
        self.record(SimCommand::TurnBy { degrees, velocity });
        self.bump_epoch();
        self.publish_later(
            self.turn_time,
            RobotEvent::new(
                SOURCE,
                EventPayload::Movement(MovementStatus::turn(NavStatus::Complete)),
            ),
        );
        Ok(())
    }

    async fn tilt_head(&self, degrees: i32) -> Result<(), GuideError> {
        self.record(SimCommand::TiltHead(degrees));
        Ok(())
    }

    fn locations(&self) -> Vec<String> {
        self.locations.clone()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimSpeech
// ────────────────────────────────────────────────────────────────────────────

/// Simulated speech stack that records utterances.
#[derive(Default)]
pub struct SimSpeech {
    spoken: Mutex<Vec<String>>,
    speak_time: Duration,
    interrupt: Notify,
    stops: AtomicUsize,
    failing: AtomicBool,
    transcripts: Mutex<VecDeque<Transcript>>,
}

impl SimSpeech {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make each utterance take `speak_time` (interruptible by `stop`).
    pub fn with_speak_time(mut self, speak_time: Duration) -> Self {
        self.speak_time = speak_time;
        self
    }

    /// Make every subsequent `speak` fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Queue transcripts for the next `listen` calls.
    pub fn script_transcripts(&self, transcripts: impl IntoIterator<Item = Transcript>) {
        lock(&self.transcripts).extend(transcripts);
    }

    pub fn spoken(&self) -> Vec<String> {
        lock(&self.spoken).clone()
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Speech for SimSpeech {
    async fn speak(&self, text: &str, language: &str) -> bool {
        if self.failing.load(Ordering::SeqCst) {
            return false;
        }
        info!(language, text, "SimSpeech: speak");
        lock(&self.spoken).push(text.to_string());

        if self.speak_time.is_zero() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(self.speak_time) => true,
            _ = self.interrupt.notified() => false,
        }
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.interrupt.notify_waiters();
    }

    async fn listen(&self, _language: &str, prompt: &str) -> Result<Transcript, GuideError> {
        if !prompt.is_empty() {
            lock(&self.spoken).push(prompt.to_string());
        }
        Ok(lock(&self.transcripts)
            .pop_front()
            .unwrap_or(Transcript::Empty))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
