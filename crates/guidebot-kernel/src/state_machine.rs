//! [`StateMachine`] – the single source of truth for what the robot is doing.
//!
//! Every component that wants to change the robot's state goes through
//! [`StateMachine::transition`], which consults
//! [`can_transition`][crate::transitions::can_transition] and refuses illegal
//! moves.  Recovery paths that must win regardless of the current state use
//! [`StateMachine::force_transition`].
//!
//! Observers call [`StateMachine::subscribe`] and receive every accepted
//! change as a [`StateChange`].  There is no replay: a late subscriber only
//! sees changes made after it subscribed.
//!
//! # Example
//!
//! ```
//! use guidebot_kernel::StateMachine;
//! use guidebot_types::ApplicationState;
//!
//! let sm = StateMachine::new();
//! assert!(sm.transition(ApplicationState::listening()));
//! assert!(sm.transition(ApplicationState::Reasoning));
//! // Reasoning may not jump straight to Arrived.
//! assert!(!sm.transition(ApplicationState::Arrived {
//!     location_id: "レジ".into(),
//!     display_name: "レジ".into(),
//!     announcement: None,
//!     listen_after_arrival: true,
//! }));
//! assert_eq!(sm.current(), ApplicationState::Reasoning);
//! ```

use std::sync::{Mutex, MutexGuard};

use guidebot_types::{ApplicationState, StateKind};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::transitions::can_transition;

const CHANGE_CAPACITY: usize = 64;

/// One accepted state change, as delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    pub from: ApplicationState,
    pub to: ApplicationState,
    /// `true` when the change bypassed the legality table.
    pub forced: bool,
    /// Value of [`StateMachine::revision`] after the change.
    pub revision: u64,
}

struct Inner {
    current: ApplicationState,
    previous: Option<ApplicationState>,
    revision: u64,
}

/// Mutex-guarded application state with broadcast fan-out.
pub struct StateMachine {
    inner: Mutex<Inner>,
    changes: broadcast::Sender<StateChange>,
}

impl StateMachine {
    /// A state machine starting in [`ApplicationState::Idle`].
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            inner: Mutex::new(Inner {
                current: ApplicationState::Idle,
                previous: None,
                revision: 0,
            }),
            changes,
        }
    }

    /// Request a transition to `target`.
    ///
    /// Returns `false` and leaves the state untouched when the move is
    /// illegal.
    pub fn transition(&self, target: ApplicationState) -> bool {
        let mut inner = self.lock();
        if !can_transition(&inner.current, &target) {
            warn!(
                from = %inner.current,
                to = %target,
                "StateMachine: transition denied"
            );
            return false;
        }
        self.apply(&mut inner, target, false);
        true
    }

    /// Move to `target` unconditionally.
    pub fn force_transition(&self, target: ApplicationState) {
        let mut inner = self.lock();
        self.apply(&mut inner, target, true);
    }

    /// Force the machine back to [`ApplicationState::Idle`].
    pub fn reset(&self) {
        self.force_transition(ApplicationState::Idle);
    }

    pub fn current(&self) -> ApplicationState {
        self.lock().current.clone()
    }

    pub fn current_kind(&self) -> StateKind {
        self.lock().current.kind()
    }

    /// The state that was current before the last accepted change.
    pub fn previous(&self) -> Option<ApplicationState> {
        self.lock().previous.clone()
    }

    /// Counter bumped on every accepted change.  Timers capture it when armed
    /// and compare on expiry to detect that nothing happened in between.
    pub fn revision(&self) -> u64 {
        self.lock().revision
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.changes.subscribe()
    }

    /// `Idle` or `Autonomous`: the robot is free to wander.
    pub fn is_roaming(&self) -> bool {
        matches!(self.current_kind(), StateKind::Idle | StateKind::Autonomous)
    }

    /// `Navigating` or `Arrived`.
    pub fn is_guiding(&self) -> bool {
        matches!(self.current_kind(), StateKind::Navigating | StateKind::Arrived)
    }

    /// A conversation is in progress.
    pub fn is_conversing(&self) -> bool {
        matches!(
            self.current_kind(),
            StateKind::Listening | StateKind::Speaking | StateKind::Reasoning | StateKind::Greeting
        )
    }

    // Publishing under the lock keeps broadcast order identical to
    // transition order.
    fn apply(&self, inner: &mut Inner, target: ApplicationState, forced: bool) {
        let from = std::mem::replace(&mut inner.current, target.clone());
        inner.previous = Some(from.clone());
        inner.revision += 1;

        info!(from = %from, to = %target, forced, "StateMachine: transition");

        let _ = self.changes.send(StateChange {
            from,
            to: target,
            forced,
            revision: inner.revision,
        });
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
