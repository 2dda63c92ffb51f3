//! Single-slot rendezvous between a callback producer and an async waiter.
//!
//! The movement subsystem reports completion through push callbacks, while
//! the runtime wants to write `let arrived = awaiter.await_arrival(t).await`.
//! A [`RendezvousSlot`] bridges the two:
//!
//! 1. the waiter calls [`RendezvousSlot::arm`] and receives a [`Ticket`];
//! 2. the callback side calls [`RendezvousSlot::resolve`] with a value;
//! 3. the waiter awaits the ticket with a timeout.
//!
//! At most one ticket is outstanding.  Arming again supersedes the previous
//! ticket, which then resolves to [`WaitError::Superseded`] immediately and
//! can never observe a later value.  Dropping a ticket (including when its
//! task is aborted) clears the slot if it still belongs to that ticket.
//!
//! Arm *before* issuing the command whose completion you await, so a fast
//! completion cannot slip through between the command and the wait.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use guidebot_types::{MovementStatus, NavStatus};
use tokio::sync::oneshot;
use tracing::debug;

/// Why a [`Ticket`] did not yield a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    /// No value arrived within the timeout.
    TimedOut,
    /// A newer ticket replaced this one, or the slot was cancelled.
    Superseded,
}

struct SlotState<T> {
    generation: u64,
    pending: Option<(u64, oneshot::Sender<T>)>,
}

impl<T> SlotState<T> {
    fn clear_if(&mut self, generation: u64) {
        if matches!(&self.pending, Some((g, _)) if *g == generation) {
            self.pending = None;
        }
    }
}

/// A slot holding at most one outstanding waiter.
pub struct RendezvousSlot<T> {
    state: Arc<Mutex<SlotState<T>>>,
}

impl<T> RendezvousSlot<T> {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SlotState {
                generation: 0,
                pending: None,
            })),
        }
    }

    /// Register a new waiter, superseding any previous one.
    pub fn arm(&self) -> Ticket<T> {
        let (tx, rx) = oneshot::channel();
        let mut state = lock(&self.state);
        state.generation += 1;
        let generation = state.generation;
        // Dropping the old sender wakes the superseded waiter.
        if state.pending.replace((generation, tx)).is_some() {
            debug!(generation, "RendezvousSlot: superseded previous waiter");
        }
        Ticket {
            generation,
            receiver: rx,
            state: Arc::clone(&self.state),
        }
    }

    /// Hand `value` to the outstanding waiter.
    ///
    /// Returns `false` when there was no waiter; the value is dropped.
    pub fn resolve(&self, value: T) -> bool {
        let pending = lock(&self.state).pending.take();
        match pending {
            Some((_, tx)) => tx.send(value).is_ok(),
            None => false,
        }
    }

    /// Drop the outstanding waiter, if any.  It resolves as superseded.
    pub fn cancel(&self) {
        lock(&self.state).pending = None;
    }

    pub fn is_pending(&self) -> bool {
        lock(&self.state).pending.is_some()
    }
}

impl<T> Default for RendezvousSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// The waiting half of one [`RendezvousSlot::arm`] call.
pub struct Ticket<T> {
    generation: u64,
    receiver: oneshot::Receiver<T>,
    state: Arc<Mutex<SlotState<T>>>,
}

impl<T> Ticket<T> {
    /// Wait up to `timeout` for the value.
    pub async fn wait(mut self, timeout: Duration) -> Result<T, WaitError> {
        match tokio::time::timeout(timeout, &mut self.receiver).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(WaitError::Superseded),
            Err(_) => Err(WaitError::TimedOut),
        }
        // `Drop` clears the slot on timeout.
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl<T> Drop for Ticket<T> {
    fn drop(&mut self) {
        lock(&self.state).clear_if(self.generation);
    }
}

fn lock<T>(state: &Mutex<SlotState<T>>) -> MutexGuard<'_, SlotState<T>> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ────────────────────────────────────────────────────────────────────────────
// NavigationAwaiter
// ────────────────────────────────────────────────────────────────────────────

/// How a navigation wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrivalOutcome {
    Complete,
    Aborted,
    TimedOut,
    Superseded,
}

impl ArrivalOutcome {
    pub fn arrived(self) -> bool {
        self == ArrivalOutcome::Complete
    }
}

/// Awaitable view over `goTo` status callbacks.
#[derive(Default)]
pub struct NavigationAwaiter {
    slot: RendezvousSlot<bool>,
}

/// A pending arrival wait returned by [`NavigationAwaiter::arm`].
pub struct ArrivalTicket(Ticket<bool>);

impl ArrivalTicket {
    pub async fn wait_outcome(self, timeout: Duration) -> ArrivalOutcome {
        match self.0.wait(timeout).await {
            Ok(true) => ArrivalOutcome::Complete,
            Ok(false) => ArrivalOutcome::Aborted,
            Err(WaitError::TimedOut) => ArrivalOutcome::TimedOut,
            Err(WaitError::Superseded) => ArrivalOutcome::Superseded,
        }
    }

    /// `true` exactly when `complete` fired before the timeout.
    pub async fn wait(self, timeout: Duration) -> bool {
        self.wait_outcome(timeout).await.arrived()
    }
}

impl NavigationAwaiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a wait without awaiting it yet.
    pub fn arm(&self) -> ArrivalTicket {
        ArrivalTicket(self.slot.arm())
    }

    /// Arm and await in one step.
    pub async fn await_arrival(&self, timeout: Duration) -> bool {
        self.arm().wait(timeout).await
    }

    /// Feed a `goTo` status callback.  Returns `true` when it resolved a
    /// pending wait.
    pub fn on_status_event(&self, location: &str, status: &NavStatus) -> bool {
        let arrived = match status {
            NavStatus::Complete => true,
            NavStatus::Abort => false,
            _ => return false,
        };
        let delivered = self.slot.resolve(arrived);
        if !delivered {
            debug!(location, %status, "NavigationAwaiter: no pending wait, event dropped");
        }
        delivered
    }

    pub fn cancel(&self) {
        self.slot.cancel();
    }

    pub fn is_pending(&self) -> bool {
        self.slot.is_pending()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// TurnAwaiter
// ────────────────────────────────────────────────────────────────────────────

/// Awaitable view over `turnBy` completion callbacks.
#[derive(Default)]
pub struct TurnAwaiter {
    slot: RendezvousSlot<NavStatus>,
}

impl TurnAwaiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&self) -> Ticket<NavStatus> {
        self.slot.arm()
    }

    /// Feed a movement callback; only finished turns resolve the wait.
    pub fn on_movement_status(&self, status: &MovementStatus) -> bool {
        if !status.is_finished_turn() {
            return false;
        }
        self.slot.resolve(status.status.clone())
    }

    pub fn cancel(&self) {
        self.slot.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LONG: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn complete_resolves_true() {
        let awaiter = NavigationAwaiter::new();
        let ticket = awaiter.arm();
        assert!(awaiter.on_status_event("レジ", &NavStatus::Complete));
        assert!(ticket.wait(LONG).await);
        assert!(!awaiter.is_pending());
    }

    #[tokio::test]
    async fn abort_resolves_false() {
        let awaiter = NavigationAwaiter::new();
        let ticket = awaiter.arm();
        awaiter.on_status_event("レジ", &NavStatus::Abort);
        assert_eq!(ticket.wait_outcome(LONG).await, ArrivalOutcome::Aborted);
    }

    #[tokio::test]
    async fn progress_statuses_are_ignored() {
        let awaiter = NavigationAwaiter::new();
        let _ticket = awaiter.arm();
        assert!(!awaiter.on_status_event("A", &NavStatus::Going));
        assert!(!awaiter.on_status_event("A", &NavStatus::Obstacle));
        assert!(!awaiter.on_status_event("A", &NavStatus::Other("x".into())));
        assert!(awaiter.is_pending());
    }

    #[test]
    fn event_without_waiter_is_dropped() {
        let awaiter = NavigationAwaiter::new();
        assert!(!awaiter.on_status_event("A", &NavStatus::Complete));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_returns_false_and_clears_slot() {
        let awaiter = NavigationAwaiter::new();
        let outcome = awaiter.arm().wait_outcome(Duration::from_secs(60)).await;
        assert_eq!(outcome, ArrivalOutcome::TimedOut);
        assert!(!awaiter.is_pending());
        // A late complete finds nobody.
        assert!(!awaiter.on_status_event("A", &NavStatus::Complete));
    }

    #[tokio::test]
    async fn second_wait_supersedes_first() {
        let awaiter = NavigationAwaiter::new();
        let first = awaiter.arm();
        let second = awaiter.arm();

        assert_eq!(first.wait_outcome(LONG).await, ArrivalOutcome::Superseded);

        awaiter.on_status_event("B", &NavStatus::Complete);
        assert!(second.wait(LONG).await);
    }

    #[tokio::test]
    async fn superseded_ticket_drop_keeps_newer_waiter() {
        let slot = RendezvousSlot::<u32>::new();
        let first = slot.arm();
        let second = slot.arm();
        drop(first);
        assert!(slot.is_pending());
        assert!(slot.resolve(7));
        assert_eq!(second.wait(LONG).await, Ok(7));
    }

    #[tokio::test]
    async fn dropping_ticket_clears_slot() {
        let slot = RendezvousSlot::<u32>::new();
        let ticket = slot.arm();
        assert!(slot.is_pending());
        drop(ticket);
        assert!(!slot.is_pending());
        assert!(!slot.resolve(1));
    }

    #[tokio::test]
    async fn aborted_task_clears_slot() {
        let awaiter = std::sync::Arc::new(NavigationAwaiter::new());
        let task = {
            let awaiter = std::sync::Arc::clone(&awaiter);
            tokio::spawn(async move { awaiter.await_arrival(LONG).await })
        };
        while !awaiter.is_pending() {
            tokio::task::yield_now().await;
        }
        task.abort();
        let _ = task.await;
        assert!(!awaiter.is_pending());
    }

    #[tokio::test]
    async fn completion_before_await_is_not_lost() {
        let awaiter = NavigationAwaiter::new();
        let ticket = awaiter.arm();
        // The robot arrives before the caller gets round to awaiting.
        awaiter.on_status_event("A", &NavStatus::Complete);
        tokio::task::yield_now().await;
        assert!(ticket.wait(LONG).await);
    }

    #[tokio::test]
    async fn cancel_supersedes_pending_wait() {
        let awaiter = NavigationAwaiter::new();
        let ticket = awaiter.arm();
        awaiter.cancel();
        assert_eq!(ticket.wait_outcome(LONG).await, ArrivalOutcome::Superseded);
    }

    #[tokio::test]
    async fn turn_awaiter_resolves_on_finished_turn_only() {
        let turns = TurnAwaiter::new();
        let ticket = turns.arm();
        assert!(!turns.on_movement_status(&MovementStatus::turn(NavStatus::Going)));
        assert!(turns.on_movement_status(&MovementStatus::turn(NavStatus::Abort)));
        assert_eq!(ticket.wait(LONG).await, Ok(NavStatus::Abort));
    }
}
