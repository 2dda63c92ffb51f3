//! `guidebot-kernel` – Rules & Supervision
//!
//! The brainstem of GuideBot. It does not think or move; it decides what the
//! robot may legally do next and notices when it has stopped making progress.
//! Nothing in this crate performs I/O.
//!
//! # Modules
//!
//! - [`transitions`] – the pure legality table behind every state change:
//!   [`can_transition`][transitions::can_transition].
//! - [`state_machine`] – [`StateMachine`][state_machine::StateMachine]:
//!   the single source of truth for the current
//!   [`ApplicationState`][guidebot_types::ApplicationState], guarded by a
//!   mutex and fanned out to observers over a broadcast channel.
//! - [`watchdog`] – [`StuckStateDetector`][watchdog::StuckStateDetector]:
//!   flags a state that has not changed for too long so a supervisor loop can
//!   force a reset.

pub mod state_machine;
pub mod transitions;
pub mod watchdog;

pub use state_machine::{StateChange, StateMachine};
pub use transitions::can_transition;
pub use watchdog::{StuckStateDetector, Verdict};
