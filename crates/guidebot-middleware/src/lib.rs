//! `guidebot-middleware` – The Nervous System
//!
//! Routes asynchronous data between the movement subsystem, the speech stack,
//! and the runtime without caring about its meaning.
//!
//! # Modules
//!
//! - [`bus`] – headless, typed, topic-based publish/subscribe event bus built
//!   on Tokio broadcast channels.
//! - [`rendezvous`] – single-slot rendezvous that turns callback-delivered
//!   events into awaitable, timeout-bounded operations.  Backs the
//!   [`NavigationAwaiter`] and [`TurnAwaiter`].

pub mod bus;
pub mod rendezvous;

pub use bus::{EventBus, Topic, TopicReceiver};
pub use rendezvous::{
    ArrivalOutcome, ArrivalTicket, NavigationAwaiter, RendezvousSlot, Ticket, TurnAwaiter,
    WaitError,
};
