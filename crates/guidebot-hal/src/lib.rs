//! `guidebot-hal` – Hardware Abstraction Layer
//!
//! The runtime never talks to a robot SDK directly.  It drives the narrow
//! [`Movement`] and [`Speech`] traits; completion of long-running movement
//! commands is reported asynchronously as
//! [`RobotEvent`][guidebot_types::RobotEvent]s on the
//! [`EventBus`][guidebot_middleware::EventBus].
//!
//! # Modules
//!
//! - [`movement`] – the [`Movement`] trait and the home-base location name.
//! - [`speech`] – the [`Speech`] trait and [`Transcript`].
//! - [`sim`] – [`SimRobot`] and [`SimSpeech`], in-process simulations that
//!   record every command so the full stack runs headless.

pub mod movement;
pub mod sim;
pub mod speech;

pub use movement::{HOME_BASE, Movement};
pub use sim::{SimCommand, SimRobot, SimSpeech};
pub use speech::{Speech, Transcript};
