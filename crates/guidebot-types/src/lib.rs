//! `guidebot-types` – shared vocabulary for every GuideBot crate.
//!
//! - [`state`] – [`ApplicationState`], the closed set of things the robot can
//!   be doing, and its payload-free tag [`StateKind`].
//! - [`tool`] – [`ToolCall`] / [`ToolResult`], the contract between the
//!   language model and the robot's capabilities.
//! - [`event`] – [`RobotEvent`] envelopes routed over the event bus and the
//!   [`NavStatus`] / [`MovementStatus`] vocabulary of the movement subsystem.

pub mod event;
pub mod state;
pub mod tool;

pub use event::{EventPayload, MovementStatus, NavStatus, RobotEvent};
pub use state::{ApplicationState, StateKind};
pub use tool::{ToolCall, ToolResult};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One row of the append-only interaction log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub timestamp: DateTime<Utc>,
    /// What the user said.
    pub input: String,
    /// What the robot answered, if a run produced an answer.
    pub output: Option<String>,
    /// Names of the tools executed during the run, in order.
    pub tools_executed: Vec<String>,
    pub latency_ms: u64,
    pub success: bool,
    pub error: Option<String>,
}

/// Global error type spanning model failures, hardware faults, speech
/// failures, and storage problems.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GuideError {
    #[error("Model call timed out after {0} ms")]
    ModelTimeout(u64),

    #[error("Model call failed: {0}")]
    ModelFailed(String),

    #[error("Hardware Fault on {component}: {details}")]
    HardwareFault { component: String, details: String },

    #[error("Speech error: {0}")]
    Speech(String),

    #[error("Unknown destination: {0}")]
    UnknownDestination(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Channel error: {0}")]
    Channel(String),
}
