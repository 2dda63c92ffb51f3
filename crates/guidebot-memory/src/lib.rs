//! `guidebot-memory` – The Knowledge Base.
//!
//! Persistence collaborators of the runtime, on a local SQLite substrate.
//!
//! # Modules
//!
//! - [`interaction_log`] – [`InteractionLogStore`][interaction_log::InteractionLogStore]:
//!   append-only log of every conversation turn (input, answer, tools, latency).
//! - [`memory`] – [`MemoryStore`][memory::MemoryStore]: long-term key/value
//!   facts the model chose to remember, plus a bounded short-term conversation
//!   history that expires after a period of silence.

pub mod interaction_log;
pub mod memory;

pub use interaction_log::InteractionLogStore;
pub use memory::{HistoryTurn, MemoryStore};

use guidebot_types::GuideError;
use thiserror::Error;

/// Errors raised by the SQLite-backed stores.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<StoreError> for GuideError {
    fn from(err: StoreError) -> Self {
        GuideError::Storage(err.to_string())
    }
}
