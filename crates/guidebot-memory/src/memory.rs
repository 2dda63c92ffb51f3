//! Long-term and short-term conversational memory.
//!
//! Long-term memory is a SQLite key/value table written by the `save_memory`
//! tool.  Short-term memory is the recent conversation, held in process,
//! capped at [`DEFAULT_HISTORY_LIMIT`] turns and discarded once nobody has
//! spoken for [`DEFAULT_HISTORY_TTL`].

use std::collections::VecDeque;
use std::path::Path;
use std::time::{Duration, Instant};

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::StoreError;

pub const DEFAULT_HISTORY_LIMIT: usize = 20;
pub const DEFAULT_HISTORY_TTL: Duration = Duration::from_secs(15 * 60);

/// One turn of short-term history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryTurn {
    /// `"user"` or `"assistant"`.
    pub role: String,
    pub text: String,
}

pub struct MemoryStore {
    conn: Connection,
    history: VecDeque<HistoryTurn>,
    history_limit: usize,
    history_ttl: Duration,
    last_activity: Option<Instant>,
}

impl MemoryStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS long_term_memory (
                key        TEXT NOT NULL PRIMARY KEY,
                value      TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );",
        )?;
        Ok(Self {
            conn,
            history: VecDeque::new(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            history_ttl: DEFAULT_HISTORY_TTL,
            last_activity: None,
        })
    }

    pub fn with_history_limits(mut self, limit: usize, ttl: Duration) -> Self {
        self.history_limit = limit;
        self.history_ttl = ttl;
        self
    }

    // ── long-term ───────────────────────────────────────────────────────────

    /// Store `value` under `key`, replacing any previous value.
    pub fn remember(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO long_term_memory (key, value, updated_at)
             VALUES (?1, ?2, ?3)",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        debug!(key, "MemoryStore: remembered");
        Ok(())
    }

    pub fn recall(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT value FROM long_term_memory WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Every long-term fact, ordered by key.
    pub fn facts(&self) -> Result<Vec<(String, String)>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, value FROM long_term_memory ORDER BY key ASC")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut facts = Vec::new();
        for row in rows {
            facts.push(row?);
        }
        Ok(facts)
    }

    // ── short-term ──────────────────────────────────────────────────────────

    /// Append a turn, dropping the oldest beyond the cap.  History that has
    /// gone stale is discarded first.
    pub fn push_turn(&mut self, role: &str, text: &str, now: Instant) {
        self.expire(now);
        self.history.push_back(HistoryTurn {
            role: role.to_string(),
            text: text.to_string(),
        });
        while self.history.len() > self.history_limit {
            self.history.pop_front();
        }
        self.last_activity = Some(now);
    }

    /// The current history, oldest first.
    pub fn history(&mut self, now: Instant) -> Vec<HistoryTurn> {
        self.expire(now);
        self.history.iter().cloned().collect()
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
        self.last_activity = None;
    }

    /// Render facts and recent turns as prompt context.  Empty when there is
    /// nothing to say.
    pub fn context(&mut self, now: Instant) -> Result<String, StoreError> {
        let mut out = String::new();
        let facts = self.facts()?;
        if !facts.is_empty() {
            out.push_str("覚えていること:\n");
            for (key, value) in facts {
                out.push_str(&format!("- {key}: {value}\n"));
            }
        }
        let history = self.history(now);
        if !history.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str("直近の会話:\n");
            for turn in history {
                out.push_str(&format!("{}: {}\n", turn.role, turn.text));
            }
        }
        Ok(out.trim_end().to_string())
    }

    fn expire(&mut self, now: Instant) {
        if let Some(last) = self.last_activity
            && now.saturating_duration_since(last) >= self.history_ttl
        {
            debug!("MemoryStore: short-term history expired");
            self.clear_history();
        }
    }
}
