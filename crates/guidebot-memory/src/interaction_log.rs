//! Append-only interaction log.
//!
//! # Storage layout
//!
//! | column         | type    | description                              |
//! |----------------|---------|------------------------------------------|
//! | id             | TEXT    | UUID v4 primary key                      |
//! | timestamp      | TEXT    | RFC-3339 time of the turn (UTC)          |
//! | input          | TEXT    | What the user said                       |
//! | output         | TEXT    | Robot answer, NULL when none             |
//! | tools_executed | TEXT    | JSON array of tool names, in order       |
//! | latency_ms     | INTEGER | Wall time of the turn                    |
//! | success        | INTEGER | 0 / 1                                    |
//! | error          | TEXT    | Failure description, NULL on success     |
//!
//! # Example
//!
//! ```rust
//! use chrono::Utc;
//! use guidebot_memory::InteractionLogStore;
//! use guidebot_types::InteractionRecord;
//!
//! let store = InteractionLogStore::open_in_memory().unwrap();
//! store.append(&InteractionRecord {
//!     timestamp: Utc::now(),
//!     input: "トイレはどこ？".into(),
//!     output: Some("ご案内します".into()),
//!     tools_executed: vec!["navigate".into()],
//!     latency_ms: 640,
//!     success: true,
//!     error: None,
//! }).unwrap();
//! assert_eq!(store.count().unwrap(), 1);
//! ```

use std::path::Path;

use chrono::{DateTime, Utc};
use guidebot_types::InteractionRecord;
use rusqlite::{Connection, params};
use tracing::debug;
use uuid::Uuid;

use crate::StoreError;

pub struct InteractionLogStore {
    conn: Connection,
}

impl InteractionLogStore {
    /// Open (or create) a persistent database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let store = Self {
            conn: Connection::open(path)?,
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS interaction_log (
                id             TEXT NOT NULL PRIMARY KEY,
                timestamp      TEXT NOT NULL,
                input          TEXT NOT NULL,
                output         TEXT,
                tools_executed TEXT NOT NULL,
                latency_ms     INTEGER NOT NULL,
                success        INTEGER NOT NULL,
                error          TEXT
            );",
        )?;
        Ok(())
    }

    pub fn append(&self, record: &InteractionRecord) -> Result<(), StoreError> {
        let tools = serde_json::to_string(&record.tools_executed)?;
        self.conn.execute(
            "INSERT INTO interaction_log
                 (id, timestamp, input, output, tools_executed, latency_ms, success, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                Uuid::new_v4().to_string(),
                record.timestamp.to_rfc3339(),
                record.input,
                record.output,
                tools,
                record.latency_ms as i64,
                record.success,
                record.error,
            ],
        )?;
        debug!(input = %record.input, success = record.success, "InteractionLog: appended");
        Ok(())
    }

    /// The `limit` most recent records, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<InteractionRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT timestamp, input, output, tools_executed, latency_ms, success, error
             FROM interaction_log
             ORDER BY timestamp DESC, rowid DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            let ts: String = row.get(0)?;
            let input: String = row.get(1)?;
            let output: Option<String> = row.get(2)?;
            let tools: String = row.get(3)?;
            let latency_ms: i64 = row.get(4)?;
            let success: bool = row.get(5)?;
            let error: Option<String> = row.get(6)?;
            Ok((ts, input, output, tools, latency_ms, success, error))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (ts, input, output, tools, latency_ms, success, error) = row?;
            let timestamp = ts.parse::<DateTime<Utc>>().map_err(|e| {
                rusqlite::Error::InvalidColumnType(0, e.to_string(), rusqlite::types::Type::Text)
            })?;
            records.push(InteractionRecord {
                timestamp,
                input,
                output,
                tools_executed: serde_json::from_str(&tools)?,
                latency_ms: latency_ms.max(0) as u64,
                success,
                error,
            });
        }
        Ok(records)
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM interaction_log", [], |row| row.get(0))?;
        Ok(n.max(0) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(input: &str, at: DateTime<Utc>, success: bool) -> InteractionRecord {
        InteractionRecord {
            timestamp: at,
            input: input.to_string(),
            output: success.then(|| "はい".to_string()),
            tools_executed: vec!["speak".to_string(), "navigate".to_string()],
            latency_ms: 1200,
            success,
            error: (!success).then(|| "timeout".to_string()),
        }
    }

    #[test]
    fn recent_returns_newest_first() {
        let store = InteractionLogStore::open_in_memory().unwrap();
        let t0 = Utc::now();
        store.append(&record("一つ目", t0, true)).unwrap();
        store.append(&record("二つ目", t0 + Duration::seconds(5), false)).unwrap();

        let recent = store.recent(10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].input, "二つ目");
        assert_eq!(recent[0].error.as_deref(), Some("timeout"));
        assert_eq!(recent[1].tools_executed, vec!["speak", "navigate"]);
    }

    #[test]
    fn recent_honours_limit() {
        let store = InteractionLogStore::open_in_memory().unwrap();
        let t0 = Utc::now();
        for i in 0..5 {
            store
                .append(&record(&format!("q{i}"), t0 + Duration::seconds(i), true))
                .unwrap();
        }
        assert_eq!(store.recent(2).unwrap().len(), 2);
        assert_eq!(store.count().unwrap(), 5);
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.db");
        {
            let store = InteractionLogStore::open(&path).unwrap();
            store.append(&record("保存", Utc::now(), true)).unwrap();
        }
        let store = InteractionLogStore::open(&path).unwrap();
        assert_eq!(store.recent(1).unwrap()[0].input, "保存");
    }
}
