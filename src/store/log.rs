//! Append-only execution log: the forensic record of task lifecycle.

use super::{Store, now_ms};
use crate::error::Result;
use crate::types::LogEvent;
use rusqlite::{Connection, params};

/// Append a row to the execution log. Rows are never mutated or deleted.
pub(crate) fn log_event(
    conn: &Connection,
    task_id: &str,
    agent_id: Option<&str>,
    action: &str,
    old_status: Option<&str>,
    new_status: Option<&str>,
    message: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO execution_log (task_id, agent_id, action, old_status, new_status, message, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![task_id, agent_id, action, old_status, new_status, message, now_ms()],
    )?;
    Ok(())
}

fn parse_log_row(row: &rusqlite::Row) -> rusqlite::Result<LogEvent> {
    Ok(LogEvent {
        id: row.get("id")?,
        task_id: row.get("task_id")?,
        agent_id: row.get("agent_id")?,
        action: row.get("action")?,
        old_status: row.get("old_status")?,
        new_status: row.get("new_status")?,
        message: row.get("message")?,
        timestamp: row.get("timestamp")?,
    })
}

impl Store {
    /// Get the full lifecycle history for one task, oldest first.
    pub fn get_task_log(&self, task_id: &str) -> Result<Vec<LogEvent>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, task_id, agent_id, action, old_status, new_status, message, timestamp
                 FROM execution_log WHERE task_id = ?1 ORDER BY id ASC",
            )?;
            let events = stmt
                .query_map(params![task_id], parse_log_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(events)
        })
    }

    /// Get all log events at or after the cutoff, oldest first. Backs the
    /// activity timeline.
    pub fn get_log_since(&self, cutoff: i64) -> Result<Vec<LogEvent>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, task_id, agent_id, action, old_status, new_status, message, timestamp
                 FROM execution_log WHERE timestamp >= ?1 ORDER BY timestamp ASC, id ASC",
            )?;
            let events = stmt
                .query_map(params![cutoff], parse_log_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(events)
        })
    }
}
