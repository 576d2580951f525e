//! Worker-to-task assignment history.

use super::Store;
use crate::error::Result;
use crate::types::AgentAssignment;
use rusqlite::{Connection, params};

/// Open an active assignment for a claim. A re-claim by the same agent
/// (after a retry) reactivates the existing row.
pub(crate) fn record_assignment(
    conn: &Connection,
    task_id: &str,
    agent_id: &str,
    assigned_at: i64,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO agent_assignments (task_id, agent_id, assigned_at, released_at, status)
         VALUES (?1, ?2, ?3, NULL, 'active')
         ON CONFLICT (task_id, agent_id) DO UPDATE SET
             assigned_at = excluded.assigned_at,
             released_at = NULL,
             status = 'active'",
        params![task_id, agent_id, assigned_at],
    )?;
    Ok(())
}

/// Close the active assignment for a task, recording the outcome status.
pub(crate) fn release_assignment(
    conn: &Connection,
    task_id: &str,
    outcome: &str,
    released_at: i64,
) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE agent_assignments SET released_at = ?2, status = ?3
         WHERE task_id = ?1 AND released_at IS NULL",
        params![task_id, released_at, outcome],
    )?;
    Ok(())
}

fn parse_assignment_row(row: &rusqlite::Row) -> rusqlite::Result<AgentAssignment> {
    Ok(AgentAssignment {
        task_id: row.get("task_id")?,
        agent_id: row.get("agent_id")?,
        assigned_at: row.get("assigned_at")?,
        released_at: row.get("released_at")?,
        status: row.get("status")?,
    })
}

impl Store {
    /// Assignment history for one task, oldest first.
    pub fn get_assignments(&self, task_id: &str) -> Result<Vec<AgentAssignment>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT task_id, agent_id, assigned_at, released_at, status
                 FROM agent_assignments WHERE task_id = ?1 ORDER BY assigned_at ASC",
            )?;
            let assignments = stmt
                .query_map(params![task_id], parse_assignment_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(assignments)
        })
    }

    /// Currently active assignments across all agents.
    pub fn get_active_assignments(&self) -> Result<Vec<AgentAssignment>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT task_id, agent_id, assigned_at, released_at, status
                 FROM agent_assignments WHERE released_at IS NULL ORDER BY assigned_at ASC",
            )?;
            let assignments = stmt
                .query_map([], parse_assignment_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(assignments)
        })
    }
}
