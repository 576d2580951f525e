//! Durable alert rows. Alert policy (dedupe, severity mapping) lives in the
//! monitor; this module only owns the SQL.

use super::{Store, now_ms};
use crate::error::Result;
use crate::types::{Alert, AlertSeverity, AlertSummary, AlertType};
use rusqlite::{Row, params};
use std::str::FromStr;

const ALERT_COLUMNS: &str =
    "alert_id, task_id, alert_type, severity, message, created_at, acknowledged, resolved, resolved_at";

fn parse_alert_row(row: &Row) -> rusqlite::Result<Alert> {
    let alert_type: String = row.get("alert_type")?;
    let severity: String = row.get("severity")?;
    let conversion = |column: &str, value: &str| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("unrecognized {column}: {value}").into(),
        )
    };
    Ok(Alert {
        alert_id: row.get("alert_id")?,
        task_id: row.get("task_id")?,
        alert_type: AlertType::from_str(&alert_type)
            .map_err(|_| conversion("alert_type", &alert_type))?,
        severity: AlertSeverity::from_str(&severity)
            .map_err(|_| conversion("severity", &severity))?,
        message: row.get("message")?,
        created_at: row.get("created_at")?,
        acknowledged: row.get("acknowledged")?,
        resolved: row.get("resolved")?,
        resolved_at: row.get("resolved_at")?,
    })
}

impl Store {
    pub fn insert_alert(&self, alert: &Alert) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO alerts (alert_id, task_id, alert_type, severity, message,
                                     created_at, acknowledged, resolved, resolved_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    alert.alert_id,
                    alert.task_id,
                    alert.alert_type.as_str(),
                    alert.severity.as_str(),
                    alert.message,
                    alert.created_at,
                    alert.acknowledged,
                    alert.resolved,
                    alert.resolved_at,
                ],
            )?;
            Ok(())
        })
    }

    /// Whether an unresolved alert with the same (task, type) key exists at
    /// or after the cutoff. The monitor's dedupe check.
    pub fn has_recent_unresolved_alert(
        &self,
        task_id: &str,
        alert_type: AlertType,
        cutoff: i64,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM alerts
                 WHERE task_id = ?1 AND alert_type = ?2 AND resolved = 0 AND created_at >= ?3",
                params![task_id, alert_type.as_str(), cutoff],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }

    /// Mark an alert acknowledged. Returns false for an unknown id.
    pub fn acknowledge_alert(&self, alert_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE alerts SET acknowledged = 1 WHERE alert_id = ?1",
                params![alert_id],
            )?;
            Ok(updated > 0)
        })
    }

    /// Mark an alert resolved. Returns false for an unknown id.
    pub fn resolve_alert(&self, alert_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE alerts SET resolved = 1, resolved_at = ?2 WHERE alert_id = ?1",
                params![alert_id, now_ms()],
            )?;
            Ok(updated > 0)
        })
    }

    /// Unacknowledged, unresolved alerts, newest first.
    pub fn get_active_alerts(&self) -> Result<Vec<Alert>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ALERT_COLUMNS} FROM alerts
                 WHERE acknowledged = 0 AND resolved = 0
                 ORDER BY created_at DESC"
            ))?;
            let alerts = stmt
                .query_map([], parse_alert_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(alerts)
        })
    }

    pub fn get_alerts_by_task(&self, task_id: &str) -> Result<Vec<Alert>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ALERT_COLUMNS} FROM alerts WHERE task_id = ?1 ORDER BY created_at DESC"
            ))?;
            let alerts = stmt
                .query_map(params![task_id], parse_alert_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(alerts)
        })
    }

    pub fn get_alerts_by_severity(&self, severity: AlertSeverity) -> Result<Vec<Alert>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ALERT_COLUMNS} FROM alerts WHERE severity = ?1 ORDER BY created_at DESC"
            ))?;
            let alerts = stmt
                .query_map(params![severity.as_str()], parse_alert_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(alerts)
        })
    }

    pub fn get_alert_summary(&self) -> Result<AlertSummary> {
        self.with_conn(|conn| {
            let (total_alerts, acknowledged, resolved): (i64, i64, i64) = conn.query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(acknowledged), 0),
                        COALESCE(SUM(resolved), 0)
                 FROM alerts",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;

            let mut summary = AlertSummary {
                total_alerts,
                acknowledged,
                resolved,
                ..Default::default()
            };

            let mut stmt = conn.prepare(
                "SELECT severity, alert_type, COUNT(*) FROM alerts
                 WHERE acknowledged = 0 AND resolved = 0
                 GROUP BY severity, alert_type",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?;
            for row in rows {
                let (severity, alert_type, count) = row?;
                summary.active_alerts += count;
                *summary.by_severity.entry(severity).or_insert(0) += count;
                *summary.by_type.entry(alert_type).or_insert(0) += count;
            }
            Ok(summary)
        })
    }

    /// Delete resolved alerts older than the cutoff. Returns rows removed.
    pub fn purge_resolved_alerts(&self, cutoff: i64) -> Result<usize> {
        self.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM alerts WHERE resolved = 1 AND created_at < ?1",
                params![cutoff],
            )?;
            Ok(deleted)
        })
    }
}
