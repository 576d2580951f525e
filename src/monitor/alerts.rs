//! Alert policy: severity mapping and de-duplication over the durable rows.

use crate::error::Result;
use crate::store::{Store, now_ms};
use crate::types::{Alert, AlertSeverity, AlertSummary, AlertType, Task, TaskPriority};
use tracing::{error, warn};
use uuid::Uuid;

/// Raises alerts against the store, suppressing repeats.
///
/// De-dupe key is `(task_id, alert_type)`: while an unresolved alert with
/// that key exists inside the cooldown window, the same condition does not
/// re-alert. Resolution or cooldown expiry re-arms the key.
#[derive(Clone)]
pub struct AlertManager {
    store: Store,
    cooldown_seconds: i64,
}

impl AlertManager {
    pub fn new(store: Store, cooldown_seconds: i64) -> Self {
        Self {
            store,
            cooldown_seconds,
        }
    }

    /// Raise an alert unless suppressed by the dedupe window. Returns the
    /// alert when one was actually created.
    pub fn raise(
        &self,
        task_id: &str,
        alert_type: AlertType,
        severity: AlertSeverity,
        message: String,
    ) -> Result<Option<Alert>> {
        let now = now_ms();
        let cutoff = now - self.cooldown_seconds * 1000;
        if self
            .store
            .has_recent_unresolved_alert(task_id, alert_type, cutoff)?
        {
            return Ok(None);
        }

        let alert = Alert {
            alert_id: Uuid::now_v7().to_string(),
            task_id: task_id.to_string(),
            alert_type,
            severity,
            message,
            created_at: now,
            acknowledged: false,
            resolved: false,
            resolved_at: None,
        };
        self.store.insert_alert(&alert)?;

        match severity {
            AlertSeverity::Info | AlertSeverity::Warning => {
                warn!(alert_id = %alert.alert_id, task_id, %alert_type, "{}", alert.message)
            }
            AlertSeverity::Error | AlertSeverity::Critical => {
                error!(alert_id = %alert.alert_id, task_id, %alert_type, "{}", alert.message)
            }
        }
        Ok(Some(alert))
    }

    pub fn stalled_alert(&self, task: &Task, threshold_seconds: i64) -> Result<Option<Alert>> {
        self.raise(
            &task.task_id,
            AlertType::Stalled,
            AlertSeverity::Warning,
            format!(
                "task {} has been in progress for over {}s",
                task.task_id, threshold_seconds
            ),
        )
    }

    pub fn overdue_alert(&self, task: &Task) -> Result<Option<Alert>> {
        self.raise(
            &task.task_id,
            AlertType::Overdue,
            AlertSeverity::Error,
            format!(
                "task {} is overdue (deadline: {:?})",
                task.task_id, task.deadline_at
            ),
        )
    }

    /// Failure severity follows priority: critical/high tasks alert at
    /// error, the rest at warning.
    pub fn failed_alert(&self, task: &Task, error: &str) -> Result<Option<Alert>> {
        let severity = match task.priority {
            TaskPriority::Critical | TaskPriority::High => AlertSeverity::Error,
            TaskPriority::Medium | TaskPriority::Low => AlertSeverity::Warning,
        };
        self.raise(
            &task.task_id,
            AlertType::Failed,
            severity,
            format!("task {} failed: {}", task.task_id, error),
        )
    }

    pub fn critical_alert(&self, task: &Task, reason: &str) -> Result<Option<Alert>> {
        self.raise(
            &task.task_id,
            AlertType::Critical,
            AlertSeverity::Critical,
            format!("task {}: {}", task.task_id, reason),
        )
    }

    pub fn acknowledge(&self, alert_id: &str) -> Result<bool> {
        self.store.acknowledge_alert(alert_id)
    }

    pub fn resolve(&self, alert_id: &str) -> Result<bool> {
        self.store.resolve_alert(alert_id)
    }

    pub fn active(&self) -> Result<Vec<Alert>> {
        self.store.get_active_alerts()
    }

    pub fn by_task(&self, task_id: &str) -> Result<Vec<Alert>> {
        self.store.get_alerts_by_task(task_id)
    }

    pub fn by_severity(&self, severity: AlertSeverity) -> Result<Vec<Alert>> {
        self.store.get_alerts_by_severity(severity)
    }

    pub fn summary(&self) -> Result<AlertSummary> {
        self.store.get_alert_summary()
    }

    /// Purge resolved alerts older than the retention age.
    pub fn purge_resolved(&self, retention_seconds: i64) -> Result<usize> {
        self.store
            .purge_resolved_alerts(now_ms() - retention_seconds * 1000)
    }
}
