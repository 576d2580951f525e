//! Periodic health sweep and operator-facing reports.

pub mod alerts;

use crate::config::MonitorConfig;
use crate::error::Result;
use crate::store::{Store, now_ms};
use crate::types::{LogEvent, Task, TaskProgress, TaskResult, TaskStatus};
use alerts::AlertManager;
use chrono::{TimeZone, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Result of one health sweep.
#[derive(Debug, Default)]
pub struct SweepReport {
    pub stalled: Vec<String>,
    pub overdue: Vec<String>,
    pub alerts_raised: usize,
    pub alerts_purged: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardSummary {
    pub total_pending: i64,
    pub in_progress: i64,
    pub completed_today: usize,
    pub failed_today: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActiveTaskView {
    pub task_id: String,
    pub title: String,
    pub started_at: Option<i64>,
    pub progress: Option<TaskProgress>,
    pub assigned_agent: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletedTaskView {
    pub task_id: String,
    pub title: String,
    pub completed_at: Option<i64>,
    pub duration_seconds: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedTaskView {
    pub task_id: String,
    pub title: String,
    pub failed_at: Option<i64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthRollup {
    pub stalled_tasks: usize,
    pub overdue_tasks: usize,
    pub success_rate: f64,
    pub avg_execution_time_seconds: f64,
}

/// Point-in-time view of the whole queue for dashboards.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardSnapshot {
    pub summary: DashboardSummary,
    pub by_status: HashMap<String, i64>,
    pub by_priority: HashMap<String, i64>,
    pub active_tasks: Vec<ActiveTaskView>,
    pub recent_completed: Vec<CompletedTaskView>,
    pub recent_failed: Vec<FailedTaskView>,
    pub health: HealthRollup,
}

/// Detailed progress view for one task.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressReport {
    pub task_id: String,
    pub title: String,
    pub status: TaskStatus,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub estimated_duration_seconds: Option<i64>,
    pub actual_duration_seconds: Option<f64>,
    pub progress: Option<TaskProgress>,
    pub result: Option<TaskResult>,
    pub dependencies: Vec<String>,
    pub retry_count: i32,
    pub max_retries: i32,
}

/// Aggregate view of one agent's workload and history.
#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    pub agent_id: String,
    pub current_task: Option<String>,
    pub current_task_title: Option<String>,
    pub total_completed: usize,
    pub total_failed: usize,
    pub total_time_spent_seconds: f64,
    pub average_task_duration_seconds: f64,
    pub success_rate: f64,
}

pub struct Monitor {
    store: Store,
    config: MonitorConfig,
    alerts: AlertManager,
}

impl Monitor {
    pub fn new(store: Store, config: MonitorConfig) -> Self {
        let alerts = AlertManager::new(store.clone(), config.alert_cooldown_seconds);
        Self {
            store,
            config,
            alerts,
        }
    }

    pub fn alerts(&self) -> &AlertManager {
        &self.alerts
    }

    /// Run sweeps on the configured interval until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        if !self.config.enabled {
            return;
        }
        info!(
            interval = self.config.sweep_interval_seconds,
            "monitor starting"
        );
        let interval = Duration::from_secs(self.config.sweep_interval_seconds);

        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.sweep() {
                Ok(report) => debug!(
                    stalled = report.stalled.len(),
                    overdue = report.overdue.len(),
                    raised = report.alerts_raised,
                    "sweep finished"
                ),
                Err(err) => error!(%err, "sweep failed"),
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {}
            }
        }
        info!("monitor stopped");
    }

    /// One health pass: detect stalled and overdue tasks, raise alerts
    /// (subject to dedupe), and purge old resolved alerts.
    pub fn sweep(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        for task in self.store.get_stalled(self.config.stalled_threshold_seconds)? {
            if self
                .alerts
                .stalled_alert(&task, self.config.stalled_threshold_seconds)?
                .is_some()
            {
                report.alerts_raised += 1;
            }
            report.stalled.push(task.task_id);
        }

        for task in self.store.get_overdue()? {
            if self.alerts.overdue_alert(&task)?.is_some() {
                report.alerts_raised += 1;
            }
            report.overdue.push(task.task_id);
        }

        report.alerts_purged = self
            .alerts
            .purge_resolved(self.config.alert_retention_seconds)?;
        Ok(report)
    }

    /// Dashboard snapshot: counts, live progress, recent outcomes, health.
    pub fn dashboard(&self) -> Result<DashboardSnapshot> {
        let stats = self.store.get_statistics()?;
        let now = now_ms();

        let active_tasks = self
            .store
            .list_tasks(Some(TaskStatus::InProgress))?
            .into_iter()
            .take(10)
            .map(|task| ActiveTaskView {
                task_id: task.task_id,
                title: task.title,
                started_at: task.started_at,
                progress: task.progress,
                assigned_agent: task.assigned_agent,
            })
            .collect::<Vec<_>>();

        let completed = self.store.list_tasks(Some(TaskStatus::Completed))?;
        let failed = self.store.list_tasks(Some(TaskStatus::Failed))?;
        let completed_today = completed
            .iter()
            .filter(|task| is_same_utc_day(task.completed_at, now))
            .count();
        let failed_today = failed
            .iter()
            .filter(|task| is_same_utc_day(task.completed_at, now))
            .count();

        let recent_completed = completed
            .into_iter()
            .take(10)
            .map(|task| CompletedTaskView {
                duration_seconds: task
                    .result
                    .as_ref()
                    .map(|result| result.duration_seconds)
                    .unwrap_or(0.0),
                task_id: task.task_id,
                title: task.title,
                completed_at: task.completed_at,
            })
            .collect();
        let recent_failed = failed
            .into_iter()
            .take(5)
            .map(|task| FailedTaskView {
                task_id: task.task_id,
                title: task.title,
                failed_at: task.completed_at,
                error: task.last_error,
            })
            .collect();

        let pending = stats.by_status.get("pending").copied().unwrap_or(0)
            + stats.by_status.get("queued").copied().unwrap_or(0);
        let in_progress = stats.by_status.get("in_progress").copied().unwrap_or(0);

        Ok(DashboardSnapshot {
            summary: DashboardSummary {
                total_pending: pending,
                in_progress,
                completed_today,
                failed_today,
            },
            by_status: stats.by_status,
            by_priority: stats.by_priority,
            active_tasks,
            recent_completed,
            recent_failed,
            health: HealthRollup {
                stalled_tasks: self
                    .store
                    .get_stalled(self.config.stalled_threshold_seconds)?
                    .len(),
                overdue_tasks: self.store.get_overdue()?.len(),
                success_rate: stats.success_rate,
                avg_execution_time_seconds: stats.avg_execution_time_seconds,
            },
        })
    }

    /// Lifecycle events over the trailing window, straight from the
    /// execution log.
    pub fn get_task_timeline(&self, hours: i64) -> Result<Vec<LogEvent>> {
        self.store.get_log_since(now_ms() - hours * 3_600_000)
    }

    pub fn get_progress_report(&self, task_id: &str) -> Result<Option<ProgressReport>> {
        let Some(task) = self.store.get_task(task_id)? else {
            return Ok(None);
        };
        let actual_duration_seconds = match (task.started_at, task.completed_at) {
            (Some(started), Some(completed)) => Some((completed - started) as f64 / 1000.0),
            _ => None,
        };
        Ok(Some(ProgressReport {
            task_id: task.task_id,
            title: task.title,
            status: task.status,
            created_at: task.created_at,
            started_at: task.started_at,
            completed_at: task.completed_at,
            estimated_duration_seconds: task.estimated_duration_seconds,
            actual_duration_seconds,
            progress: task.progress,
            result: task.result,
            dependencies: task.dependencies,
            retry_count: task.retry_count,
            max_retries: task.max_retries,
        }))
    }

    pub fn get_agent_status(&self, agent_id: &str) -> Result<AgentStatus> {
        let agent_tasks: Vec<Task> = self
            .store
            .list_tasks(None)?
            .into_iter()
            .filter(|task| task.assigned_agent.as_deref() == Some(agent_id))
            .collect();

        let current = agent_tasks
            .iter()
            .find(|task| task.status == TaskStatus::InProgress);
        let completed: Vec<&Task> = agent_tasks
            .iter()
            .filter(|task| task.status == TaskStatus::Completed)
            .collect();
        let failed_count = agent_tasks
            .iter()
            .filter(|task| task.status == TaskStatus::Failed)
            .count();

        let total_time: f64 = completed
            .iter()
            .filter_map(|task| task.result.as_ref())
            .map(|result| result.duration_seconds)
            .sum();
        let finished = completed.len() + failed_count;

        Ok(AgentStatus {
            agent_id: agent_id.to_string(),
            current_task: current.map(|task| task.task_id.clone()),
            current_task_title: current.map(|task| task.title.clone()),
            total_completed: completed.len(),
            total_failed: failed_count,
            total_time_spent_seconds: total_time,
            average_task_duration_seconds: if completed.is_empty() {
                0.0
            } else {
                total_time / completed.len() as f64
            },
            success_rate: if finished > 0 {
                completed.len() as f64 / finished as f64
            } else {
                0.0
            },
        })
    }
}

fn is_same_utc_day(timestamp: Option<i64>, now: i64) -> bool {
    let Some(timestamp) = timestamp else {
        return false;
    };
    match (
        Utc.timestamp_millis_opt(timestamp).single(),
        Utc.timestamp_millis_opt(now).single(),
    ) {
        (Some(a), Some(b)) => a.date_naive() == b.date_naive(),
        _ => false,
    }
}
