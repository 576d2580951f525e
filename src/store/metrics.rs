//! Durable per-task timing metrics and aggregate queue statistics.

use super::tasks::get_task_conn;
use super::{Store, now_ms};
use crate::error::{EngineError, Result};
use crate::types::{QueueStatistics, TaskMetrics};
use rusqlite::params;
use std::collections::HashMap;

impl Store {
    /// Derive and persist the timing record for a finished task. The row is
    /// write-once; recording again for the same task is a no-op.
    pub fn record_task_metrics(&self, task_id: &str, success: bool) -> Result<TaskMetrics> {
        self.with_conn(|conn| {
            let task = get_task_conn(conn, task_id)?
                .ok_or_else(|| EngineError::TaskNotFound(task_id.to_string()))?;

            let end = task.completed_at.unwrap_or_else(now_ms);
            let started = task.started_at.unwrap_or(end);
            let metrics = TaskMetrics {
                task_id: task_id.to_string(),
                queued_duration_seconds: (started - task.created_at).max(0) as f64 / 1000.0,
                execution_duration_seconds: (end - started).max(0) as f64 / 1000.0,
                total_duration_seconds: (end - task.created_at).max(0) as f64 / 1000.0,
                retry_count: task.retry_count,
                success,
            };

            conn.execute(
                "INSERT INTO task_metrics (
                     task_id, queued_duration_seconds, execution_duration_seconds,
                     total_duration_seconds, retry_count, success
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (task_id) DO NOTHING",
                params![
                    metrics.task_id,
                    metrics.queued_duration_seconds,
                    metrics.execution_duration_seconds,
                    metrics.total_duration_seconds,
                    metrics.retry_count,
                    metrics.success,
                ],
            )?;
            Ok(metrics)
        })
    }

    pub fn get_task_metrics(&self, task_id: &str) -> Result<Option<TaskMetrics>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT task_id, queued_duration_seconds, execution_duration_seconds,
                        total_duration_seconds, retry_count, success
                 FROM task_metrics WHERE task_id = ?1",
            )?;
            let mut rows = stmt.query_map(params![task_id], |row| {
                Ok(TaskMetrics {
                    task_id: row.get("task_id")?,
                    queued_duration_seconds: row.get("queued_duration_seconds")?,
                    execution_duration_seconds: row.get("execution_duration_seconds")?,
                    total_duration_seconds: row.get("total_duration_seconds")?,
                    retry_count: row.get("retry_count")?,
                    success: row.get("success")?,
                })
            })?;
            match rows.next() {
                Some(metrics) => Ok(Some(metrics?)),
                None => Ok(None),
            }
        })
    }

    /// Aggregate counts and timing over the whole queue.
    pub fn get_statistics(&self) -> Result<QueueStatistics> {
        self.with_conn(|conn| {
            let mut by_status = HashMap::new();
            let mut total_tasks = 0i64;
            {
                let mut stmt =
                    conn.prepare("SELECT status, COUNT(*) FROM tasks GROUP BY status")?;
                let rows = stmt.query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })?;
                for row in rows {
                    let (status, count) = row?;
                    total_tasks += count;
                    by_status.insert(status, count);
                }
            }

            let mut by_priority = HashMap::new();
            {
                let mut stmt =
                    conn.prepare("SELECT priority, COUNT(*) FROM tasks GROUP BY priority")?;
                let rows = stmt.query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })?;
                for row in rows {
                    let (priority, count) = row?;
                    by_priority.insert(priority, count);
                }
            }

            let (avg_execution, finished, succeeded): (Option<f64>, i64, i64) = conn.query_row(
                "SELECT AVG(execution_duration_seconds), COUNT(*),
                        COALESCE(SUM(success), 0)
                 FROM task_metrics",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;

            Ok(QueueStatistics {
                total_tasks,
                by_status,
                by_priority,
                avg_execution_time_seconds: avg_execution.unwrap_or(0.0),
                success_rate: if finished > 0 {
                    succeeded as f64 / finished as f64
                } else {
                    0.0
                },
            })
        })
    }
}
