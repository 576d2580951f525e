//! Task CRUD, status transitions, and the atomic claim path.
//!
//! Every status change funnels through [`transition_status`], which consults
//! the transition table, applies timestamp side effects, and appends an
//! execution-log row. Rejected transitions are logged too, then surfaced as
//! [`EngineError::InvalidTransition`].

use super::assignments::{record_assignment, release_assignment};
use super::log::log_event;
use super::{Store, now_ms};
use crate::error::{EngineError, Result};
use crate::types::{Task, TaskPriority, TaskProgress, TaskResult, TaskStatus, TaskType};
use rusqlite::{Connection, Row, params};
use std::str::FromStr;

const TASK_COLUMNS: &str = "task_id, title, description, task_type, priority, status, \
     command, script_path, working_dir, environment, timeout_seconds, \
     scheduled_at, deadline_at, estimated_duration_seconds, \
     created_at, started_at, completed_at, updated_at, \
     dependencies, retry_count, max_retries, last_error, \
     progress, result, assigned_agent, required_agent, labels, tags";

/// SQL expression ranking priorities for ORDER BY (lower sorts first).
const PRIORITY_RANK_SQL: &str =
    "CASE priority WHEN 'critical' THEN 0 WHEN 'high' THEN 1 WHEN 'medium' THEN 2 ELSE 3 END";

/// Filter selecting rows whose dependencies have all reached `completed`.
/// A dependency naming an unknown task id counts as unmet.
const DEPS_SATISFIED_SQL: &str = "NOT EXISTS (
        SELECT 1 FROM json_each(t.dependencies) je
        LEFT JOIN tasks dep ON dep.task_id = je.value
        WHERE dep.task_id IS NULL OR dep.status != 'completed')";

fn parse_enum<T: FromStr>(value: String, column: &str) -> rusqlite::Result<T> {
    value.parse().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("unrecognized {column}: {value}").into(),
        )
    })
}

pub fn parse_task_row(row: &Row) -> rusqlite::Result<Task> {
    let task_type: String = row.get("task_type")?;
    let priority: String = row.get("priority")?;
    let status: String = row.get("status")?;

    let environment_json: Option<String> = row.get("environment")?;
    let dependencies_json: Option<String> = row.get("dependencies")?;
    let progress_json: Option<String> = row.get("progress")?;
    let result_json: Option<String> = row.get("result")?;
    let labels_json: Option<String> = row.get("labels")?;
    let tags_json: Option<String> = row.get("tags")?;

    Ok(Task {
        task_id: row.get("task_id")?,
        title: row.get("title")?,
        description: row.get::<_, Option<String>>("description")?.unwrap_or_default(),
        task_type: parse_enum::<TaskType>(task_type, "task_type")?,
        priority: parse_enum::<TaskPriority>(priority, "priority")?,
        status: parse_enum::<TaskStatus>(status, "status")?,
        command: row.get("command")?,
        script_path: row.get("script_path")?,
        working_dir: row.get("working_dir")?,
        environment: environment_json
            .map(|s| serde_json::from_str(&s).unwrap_or_default())
            .unwrap_or_default(),
        timeout_seconds: row.get("timeout_seconds")?,
        scheduled_at: row.get("scheduled_at")?,
        deadline_at: row.get("deadline_at")?,
        estimated_duration_seconds: row.get("estimated_duration_seconds")?,
        created_at: row.get("created_at")?,
        started_at: row.get("started_at")?,
        completed_at: row.get("completed_at")?,
        updated_at: row.get("updated_at")?,
        dependencies: dependencies_json
            .map(|s| serde_json::from_str(&s).unwrap_or_default())
            .unwrap_or_default(),
        retry_count: row.get("retry_count")?,
        max_retries: row.get("max_retries")?,
        last_error: row.get("last_error")?,
        progress: progress_json.and_then(|s| serde_json::from_str(&s).ok()),
        result: result_json.and_then(|s| serde_json::from_str(&s).ok()),
        assigned_agent: row.get("assigned_agent")?,
        required_agent: row.get("required_agent")?,
        labels: labels_json
            .map(|s| serde_json::from_str(&s).unwrap_or_default())
            .unwrap_or_default(),
        tags: tags_json
            .map(|s| serde_json::from_str(&s).unwrap_or_default())
            .unwrap_or_default(),
    })
}

pub(crate) fn get_task_conn(conn: &Connection, task_id: &str) -> Result<Option<Task>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {TASK_COLUMNS} FROM tasks WHERE task_id = ?1"
    ))?;
    let mut rows = stmt.query_map(params![task_id], parse_task_row)?;
    match rows.next() {
        Some(task) => Ok(Some(task?)),
        None => Ok(None),
    }
}

/// Task ids from `task.dependencies` that have not reached `completed`.
/// Unknown ids count as blockers.
fn incomplete_dependencies(conn: &Connection, task: &Task) -> Result<Vec<String>> {
    let mut blockers = Vec::new();
    for dep_id in &task.dependencies {
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM tasks WHERE task_id = ?1",
                params![dep_id],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|err| match err {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        if status.as_deref() != Some("completed") {
            blockers.push(dep_id.clone());
        }
    }
    Ok(blockers)
}

/// Apply a validated status change: UPDATE the row, fire timestamp side
/// effects, release any active assignment when leaving IN_PROGRESS, and
/// append the audit row. On a transition the table forbids, append a
/// `rejected` audit row instead and return `InvalidTransition`.
pub(crate) fn transition_status(
    conn: &Connection,
    task: &Task,
    to: TaskStatus,
    actor: Option<&str>,
    message: &str,
) -> Result<()> {
    if !task.status.can_transition_to(to) {
        log_event(
            conn,
            &task.task_id,
            actor,
            "rejected",
            Some(task.status.as_str()),
            Some(to.as_str()),
            message,
        )?;
        return Err(EngineError::InvalidTransition {
            task_id: task.task_id.clone(),
            from: task.status,
            to,
        });
    }

    let now = now_ms();
    // Requeue-family targets drop the agent binding so the task is claimable
    // again; entering IN_PROGRESS stamps started_at once.
    let clear_agent = matches!(
        to,
        TaskStatus::Queued | TaskStatus::Blocked | TaskStatus::Retrying
    );
    let completed_at: Option<i64> = to.is_final().then_some(now);

    conn.execute(
        "UPDATE tasks SET
             status = ?2,
             started_at = CASE WHEN ?3 THEN COALESCE(started_at, ?4) ELSE started_at END,
             completed_at = COALESCE(?5, completed_at),
             assigned_agent = CASE WHEN ?6 THEN NULL ELSE assigned_agent END,
             updated_at = ?4
         WHERE task_id = ?1",
        params![
            task.task_id,
            to.as_str(),
            to == TaskStatus::InProgress,
            now,
            completed_at,
            clear_agent,
        ],
    )?;

    if task.status == TaskStatus::InProgress {
        release_assignment(conn, &task.task_id, to.as_str(), now)?;
    }

    log_event(
        conn,
        &task.task_id,
        actor,
        "status_change",
        Some(task.status.as_str()),
        Some(to.as_str()),
        message,
    )?;
    Ok(())
}

impl Store {
    /// Insert a new task in PENDING. Fails with `AlreadyExists` if the id is
    /// taken, leaving the existing row untouched.
    pub fn add_task(&self, task: &Task) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let exists: bool = tx
                .query_row(
                    "SELECT 1 FROM tasks WHERE task_id = ?1",
                    params![task.task_id],
                    |_| Ok(true),
                )
                .or_else(|err| match err {
                    rusqlite::Error::QueryReturnedNoRows => Ok(false),
                    other => Err(other),
                })?;
            if exists {
                return Err(EngineError::AlreadyExists(task.task_id.clone()));
            }

            tx.execute(
                "INSERT INTO tasks (
                     task_id, title, description, task_type, priority, status,
                     command, script_path, working_dir, environment, timeout_seconds,
                     scheduled_at, deadline_at, estimated_duration_seconds,
                     created_at, started_at, completed_at, updated_at,
                     dependencies, retry_count, max_retries, last_error,
                     progress, result, assigned_agent, required_agent, labels, tags
                 ) VALUES (
                     ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                     ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28
                 )",
                params![
                    task.task_id,
                    task.title,
                    task.description,
                    task.task_type.as_str(),
                    task.priority.as_str(),
                    task.status.as_str(),
                    task.command,
                    task.script_path,
                    task.working_dir,
                    serde_json::to_string(&task.environment)?,
                    task.timeout_seconds,
                    task.scheduled_at,
                    task.deadline_at,
                    task.estimated_duration_seconds,
                    task.created_at,
                    task.started_at,
                    task.completed_at,
                    task.updated_at,
                    serde_json::to_string(&task.dependencies)?,
                    task.retry_count,
                    task.max_retries,
                    task.last_error,
                    task.progress
                        .as_ref()
                        .map(serde_json::to_string)
                        .transpose()?,
                    task.result.as_ref().map(serde_json::to_string).transpose()?,
                    task.assigned_agent,
                    task.required_agent,
                    serde_json::to_string(&task.labels)?,
                    serde_json::to_string(&task.tags)?,
                ],
            )?;

            log_event(
                &tx,
                &task.task_id,
                None,
                "created",
                None,
                Some(task.status.as_str()),
                &format!("created: {}", task.title),
            )?;

            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        self.with_conn(|conn| get_task_conn(conn, task_id))
    }

    /// List tasks, optionally filtered by status, newest first.
    pub fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<Task>> {
        self.with_conn(|conn| {
            let sql = match status {
                Some(_) => format!(
                    "SELECT {TASK_COLUMNS} FROM tasks WHERE status = ?1 ORDER BY created_at DESC"
                ),
                None => format!("SELECT {TASK_COLUMNS} FROM tasks ORDER BY created_at DESC"),
            };
            let mut stmt = conn.prepare(&sql)?;
            let tasks = match status {
                Some(status) => stmt
                    .query_map(params![status.as_str()], parse_task_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?,
                None => stmt
                    .query_map([], parse_task_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?,
            };
            Ok(tasks)
        })
    }

    /// Not-yet-started tasks by priority rank, then FIFO within a rank.
    pub fn list_pending(&self, limit: i64) -> Result<Vec<Task>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM tasks
                 WHERE status IN ('pending', 'queued', 'retrying')
                 ORDER BY {PRIORITY_RANK_SQL}, created_at ASC
                 LIMIT ?1"
            ))?;
            let tasks = stmt
                .query_map(params![limit], parse_task_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(tasks)
        })
    }

    pub fn list_by_priority(&self, priority: TaskPriority) -> Result<Vec<Task>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM tasks WHERE priority = ?1 ORDER BY created_at ASC"
            ))?;
            let tasks = stmt
                .query_map(params![priority.as_str()], parse_task_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(tasks)
        })
    }

    pub fn list_by_type(&self, task_type: TaskType) -> Result<Vec<Task>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM tasks WHERE task_type = ?1 ORDER BY created_at ASC"
            ))?;
            let tasks = stmt
                .query_map(params![task_type.as_str()], parse_task_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(tasks)
        })
    }

    /// Substring search over title, description, and tags.
    pub fn search_tasks(&self, query: &str) -> Result<Vec<Task>> {
        self.with_conn(|conn| {
            let pattern = format!("%{}%", query);
            let mut stmt = conn.prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM tasks
                 WHERE title LIKE ?1 OR description LIKE ?1 OR tags LIKE ?1
                 ORDER BY created_at DESC"
            ))?;
            let tasks = stmt
                .query_map(params![pattern], parse_task_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(tasks)
        })
    }

    /// Ready candidates for an agent: ready-family status, schedule time
    /// reached, deadline not passed, dependencies complete, and agent
    /// affinity satisfied. Ordered by priority rank, then FIFO.
    pub fn get_ready_tasks(&self, agent_id: Option<&str>, limit: i64) -> Result<Vec<Task>> {
        self.with_conn(|conn| {
            let now = now_ms();
            let mut stmt = conn.prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM tasks t
                 WHERE t.status IN ('pending', 'queued', 'retrying')
                   AND (t.scheduled_at IS NULL OR t.scheduled_at <= ?1)
                   AND (t.deadline_at IS NULL OR t.deadline_at > ?1)
                   AND (t.required_agent IS NULL OR t.required_agent = ?2)
                   AND {DEPS_SATISFIED_SQL}
                 ORDER BY {PRIORITY_RANK_SQL}, t.created_at ASC
                 LIMIT ?3"
            ))?;
            let tasks = stmt
                .query_map(params![now, agent_id, limit], parse_task_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(tasks)
        })
    }

    /// The single best ready task for an agent, by priority rank then FIFO.
    pub fn get_next_ready(&self, agent_id: &str) -> Result<Option<Task>> {
        Ok(self.get_ready_tasks(Some(agent_id), 1)?.into_iter().next())
    }

    /// Validated status change with audit. `message` lands in the log row.
    pub fn update_status(
        &self,
        task_id: &str,
        to: TaskStatus,
        actor: Option<&str>,
        message: &str,
    ) -> Result<Task> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let task = get_task_conn(&tx, task_id)?
                .ok_or_else(|| EngineError::TaskNotFound(task_id.to_string()))?;

            match transition_status(&tx, &task, to, actor, message) {
                Ok(()) => {}
                Err(err) => {
                    // The rejected audit row must survive the error.
                    tx.commit()?;
                    return Err(err);
                }
            }

            let task = get_task_conn(&tx, task_id)?
                .ok_or_else(|| EngineError::TaskNotFound(task_id.to_string()))?;
            tx.commit()?;
            Ok(task)
        })
    }

    /// Atomically claim a task for an agent.
    ///
    /// PENDING and RETRYING tasks are normalized to QUEUED first, then
    /// dependencies are re-validated inside the same transaction; an unmet
    /// dependency parks the task in BLOCKED. The claim itself is a
    /// conditional UPDATE whose affected-row count decides the winner.
    pub fn claim_task(&self, task_id: &str, agent_id: &str) -> Result<Task> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let mut task = get_task_conn(&tx, task_id)?
                .ok_or_else(|| EngineError::TaskNotFound(task_id.to_string()))?;

            if matches!(task.status, TaskStatus::Pending | TaskStatus::Retrying) {
                transition_status(&tx, &task, TaskStatus::Queued, Some(agent_id), "ready for claim")?;
                task.status = TaskStatus::Queued;
            }
            if task.status != TaskStatus::Queued {
                tx.commit()?;
                return Err(EngineError::ClaimConflict(task_id.to_string()));
            }

            let blockers = incomplete_dependencies(&tx, &task)?;
            if !blockers.is_empty() {
                transition_status(
                    &tx,
                    &task,
                    TaskStatus::Blocked,
                    Some(agent_id),
                    &format!("blocked on {}", blockers.join(", ")),
                )?;
                tx.commit()?;
                return Err(EngineError::DependencyUnsatisfied {
                    task_id: task_id.to_string(),
                    blockers,
                });
            }

            let now = now_ms();
            let claimed = tx.execute(
                "UPDATE tasks SET
                     status = 'in_progress',
                     assigned_agent = ?2,
                     started_at = COALESCE(started_at, ?3),
                     updated_at = ?3
                 WHERE task_id = ?1 AND status = 'queued' AND assigned_agent IS NULL",
                params![task_id, agent_id, now],
            )?;
            if claimed == 0 {
                tx.commit()?;
                return Err(EngineError::ClaimConflict(task_id.to_string()));
            }

            log_event(
                &tx,
                task_id,
                Some(agent_id),
                "claimed",
                Some("queued"),
                Some("in_progress"),
                "claimed for execution",
            )?;
            record_assignment(&tx, task_id, agent_id, now)?;

            let task = get_task_conn(&tx, task_id)?
                .ok_or_else(|| EngineError::TaskNotFound(task_id.to_string()))?;
            tx.commit()?;
            Ok(task)
        })
    }

    /// Overwrite the progress snapshot on an in-flight task.
    pub fn update_progress(&self, task_id: &str, progress: &TaskProgress) -> Result<()> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE tasks SET progress = ?2, updated_at = ?3 WHERE task_id = ?1",
                params![task_id, serde_json::to_string(progress)?, now_ms()],
            )?;
            if updated == 0 {
                return Err(EngineError::TaskNotFound(task_id.to_string()));
            }
            Ok(())
        })
    }

    /// Write the execution result. Write-once: a second write is rejected
    /// with `ResultAlreadyWritten` and the stored result is untouched.
    pub fn set_result(&self, task_id: &str, result: &TaskResult) -> Result<()> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE tasks SET result = ?2, updated_at = ?3
                 WHERE task_id = ?1 AND result IS NULL",
                params![task_id, serde_json::to_string(result)?, now_ms()],
            )?;
            if updated == 1 {
                return Ok(());
            }
            match get_task_conn(conn, task_id)? {
                Some(_) => Err(EngineError::ResultAlreadyWritten(task_id.to_string())),
                None => Err(EngineError::TaskNotFound(task_id.to_string())),
            }
        })
    }

    /// Capture the most recent execution error verbatim.
    pub fn set_last_error(&self, task_id: &str, error: &str) -> Result<()> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE tasks SET last_error = ?2, updated_at = ?3 WHERE task_id = ?1",
                params![task_id, error, now_ms()],
            )?;
            if updated == 0 {
                return Err(EngineError::TaskNotFound(task_id.to_string()));
            }
            Ok(())
        })
    }

    /// Record a failed attempt and route the task: RETRYING while attempts
    /// remain, FAILED once `retry_count` reaches `max_retries`. Returns the
    /// resulting status and the new retry count.
    pub fn increment_retry(
        &self,
        task_id: &str,
        actor: Option<&str>,
        error: &str,
    ) -> Result<(TaskStatus, i32)> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let task = get_task_conn(&tx, task_id)?
                .ok_or_else(|| EngineError::TaskNotFound(task_id.to_string()))?;

            let new_count = task.retry_count + 1;
            let to = if new_count >= task.max_retries {
                TaskStatus::Failed
            } else {
                TaskStatus::Retrying
            };
            match transition_status(
                &tx,
                &task,
                to,
                actor,
                &format!("attempt {}/{} failed: {}", new_count, task.max_retries, error),
            ) {
                Ok(()) => {}
                Err(err) => {
                    // Keep the rejected audit row; the retry bump below never
                    // happened, so the count is untouched.
                    tx.commit()?;
                    return Err(err);
                }
            }

            tx.execute(
                "UPDATE tasks SET retry_count = ?2, last_error = ?3, updated_at = ?4
                 WHERE task_id = ?1",
                params![task_id, new_count, error, now_ms()],
            )?;

            tx.commit()?;
            Ok((to, new_count))
        })
    }

    /// Requeue BLOCKED tasks whose dependencies are now all complete.
    /// Called after `completed_id` finishes; returns the requeued ids.
    pub fn requeue_unblocked(&self, completed_id: &str) -> Result<Vec<String>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let candidates = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT {TASK_COLUMNS} FROM tasks t
                     WHERE t.status = 'blocked'
                       AND EXISTS (SELECT 1 FROM json_each(t.dependencies) je WHERE je.value = ?1)
                       AND {DEPS_SATISFIED_SQL}"
                ))?;
                stmt.query_map(params![completed_id], parse_task_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?
            };

            let mut requeued = Vec::with_capacity(candidates.len());
            for task in &candidates {
                transition_status(
                    &tx,
                    task,
                    TaskStatus::Queued,
                    None,
                    &format!("unblocked by completion of {}", completed_id),
                )?;
                requeued.push(task.task_id.clone());
            }

            tx.commit()?;
            Ok(requeued)
        })
    }

    /// Tasks whose deadline has passed and which are not COMPLETED or
    /// CANCELLED.
    pub fn get_overdue(&self) -> Result<Vec<Task>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM tasks
                 WHERE deadline_at IS NOT NULL AND deadline_at < ?1
                   AND status NOT IN ('completed', 'cancelled')
                 ORDER BY deadline_at ASC"
            ))?;
            let tasks = stmt
                .query_map(params![now_ms()], parse_task_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(tasks)
        })
    }

    /// IN_PROGRESS tasks that started longer ago than the threshold.
    pub fn get_stalled(&self, threshold_seconds: i64) -> Result<Vec<Task>> {
        self.with_conn(|conn| {
            let cutoff = now_ms() - threshold_seconds * 1000;
            let mut stmt = conn.prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM tasks
                 WHERE status = 'in_progress' AND started_at IS NOT NULL AND started_at < ?1
                 ORDER BY started_at ASC"
            ))?;
            let tasks = stmt
                .query_map(params![cutoff], parse_task_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(tasks)
        })
    }

    /// Delete COMPLETED and CANCELLED tasks whose `completed_at` is before
    /// the cutoff, along with their log, metrics, assignment, and alert rows.
    /// In-flight and failed tasks are never touched.
    pub fn purge_terminal_tasks(&self, cutoff: i64) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            const PURGEABLE: &str = "SELECT task_id FROM tasks
                 WHERE status IN ('completed', 'cancelled')
                   AND completed_at IS NOT NULL AND completed_at < ?1";

            for table in ["execution_log", "task_metrics", "agent_assignments", "alerts"] {
                tx.execute(
                    &format!("DELETE FROM {table} WHERE task_id IN ({PURGEABLE})"),
                    params![cutoff],
                )?;
            }
            let purged = tx.execute(
                "DELETE FROM tasks
                 WHERE status IN ('completed', 'cancelled')
                   AND completed_at IS NOT NULL AND completed_at < ?1",
                params![cutoff],
            )?;

            tx.commit()?;
            Ok(purged)
        })
    }

    /// Promote every overdue, non-critical task to critical. Idempotent: a
    /// second call with no newly-overdue tasks promotes nothing. Returns
    /// `(task_id, old_priority)` for each promotion.
    pub fn escalate_overdue(&self) -> Result<Vec<(String, TaskPriority)>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let now = now_ms();

            let candidates = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT {TASK_COLUMNS} FROM tasks
                     WHERE deadline_at IS NOT NULL AND deadline_at < ?1
                       AND status NOT IN ('completed', 'cancelled')
                       AND priority != 'critical'
                     ORDER BY deadline_at ASC"
                ))?;
                stmt.query_map(params![now], parse_task_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?
            };

            let mut promoted = Vec::with_capacity(candidates.len());
            for task in candidates {
                tx.execute(
                    "UPDATE tasks SET priority = 'critical', updated_at = ?2 WHERE task_id = ?1",
                    params![task.task_id, now],
                )?;
                log_event(
                    &tx,
                    &task.task_id,
                    None,
                    "escalated",
                    None,
                    None,
                    &format!("priority {} -> critical (overdue)", task.priority),
                )?;
                promoted.push((task.task_id, task.priority));
            }

            tx.commit()?;
            Ok(promoted)
        })
    }
}
