//! Admission, claim, and completion façade over the store.
//!
//! The queue enforces the ownership and dependency rules; ordering decisions
//! are delegated to the [`Scheduler`].

use crate::error::{EngineError, Result};
use crate::scheduler::Scheduler;
use crate::store::Store;
use crate::types::{
    QueueStatistics, Task, TaskPriority, TaskResult, TaskStatus, TaskType,
};
use std::collections::HashMap;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct TaskQueue {
    store: Store,
    scheduler: Scheduler,
}

impl TaskQueue {
    pub fn new(store: Store) -> Self {
        let scheduler = Scheduler::new(store.clone());
        Self { store, scheduler }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Admit a task. Dependency-free tasks go straight to QUEUED; tasks with
    /// dependencies stay PENDING until claim-time validation sorts them out.
    pub fn enqueue(&self, mut task: Task) -> Result<Task> {
        task.status = TaskStatus::Pending;
        self.store.add_task(&task)?;

        if task.dependencies.is_empty() {
            let task = self
                .store
                .update_status(&task.task_id, TaskStatus::Queued, None, "enqueued")?;
            info!(task_id = %task.task_id, priority = %task.priority, "task enqueued");
            return Ok(task);
        }

        info!(
            task_id = %task.task_id,
            deps = task.dependencies.len(),
            "task admitted pending dependencies"
        );
        Ok(task)
    }

    /// Admit a batch of tasks. Duplicates are flagged `false` and skipped;
    /// the rest of the batch still goes through. Store faults abort.
    pub fn bulk_enqueue(&self, tasks: Vec<Task>) -> Result<HashMap<String, bool>> {
        let mut results = HashMap::with_capacity(tasks.len());
        for task in tasks {
            let task_id = task.task_id.clone();
            let admitted = match self.enqueue(task) {
                Ok(_) => true,
                Err(EngineError::AlreadyExists(_)) => {
                    warn!(task_id, "bulk enqueue skipped duplicate");
                    false
                }
                Err(err) => return Err(err),
            };
            results.insert(task_id, admitted);
        }
        let admitted = results.values().filter(|ok| **ok).count();
        info!(admitted, total = results.len(), "bulk enqueue finished");
        Ok(results)
    }

    /// Delete terminal tasks older than `days_old`, with their log, metrics,
    /// assignment, and alert rows. Returns the number of tasks removed.
    pub fn purge_completed(&self, days_old: i64) -> Result<usize> {
        let cutoff = crate::store::now_ms() - days_old * 86_400_000;
        let purged = self.store.purge_terminal_tasks(cutoff)?;
        if purged > 0 {
            info!(purged, days_old, "purged old terminal tasks");
        }
        Ok(purged)
    }

    /// Claim a specific task for an agent. See [`Store::claim_task`] for the
    /// atomicity and dependency re-validation contract.
    pub fn claim(&self, task_id: &str, agent_id: &str) -> Result<Task> {
        let task = self.store.claim_task(task_id, agent_id)?;
        info!(task_id, agent_id, "task claimed");
        Ok(task)
    }

    /// Claim the best ready task for an agent, walking the scheduler's
    /// ordering past candidates lost to racing workers. `None` when nothing
    /// is ready.
    pub fn dequeue(&self, agent_id: &str) -> Result<Option<Task>> {
        for candidate in self.scheduler.ready_tasks(Some(agent_id))? {
            match self.claim(&candidate.task_id, agent_id) {
                Ok(task) => return Ok(Some(task)),
                Err(err) if err.is_contention() => {
                    debug!(task_id = %candidate.task_id, %err, "claim contention, trying next");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(None)
    }

    /// Finalize a successful execution: COMPLETED, result written once, a
    /// metrics row recorded, and blocked dependents requeued.
    pub fn complete(&self, task_id: &str, agent_id: &str, result: TaskResult) -> Result<Task> {
        self.store.update_status(
            task_id,
            TaskStatus::Completed,
            Some(agent_id),
            "execution succeeded",
        )?;
        self.store.set_result(task_id, &result)?;
        self.store.record_task_metrics(task_id, true)?;

        let requeued = self.store.requeue_unblocked(task_id)?;
        if !requeued.is_empty() {
            info!(task_id, unblocked = ?requeued, "dependents requeued");
        }
        info!(task_id, agent_id, "task completed");

        // Refetch so the returned snapshot carries the result just written.
        self.store
            .get_task(task_id)?
            .ok_or_else(|| EngineError::TaskNotFound(task_id.to_string()))
    }

    /// Finalize a failed execution. With `retry` the attempt is counted and
    /// the task routed to RETRYING or, at the ceiling, FAILED. Without it the
    /// failure is final immediately; timeout-flavored results land on
    /// TIMEOUT. The result and metrics rows are only written at a final
    /// status. Returns the resulting status.
    pub fn fail(
        &self,
        task_id: &str,
        agent_id: &str,
        result: TaskResult,
        retry: bool,
    ) -> Result<TaskStatus> {
        let status = if retry {
            let (status, count) = self
                .store
                .increment_retry(task_id, Some(agent_id), &result.error_message)?;
            warn!(task_id, agent_id, attempt = count, to = %status, "task attempt failed");
            status
        } else {
            let to = if result.is_timeout() {
                TaskStatus::Timeout
            } else {
                TaskStatus::Failed
            };
            self.store
                .update_status(task_id, to, Some(agent_id), &result.error_message)?;
            self.store.set_last_error(task_id, &result.error_message)?;
            warn!(task_id, agent_id, to = %to, "task failed without retry");
            to
        };

        if status.is_final() {
            self.store.set_result(task_id, &result)?;
            self.store.record_task_metrics(task_id, false)?;
        }
        Ok(status)
    }

    /// Mark a task CANCELLED. Cooperative and non-preemptive: an already
    /// running process is not interrupted; its finalization attempt will be
    /// rejected by the transition table and recorded in the audit log.
    pub fn cancel(&self, task_id: &str, actor: Option<&str>, reason: &str) -> Result<Task> {
        let task = self
            .store
            .update_status(task_id, TaskStatus::Cancelled, actor, reason)?;
        info!(task_id, reason, "task cancelled");
        Ok(task)
    }

    pub fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        self.store.get_task(task_id)
    }

    pub fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<Task>> {
        self.store.list_tasks(status)
    }

    pub fn search(&self, query: &str) -> Result<Vec<Task>> {
        self.store.search_tasks(query)
    }

    pub fn by_priority(&self, priority: TaskPriority) -> Result<Vec<Task>> {
        self.store.list_by_priority(priority)
    }

    pub fn by_type(&self, task_type: TaskType) -> Result<Vec<Task>> {
        self.store.list_by_type(task_type)
    }

    pub fn statistics(&self) -> Result<QueueStatistics> {
        self.store.get_statistics()
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue").finish_non_exhaustive()
    }
}
