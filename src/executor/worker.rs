//! The worker loop: dequeue, execute, finalize.

use super::run::{report_progress, run_task};
use crate::config::ExecutorConfig;
use crate::error::EngineError;
use crate::queue::TaskQueue;
use crate::types::Task;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

pub struct Worker {
    pub worker_id: String,
    queue: TaskQueue,
    config: ExecutorConfig,
    shutdown: watch::Receiver<bool>,
    tasks_processed: u64,
}

impl Worker {
    pub fn new(
        worker_id: String,
        queue: TaskQueue,
        config: ExecutorConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            worker_id,
            queue,
            config,
            shutdown,
            tasks_processed: 0,
        }
    }

    /// Loop until shutdown: claim the best ready task and run it, backing
    /// off for the poll interval when the queue is empty or errors out.
    pub async fn run(mut self) {
        info!(worker = %self.worker_id, "worker starting");

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            match self.queue.dequeue(&self.worker_id) {
                Ok(Some(task)) => {
                    self.process(task).await;
                    self.tasks_processed += 1;
                }
                Ok(None) => self.idle().await,
                Err(err) => {
                    error!(worker = %self.worker_id, %err, "dequeue failed");
                    self.idle().await;
                }
            }
        }

        info!(
            worker = %self.worker_id,
            tasks = self.tasks_processed,
            "worker stopped"
        );
    }

    async fn process(&self, task: Task) {
        let task_id = task.task_id.clone();
        info!(worker = %self.worker_id, task_id, "executing task");

        let result = run_task(self.queue.store(), &self.config, &task).await;

        let outcome = if result.success {
            report_progress(self.queue.store(), &task_id, 100, "task completed").await;
            self.queue
                .complete(&task_id, &self.worker_id, result)
                .map(|task| task.status)
        } else {
            self.queue.fail(&task_id, &self.worker_id, result, true)
        };

        match outcome {
            Ok(status) => {
                info!(worker = %self.worker_id, task_id, status = %status, "task finalized")
            }
            // A task cancelled mid-run rejects the finalizing transition;
            // the rejection is already in the audit log.
            Err(EngineError::InvalidTransition { from, to, .. }) => {
                warn!(worker = %self.worker_id, task_id, %from, %to, "finalization rejected")
            }
            Err(err) => error!(worker = %self.worker_id, task_id, %err, "finalization failed"),
        }
    }

    async fn idle(&mut self) {
        let interval = Duration::from_secs(self.config.poll_interval_seconds);
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = self.shutdown.changed() => {}
        }
    }
}
