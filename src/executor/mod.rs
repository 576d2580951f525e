//! Bounded worker pool executing tasks as external processes.

pub mod artifacts;
mod run;
pub mod worker;

use crate::config::ExecutorConfig;
use crate::queue::TaskQueue;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;
use worker::Worker;

pub struct WorkerPool {
    queue: TaskQueue,
    config: ExecutorConfig,
}

impl WorkerPool {
    pub fn new(queue: TaskQueue, config: ExecutorConfig) -> Self {
        Self { queue, config }
    }

    /// Spawn the configured number of workers. Each owns at most one
    /// in-flight task; all observe the shutdown channel.
    pub fn spawn(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        info!(workers = self.config.max_concurrent_tasks, "starting worker pool");
        (1..=self.config.max_concurrent_tasks)
            .map(|n| {
                let worker = Worker::new(
                    format!("{}-worker-{}", self.config.agent_id, n),
                    self.queue.clone(),
                    self.config.clone(),
                    shutdown.clone(),
                );
                tokio::spawn(worker.run())
            })
            .collect()
    }
}
