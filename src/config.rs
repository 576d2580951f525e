//! Engine configuration.
//!
//! Plain structs with defaults and environment-variable overrides. The
//! upstream orchestration layer owns file-based configuration; the engine
//! only consumes these values.

use std::path::PathBuf;

/// Top-level engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    pub executor: ExecutorConfig,
    pub monitor: MonitorConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(".task-engine/tasks.db"),
            executor: ExecutorConfig::default(),
            monitor: MonitorConfig::default(),
        }
    }
}

/// Worker pool and process execution settings.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Number of concurrent workers. Each owns at most one in-flight task.
    pub max_concurrent_tasks: usize,
    /// Idle/backoff interval between dequeue attempts, in seconds.
    pub poll_interval_seconds: u64,
    /// Interpreter used for `script_path` tasks.
    pub interpreter: String,
    /// Fallback working directory when a task does not set one.
    pub default_working_dir: Option<PathBuf>,
    /// Worker id prefix; workers are named `{prefix}-worker-{n}`.
    pub agent_id: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 3,
            poll_interval_seconds: 5,
            interpreter: "python3".to_string(),
            default_working_dir: None,
            agent_id: "task-executor".to_string(),
        }
    }
}

/// Monitor sweep and alert lifecycle settings.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub enabled: bool,
    /// Interval between health sweeps, in seconds.
    pub sweep_interval_seconds: u64,
    /// An IN_PROGRESS task older than this (since `started_at`) is stalled.
    pub stalled_threshold_seconds: i64,
    /// Suppress a repeat alert for the same (task, type) key within this window.
    pub alert_cooldown_seconds: i64,
    /// Resolved alerts older than this are purged by the sweep.
    pub alert_retention_seconds: i64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sweep_interval_seconds: 60,
            stalled_threshold_seconds: 30 * 60,
            alert_cooldown_seconds: 15 * 60,
            alert_retention_seconds: 24 * 60 * 60,
        }
    }
}

impl EngineConfig {
    /// Build a config from defaults plus environment overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("TASK_ENGINE_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }
        if let Ok(workers) = std::env::var("TASK_ENGINE_WORKERS")
            && let Ok(workers) = workers.parse()
        {
            config.executor.max_concurrent_tasks = workers;
        }
        if let Ok(interval) = std::env::var("TASK_ENGINE_POLL_INTERVAL")
            && let Ok(interval) = interval.parse()
        {
            config.executor.poll_interval_seconds = interval;
        }
        if let Ok(threshold) = std::env::var("TASK_ENGINE_STALLED_THRESHOLD")
            && let Ok(threshold) = threshold.parse()
        {
            config.monitor.stalled_threshold_seconds = threshold;
        }

        config
    }

    /// Ensure the database directory exists.
    pub fn ensure_db_dir(&self) -> std::io::Result<()> {
        if let Some(parent) = self.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}
