//! `task-engine` binary: run the engine or operate on the queue.

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use task_engine::config::EngineConfig;
use task_engine::executor::WorkerPool;
use task_engine::monitor::Monitor;
use task_engine::queue::TaskQueue;
use task_engine::store::{Store, now_ms};
use task_engine::types::{Task, TaskPriority, TaskStatus, TaskType};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "task-engine", version, about = "Autonomous task execution engine")]
struct Cli {
    /// Path to the SQLite database file.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the engine: worker pool, monitor sweep, deadline escalation.
    Run {
        /// Number of concurrent workers.
        #[arg(long)]
        workers: Option<usize>,
        /// Seconds between dequeue attempts when idle.
        #[arg(long)]
        poll_interval: Option<u64>,
    },
    /// Submit a task to the queue.
    Submit {
        task_id: String,
        title: String,
        #[arg(long, default_value = "feature")]
        task_type: String,
        #[arg(long, default_value = "medium")]
        priority: String,
        /// Shell command to run.
        #[arg(long)]
        command: Option<String>,
        /// Script to run with the configured interpreter.
        #[arg(long)]
        script: Option<String>,
        #[arg(long, default_value_t = 3600)]
        timeout_seconds: i64,
        /// Task ids that must complete first. Repeatable.
        #[arg(long = "depends-on")]
        depends_on: Vec<String>,
        /// Deadline, as seconds from now.
        #[arg(long)]
        deadline_in: Option<i64>,
        /// Only this agent may claim the task.
        #[arg(long)]
        required_agent: Option<String>,
    },
    /// Show one task as JSON.
    Show { task_id: String },
    /// List tasks, optionally filtered by status.
    List {
        #[arg(long)]
        status: Option<String>,
    },
    /// Cancel a task. Non-preemptive: a running process is not interrupted.
    Cancel {
        task_id: String,
        #[arg(long, default_value = "cancelled by operator")]
        reason: String,
    },
    /// Delete completed and cancelled tasks older than the given age.
    Purge {
        #[arg(long, default_value_t = 7)]
        days: i64,
    },
    /// Write a consistent snapshot of the database to a new file.
    Backup { path: PathBuf },
    /// Aggregate queue statistics.
    Stats,
    /// Dashboard snapshot as JSON.
    Dashboard,
    /// Active alerts as JSON.
    Alerts,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = EngineConfig::from_env();
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    config.ensure_db_dir().context("creating database directory")?;
    let store = Store::open(&config.db_path)
        .with_context(|| format!("opening store at {}", config.db_path.display()))?;
    let queue = TaskQueue::new(store.clone());

    match cli.command {
        Command::Run {
            workers,
            poll_interval,
        } => {
            if let Some(workers) = workers {
                config.executor.max_concurrent_tasks = workers;
            }
            if let Some(interval) = poll_interval {
                config.executor.poll_interval_seconds = interval;
            }
            run_engine(store, queue, config).await
        }
        Command::Submit {
            task_id,
            title,
            task_type,
            priority,
            command,
            script,
            timeout_seconds,
            depends_on,
            deadline_in,
            required_agent,
        } => {
            let task_type: TaskType = task_type.parse().map_err(|e: String| anyhow!(e))?;
            let priority: TaskPriority = priority.parse().map_err(|e: String| anyhow!(e))?;

            let mut task = Task::new(task_id, title, task_type, priority);
            task.command = command;
            task.script_path = script;
            task.timeout_seconds = timeout_seconds;
            task.dependencies = depends_on;
            task.deadline_at = deadline_in.map(|seconds| now_ms() + seconds * 1000);
            task.required_agent = required_agent;

            let task = queue.enqueue(task)?;
            println!("{}", serde_json::to_string_pretty(&task)?);
            Ok(())
        }
        Command::Show { task_id } => {
            match queue.get_task(&task_id)? {
                Some(task) => println!("{}", serde_json::to_string_pretty(&task)?),
                None => println!("task not found: {task_id}"),
            }
            Ok(())
        }
        Command::List { status } => {
            let status = status
                .map(|s| s.parse::<TaskStatus>().map_err(|e| anyhow!(e)))
                .transpose()?;
            let tasks = queue.list_tasks(status)?;
            println!("{}", serde_json::to_string_pretty(&tasks)?);
            Ok(())
        }
        Command::Cancel { task_id, reason } => {
            let task = queue.cancel(&task_id, Some("operator"), &reason)?;
            println!("{}", serde_json::to_string_pretty(&task)?);
            Ok(())
        }
        Command::Purge { days } => {
            let purged = queue.purge_completed(days)?;
            println!("purged {purged} tasks older than {days} days");
            Ok(())
        }
        Command::Backup { path } => {
            store.backup(&path)?;
            println!("backed up to {}", path.display());
            Ok(())
        }
        Command::Stats => {
            println!("{}", serde_json::to_string_pretty(&queue.statistics()?)?);
            Ok(())
        }
        Command::Dashboard => {
            let monitor = Monitor::new(store, config.monitor);
            println!("{}", serde_json::to_string_pretty(&monitor.dashboard()?)?);
            Ok(())
        }
        Command::Alerts => {
            let monitor = Monitor::new(store, config.monitor);
            println!(
                "{}",
                serde_json::to_string_pretty(&monitor.alerts().active()?)?
            );
            Ok(())
        }
    }
}

/// Run workers, the monitor sweep, and the deadline escalation loop until
/// SIGINT, then drain gracefully.
async fn run_engine(store: Store, queue: TaskQueue, config: EngineConfig) -> Result<()> {
    info!(
        db = %config.db_path.display(),
        workers = config.executor.max_concurrent_tasks,
        "task engine starting"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let monitor = Monitor::new(store, config.monitor.clone());
    let monitor_handle = {
        let rx = shutdown_rx.clone();
        tokio::spawn(async move { monitor.run(rx).await })
    };

    let escalation_handle = {
        let scheduler = queue.scheduler().clone();
        let mut rx = shutdown_rx.clone();
        let interval = std::time::Duration::from_secs(config.monitor.sweep_interval_seconds);
        tokio::spawn(async move {
            loop {
                if *rx.borrow() {
                    break;
                }
                if let Err(err) = scheduler.escalate_overdue() {
                    error!(%err, "deadline escalation failed");
                }
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = rx.changed() => {}
                }
            }
        })
    };

    let pool = WorkerPool::new(queue, config.executor);
    let worker_handles = pool.spawn(shutdown_rx);

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutdown signal received");

    let _ = shutdown_tx.send(true);
    for handle in worker_handles {
        let _ = handle.await;
    }
    let _ = monitor_handle.await;
    let _ = escalation_handle.await;
    info!("task engine stopped");
    Ok(())
}
