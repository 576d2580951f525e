//! Single-task process execution with timeout enforcement.

use super::artifacts::extract_artifacts;
use crate::config::ExecutorConfig;
use crate::store::{Store, now_ms};
use crate::types::{Task, TaskProgress, TaskResult};
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::{debug, info};

/// Execute a task's command or script and produce its result. Never touches
/// task status; the worker finalizes through the queue afterwards.
///
/// The process is bounded by `timeout_seconds` and forcibly killed on
/// expiry. Wall-clock duration is recorded on every outcome.
pub(crate) async fn run_task(store: &Store, config: &ExecutorConfig, task: &Task) -> TaskResult {
    let started = Instant::now();
    report_progress(store, &task.task_id, 10, "initializing execution").await;

    let mut result = if let Some(command) = &task.command {
        info!(task_id = %task.task_id, command, "executing command");
        report_progress(store, &task.task_id, 20, "running command").await;
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        run_process(store, config, task, cmd, started).await
    } else if let Some(script) = &task.script_path {
        if !Path::new(script).exists() {
            return TaskResult::failure(
                format!("script not found: {script}"),
                started.elapsed().as_secs_f64(),
            );
        }
        info!(task_id = %task.task_id, script, "executing script");
        report_progress(store, &task.task_id, 20, "running script").await;
        let mut cmd = Command::new(&config.interpreter);
        cmd.arg(script);
        run_process(store, config, task, cmd, started).await
    } else {
        // Informational task: nothing to run.
        TaskResult {
            success: true,
            output: "task completed (informational, no execution)".to_string(),
            ..Default::default()
        }
    };

    result.duration_seconds = started.elapsed().as_secs_f64();
    result
}

async fn run_process(
    store: &Store,
    config: &ExecutorConfig,
    task: &Task,
    mut cmd: Command,
    started: Instant,
) -> TaskResult {
    if let Some(dir) = working_dir(config, task) {
        cmd.current_dir(dir);
    }
    cmd.envs(&task.environment)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(Stdio::null())
        .kill_on_drop(true);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) => {
            return TaskResult::failure(
                format!("failed to spawn process: {err}"),
                started.elapsed().as_secs_f64(),
            );
        }
    };

    let stdout_task = tokio::spawn(read_stream(child.stdout.take()));
    let stderr_task = tokio::spawn(read_stream(child.stderr.take()));

    let timeout = Duration::from_secs(task.timeout_seconds.max(0) as u64);
    let status = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => status,
        Ok(Err(err)) => {
            return TaskResult::failure(
                format!("failed to wait on process: {err}"),
                started.elapsed().as_secs_f64(),
            );
        }
        Err(_) => {
            kill_and_reap(&mut child).await;
            return TaskResult::failure(
                format!("execution timed out after {}s", task.timeout_seconds),
                started.elapsed().as_secs_f64(),
            );
        }
    };

    let output = stdout_task.await.unwrap_or_default();
    let error_output = stderr_task.await.unwrap_or_default();

    report_progress(
        store,
        &task.task_id,
        90,
        &format!("process exited (code: {:?})", status.code()),
    )
    .await;

    let success = status.success();
    TaskResult {
        success,
        artifacts: extract_artifacts(&output),
        output,
        error_message: if success { String::new() } else { error_output },
        exit_code: status.code(),
        duration_seconds: started.elapsed().as_secs_f64(),
    }
}

fn working_dir<'a>(config: &'a ExecutorConfig, task: &'a Task) -> Option<&'a Path> {
    if let Some(dir) = &task.working_dir {
        return Some(Path::new(dir));
    }
    if let Some(script) = &task.script_path
        && let Some(parent) = Path::new(script).parent()
        && parent != Path::new("")
    {
        return Some(parent);
    }
    config.default_working_dir.as_deref()
}

async fn read_stream<R: AsyncReadExt + Unpin>(stream: Option<R>) -> String {
    let Some(mut stream) = stream else {
        return String::new();
    };
    let mut buf = Vec::new();
    let _ = stream.read_to_end(&mut buf).await;
    String::from_utf8_lossy(&buf).into_owned()
}

async fn kill_and_reap(child: &mut Child) {
    if child.start_kill().is_ok() {
        let _ = child.wait().await;
    }
}

pub(crate) async fn report_progress(store: &Store, task_id: &str, percentage: i32, message: &str) {
    let progress = TaskProgress::at(percentage, message, now_ms());
    if let Err(err) = store.update_progress(task_id, &progress) {
        debug!(task_id, %err, "progress update dropped");
    }
}
