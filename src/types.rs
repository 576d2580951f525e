//! Core types for the task execution engine.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Task lifecycle status.
///
/// The transition table lives in [`TaskStatus::can_transition_to`] and is the
/// single authority consulted by every mutation site. `Completed` and
/// `Cancelled` are terminal; `Failed` and `Timeout` have no automatic
/// outgoing transitions either.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Queued,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    Blocked,
    Timeout,
    Retrying,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Queued => "queued",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Timeout => "timeout",
            TaskStatus::Retrying => "retrying",
        }
    }

    /// Whether any further transition out of this status is allowed.
    pub fn allowed_exits(&self) -> &'static [TaskStatus] {
        use TaskStatus::*;
        match self {
            Pending => &[Queued, Cancelled],
            Queued => &[InProgress, Blocked, Cancelled],
            InProgress => &[Completed, Failed, Retrying, Timeout, Cancelled],
            Retrying => &[Queued],
            Blocked => &[Queued],
            Completed | Cancelled | Failed | Timeout => &[],
        }
    }

    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        self.allowed_exits().contains(&next)
    }

    /// Terminal statuses: no transition ever leaves them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Cancelled)
    }

    /// Statuses that mark the end of an execution attempt and set `completed_at`.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled | TaskStatus::Timeout
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "queued" => Ok(TaskStatus::Queued),
            "in_progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            "blocked" => Ok(TaskStatus::Blocked),
            "timeout" => Ok(TaskStatus::Timeout),
            "retrying" => Ok(TaskStatus::Retrying),
            other => Err(format!("unknown task status: {}", other)),
        }
    }
}

/// Task priority. Mutable at runtime only through deadline escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Critical,
    High,
    Medium,
    Low,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Critical => "critical",
            TaskPriority::High => "high",
            TaskPriority::Medium => "medium",
            TaskPriority::Low => "low",
        }
    }

    /// Rank for SQL-side ordering (higher = more important).
    pub fn rank(&self) -> i32 {
        match self {
            TaskPriority::Critical => 4,
            TaskPriority::High => 3,
            TaskPriority::Medium => 2,
            TaskPriority::Low => 1,
        }
    }

    /// Base component of the composite priority score.
    pub fn base_score(&self) -> f64 {
        match self {
            TaskPriority::Critical => 100.0,
            TaskPriority::High => 75.0,
            TaskPriority::Medium => 50.0,
            TaskPriority::Low => 25.0,
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "critical" => Ok(TaskPriority::Critical),
            "high" => Ok(TaskPriority::High),
            "medium" => Ok(TaskPriority::Medium),
            "low" => Ok(TaskPriority::Low),
            other => Err(format!("unknown task priority: {}", other)),
        }
    }
}

/// Classification of the work a task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Feature,
    Bugfix,
    Refactor,
    Test,
    Documentation,
    Performance,
    Security,
    Maintenance,
    Investigation,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Feature => "feature",
            TaskType::Bugfix => "bugfix",
            TaskType::Refactor => "refactor",
            TaskType::Test => "test",
            TaskType::Documentation => "documentation",
            TaskType::Performance => "performance",
            TaskType::Security => "security",
            TaskType::Maintenance => "maintenance",
            TaskType::Investigation => "investigation",
        }
    }

    /// Type component of the composite priority score.
    pub fn score_bonus(&self) -> f64 {
        match self {
            TaskType::Bugfix => 10.0,
            TaskType::Security => 15.0,
            _ => 0.0,
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "feature" => Ok(TaskType::Feature),
            "bugfix" => Ok(TaskType::Bugfix),
            "refactor" => Ok(TaskType::Refactor),
            "test" => Ok(TaskType::Test),
            "documentation" => Ok(TaskType::Documentation),
            "performance" => Ok(TaskType::Performance),
            "security" => Ok(TaskType::Security),
            "maintenance" => Ok(TaskType::Maintenance),
            "investigation" => Ok(TaskType::Investigation),
            other => Err(format!("unknown task type: {}", other)),
        }
    }
}

/// Coarse progress signal attached to an in-flight task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskProgress {
    pub percentage: i32,
    pub current_step: String,
    pub total_steps: i32,
    pub completed_steps: i32,
    pub message: String,
    pub updated_at: i64,
}

impl TaskProgress {
    pub fn at(percentage: i32, message: impl Into<String>, updated_at: i64) -> Self {
        let message = message.into();
        Self {
            percentage: percentage.clamp(0, 100),
            current_step: message.clone(),
            total_steps: 0,
            completed_steps: 0,
            message,
            updated_at,
        }
    }
}

/// Outcome of one execution attempt. Written to the store exactly once, at
/// the transition into a final state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskResult {
    pub success: bool,
    pub output: String,
    pub error_message: String,
    pub exit_code: Option<i32>,
    pub duration_seconds: f64,
    pub artifacts: Vec<String>,
}

impl TaskResult {
    pub fn failure(error_message: impl Into<String>, duration_seconds: f64) -> Self {
        Self {
            success: false,
            error_message: error_message.into(),
            duration_seconds,
            ..Default::default()
        }
    }

    /// Timeout results are recognizable so failure routing can distinguish
    /// them from ordinary non-zero exits.
    pub fn is_timeout(&self) -> bool {
        self.error_message.contains("timed out")
    }
}

/// A unit of work. The store owns the authoritative copy; this struct is a
/// snapshot of one row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub title: String,
    pub description: String,
    pub task_type: TaskType,
    pub priority: TaskPriority,
    pub status: TaskStatus,

    // Execution spec
    pub command: Option<String>,
    pub script_path: Option<String>,
    pub working_dir: Option<String>,
    pub environment: HashMap<String, String>,
    pub timeout_seconds: i64,

    // Scheduling
    pub scheduled_at: Option<i64>,
    pub deadline_at: Option<i64>,
    pub estimated_duration_seconds: Option<i64>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub updated_at: i64,

    // Dependencies: task ids that must all reach COMPLETED first
    pub dependencies: Vec<String>,

    // Retry tracking
    pub retry_count: i32,
    pub max_retries: i32,
    pub last_error: Option<String>,

    // Progress and result
    pub progress: Option<TaskProgress>,
    pub result: Option<TaskResult>,

    // Agent affinity
    pub assigned_agent: Option<String>,
    pub required_agent: Option<String>,

    // Free-form categorization
    pub labels: Vec<String>,
    pub tags: Vec<String>,
}

impl Task {
    /// Create a task with defaults matching the schema defaults. Callers fill
    /// in the execution spec and scheduling fields before enqueueing.
    pub fn new(
        task_id: impl Into<String>,
        title: impl Into<String>,
        task_type: TaskType,
        priority: TaskPriority,
    ) -> Self {
        let now = crate::store::now_ms();
        Self {
            task_id: task_id.into(),
            title: title.into(),
            description: String::new(),
            task_type,
            priority,
            status: TaskStatus::Pending,
            command: None,
            script_path: None,
            working_dir: None,
            environment: HashMap::new(),
            timeout_seconds: 3600,
            scheduled_at: None,
            deadline_at: None,
            estimated_duration_seconds: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
            dependencies: Vec::new(),
            retry_count: 0,
            max_retries: 3,
            last_error: None,
            progress: None,
            result: None,
            assigned_agent: None,
            required_agent: None,
            labels: Vec::new(),
            tags: Vec::new(),
        }
    }

    pub fn is_overdue(&self, now: i64) -> bool {
        match self.deadline_at {
            Some(deadline) => deadline < now && !self.status.is_terminal(),
            None => false,
        }
    }
}

/// One row of the append-only execution log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    pub id: i64,
    pub task_id: String,
    pub agent_id: Option<String>,
    pub action: String,
    pub old_status: Option<String>,
    pub new_status: Option<String>,
    pub message: String,
    pub timestamp: i64,
}

/// Durable per-task timing record, written once when a task finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMetrics {
    pub task_id: String,
    pub queued_duration_seconds: f64,
    pub execution_duration_seconds: f64,
    pub total_duration_seconds: f64,
    pub retry_count: i32,
    pub success: bool,
}

/// A historical worker-to-task binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentAssignment {
    pub task_id: String,
    pub agent_id: String,
    pub assigned_at: i64,
    pub released_at: Option<i64>,
    pub status: String,
}

/// Category of an operational alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    Stalled,
    Overdue,
    Failed,
    Critical,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::Stalled => "stalled",
            AlertType::Overdue => "overdue",
            AlertType::Failed => "failed",
            AlertType::Critical => "critical",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stalled" => Ok(AlertType::Stalled),
            "overdue" => Ok(AlertType::Overdue),
            "failed" => Ok(AlertType::Failed),
            "critical" => Ok(AlertType::Critical),
            other => Err(format!("unknown alert type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Error => "error",
            AlertSeverity::Critical => "critical",
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(AlertSeverity::Info),
            "warning" => Ok(AlertSeverity::Warning),
            "error" => Ok(AlertSeverity::Error),
            "critical" => Ok(AlertSeverity::Critical),
            other => Err(format!("unknown alert severity: {}", other)),
        }
    }
}

/// A durable operational alert with an acknowledge/resolve lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: String,
    pub task_id: String,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub message: String,
    pub created_at: i64,
    pub acknowledged: bool,
    pub resolved: bool,
    pub resolved_at: Option<i64>,
}

/// Aggregate alert counts. Per-severity and per-type counts cover active
/// (unacknowledged, unresolved) alerts only.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AlertSummary {
    pub total_alerts: i64,
    pub active_alerts: i64,
    pub acknowledged: i64,
    pub resolved: i64,
    pub by_severity: HashMap<String, i64>,
    pub by_type: HashMap<String, i64>,
}

/// Aggregate queue statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStatistics {
    pub total_tasks: i64,
    pub by_status: HashMap<String, i64>,
    pub by_priority: HashMap<String, i64>,
    pub avg_execution_time_seconds: f64,
    pub success_rate: f64,
}
