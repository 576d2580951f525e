//! Readiness ordering, deadline enforcement, and planning reports.

use crate::error::Result;
use crate::store::{Store, now_ms};
use crate::types::{Task, TaskPriority};
use serde::Serialize;
use std::collections::HashMap;
use tracing::warn;

const HOUR_SECONDS: f64 = 3_600.0;
const DAY_SECONDS: f64 = 86_400.0;
const WEEK_SECONDS: f64 = 604_800.0;

/// Composite priority score used to order ready candidates.
///
/// Base by priority (critical 100, high 75, medium 50, low 25), plus a
/// deadline bonus (<1h +50, <24h +25, <7d +10), an aging bonus capped at +20
/// once a task has waited more than a day, and a type bonus (bugfix +10,
/// security +15).
pub fn composite_score(task: &Task, now: i64) -> f64 {
    let mut score = task.priority.base_score();

    if let Some(deadline) = task.deadline_at {
        let until = (deadline - now) as f64 / 1000.0;
        if until < HOUR_SECONDS {
            score += 50.0;
        } else if until < DAY_SECONDS {
            score += 25.0;
        } else if until < WEEK_SECONDS {
            score += 10.0;
        }
    }

    let waiting = (now - task.created_at) as f64 / 1000.0;
    if waiting > DAY_SECONDS {
        score += (waiting / DAY_SECONDS).min(20.0);
    }

    score + task.task_type.score_bonus()
}

/// One entry of an execution plan.
#[derive(Debug, Clone, Serialize)]
pub struct PlanEntry {
    pub task_id: String,
    pub title: String,
    pub priority: TaskPriority,
    pub estimated_duration_seconds: i64,
    pub deadline_at: Option<i64>,
    pub dependencies: Vec<String>,
}

/// Overdue and soon-due tasks, for operator visibility.
#[derive(Debug, Clone, Default)]
pub struct DeadlineReport {
    pub overdue: Vec<Task>,
    pub approaching: Vec<Task>,
}

/// Reporting-only view of the pending workload.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleReport {
    pub total_pending: usize,
    pub total_estimated_seconds: i64,
    /// Pending tasks that at least one other pending task depends on.
    pub critical_path: Vec<String>,
}

/// A pending task whose effective urgency has drifted away from its
/// nominal priority.
#[derive(Debug, Clone, Serialize)]
pub struct ReorderSuggestion {
    pub task_id: String,
    pub current_priority: TaskPriority,
    pub suggested_score: f64,
}

/// Default duration assumed for tasks without an estimate.
const DEFAULT_ESTIMATE_SECONDS: i64 = 3600;

/// Score drift beyond which a pending task is flagged for reprioritization.
const SCORE_DRIFT_THRESHOLD: f64 = 20.0;

#[derive(Clone)]
pub struct Scheduler {
    store: Store,
}

impl Scheduler {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Ready candidates ordered by composite score descending, earliest
    /// `created_at` breaking ties.
    pub fn ready_tasks(&self, agent_id: Option<&str>) -> Result<Vec<Task>> {
        let tasks = self.store.get_ready_tasks(agent_id, 100)?;
        let now = now_ms();
        let mut scored: Vec<(f64, Task)> = tasks
            .into_iter()
            .map(|task| (composite_score(&task, now), task))
            .collect();
        scored.sort_by(|(score_a, task_a), (score_b, task_b)| {
            score_b
                .total_cmp(score_a)
                .then(task_a.created_at.cmp(&task_b.created_at))
        });
        Ok(scored.into_iter().map(|(_, task)| task).collect())
    }

    /// The single best ready candidate for an agent.
    pub fn next_ready(&self, agent_id: &str) -> Result<Option<Task>> {
        Ok(self.ready_tasks(Some(agent_id))?.into_iter().next())
    }

    /// Promote overdue, non-critical tasks to critical. Idempotent per task.
    pub fn escalate_overdue(&self) -> Result<Vec<(String, TaskPriority)>> {
        let promoted = self.store.escalate_overdue()?;
        for (task_id, old) in &promoted {
            warn!(task_id, from = %old, "escalated overdue task to critical");
        }
        Ok(promoted)
    }

    /// Overdue tasks plus tasks due within the next hour.
    pub fn check_deadlines(&self) -> Result<DeadlineReport> {
        let overdue = self.store.get_overdue()?;
        let now = now_ms();
        let horizon = now + (HOUR_SECONDS as i64) * 1000;

        let approaching = self
            .store
            .list_tasks(None)?
            .into_iter()
            .filter(|task| {
                !task.status.is_terminal()
                    && task
                        .deadline_at
                        .is_some_and(|deadline| deadline > now && deadline < horizon)
            })
            .collect::<Vec<_>>();

        if !overdue.is_empty() || !approaching.is_empty() {
            warn!(
                overdue = overdue.len(),
                approaching = approaching.len(),
                "deadline check found at-risk tasks"
            );
        }
        Ok(DeadlineReport {
            overdue,
            approaching,
        })
    }

    /// Greedy plan: ready tasks in score order while cumulative estimated
    /// duration stays inside the window. Pure; mutates nothing.
    pub fn get_execution_plan(
        &self,
        agent_id: Option<&str>,
        window_seconds: i64,
    ) -> Result<Vec<PlanEntry>> {
        let ready = self.ready_tasks(agent_id)?;
        let mut plan = Vec::new();
        let mut accumulated = 0i64;

        for task in ready {
            if accumulated >= window_seconds {
                break;
            }
            let duration = task
                .estimated_duration_seconds
                .unwrap_or(DEFAULT_ESTIMATE_SECONDS);
            accumulated += duration;
            plan.push(PlanEntry {
                task_id: task.task_id,
                title: task.title,
                priority: task.priority,
                estimated_duration_seconds: duration,
                deadline_at: task.deadline_at,
                dependencies: task.dependencies,
            });
        }
        Ok(plan)
    }

    /// Pending workload per required agent. Tasks without affinity count
    /// under `"any"`.
    pub fn balance_load(&self) -> Result<HashMap<String, usize>> {
        let mut load = HashMap::new();
        for task in self.store.list_pending(100)? {
            let agent = task.required_agent.as_deref().unwrap_or("any").to_string();
            *load.entry(agent).or_insert(0) += 1;
        }
        Ok(load)
    }

    /// Pending tasks whose composite score sits far from their priority's
    /// base, usually from deadline pressure or aging. Reporting only.
    pub fn suggest_task_reordering(&self) -> Result<Vec<ReorderSuggestion>> {
        let now = now_ms();
        let suggestions = self
            .store
            .list_pending(1000)?
            .into_iter()
            .filter_map(|task| {
                let score = composite_score(&task, now);
                ((score - task.priority.base_score()).abs() > SCORE_DRIFT_THRESHOLD).then(|| {
                    ReorderSuggestion {
                        task_id: task.task_id,
                        current_priority: task.priority,
                        suggested_score: score,
                    }
                })
            })
            .collect();
        Ok(suggestions)
    }

    /// Reporting only: aggregate estimated pending time and the critical-path
    /// set (pending tasks other pending tasks depend on).
    pub fn optimize_schedule(&self) -> Result<ScheduleReport> {
        let pending = self.store.list_pending(1000)?;

        let total_estimated_seconds = pending
            .iter()
            .map(|task| {
                task.estimated_duration_seconds
                    .unwrap_or(DEFAULT_ESTIMATE_SECONDS)
            })
            .sum();

        let depended_on: std::collections::HashSet<&str> = pending
            .iter()
            .flat_map(|task| task.dependencies.iter().map(String::as_str))
            .collect();
        let critical_path = pending
            .iter()
            .filter(|task| depended_on.contains(task.task_id.as_str()))
            .map(|task| task.task_id.clone())
            .collect();

        Ok(ScheduleReport {
            total_pending: pending.len(),
            total_estimated_seconds,
            critical_path,
        })
    }
}
