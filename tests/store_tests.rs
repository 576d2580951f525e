//! Store-level integration tests against an in-memory database.

use task_engine::error::EngineError;
use task_engine::store::{Store, now_ms};
use task_engine::types::{Task, TaskPriority, TaskProgress, TaskResult, TaskStatus, TaskType};

fn store() -> Store {
    Store::open_in_memory().unwrap()
}

fn task(id: &str) -> Task {
    Task::new(id, format!("task {id}"), TaskType::Feature, TaskPriority::Medium)
}

#[test]
fn add_and_get_round_trip() {
    let store = store();
    let mut t = task("t-1");
    t.description = "does a thing".to_string();
    t.command = Some("echo hi".to_string());
    t.environment.insert("KEY".to_string(), "value".to_string());
    t.dependencies = vec!["t-0".to_string()];
    t.labels = vec!["infra".to_string()];
    store.add_task(&t).unwrap();

    let got = store.get_task("t-1").unwrap().unwrap();
    assert_eq!(got.task_id, "t-1");
    assert_eq!(got.status, TaskStatus::Pending);
    assert_eq!(got.command.as_deref(), Some("echo hi"));
    assert_eq!(got.environment.get("KEY").map(String::as_str), Some("value"));
    assert_eq!(got.dependencies, vec!["t-0"]);
    assert_eq!(got.labels, vec!["infra"]);
    assert_eq!(got.max_retries, 3);
}

#[test]
fn duplicate_add_is_rejected_without_mutation() {
    let store = store();
    let t = task("t-1");
    store.add_task(&t).unwrap();

    let mut dup = task("t-1");
    dup.title = "imposter".to_string();
    let err = store.add_task(&dup).unwrap_err();
    assert!(matches!(err, EngineError::AlreadyExists(_)));

    let got = store.get_task("t-1").unwrap().unwrap();
    assert_eq!(got.title, "task t-1");
}

#[test]
fn get_unknown_task_is_none() {
    assert!(store().get_task("nope").unwrap().is_none());
}

#[test]
fn update_status_follows_transition_table() {
    let store = store();
    store.add_task(&task("t-1")).unwrap();

    let t = store
        .update_status("t-1", TaskStatus::Queued, None, "enqueued")
        .unwrap();
    assert_eq!(t.status, TaskStatus::Queued);

    // Queued -> Completed is not in the table.
    let err = store
        .update_status("t-1", TaskStatus::Completed, None, "skip ahead")
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidTransition {
            from: TaskStatus::Queued,
            to: TaskStatus::Completed,
            ..
        }
    ));

    // The rejected attempt is still audited.
    let log = store.get_task_log("t-1").unwrap();
    assert!(log.iter().any(|event| event.action == "rejected"));
}

#[test]
fn terminal_statuses_accept_no_transitions() {
    let store = store();
    store.add_task(&task("t-1")).unwrap();
    store
        .update_status("t-1", TaskStatus::Cancelled, None, "op cancel")
        .unwrap();

    for to in [TaskStatus::Queued, TaskStatus::InProgress, TaskStatus::Completed] {
        let err = store.update_status("t-1", to, None, "poke").unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
    }
}

#[test]
fn claim_is_exclusive() {
    let store = store();
    store.add_task(&task("t-1")).unwrap();
    store
        .update_status("t-1", TaskStatus::Queued, None, "enqueued")
        .unwrap();

    let claimed = store.claim_task("t-1", "agent-a").unwrap();
    assert_eq!(claimed.status, TaskStatus::InProgress);
    assert_eq!(claimed.assigned_agent.as_deref(), Some("agent-a"));
    assert!(claimed.started_at.is_some());

    let err = store.claim_task("t-1", "agent-b").unwrap_err();
    assert!(matches!(err, EngineError::ClaimConflict(_)));

    let t = store.get_task("t-1").unwrap().unwrap();
    assert_eq!(t.assigned_agent.as_deref(), Some("agent-a"));
}

#[test]
fn racing_claims_yield_exactly_one_winner() {
    let store = store();
    store.add_task(&task("t-1")).unwrap();
    store
        .update_status("t-1", TaskStatus::Queued, None, "enqueued")
        .unwrap();

    let mut handles = Vec::new();
    for n in 0..8 {
        let store = store.clone();
        handles.push(std::thread::spawn(move || {
            store.claim_task("t-1", &format!("agent-{n}")).is_ok()
        }));
    }
    let wins = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .filter(|&won| won)
        .count();
    assert_eq!(wins, 1);

    let t = store.get_task("t-1").unwrap().unwrap();
    assert_eq!(t.status, TaskStatus::InProgress);
}

#[test]
fn claim_normalizes_pending_and_retrying() {
    let store = store();
    store.add_task(&task("t-1")).unwrap();

    // Straight from PENDING.
    let claimed = store.claim_task("t-1", "agent-a").unwrap();
    assert_eq!(claimed.status, TaskStatus::InProgress);

    store.increment_retry("t-1", Some("agent-a"), "boom").unwrap();
    let t = store.get_task("t-1").unwrap().unwrap();
    assert_eq!(t.status, TaskStatus::Retrying);
    assert!(t.assigned_agent.is_none());

    // And again from RETRYING.
    let claimed = store.claim_task("t-1", "agent-b").unwrap();
    assert_eq!(claimed.status, TaskStatus::InProgress);
    assert_eq!(claimed.assigned_agent.as_deref(), Some("agent-b"));
}

#[test]
fn claim_with_unmet_dependency_blocks() {
    let store = store();
    store.add_task(&task("t-1")).unwrap();
    let mut dependent = task("t-2");
    dependent.dependencies = vec!["t-1".to_string()];
    store.add_task(&dependent).unwrap();

    let err = store.claim_task("t-2", "agent-a").unwrap_err();
    match err {
        EngineError::DependencyUnsatisfied { blockers, .. } => {
            assert_eq!(blockers, vec!["t-1"]);
        }
        other => panic!("expected DependencyUnsatisfied, got {other:?}"),
    }
    let t = store.get_task("t-2").unwrap().unwrap();
    assert_eq!(t.status, TaskStatus::Blocked);
}

#[test]
fn dependency_on_unknown_task_blocks() {
    let store = store();
    let mut t = task("t-1");
    t.dependencies = vec!["ghost".to_string()];
    store.add_task(&t).unwrap();

    let err = store.claim_task("t-1", "agent-a").unwrap_err();
    assert!(matches!(err, EngineError::DependencyUnsatisfied { .. }));
}

#[test]
fn completion_requeues_blocked_dependents() {
    let store = store();
    store.add_task(&task("t-1")).unwrap();
    let mut dependent = task("t-2");
    dependent.dependencies = vec!["t-1".to_string()];
    store.add_task(&dependent).unwrap();

    // Park t-2 in BLOCKED.
    let _ = store.claim_task("t-2", "agent-a");

    store.claim_task("t-1", "agent-a").unwrap();
    store
        .update_status("t-1", TaskStatus::Completed, Some("agent-a"), "done")
        .unwrap();
    let requeued = store.requeue_unblocked("t-1").unwrap();
    assert_eq!(requeued, vec!["t-2"]);

    let t = store.get_task("t-2").unwrap().unwrap();
    assert_eq!(t.status, TaskStatus::Queued);
    assert!(store.claim_task("t-2", "agent-a").is_ok());
}

#[test]
fn dependent_stays_blocked_until_all_dependencies_complete() {
    let store = store();
    store.add_task(&task("a")).unwrap();
    store.add_task(&task("b")).unwrap();
    let mut t = task("t");
    t.dependencies = vec!["a".to_string(), "b".to_string()];
    store.add_task(&t).unwrap();

    let _ = store.claim_task("t", "w");
    assert_eq!(
        store.get_task("t").unwrap().unwrap().status,
        TaskStatus::Blocked
    );

    store.claim_task("a", "w").unwrap();
    store
        .update_status("a", TaskStatus::Completed, Some("w"), "done")
        .unwrap();
    // b still incomplete: nothing requeued.
    assert!(store.requeue_unblocked("a").unwrap().is_empty());
    assert_eq!(
        store.get_task("t").unwrap().unwrap().status,
        TaskStatus::Blocked
    );

    store.claim_task("b", "w").unwrap();
    store
        .update_status("b", TaskStatus::Completed, Some("w"), "done")
        .unwrap();
    assert_eq!(store.requeue_unblocked("b").unwrap(), vec!["t"]);
}

#[test]
fn set_result_is_write_once() {
    let store = store();
    store.add_task(&task("t-1")).unwrap();

    let first = TaskResult {
        success: true,
        output: "first".to_string(),
        ..Default::default()
    };
    store.set_result("t-1", &first).unwrap();

    let second = TaskResult {
        success: false,
        output: "second".to_string(),
        ..Default::default()
    };
    let err = store.set_result("t-1", &second).unwrap_err();
    assert!(matches!(err, EngineError::ResultAlreadyWritten(_)));

    let t = store.get_task("t-1").unwrap().unwrap();
    assert_eq!(t.result.unwrap().output, "first");
}

#[test]
fn increment_retry_routes_to_retrying_then_failed() {
    let store = store();
    store.add_task(&task("t-1")).unwrap();

    store.claim_task("t-1", "w").unwrap();
    let (status, count) = store.increment_retry("t-1", Some("w"), "boom 1").unwrap();
    assert_eq!((status, count), (TaskStatus::Retrying, 1));

    store.claim_task("t-1", "w").unwrap();
    let (status, count) = store.increment_retry("t-1", Some("w"), "boom 2").unwrap();
    assert_eq!((status, count), (TaskStatus::Retrying, 2));

    store.claim_task("t-1", "w").unwrap();
    let (status, count) = store.increment_retry("t-1", Some("w"), "boom 3").unwrap();
    assert_eq!((status, count), (TaskStatus::Failed, 3));

    // No fourth attempt: FAILED has no exit.
    let err = store.claim_task("t-1", "w").unwrap_err();
    assert!(matches!(err, EngineError::ClaimConflict(_)));

    let t = store.get_task("t-1").unwrap().unwrap();
    assert_eq!(t.last_error.as_deref(), Some("boom 3"));
    assert!(t.completed_at.is_some());
}

#[test]
fn rejected_retry_is_audited_without_counting() {
    let store = store();
    store.add_task(&task("t-1")).unwrap();
    store.claim_task("t-1", "w").unwrap();
    store
        .update_status("t-1", TaskStatus::Cancelled, Some("op"), "superseded")
        .unwrap();

    // The worker reporting a failure after cancellation is rejected.
    let err = store.increment_retry("t-1", Some("w"), "boom").unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));

    let t = store.get_task("t-1").unwrap().unwrap();
    assert_eq!(t.retry_count, 0);
    assert!(t.last_error.is_none());
    // The rejection itself survives in the audit trail.
    let log = store.get_task_log("t-1").unwrap();
    assert!(log.iter().any(|event| event.action == "rejected"));
}

#[test]
fn get_next_ready_orders_by_priority_then_fifo() {
    let store = store();
    let mut low = task("low");
    low.priority = TaskPriority::Low;
    let mut critical = task("critical");
    critical.priority = TaskPriority::Critical;
    let mut old_medium = task("old-medium");
    old_medium.created_at -= 10_000;
    let new_medium = task("new-medium");

    for t in [&low, &new_medium, &critical, &old_medium] {
        store.add_task(t).unwrap();
    }

    let next = store.get_next_ready("w").unwrap().unwrap();
    assert_eq!(next.task_id, "critical");

    store.claim_task("critical", "w").unwrap();
    // Medium outranks low; older medium wins FIFO.
    let next = store.get_next_ready("w").unwrap().unwrap();
    assert_eq!(next.task_id, "old-medium");
}

#[test]
fn ready_filter_honors_schedule_deadline_and_affinity() {
    let store = store();
    let now = now_ms();

    let mut future = task("future");
    future.scheduled_at = Some(now + 3_600_000);
    let mut expired = task("expired");
    expired.deadline_at = Some(now - 1_000);
    let mut pinned = task("pinned");
    pinned.required_agent = Some("special".to_string());
    pinned.created_at -= 1_000;
    let free = task("free");

    for t in [&future, &expired, &pinned, &free] {
        store.add_task(t).unwrap();
    }

    let ready = store.get_ready_tasks(Some("w"), 10).unwrap();
    let ids: Vec<_> = ready.iter().map(|t| t.task_id.as_str()).collect();
    assert_eq!(ids, vec!["free"]);

    let ready = store.get_ready_tasks(Some("special"), 10).unwrap();
    let ids: Vec<_> = ready.iter().map(|t| t.task_id.as_str()).collect();
    assert_eq!(ids, vec!["pinned", "free"]);
}

#[test]
fn overdue_and_stalled_detection() {
    let store = store();
    let now = now_ms();

    let mut overdue = task("overdue");
    overdue.deadline_at = Some(now - 5_000);
    store.add_task(&overdue).unwrap();

    let mut done = task("done-late");
    done.deadline_at = Some(now - 5_000);
    store.add_task(&done).unwrap();
    store.claim_task("done-late", "w").unwrap();
    store
        .update_status("done-late", TaskStatus::Completed, Some("w"), "done")
        .unwrap();

    let ids: Vec<_> = store
        .get_overdue()
        .unwrap()
        .into_iter()
        .map(|t| t.task_id)
        .collect();
    assert_eq!(ids, vec!["overdue"]);

    store.add_task(&task("slow")).unwrap();
    store.claim_task("slow", "w").unwrap();
    // Backdate started_at past the stall threshold.
    store
        .with_conn(|conn| {
            conn.execute(
                "UPDATE tasks SET started_at = ?1 WHERE task_id = 'slow'",
                [now - 60_000],
            )?;
            Ok(())
        })
        .unwrap();

    let stalled = store.get_stalled(30).unwrap();
    assert_eq!(stalled.len(), 1);
    assert_eq!(stalled[0].task_id, "slow");
    assert!(store.get_stalled(120).unwrap().is_empty());
}

#[test]
fn escalate_overdue_promotes_once() {
    let store = store();
    let mut t = task("t-1");
    t.deadline_at = Some(now_ms() - 1_000);
    store.add_task(&t).unwrap();

    let promoted = store.escalate_overdue().unwrap();
    assert_eq!(promoted.len(), 1);
    assert_eq!(promoted[0], ("t-1".to_string(), TaskPriority::Medium));
    assert_eq!(
        store.get_task("t-1").unwrap().unwrap().priority,
        TaskPriority::Critical
    );

    // Second call: already critical, nothing to do.
    assert!(store.escalate_overdue().unwrap().is_empty());
}

#[test]
fn progress_updates_persist() {
    let store = store();
    store.add_task(&task("t-1")).unwrap();

    let progress = TaskProgress::at(150, "clamped", now_ms());
    store.update_progress("t-1", &progress).unwrap();

    let t = store.get_task("t-1").unwrap().unwrap();
    let progress = t.progress.unwrap();
    assert_eq!(progress.percentage, 100);
    assert_eq!(progress.message, "clamped");
}

#[test]
fn metrics_and_statistics() {
    let store = store();
    store.add_task(&task("t-1")).unwrap();
    store.claim_task("t-1", "w").unwrap();
    store
        .update_status("t-1", TaskStatus::Completed, Some("w"), "done")
        .unwrap();
    let metrics = store.record_task_metrics("t-1", true).unwrap();
    assert!(metrics.total_duration_seconds >= 0.0);
    assert!(metrics.success);

    // Write-once: a second record leaves the first row.
    store.record_task_metrics("t-1", false).unwrap();
    assert!(store.get_task_metrics("t-1").unwrap().unwrap().success);

    store.add_task(&task("t-2")).unwrap();
    store.claim_task("t-2", "w").unwrap();
    store.increment_retry("t-2", Some("w"), "boom").unwrap();

    let stats = store.get_statistics().unwrap();
    assert_eq!(stats.total_tasks, 2);
    assert_eq!(stats.by_status.get("completed"), Some(&1));
    assert_eq!(stats.by_status.get("retrying"), Some(&1));
    assert_eq!(stats.success_rate, 1.0);
}

#[test]
fn assignment_history_tracks_claims_and_releases() {
    let store = store();
    store.add_task(&task("t-1")).unwrap();
    store.claim_task("t-1", "w").unwrap();

    let active = store.get_active_assignments().unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].agent_id, "w");

    store
        .update_status("t-1", TaskStatus::Completed, Some("w"), "done")
        .unwrap();
    assert!(store.get_active_assignments().unwrap().is_empty());

    let history = store.get_assignments("t-1").unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, "completed");
    assert!(history[0].released_at.is_some());
}

#[test]
fn execution_log_is_a_complete_trail() {
    let store = store();
    store.add_task(&task("t-1")).unwrap();
    store.claim_task("t-1", "w").unwrap();
    store
        .update_status("t-1", TaskStatus::Completed, Some("w"), "done")
        .unwrap();

    let actions: Vec<_> = store
        .get_task_log("t-1")
        .unwrap()
        .into_iter()
        .map(|event| event.action)
        .collect();
    assert_eq!(actions, vec!["created", "status_change", "claimed", "status_change"]);
}

#[test]
fn backup_snapshot_opens_as_a_working_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snapshot.db");

    let store = store();
    store.add_task(&task("t-1")).unwrap();
    store.backup(&path).unwrap();

    // The snapshot is frozen at backup time.
    store.add_task(&task("t-2")).unwrap();

    let restored = Store::open(&path).unwrap();
    assert!(restored.get_task("t-1").unwrap().is_some());
    assert!(restored.get_task("t-2").unwrap().is_none());
}

#[test]
fn persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tasks.db");

    {
        let store = Store::open(&path).unwrap();
        store.add_task(&task("t-1")).unwrap();
        store.claim_task("t-1", "w").unwrap();
    }

    let store = Store::open(&path).unwrap();
    let t = store.get_task("t-1").unwrap().unwrap();
    assert_eq!(t.status, TaskStatus::InProgress);
    assert_eq!(store.get_task_log("t-1").unwrap().len(), 3);
}
