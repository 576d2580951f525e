//! Queue façade tests: admission, claim, completion, failure routing.

use task_engine::error::EngineError;
use task_engine::queue::TaskQueue;
use task_engine::store::Store;
use task_engine::types::{Task, TaskPriority, TaskResult, TaskStatus, TaskType};

fn queue() -> TaskQueue {
    TaskQueue::new(Store::open_in_memory().unwrap())
}

fn task(id: &str) -> Task {
    Task::new(id, format!("task {id}"), TaskType::Feature, TaskPriority::Medium)
}

fn success_result() -> TaskResult {
    TaskResult {
        success: true,
        output: "ok".to_string(),
        exit_code: Some(0),
        duration_seconds: 0.1,
        ..Default::default()
    }
}

#[test]
fn enqueue_without_dependencies_goes_queued() {
    let queue = queue();
    let t = queue.enqueue(task("t-1")).unwrap();
    assert_eq!(t.status, TaskStatus::Queued);
}

#[test]
fn enqueue_with_dependencies_stays_pending() {
    let queue = queue();
    queue.enqueue(task("t-1")).unwrap();
    let mut dependent = task("t-2");
    dependent.dependencies = vec!["t-1".to_string()];
    let t = queue.enqueue(dependent).unwrap();
    assert_eq!(t.status, TaskStatus::Pending);
}

#[test]
fn dequeue_claims_best_ready_task() {
    let queue = queue();
    queue.enqueue(task("medium")).unwrap();
    let mut urgent = task("urgent");
    urgent.priority = TaskPriority::Critical;
    queue.enqueue(urgent).unwrap();

    let claimed = queue.dequeue("w").unwrap().unwrap();
    assert_eq!(claimed.task_id, "urgent");
    assert_eq!(claimed.status, TaskStatus::InProgress);

    let claimed = queue.dequeue("w").unwrap().unwrap();
    assert_eq!(claimed.task_id, "medium");

    assert!(queue.dequeue("w").unwrap().is_none());
}

#[test]
fn complete_writes_result_metrics_and_unblocks_dependents() {
    let queue = queue();
    queue.enqueue(task("t-1")).unwrap();
    let mut dependent = task("t-2");
    dependent.dependencies = vec!["t-1".to_string()];
    queue.enqueue(dependent).unwrap();

    // Direct claim of the dependent parks it in BLOCKED.
    let err = queue.claim("t-2", "w").unwrap_err();
    assert!(matches!(err, EngineError::DependencyUnsatisfied { .. }));

    queue.claim("t-1", "w").unwrap();
    let done = queue.complete("t-1", "w", success_result()).unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    // The returned snapshot carries the result, not just the stored row.
    assert!(done.result.as_ref().is_some_and(|result| result.success));

    let stored = queue.get_task("t-1").unwrap().unwrap();
    assert!(stored.result.unwrap().success);
    assert!(queue.store().get_task_metrics("t-1").unwrap().is_some());

    // The dependent came back to QUEUED and is claimable.
    let t = queue.get_task("t-2").unwrap().unwrap();
    assert_eq!(t.status, TaskStatus::Queued);
    assert!(queue.claim("t-2", "w").is_ok());
}

#[test]
fn bulk_enqueue_flags_duplicates_and_admits_the_rest() {
    let queue = queue();
    queue.enqueue(task("dup")).unwrap();

    let results = queue
        .bulk_enqueue(vec![task("a"), task("dup"), task("b")])
        .unwrap();
    assert_eq!(results.get("a"), Some(&true));
    assert_eq!(results.get("b"), Some(&true));
    assert_eq!(results.get("dup"), Some(&false));
    assert_eq!(
        queue.get_task("a").unwrap().unwrap().status,
        TaskStatus::Queued
    );
    // The original row survived the duplicate.
    assert_eq!(queue.get_task("dup").unwrap().unwrap().title, "task dup");
}

#[test]
fn purge_removes_only_old_terminal_tasks() {
    let queue = queue();
    for id in ["old-done", "fresh-done"] {
        queue.enqueue(task(id)).unwrap();
        queue.claim(id, "w").unwrap();
        queue.complete(id, "w", success_result()).unwrap();
    }
    queue.enqueue(task("live")).unwrap();

    // Age one completion past the retention window.
    queue
        .store()
        .with_conn(|conn| {
            conn.execute(
                "UPDATE tasks SET completed_at = completed_at - 8 * 86400000
                 WHERE task_id = 'old-done'",
                [],
            )?;
            Ok(())
        })
        .unwrap();

    assert_eq!(queue.purge_completed(7).unwrap(), 1);
    assert!(queue.get_task("old-done").unwrap().is_none());
    assert!(queue.store().get_task_log("old-done").unwrap().is_empty());
    assert!(queue.store().get_task_metrics("old-done").unwrap().is_none());
    assert!(queue.store().get_assignments("old-done").unwrap().is_empty());
    assert!(queue.get_task("fresh-done").unwrap().is_some());
    assert!(queue.get_task("live").unwrap().is_some());
}

#[test]
fn retryable_failure_cycles_until_the_ceiling() {
    let queue = queue();
    queue.enqueue(task("t-1")).unwrap();

    let mut attempts = 0;
    loop {
        let Some(t) = queue.dequeue("w").unwrap() else {
            break;
        };
        attempts += 1;
        let status = queue
            .fail(
                &t.task_id,
                "w",
                TaskResult::failure("boom", 0.1),
                true,
            )
            .unwrap();
        if status == TaskStatus::Failed {
            break;
        }
        assert_eq!(status, TaskStatus::Retrying);
    }

    // max_retries = 3: exactly three executions, then permanent FAILED.
    assert_eq!(attempts, 3);
    let t = queue.get_task("t-1").unwrap().unwrap();
    assert_eq!(t.status, TaskStatus::Failed);
    assert_eq!(t.retry_count, 3);
    assert!(t.result.is_some());
    assert!(queue.dequeue("w").unwrap().is_none());
}

#[test]
fn result_is_only_written_at_a_final_status() {
    let queue = queue();
    queue.enqueue(task("t-1")).unwrap();
    queue.claim("t-1", "w").unwrap();

    let status = queue
        .fail("t-1", "w", TaskResult::failure("first boom", 0.1), true)
        .unwrap();
    assert_eq!(status, TaskStatus::Retrying);
    // Retrying is not final: no result row yet.
    assert!(queue.get_task("t-1").unwrap().unwrap().result.is_none());
}

#[test]
fn non_retryable_timeout_lands_on_timeout_status() {
    let queue = queue();
    queue.enqueue(task("t-1")).unwrap();
    queue.claim("t-1", "w").unwrap();

    let status = queue
        .fail(
            "t-1",
            "w",
            TaskResult::failure("execution timed out after 1s", 1.0),
            false,
        )
        .unwrap();
    assert_eq!(status, TaskStatus::Timeout);

    let t = queue.get_task("t-1").unwrap().unwrap();
    assert_eq!(t.status, TaskStatus::Timeout);
    assert_eq!(t.last_error.as_deref(), Some("execution timed out after 1s"));
    assert!(t.result.is_some());
}

#[test]
fn cancel_is_terminal_and_non_preemptive() {
    let queue = queue();
    queue.enqueue(task("t-1")).unwrap();
    queue.claim("t-1", "w").unwrap();

    let t = queue.cancel("t-1", Some("op"), "no longer needed").unwrap();
    assert_eq!(t.status, TaskStatus::Cancelled);

    // The worker finishing later is rejected, not silently overwritten.
    let err = queue.complete("t-1", "w", success_result()).unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));
    assert_eq!(
        queue.get_task("t-1").unwrap().unwrap().status,
        TaskStatus::Cancelled
    );
}

#[test]
fn search_and_filter_helpers() {
    let queue = queue();
    let mut bugfix = task("bug-1");
    bugfix.task_type = TaskType::Bugfix;
    bugfix.title = "fix the flaky widget".to_string();
    queue.enqueue(bugfix).unwrap();
    let mut urgent = task("feat-1");
    urgent.priority = TaskPriority::High;
    queue.enqueue(urgent).unwrap();

    let found = queue.search("widget").unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].task_id, "bug-1");

    assert_eq!(queue.by_priority(TaskPriority::High).unwrap().len(), 1);
    assert_eq!(queue.by_type(TaskType::Bugfix).unwrap().len(), 1);
    assert!(queue.search("nothing-matches").unwrap().is_empty());
}

#[test]
fn statistics_reflect_queue_activity() {
    let queue = queue();
    queue.enqueue(task("t-1")).unwrap();
    queue.enqueue(task("t-2")).unwrap();
    queue.claim("t-1", "w").unwrap();
    queue.complete("t-1", "w", success_result()).unwrap();

    let stats = queue.statistics().unwrap();
    assert_eq!(stats.total_tasks, 2);
    assert_eq!(stats.by_status.get("completed"), Some(&1));
    assert_eq!(stats.by_status.get("queued"), Some(&1));
    assert_eq!(stats.success_rate, 1.0);
}
