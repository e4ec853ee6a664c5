// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::body::work_body;
use gig_core::FakeClock;
use std::time::Duration;
use tokio::sync::oneshot;

fn test_config() -> SchedulerConfig {
    SchedulerConfig::default().shutdown_grace(Duration::from_millis(200))
}

fn scheduler() -> Scheduler {
    Scheduler::new(test_config()).unwrap()
}

/// Poll until the work's snapshot satisfies `pred`.
async fn wait_for<C: Clock>(
    scheduler: &Scheduler<C>,
    work_id: &WorkId,
    pred: impl Fn(&Snapshot) -> bool,
) -> Snapshot {
    for _ in 0..500 {
        if let Some(snapshot) = scheduler.try_get(work_id) {
            if pred(&snapshot) {
                return snapshot;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for work {work_id}");
}

/// Subscribe and collect every published snapshot.
fn capture<C: Clock>(scheduler: &Scheduler<C>) -> Arc<Mutex<Vec<Snapshot>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    scheduler.subscribe(move |s| sink.lock().push(s.clone()));
    events
}

#[tokio::test]
async fn empty_operation_key_rejected() {
    let scheduler = scheduler();
    for key in ["", "   "] {
        let err = scheduler.enqueue(
            WorkKind::Other,
            key,
            work_body(|_, _| async { Ok(()) }),
            true,
        );
        assert!(matches!(err, Err(SchedulerError::InvalidArgument(_))), "key {key:?}");
    }
}

#[tokio::test]
async fn success_path_sets_completed_defaults() {
    let clock = FakeClock::new();
    clock.set_epoch_ms(5_000);
    let scheduler = Scheduler::with_clock(test_config(), clock).unwrap();
    scheduler.start().await;

    let id = scheduler
        .enqueue(WorkKind::RepositoryScan, "scan:repo", work_body(|_, _| async { Ok(()) }), true)
        .unwrap();
    let snapshot = wait_for(&scheduler, &id, |s| s.is_terminal()).await;

    assert_eq!(snapshot.state, WorkState::Succeeded);
    assert_eq!(snapshot.percent_complete, 100);
    assert_eq!(snapshot.message.as_deref(), Some("Completed"));
    assert_eq!(snapshot.started_at_ms, Some(5_000));
    assert!(snapshot.error_code.is_none());
    scheduler.stop().await;
}

#[tokio::test]
async fn body_message_survives_success() {
    let scheduler = scheduler();
    scheduler.start().await;

    let id = scheduler
        .enqueue(
            WorkKind::Other,
            "msg",
            work_body(|_, progress| async move {
                progress.report(Progress::running(90).message("uploading artifacts"));
                Ok(())
            }),
            true,
        )
        .unwrap();
    let snapshot = wait_for(&scheduler, &id, |s| s.is_terminal()).await;
    assert_eq!(snapshot.state, WorkState::Succeeded);
    assert_eq!(snapshot.message.as_deref(), Some("uploading artifacts"));
    scheduler.stop().await;
}

#[tokio::test]
async fn body_fault_records_failed_with_first_line() {
    let scheduler = scheduler();
    scheduler.start().await;

    let id = scheduler
        .enqueue(
            WorkKind::Other,
            "fault",
            work_body(|_, _| async { Err(BodyError::Failed("boom\n  stack line".to_string())) }),
            true,
        )
        .unwrap();
    let snapshot = wait_for(&scheduler, &id, |s| s.is_terminal()).await;

    assert_eq!(snapshot.state, WorkState::Failed);
    assert_eq!(snapshot.error_code.as_deref(), Some(ERROR_CODE_EXCEPTION));
    assert_eq!(snapshot.error_message.as_deref(), Some("boom"));
    scheduler.stop().await;
}

#[tokio::test]
async fn panicking_body_records_failed() {
    let scheduler = scheduler();
    scheduler.start().await;

    let id = scheduler
        .enqueue(
            WorkKind::Other,
            "panic:async",
            work_body(|_, _| async { panic!("async boom") }),
            true,
        )
        .unwrap();
    let snapshot = wait_for(&scheduler, &id, |s| s.is_terminal()).await;
    assert_eq!(snapshot.state, WorkState::Failed);
    assert_eq!(snapshot.error_message.as_deref(), Some("async boom"));

    // Panic before the future even exists is the same fault path.
    let body: WorkBody = Box::new(|_, _| panic!("sync boom"));
    let id = scheduler.enqueue(WorkKind::Other, "panic:sync", body, true).unwrap();
    let snapshot = wait_for(&scheduler, &id, |s| s.is_terminal()).await;
    assert_eq!(snapshot.state, WorkState::Failed);
    assert_eq!(snapshot.error_message.as_deref(), Some("sync boom"));
    scheduler.stop().await;
}

#[tokio::test]
async fn cooperative_cancel_on_stop_records_cancelled() {
    let scheduler = scheduler();
    scheduler.start().await;

    let id = scheduler
        .enqueue(
            WorkKind::TaskRuntimeProvisioning,
            "provision:rt",
            work_body(|cancel, _| async move {
                tokio::select! {
                    _ = cancel.cancelled() => Err(BodyError::Cancelled),
                    _ = tokio::time::sleep(Duration::from_secs(30)) => Ok(()),
                }
            }),
            true,
        )
        .unwrap();
    wait_for(&scheduler, &id, |s| s.state == WorkState::Running).await;
    scheduler.stop().await;

    let snapshot = scheduler.try_get(&id).unwrap();
    assert_eq!(snapshot.state, WorkState::Cancelled);
    assert!(snapshot.error_code.is_none());
}

#[tokio::test]
async fn cancelled_claim_without_token_is_a_fault() {
    let scheduler = scheduler();
    scheduler.start().await;

    let id = scheduler
        .enqueue(
            WorkKind::Other,
            "liar",
            work_body(|_, _| async { Err(BodyError::Cancelled) }),
            true,
        )
        .unwrap();
    let snapshot = wait_for(&scheduler, &id, |s| s.is_terminal()).await;
    assert_eq!(snapshot.state, WorkState::Failed);
    assert_eq!(snapshot.error_code.as_deref(), Some(ERROR_CODE_EXCEPTION));
    scheduler.stop().await;
}

#[tokio::test]
async fn progress_is_monotonic_and_caps_below_succeeded() {
    let scheduler = scheduler();
    let events = capture(&scheduler);
    scheduler.start().await;

    let id = scheduler
        .enqueue(
            WorkKind::Other,
            "progress",
            work_body(|_, progress| async move {
                progress.report(Progress::running(50));
                progress.report(Progress::running(30)); // down-step clamps
                progress.report(Progress::running(100)); // caps at 99
                Ok(())
            }),
            true,
        )
        .unwrap();
    wait_for(&scheduler, &id, |s| s.is_terminal()).await;

    let percents: Vec<u8> = events
        .lock()
        .iter()
        .filter(|s| s.work_id == id && s.state == WorkState::Running)
        .map(|s| s.percent_complete)
        .collect();
    assert_eq!(percents, vec![0, 50, 50, 99]);
    scheduler.stop().await;
}

#[tokio::test]
async fn non_running_progress_reports_are_ignored() {
    let scheduler = scheduler();
    let events = capture(&scheduler);
    scheduler.start().await;

    let id = scheduler
        .enqueue(
            WorkKind::Other,
            "steering",
            work_body(|_, progress| async move {
                progress.report(Progress {
                    state: WorkState::Succeeded,
                    percent_complete: 80,
                    message: None,
                });
                Ok(())
            }),
            true,
        )
        .unwrap();
    wait_for(&scheduler, &id, |s| s.is_terminal()).await;

    // No event carries the report; the lifecycle is pending, running, succeeded.
    let states: Vec<WorkState> =
        events.lock().iter().filter(|s| s.work_id == id).map(|s| s.state).collect();
    assert_eq!(states, vec![WorkState::Pending, WorkState::Running, WorkState::Succeeded]);
    scheduler.stop().await;
}

#[tokio::test]
async fn dedupe_joins_live_record_and_skips_second_body() {
    let scheduler = scheduler();
    let (gate_tx, gate_rx) = oneshot::channel::<()>();
    scheduler.start().await;

    let id1 = scheduler
        .enqueue(
            WorkKind::Other,
            "Dedupe:Key",
            work_body(|_, _| async move {
                gate_rx.await.ok();
                Ok(())
            }),
            true,
        )
        .unwrap();
    wait_for(&scheduler, &id1, |s| s.state == WorkState::Running).await;

    let second_ran = Arc::new(Mutex::new(false));
    let flag = second_ran.clone();
    let id2 = scheduler
        .enqueue(
            WorkKind::Other,
            "dedupe:key",
            work_body(move |_, _| async move {
                *flag.lock() = true;
                Ok(())
            }),
            true,
        )
        .unwrap();
    assert_eq!(id2, id1);

    gate_tx.send(()).ok();
    let snapshot = wait_for(&scheduler, &id1, |s| s.is_terminal()).await;
    assert_eq!(snapshot.state, WorkState::Succeeded);
    assert!(!*second_ran.lock());

    // Terminal work releases the key; the next submission runs fresh.
    let id3 = scheduler
        .enqueue(WorkKind::Other, "dedupe:key", work_body(|_, _| async { Ok(()) }), true)
        .unwrap();
    assert_ne!(id3, id1);
    wait_for(&scheduler, &id3, |s| s.is_terminal()).await;
    scheduler.stop().await;
}

#[tokio::test]
async fn dedupe_disabled_always_creates() {
    let scheduler = scheduler();
    scheduler.start().await;
    let id1 = scheduler
        .enqueue(WorkKind::Other, "same", work_body(|_, _| async { Ok(()) }), false)
        .unwrap();
    let id2 = scheduler
        .enqueue(WorkKind::Other, "same", work_body(|_, _| async { Ok(()) }), false)
        .unwrap();
    assert_ne!(id1, id2);
    wait_for(&scheduler, &id1, |s| s.is_terminal()).await;
    wait_for(&scheduler, &id2, |s| s.is_terminal()).await;
    scheduler.stop().await;
}

#[tokio::test]
async fn full_queue_rejects_without_registering() {
    let scheduler =
        Scheduler::new(test_config().max_concurrency(1).queue_capacity(1usize)).unwrap();
    // Not started: the single queue slot stays occupied.
    scheduler
        .enqueue(WorkKind::Other, "first", work_body(|_, _| async { Ok(()) }), true)
        .unwrap();
    let err = scheduler.enqueue(
        WorkKind::Other,
        "second",
        work_body(|_, _| async { Ok(()) }),
        true,
    );
    assert!(matches!(err, Err(SchedulerError::ResourceExhausted(1))));
    // The rejected submission left no record behind.
    assert_eq!(scheduler.list().len(), 1);
    scheduler.stop().await;
}

#[tokio::test]
async fn enqueue_before_start_drains_after_start() {
    let scheduler = scheduler();
    let id = scheduler
        .enqueue(WorkKind::Other, "early", work_body(|_, _| async { Ok(()) }), true)
        .unwrap();
    assert_eq!(scheduler.try_get(&id).unwrap().state, WorkState::Pending);

    scheduler.start().await;
    scheduler.start().await; // idempotent
    let snapshot = wait_for(&scheduler, &id, |s| s.is_terminal()).await;
    assert_eq!(snapshot.state, WorkState::Succeeded);
    scheduler.stop().await;
}

#[tokio::test]
async fn stop_cancels_pending_work_and_publishes_terminal_events() {
    let scheduler = scheduler();
    let events = capture(&scheduler);
    let id = scheduler
        .enqueue(WorkKind::Other, "never-started", work_body(|_, _| async { Ok(()) }), true)
        .unwrap();

    // Never started; stop still cancels and publishes before returning.
    scheduler.stop().await;
    assert_eq!(scheduler.try_get(&id).unwrap().state, WorkState::Cancelled);
    let states: Vec<WorkState> =
        events.lock().iter().filter(|s| s.work_id == id).map(|s| s.state).collect();
    assert_eq!(states, vec![WorkState::Pending, WorkState::Cancelled]);
}

#[tokio::test]
async fn stop_force_cancels_body_ignoring_cancellation() {
    let scheduler = Scheduler::new(test_config().shutdown_grace(Duration::from_millis(50))).unwrap();
    scheduler.start().await;

    let id = scheduler
        .enqueue(
            WorkKind::Other,
            "stubborn",
            work_body(|_, _| async {
                // Ignores its token entirely.
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            }),
            true,
        )
        .unwrap();
    wait_for(&scheduler, &id, |s| s.state == WorkState::Running).await;

    scheduler.stop().await;
    assert_eq!(scheduler.try_get(&id).unwrap().state, WorkState::Cancelled);
}

#[tokio::test]
async fn enqueue_after_stop_rejected() {
    let scheduler = scheduler();
    scheduler.start().await;
    scheduler.stop().await;
    scheduler.stop().await; // idempotent

    let err =
        scheduler.enqueue(WorkKind::Other, "late", work_body(|_, _| async { Ok(()) }), true);
    assert!(matches!(err, Err(SchedulerError::InvalidArgument(_))));
}

#[tokio::test]
async fn distinct_work_runs_in_parallel() {
    let scheduler = Scheduler::new(test_config().max_concurrency(2)).unwrap();
    scheduler.start().await;

    // Each body blocks until the other has started; only parallel
    // execution lets either finish.
    let barrier = Arc::new(tokio::sync::Barrier::new(2));
    let mut ids = Vec::new();
    for key in ["par:a", "par:b"] {
        let barrier = barrier.clone();
        ids.push(
            scheduler
                .enqueue(
                    WorkKind::Other,
                    key,
                    work_body(move |_, _| async move {
                        barrier.wait().await;
                        Ok(())
                    }),
                    true,
                )
                .unwrap(),
        );
    }
    for id in &ids {
        let snapshot = wait_for(&scheduler, id, |s| s.is_terminal()).await;
        assert_eq!(snapshot.state, WorkState::Succeeded);
    }
    scheduler.stop().await;
}

#[tokio::test]
async fn pending_event_published_before_enqueue_returns() {
    let scheduler = scheduler();
    let events = capture(&scheduler);
    let id = scheduler
        .enqueue(WorkKind::Other, "sync-pending", work_body(|_, _| async { Ok(()) }), true)
        .unwrap();
    let states: Vec<WorkState> =
        events.lock().iter().filter(|s| s.work_id == id).map(|s| s.state).collect();
    assert_eq!(states, vec![WorkState::Pending]);
    scheduler.stop().await;
}

#[tokio::test]
async fn list_orders_by_most_recent_update() {
    let clock = FakeClock::new();
    let scheduler = Scheduler::with_clock(test_config(), clock.clone()).unwrap();
    let a = scheduler
        .enqueue(WorkKind::Other, "a", work_body(|_, _| async { Ok(()) }), true)
        .unwrap();
    clock.advance_ms(10);
    let b = scheduler
        .enqueue(WorkKind::Other, "b", work_body(|_, _| async { Ok(()) }), true)
        .unwrap();

    let ids: Vec<WorkId> = scheduler.list().into_iter().map(|s| s.work_id).collect();
    assert_eq!(ids, vec![b, a]);
    scheduler.stop().await;
}
