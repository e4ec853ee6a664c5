// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared helpers for the workspace specs.

pub use gig_adapters::{FakeNotifySink, Severity};
pub use gig_core::{Progress, Snapshot, WorkId, WorkKind, WorkState};
pub use gig_scheduler::{work_body, BodyError, NotificationRelay, Scheduler, SchedulerConfig};

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Scheduler with a short shutdown grace so cancellation specs stay fast.
pub fn scheduler() -> Scheduler {
    match Scheduler::new(SchedulerConfig::default().shutdown_grace(Duration::from_millis(500))) {
        Ok(scheduler) => scheduler,
        Err(err) => panic!("default config must validate: {err}"),
    }
}

/// Poll until the work's snapshot satisfies `pred`, or fail after 5 s.
pub async fn wait_for(
    scheduler: &Scheduler,
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
pub fn capture(scheduler: &Scheduler) -> Arc<Mutex<Vec<Snapshot>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    scheduler.subscribe(move |s| sink.lock().push(s.clone()));
    events
}
