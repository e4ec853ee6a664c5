// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The scheduler: submission front-end, worker pool, and lifecycle.

use crate::body::{ProgressReporter, ProgressSink, WorkBody};
use crate::config::SchedulerConfig;
use crate::dispatch::{SubscriberId, UpdateDispatcher};
use crate::error::{BodyError, SchedulerError};
use crate::registry::{Registry, UpdateError};
use futures_util::future::join_all;
use futures_util::FutureExt;
use gig_core::{
    Clock, Progress, Snapshot, SystemClock, WorkId, WorkKind, WorkState, ERROR_CODE_EXCEPTION,
};
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Created,
    Running,
    Stopped,
}

enum QueueTx {
    Bounded(mpsc::Sender<WorkId>),
    Unbounded(mpsc::UnboundedSender<WorkId>),
}

enum QueueRx {
    Bounded(mpsc::Receiver<WorkId>),
    Unbounded(mpsc::UnboundedReceiver<WorkId>),
}

impl QueueRx {
    async fn recv(&mut self) -> Option<WorkId> {
        match self {
            QueueRx::Bounded(rx) => rx.recv().await,
            QueueRx::Unbounded(rx) => rx.recv().await,
        }
    }
}

/// A reserved queue slot; sending through it cannot fail with `Full`.
enum QueueSlot<'a> {
    Bounded(mpsc::Permit<'a, WorkId>),
    Unbounded(&'a mpsc::UnboundedSender<WorkId>),
}

impl QueueSlot<'_> {
    fn send(self, work_id: WorkId) {
        match self {
            QueueSlot::Bounded(permit) => permit.send(work_id),
            QueueSlot::Unbounded(tx) => {
                // Receiver closure is only reachable through stop, which
                // sweeps the registry afterwards.
                let _ = tx.send(work_id);
            }
        }
    }
}

impl QueueTx {
    fn reserve(&self, capacity: Option<usize>) -> Result<QueueSlot<'_>, SchedulerError> {
        match self {
            QueueTx::Bounded(tx) => match tx.try_reserve() {
                Ok(permit) => Ok(QueueSlot::Bounded(permit)),
                Err(mpsc::error::TrySendError::Full(())) => {
                    Err(SchedulerError::ResourceExhausted(capacity.unwrap_or(0)))
                }
                Err(mpsc::error::TrySendError::Closed(())) => {
                    Err(SchedulerError::InvalidArgument("scheduler is stopped".to_string()))
                }
            },
            QueueTx::Unbounded(tx) => Ok(QueueSlot::Unbounded(tx)),
        }
    }
}

/// Shared internals; workers and progress reporters hold an `Arc` of this.
struct SchedulerInner<C: Clock> {
    config: SchedulerConfig,
    clock: C,
    registry: Registry,
    dispatcher: UpdateDispatcher,
    /// Root shutdown token; every work record gets a child of it
    shutdown: CancellationToken,
    queue_tx: QueueTx,
}

impl<C: Clock> SchedulerInner<C> {
    /// Commit a snapshot update and publish it as one serialized step,
    /// so subscribers observe per-work snapshots in commit order.
    fn commit(
        &self,
        work_id: &WorkId,
        mutate: impl FnOnce(&mut Snapshot),
    ) -> Result<Snapshot, UpdateError> {
        self.dispatcher.serialized(|| {
            let (_, next) = self.registry.update(work_id, mutate)?;
            self.dispatcher.publish(&next);
            Ok(next)
        })
    }

    /// Commit a terminal transition: publish, then release the dedupe
    /// index entry before anything else can observe the key as free.
    fn commit_terminal(
        &self,
        work_id: &WorkId,
        mutate: impl FnOnce(&mut Snapshot),
    ) -> Result<Snapshot, UpdateError> {
        self.dispatcher.serialized(|| {
            let (_, next) = self.registry.update(work_id, mutate)?;
            self.dispatcher.publish(&next);
            self.registry.finalize(work_id);
            Ok(next)
        })
    }
}

impl<C: Clock> ProgressSink for SchedulerInner<C> {
    fn report(&self, work_id: &WorkId, progress: Progress) {
        if progress.state != WorkState::Running {
            tracing::debug!(
                work_id = %work_id,
                state = %progress.state,
                "ignoring progress report claiming a non-running state"
            );
            return;
        }
        let Some(current) = self.registry.snapshot(work_id) else { return };
        if current.is_terminal() {
            // Reports arriving after completion are dropped, not errors.
            return;
        }
        let now = self.clock.epoch_ms();
        let result = self.commit(work_id, |s| {
            // Monotonic: down-steps clamp to the current maximum. 100 is
            // written only by the succeeded transition.
            s.percent_complete = s.percent_complete.max(progress.percent_complete.min(99));
            if let Some(message) = progress.message {
                s.message = Some(message);
            }
            s.updated_at_ms = now;
        });
        if let Err(err) = result {
            tracing::debug!(work_id = %work_id, error = %err, "progress report dropped");
        }
    }
}

/// Background work scheduler.
///
/// Submissions are deduplicated by case-insensitive operation key,
/// queued FIFO, and executed by a bounded pool of worker tasks. Every
/// state or progress change is published to subscribers as an immutable
/// [`Snapshot`].
pub struct Scheduler<C: Clock = SystemClock> {
    inner: Arc<SchedulerInner<C>>,
    run_state: Mutex<RunState>,
    /// Taken by the first `start`
    queue_rx: Mutex<Option<QueueRx>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler<SystemClock> {
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> Scheduler<C> {
    pub fn with_clock(config: SchedulerConfig, clock: C) -> Result<Self, SchedulerError> {
        config.validate()?;
        let (queue_tx, queue_rx) = match config.queue_capacity {
            Some(capacity) => {
                let (tx, rx) = mpsc::channel(capacity);
                (QueueTx::Bounded(tx), QueueRx::Bounded(rx))
            }
            None => {
                let (tx, rx) = mpsc::unbounded_channel();
                (QueueTx::Unbounded(tx), QueueRx::Unbounded(rx))
            }
        };
        Ok(Self {
            inner: Arc::new(SchedulerInner {
                config,
                clock,
                registry: Registry::new(),
                dispatcher: UpdateDispatcher::new(),
                shutdown: CancellationToken::new(),
                queue_tx,
            }),
            run_state: Mutex::new(RunState::Created),
            queue_rx: Mutex::new(Some(queue_rx)),
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Submit work for background execution.
    ///
    /// With `dedupe_by_operation_key`, a submission whose key matches a
    /// live (non-terminal) record joins it: the existing work id is
    /// returned and `body` is never invoked. The initial pending
    /// snapshot of newly created work is published before this returns.
    ///
    /// Submission may precede `start`; queued work drains once workers
    /// are up.
    pub fn enqueue(
        &self,
        kind: WorkKind,
        operation_key: &str,
        body: WorkBody,
        dedupe_by_operation_key: bool,
    ) -> Result<WorkId, SchedulerError> {
        let key = operation_key.trim();
        if key.is_empty() {
            return Err(SchedulerError::InvalidArgument(
                "operation key must not be empty".to_string(),
            ));
        }
        // Held across registration so a concurrent stop cannot sweep the
        // registry between our state check and the record insert.
        let run_state = self.run_state.lock();
        if *run_state == RunState::Stopped {
            return Err(SchedulerError::InvalidArgument("scheduler is stopped".to_string()));
        }
        // Reserve the queue slot before registering so a full queue never
        // leaves a half-registered record behind.
        let slot = self.inner.queue_tx.reserve(self.inner.config.queue_capacity)?;

        let now = self.inner.clock.epoch_ms();
        let inner = &self.inner;
        let (work_id, created) = inner.dispatcher.serialized(|| {
            let (work_id, created, pending) = if dedupe_by_operation_key {
                inner.registry.try_register(key, kind, body, &inner.shutdown, now)
            } else {
                let (work_id, pending) =
                    inner.registry.register(key, kind, body, &inner.shutdown, now);
                (work_id, true, Some(pending))
            };
            if let Some(pending) = &pending {
                inner.dispatcher.publish(pending);
            }
            (work_id, created)
        });

        if !created {
            // Joined an existing record; the reserved slot is released on drop.
            tracing::debug!(work_id = %work_id, operation_key = key, "joined live work");
            return Ok(work_id);
        }
        slot.send(work_id);
        tracing::debug!(work_id = %work_id, kind = %kind, operation_key = key, "work enqueued");
        Ok(work_id)
    }

    /// Current snapshot for a work id, if known. Terminal snapshots stay
    /// retrievable after completion.
    pub fn try_get(&self, work_id: &WorkId) -> Option<Snapshot> {
        self.inner.registry.snapshot(work_id)
    }

    /// Point-in-time snapshots of all known work, most recently updated
    /// first.
    pub fn list(&self) -> Vec<Snapshot> {
        self.inner.registry.list()
    }

    /// Subscribe to snapshot-change events.
    pub fn subscribe(&self, handler: impl Fn(&Snapshot) + Send + Sync + 'static) -> SubscriberId {
        self.inner.dispatcher.subscribe(handler)
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        self.inner.dispatcher.unsubscribe(id)
    }

    /// Spawn the worker pool. Idempotent; a stopped scheduler stays
    /// stopped.
    pub async fn start(&self) {
        let mut state = self.run_state.lock();
        match *state {
            RunState::Running => return,
            RunState::Stopped => {
                tracing::warn!("start ignored: scheduler already stopped");
                return;
            }
            RunState::Created => {}
        }
        *state = RunState::Running;
        let Some(queue_rx) = self.queue_rx.lock().take() else { return };
        let queue_rx = Arc::new(tokio::sync::Mutex::new(queue_rx));
        let mut workers = self.workers.lock();
        for worker in 0..self.inner.config.max_concurrency {
            workers.push(tokio::spawn(worker_loop(self.inner.clone(), queue_rx.clone(), worker)));
        }
        tracing::info!(workers = self.inner.config.max_concurrency, "scheduler started");
    }

    /// Stop the scheduler and await quiescence. Idempotent.
    ///
    /// Pending work is cancelled outright; running bodies get their
    /// cancellation token and `shutdown_grace` to honor it. Bodies still
    /// running at the deadline are aborted and their records forcibly
    /// marked cancelled. All terminal events are published before this
    /// returns.
    pub async fn stop(&self) {
        {
            let mut state = self.run_state.lock();
            if *state == RunState::Stopped {
                return;
            }
            *state = RunState::Stopped;
        }
        tracing::info!("scheduler stopping");
        self.inner.shutdown.cancel();

        // Work that never reached a worker is cancelled without starting.
        self.sweep_cancelled(true);

        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        if !workers.is_empty() {
            let aborts: Vec<_> = workers.iter().map(|h| h.abort_handle()).collect();
            let grace = self.inner.config.shutdown_grace;
            if tokio::time::timeout(grace, join_all(workers)).await.is_err() {
                tracing::warn!(
                    grace_ms = grace.as_millis() as u64,
                    "shutdown grace period exceeded; aborting workers"
                );
                for abort in aborts {
                    abort.abort();
                }
            }
        }

        // Bodies that ignored cancellation past the grace period: their
        // continued execution is a bug in the body, but it must not keep
        // records non-terminal or block stop.
        self.sweep_cancelled(false);
        tracing::info!("scheduler stopped");
    }

    fn sweep_cancelled(&self, only_pending: bool) {
        for work_id in self.inner.registry.non_terminal_ids() {
            if only_pending {
                match self.inner.registry.snapshot(&work_id) {
                    Some(snap) if snap.state == WorkState::Pending => {}
                    _ => continue,
                }
            }
            let now = self.inner.clock.epoch_ms();
            match self.inner.commit_terminal(&work_id, |s| {
                s.state = WorkState::Cancelled;
                s.updated_at_ms = now;
            }) {
                Ok(_) => tracing::info!(work_id = %work_id, "work cancelled by shutdown"),
                Err(err) => {
                    // Lost a benign race with a worker committing its own
                    // terminal state.
                    tracing::debug!(work_id = %work_id, error = %err, "shutdown sweep skipped record");
                }
            }
        }
    }
}

async fn worker_loop<C: Clock>(
    inner: Arc<SchedulerInner<C>>,
    queue_rx: Arc<tokio::sync::Mutex<QueueRx>>,
    worker: usize,
) {
    tracing::debug!(worker, "worker started");
    loop {
        let next = {
            let mut rx = queue_rx.lock().await;
            tokio::select! {
                _ = inner.shutdown.cancelled() => None,
                item = rx.recv() => item,
            }
        };
        let Some(work_id) = next else { break };
        run_one(&inner, work_id).await;
    }
    tracing::debug!(worker, "worker stopped");
}

/// Execute one work item: transition to running, invoke the body with
/// its cancellation token and progress reporter, record the terminal
/// outcome.
async fn run_one<C: Clock>(inner: &Arc<SchedulerInner<C>>, work_id: WorkId) {
    let Some(current) = inner.registry.snapshot(&work_id) else { return };
    if current.is_terminal() {
        // Cancelled during a shutdown race before any worker got to it.
        return;
    }

    let now = inner.clock.epoch_ms();
    if let Err(err) = inner.commit(&work_id, |s| {
        s.state = WorkState::Running;
        s.started_at_ms = Some(now);
        s.updated_at_ms = now;
    }) {
        tracing::debug!(work_id = %work_id, error = %err, "work left pending state before start");
        return;
    }

    let Some(cancel) = inner.registry.cancel_token(&work_id) else { return };
    let Some(body) = inner.registry.take_body(&work_id) else {
        tracing::warn!(work_id = %work_id, "work body already taken");
        return;
    };
    let sink: Arc<dyn ProgressSink> = inner.clone();
    let reporter = ProgressReporter::new(work_id, sink);
    tracing::info!(
        work_id = %work_id,
        kind = %current.kind,
        operation_key = %current.operation_key,
        "work started"
    );

    // A body that panics, whether while constructing its future or while
    // polling it, is an ordinary fault.
    let invoked = {
        let cancel = cancel.clone();
        std::panic::catch_unwind(AssertUnwindSafe(move || body(cancel, reporter)))
    };
    let outcome = match invoked {
        Err(payload) => Err(BodyError::Failed(panic_message(payload))),
        Ok(future) => AssertUnwindSafe(future)
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(BodyError::Failed(panic_message(payload)))),
    };

    let now = inner.clock.epoch_ms();
    let committed = match outcome {
        Ok(()) => inner.commit_terminal(&work_id, |s| {
            s.state = WorkState::Succeeded;
            s.percent_complete = 100;
            if s.message.is_none() {
                s.message = Some("Completed".to_string());
            }
            s.updated_at_ms = now;
        }),
        Err(BodyError::Cancelled) if cancel.is_cancelled() => {
            inner.commit_terminal(&work_id, |s| {
                s.state = WorkState::Cancelled;
                s.updated_at_ms = now;
            })
        }
        Err(fault) => {
            let message = fault_message(&fault);
            inner.commit_terminal(&work_id, |s| {
                s.state = WorkState::Failed;
                s.error_code = Some(ERROR_CODE_EXCEPTION.to_string());
                s.error_message = Some(message);
                s.updated_at_ms = now;
            })
        }
    };
    match committed {
        Ok(snapshot) => {
            tracing::info!(work_id = %work_id, state = %snapshot.state, "work finished")
        }
        Err(err) => {
            // Shutdown force-cancelled this record while the body wound down.
            tracing::debug!(work_id = %work_id, error = %err, "terminal outcome superseded")
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

/// First non-empty line of a fault's message; failed snapshots always
/// carry a non-empty error message.
fn fault_message(fault: &BodyError) -> String {
    let text = fault.to_string();
    match text.lines().map(str::trim).find(|line| !line.is_empty()) {
        Some(line) => line.to_string(),
        None => "unknown error".to_string(),
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
