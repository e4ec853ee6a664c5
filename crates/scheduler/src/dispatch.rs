// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Snapshot-change fan-out to subscribers.

use gig_core::Snapshot;
use parking_lot::{Mutex, ReentrantMutex};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriberId(u64);

type UpdateHandler = Arc<dyn Fn(&Snapshot) + Send + Sync>;

/// Fans snapshot-change events out to subscribers.
///
/// Publication clones the subscriber list and iterates the clone, so
/// subscribing or unsubscribing from inside a handler neither deadlocks
/// nor skips handlers of the in-flight event. The ordering lock
/// serializes commit+publish pairs: for a given work id, handlers
/// observe snapshots in commit order. It is reentrant so a handler can
/// unsubscribe itself; a cross-thread unsubscribe waits out the
/// in-flight delivery, so a terminal event committed before the
/// unsubscribe is always delivered before unsubscription completes.
///
/// Handlers run synchronously on the publisher's task and must be cheap
/// or offload; a panicking handler is logged and isolated from the rest.
#[derive(Default)]
pub(crate) struct UpdateDispatcher {
    subscribers: Mutex<Vec<(u64, UpdateHandler)>>,
    next_id: AtomicU64,
    order: ReentrantMutex<()>,
}

impl UpdateDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, handler: impl Fn(&Snapshot) + Send + Sync + 'static) -> SubscriberId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().push((id, Arc::new(handler)));
        SubscriberId(id)
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        self.subscribers.lock().retain(|(sid, _)| *sid != id.0);
        // Drain: an emission that snapshotted the list before removal may
        // still be delivering to this handler. Returning only after the
        // ordering lock is free guarantees that delivery has finished.
        let _drain = self.order.lock();
    }

    /// Deliver a committed snapshot to every current subscriber.
    pub fn publish(&self, snapshot: &Snapshot) {
        let _order = self.order.lock();
        let handlers: Vec<(u64, UpdateHandler)> = self.subscribers.lock().clone();
        for (id, handler) in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(snapshot))).is_err() {
                tracing::warn!(
                    subscriber = id,
                    work_id = %snapshot.work_id,
                    "update handler panicked; continuing with remaining handlers"
                );
            }
        }
    }

    /// Run `f` under the ordering lock.
    ///
    /// Mutations that publish wrap the commit and the `publish` call
    /// together so per-work event order matches commit order end-to-end.
    pub fn serialized<R>(&self, f: impl FnOnce() -> R) -> R {
        let _order = self.order.lock();
        f()
    }

    #[cfg(test)]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
