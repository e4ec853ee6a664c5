// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Work record registry: id → record map plus the operation-key dedupe index.

use crate::body::WorkBody;
use gig_core::{Snapshot, SnapshotError, TransitionError, WorkId, WorkKind};
use parking_lot::Mutex;
use std::collections::HashMap;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Rejected registry update.
#[derive(Debug, Error)]
pub(crate) enum UpdateError {
    #[error("work not found: {0}")]
    NotFound(WorkId),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Invariant(#[from] SnapshotError),
}

/// Internal per-work state. Never exposed; callers only see snapshots.
struct WorkRecord {
    snapshot: Snapshot,
    cancel: CancellationToken,
    /// Taken exactly once by the worker that executes this work
    body: Option<WorkBody>,
}

#[derive(Default)]
struct RegistryInner {
    records: HashMap<WorkId, WorkRecord>,
    /// Case-folded operation key → id of the live (non-terminal) record
    by_key: HashMap<String, WorkId>,
}

/// Thread-safe work record registry.
///
/// Both maps are mutated only under the single inner lock so that
/// register-or-join is one critical section. Critical sections are short
/// and never suspend.
#[derive(Default)]
pub(crate) struct Registry {
    inner: Mutex<RegistryInner>,
}

fn fold_key(operation_key: &str) -> String {
    operation_key.to_lowercase()
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register new work, or join the live record already holding this
    /// operation key. Returns `(work_id, created, pending_snapshot)`;
    /// the snapshot is present only when a record was created.
    pub fn try_register(
        &self,
        operation_key: &str,
        kind: WorkKind,
        body: WorkBody,
        shutdown: &CancellationToken,
        now_ms: u64,
    ) -> (WorkId, bool, Option<Snapshot>) {
        let mut inner = self.inner.lock();
        let folded = fold_key(operation_key);
        if let Some(existing) = inner.by_key.get(&folded) {
            // Index entries are evicted on terminal transition, so a hit
            // is always a live record.
            return (*existing, false, None);
        }
        let (work_id, snapshot) =
            insert_record(&mut inner, folded, operation_key, kind, body, shutdown, now_ms);
        (work_id, true, Some(snapshot))
    }

    /// Register new work unconditionally (deduplication disabled by the
    /// submitter). The key index entry is overwritten last-writer-wins.
    pub fn register(
        &self,
        operation_key: &str,
        kind: WorkKind,
        body: WorkBody,
        shutdown: &CancellationToken,
        now_ms: u64,
    ) -> (WorkId, Snapshot) {
        let mut inner = self.inner.lock();
        let folded = fold_key(operation_key);
        insert_record(&mut inner, folded, operation_key, kind, body, shutdown, now_ms)
    }

    /// Current snapshot for a work id, including terminal records.
    pub fn snapshot(&self, work_id: &WorkId) -> Option<Snapshot> {
        self.inner.lock().records.get(work_id).map(|r| r.snapshot.clone())
    }

    /// Point-in-time snapshots of every record, most recently updated first.
    pub fn list(&self) -> Vec<Snapshot> {
        let mut snapshots: Vec<Snapshot> =
            self.inner.lock().records.values().map(|r| r.snapshot.clone()).collect();
        snapshots.sort_by(|a, b| b.updated_at_ms.cmp(&a.updated_at_ms));
        snapshots
    }

    /// Apply an atomic update to a record's snapshot.
    ///
    /// The mutator works on a copy; the result is committed only if the
    /// state transition is legal and the snapshot invariants hold.
    /// Identity fields and an already-set start time are authoritative
    /// and survive whatever the mutator wrote. Rejections leave the
    /// current snapshot unchanged.
    pub fn update(
        &self,
        work_id: &WorkId,
        mutate: impl FnOnce(&mut Snapshot),
    ) -> Result<(Snapshot, Snapshot), UpdateError> {
        let mut inner = self.inner.lock();
        let record = inner.records.get_mut(work_id).ok_or(UpdateError::NotFound(*work_id))?;
        let old = record.snapshot.clone();
        let mut next = old.clone();
        mutate(&mut next);

        next.work_id = old.work_id;
        next.operation_key = old.operation_key.clone();
        next.kind = old.kind;
        if old.started_at_ms.is_some() {
            next.started_at_ms = old.started_at_ms;
        }

        if !old.state.allows(next.state) {
            let err = TransitionError { from: old.state, to: next.state };
            tracing::warn!(work_id = %work_id, error = %err, "rejected snapshot update");
            return Err(err.into());
        }
        if let Err(err) = next.validate() {
            tracing::warn!(work_id = %work_id, error = %err, "rejected snapshot update");
            return Err(err.into());
        }

        record.snapshot = next.clone();
        Ok((old, next))
    }

    /// Take the work body for execution. Returns `None` if it was
    /// already taken.
    pub fn take_body(&self, work_id: &WorkId) -> Option<WorkBody> {
        self.inner.lock().records.get_mut(work_id).and_then(|r| r.body.take())
    }

    /// The cancellation token bound to this work.
    pub fn cancel_token(&self, work_id: &WorkId) -> Option<CancellationToken> {
        self.inner.lock().records.get(work_id).map(|r| r.cancel.clone())
    }

    /// Release the operation key of a terminal record.
    ///
    /// Idempotent; the entry is removed only while it still points at
    /// this work, so a newer record registered under the same key (with
    /// deduplication disabled) keeps its index entry. The id → snapshot
    /// mapping is retained so late `try_get` callers observe the
    /// terminal state.
    pub fn finalize(&self, work_id: &WorkId) {
        let mut inner = self.inner.lock();
        let Some(record) = inner.records.get(work_id) else { return };
        let folded = fold_key(&record.snapshot.operation_key);
        if inner.by_key.get(&folded) == Some(work_id) {
            inner.by_key.remove(&folded);
        }
    }

    /// Ids of all records not yet in a terminal state.
    pub fn non_terminal_ids(&self) -> Vec<WorkId> {
        self.inner
            .lock()
            .records
            .iter()
            .filter(|(_, r)| !r.snapshot.is_terminal())
            .map(|(id, _)| *id)
            .collect()
    }

    #[cfg(test)]
    pub fn dedupe_len(&self) -> usize {
        self.inner.lock().by_key.len()
    }
}

fn insert_record(
    inner: &mut RegistryInner,
    folded_key: String,
    operation_key: &str,
    kind: WorkKind,
    body: WorkBody,
    shutdown: &CancellationToken,
    now_ms: u64,
) -> (WorkId, Snapshot) {
    let work_id = WorkId::new();
    let snapshot = Snapshot::pending(work_id, operation_key, kind, now_ms);
    inner.records.insert(
        work_id,
        WorkRecord { snapshot: snapshot.clone(), cancel: shutdown.child_token(), body: Some(body) },
    );
    inner.by_key.insert(folded_key, work_id);
    (work_id, snapshot)
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
