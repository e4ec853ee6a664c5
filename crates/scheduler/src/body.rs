// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Work body contract and the progress-reporting capability.

use crate::error::BodyError;
use gig_core::{Progress, WorkId};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Completion future returned by a work body.
pub type BodyFuture = Pin<Box<dyn Future<Output = Result<(), BodyError>> + Send>>;

/// A unit of work submitted to the scheduler.
///
/// Invoked at most once, with the work's cancellation token and a
/// progress reporter bound to its work id. Bodies are expected to check
/// the token at natural yield points and at I/O boundaries, returning
/// [`BodyError::Cancelled`] when it fires.
pub type WorkBody = Box<dyn FnOnce(CancellationToken, ProgressReporter) -> BodyFuture + Send>;

/// Adapt an async closure into a [`WorkBody`].
///
/// ```ignore
/// let body = work_body(|cancel, progress| async move {
///     progress.report(Progress::running(50));
///     Ok(())
/// });
/// ```
pub fn work_body<F, Fut>(f: F) -> WorkBody
where
    F: FnOnce(CancellationToken, ProgressReporter) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), BodyError>> + Send + 'static,
{
    Box::new(move |cancel, progress| Box::pin(f(cancel, progress)))
}

/// Where progress reports land. Implemented by the scheduler internals.
pub(crate) trait ProgressSink: Send + Sync {
    fn report(&self, work_id: &WorkId, progress: Progress);
}

/// Capability for reporting progress on one work item.
///
/// Passed by value into the body; cheap to clone. Reports are normalized
/// by the scheduler (identity fields overwritten, percent clamped
/// monotonic, non-running states ignored) and reports arriving after the
/// work reached a terminal state are dropped.
#[derive(Clone)]
pub struct ProgressReporter {
    work_id: WorkId,
    sink: Arc<dyn ProgressSink>,
}

impl ProgressReporter {
    pub(crate) fn new(work_id: WorkId, sink: Arc<dyn ProgressSink>) -> Self {
        Self { work_id, sink }
    }

    /// The work item this reporter is bound to.
    pub fn work_id(&self) -> &WorkId {
        &self.work_id
    }

    /// Submit a progress report.
    pub fn report(&self, progress: Progress) {
        self.sink.report(&self.work_id, progress);
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter").field("work_id", &self.work_id).finish()
    }
}
