// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Work item identifier, categories, state machine, and snapshots.

use serde::{Deserialize, Serialize};

crate::define_id! {
    /// Unique identifier for a submitted work item.
    ///
    /// Assigned at submission and used to track state, query snapshots,
    /// and correlate notifications.
    pub struct WorkId("wrk-");
}

/// Error code recorded on snapshots of work whose body faulted.
pub const ERROR_CODE_EXCEPTION: &str = "exception";

/// Category tag for a work item.
///
/// Drives message formatting in the notification relay; has no effect on
/// scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkKind {
    WorkerImageResolution,
    TaskRuntimeProvisioning,
    RepositoryScan,
    Other,
}

impl WorkKind {
    /// Human-readable label used as the leading words of notification titles.
    pub fn label(&self) -> &'static str {
        match self {
            WorkKind::WorkerImageResolution => "Worker image resolution",
            WorkKind::TaskRuntimeProvisioning => "Task runtime provisioning",
            WorkKind::RepositoryScan => "Repository scan",
            WorkKind::Other => "Background work",
        }
    }
}

crate::simple_display! {
    WorkKind {
        WorkerImageResolution => "worker-image-resolution",
        TaskRuntimeProvisioning => "task-runtime-provisioning",
        RepositoryScan => "repository-scan",
        Other => "other",
    }
}

/// Lifecycle state of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkState {
    /// Accepted, waiting for a worker
    Pending,
    /// Body is executing
    Running,
    /// Body returned normally
    Succeeded,
    /// Body faulted
    Failed,
    /// Cancelled before or during execution
    Cancelled,
}

impl WorkState {
    /// Check if this state is terminal (Succeeded, Failed, or Cancelled).
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkState::Succeeded | WorkState::Failed | WorkState::Cancelled)
    }

    /// Whether a transition from `self` to `next` is legal.
    ///
    /// Terminal states are absorbing. `Running -> Running` is the progress
    /// self-loop; `Pending -> Failed` covers bodies that fault before they
    /// ever start executing.
    pub fn allows(self, next: WorkState) -> bool {
        use WorkState::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Pending, Failed)
                | (Running, Running)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }
}

crate::simple_display! {
    WorkState {
        Pending => "pending",
        Running => "running",
        Succeeded => "succeeded",
        Failed => "failed",
        Cancelled => "cancelled",
    }
}

/// Rejected state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal transition {from} -> {to}")]
pub struct TransitionError {
    pub from: WorkState,
    pub to: WorkState,
}

/// Snapshot field combination that violates an invariant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SnapshotError {
    #[error("percent_complete {0} out of range 0..=100")]
    PercentOutOfRange(u8),
    #[error("percent_complete must be 0 while pending, got {0}")]
    PendingWithProgress(u8),
    #[error("percent_complete is 100 iff succeeded (state {state}, percent {percent})")]
    PercentStateMismatch { state: WorkState, percent: u8 },
    #[error("error fields are populated iff failed (state {0})")]
    ErrorFieldMismatch(WorkState),
    #[error("started_at is set iff the work has entered running (state {0})")]
    StartedAtMismatch(WorkState),
}

/// Immutable record of a work item's state at a point in time.
///
/// Snapshots are the only view of a work item exposed outside the
/// scheduler; every mutation replaces the previous snapshot wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub work_id: WorkId,
    /// Caller-supplied dedupe key; compared case-insensitively.
    pub operation_key: String,
    pub kind: WorkKind,
    pub state: WorkState,
    /// 0..=100; 0 while pending, 100 exactly when succeeded.
    pub percent_complete: u8,
    /// Last human-readable progress string, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Wall time when state first became Running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at_ms: Option<u64>,
    /// Wall time of the last state or progress change.
    pub updated_at_ms: u64,
    /// `"exception"` for uncaught body faults; only set when failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Snapshot {
    /// Initial snapshot for freshly accepted work.
    pub fn pending(
        work_id: WorkId,
        operation_key: impl Into<String>,
        kind: WorkKind,
        now_ms: u64,
    ) -> Self {
        Self {
            work_id,
            operation_key: operation_key.into(),
            kind,
            state: WorkState::Pending,
            percent_complete: 0,
            message: None,
            started_at_ms: None,
            updated_at_ms: now_ms,
            error_code: None,
            error_message: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Check the cross-field invariants.
    pub fn validate(&self) -> Result<(), SnapshotError> {
        if self.percent_complete > 100 {
            return Err(SnapshotError::PercentOutOfRange(self.percent_complete));
        }
        if self.state == WorkState::Pending && self.percent_complete != 0 {
            return Err(SnapshotError::PendingWithProgress(self.percent_complete));
        }
        if (self.percent_complete == 100) != (self.state == WorkState::Succeeded) {
            return Err(SnapshotError::PercentStateMismatch {
                state: self.state,
                percent: self.percent_complete,
            });
        }
        let has_error = self.error_code.is_some() || self.error_message.is_some();
        if has_error != (self.state == WorkState::Failed) {
            return Err(SnapshotError::ErrorFieldMismatch(self.state));
        }
        if self.state == WorkState::Pending && self.started_at_ms.is_some() {
            return Err(SnapshotError::StartedAtMismatch(self.state));
        }
        Ok(())
    }
}

/// Progress report submitted by a running work body.
///
/// Reports carry the state they claim to be in; anything other than
/// `Running` is ignored by the scheduler, which keeps bodies from
/// steering the lifecycle through the progress channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub state: WorkState,
    pub percent_complete: u8,
    pub message: Option<String>,
}

impl Progress {
    /// A running-state report at the given completion percentage.
    pub fn running(percent_complete: u8) -> Self {
        Self { state: WorkState::Running, percent_complete, message: None }
    }

    crate::setters! {
        option { message: String }
    }
}

#[cfg(test)]
#[path = "work_tests.rs"]
mod tests;
