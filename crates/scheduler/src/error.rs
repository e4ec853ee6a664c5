// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Submitter-visible and body-fault error types.

use thiserror::Error;

/// Errors surfaced synchronously to submitters.
///
/// Everything that happens after submission is observable only through
/// snapshots and update events, never as an error return.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("work queue is full (capacity {0})")]
    ResourceExhausted(usize),
}

/// Fault channel for work bodies.
///
/// `Cancelled` is how a cooperating body acknowledges its cancellation
/// token; any other fault is recorded on the snapshot as a failed state
/// with the `exception` error code.
#[derive(Debug, Error)]
pub enum BodyError {
    #[error("work cancelled")]
    Cancelled,
    #[error("{0}")]
    Failed(String),
}

impl BodyError {
    /// Wrap an arbitrary error as a body fault.
    pub fn failed(err: impl std::fmt::Display) -> Self {
        BodyError::Failed(err.to_string())
    }
}
