// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! gig-scheduler: Background work scheduler for the Gig control plane
//!
//! Accepts long-running work submissions, deduplicates them by operation
//! key, executes them with bounded concurrency, tracks lifecycle as
//! immutable snapshots, and fans out change events to subscribers. The
//! [`relay::NotificationRelay`] bridges lifecycle transitions to a
//! user-facing [`gig_adapters::NotifySink`].

pub mod body;
pub mod config;
pub mod dispatch;
pub mod error;
mod registry;
pub mod relay;
pub mod scheduler;

pub use body::{work_body, BodyFuture, ProgressReporter, WorkBody};
pub use config::SchedulerConfig;
pub use dispatch::SubscriberId;
pub use error::{BodyError, SchedulerError};
pub use relay::NotificationRelay;
pub use scheduler::Scheduler;

// Bodies receive this token type; re-exported so callers don't need a
// direct tokio-util dependency.
pub use tokio_util::sync::CancellationToken;
