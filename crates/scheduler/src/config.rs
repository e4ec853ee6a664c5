// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scheduler configuration.

use crate::error::SchedulerError;
use std::time::Duration;

/// Tunables for the scheduler's worker pool and shutdown behavior.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of worker tasks draining the queue
    pub max_concurrency: usize,
    /// Queue capacity; `None` means unbounded and submission never blocks
    pub queue_capacity: Option<usize>,
    /// How long `stop` waits for running bodies to honor cancellation
    pub shutdown_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            queue_capacity: None,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl SchedulerConfig {
    gig_core::setters! {
        set { max_concurrency: usize, shutdown_grace: Duration }
        option { queue_capacity: usize }
    }

    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.max_concurrency == 0 {
            return Err(SchedulerError::InvalidArgument(
                "max_concurrency must be positive".to_string(),
            ));
        }
        if self.queue_capacity == Some(0) {
            return Err(SchedulerError::InvalidArgument(
                "queue_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
