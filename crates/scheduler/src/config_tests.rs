// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::error::SchedulerError;

#[test]
fn defaults() {
    let config = SchedulerConfig::default();
    assert_eq!(config.max_concurrency, 4);
    assert_eq!(config.queue_capacity, None);
    assert_eq!(config.shutdown_grace, Duration::from_secs(5));
    config.validate().unwrap();
}

#[test]
fn setters_chain() {
    let config = SchedulerConfig::default()
        .max_concurrency(2)
        .queue_capacity(16usize)
        .shutdown_grace(Duration::from_millis(100));
    assert_eq!(config.max_concurrency, 2);
    assert_eq!(config.queue_capacity, Some(16));
    assert_eq!(config.shutdown_grace, Duration::from_millis(100));
}

#[test]
fn zero_concurrency_rejected() {
    let err = SchedulerConfig::default().max_concurrency(0).validate();
    assert!(matches!(err, Err(SchedulerError::InvalidArgument(_))));
}

#[test]
fn zero_capacity_rejected() {
    let err = SchedulerConfig::default().queue_capacity(0usize).validate();
    assert!(matches!(err, Err(SchedulerError::InvalidArgument(_))));
}
