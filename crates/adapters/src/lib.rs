// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! gig-adapters: Notification sink adapters for the Gig scheduler

pub mod notify;

pub use notify::{DesktopNotifySink, Notification, NotifyError, NotifySink, NotifySource, Severity};

#[cfg(any(test, feature = "test-support"))]
pub use notify::FakeNotifySink;
