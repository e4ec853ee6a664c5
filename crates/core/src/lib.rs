// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! gig-core: Core types for the Gig background work scheduler

pub mod clock;
pub mod id;
pub mod macros;
pub mod work;

pub use clock::{Clock, FakeClock, SystemClock};
pub use work::{
    Progress, Snapshot, SnapshotError, TransitionError, WorkId, WorkKind, WorkState,
    ERROR_CODE_EXCEPTION,
};
