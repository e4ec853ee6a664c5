// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! User-facing notification envelopes and sink adapters.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from notification delivery
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("publish failed: {0}")]
    PublishFailed(String),
}

/// How urgently a notification should be surfaced to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

gig_core::simple_display! {
    Severity {
        Info => "info",
        Warning => "warning",
        Error => "error",
    }
}

/// Subsystem a notification originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifySource {
    BackgroundWork,
}

gig_core::simple_display! {
    NotifySource {
        BackgroundWork => "background-work",
    }
}

/// A user-facing notification envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub severity: Severity,
    pub source: NotifySource,
    /// Opaque id linking the notification back to what produced it
    /// (for background work, the work id).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl Notification {
    pub fn new(title: impl Into<String>, severity: Severity) -> Self {
        Self {
            title: title.into(),
            message: None,
            severity,
            source: NotifySource::BackgroundWork,
            correlation_id: None,
        }
    }

    gig_core::setters! {
        set { source: NotifySource }
        option { message: String, correlation_id: String }
    }
}

/// Adapter for delivering notifications to the user.
#[async_trait]
pub trait NotifySink: Clone + Send + Sync + 'static {
    async fn publish(&self, note: Notification) -> Result<(), NotifyError>;
}

/// Desktop notification sink using notify-rust.
///
/// On macOS, `notify-rust` uses `mac-notification-sys` (Cocoa bindings) to send
/// notifications via the Notification Center. The first notification triggers
/// `ensure_application_set()` which runs an AppleScript to look up a bundle
/// identifier. In a daemon context without Automation permissions, that
/// AppleScript blocks forever. We pre-set the bundle identifier at construction
/// time to bypass the lookup entirely.
#[derive(Clone, Copy, Debug, Default)]
pub struct DesktopNotifySink;

impl DesktopNotifySink {
    pub fn new() -> Self {
        #[cfg(target_os = "macos")]
        {
            // Pre-set the application bundle identifier so mac-notification-sys
            // skips its NSAppleScript lookup (which blocks forever in daemon
            // processes that lack Automation permissions).
            let _ = mac_notification_sys::set_application("com.apple.Terminal");
        }
        Self
    }
}

#[async_trait]
impl NotifySink for DesktopNotifySink {
    async fn publish(&self, note: Notification) -> Result<(), NotifyError> {
        let title = note.title;
        let body = note.message.unwrap_or_default();
        // notify_rust::Notification::show() is synchronous on macOS.
        // Fire-and-forget on tokio's bounded blocking thread pool to avoid
        // blocking the async runtime while capping OS thread count.
        tokio::task::spawn_blocking(move || {
            tracing::info!(%title, %body, "sending desktop notification");
            match notify_rust::Notification::new().summary(&title).body(&body).show() {
                Ok(_) => {
                    tracing::info!(%title, "desktop notification sent");
                }
                Err(e) => {
                    tracing::warn!(%title, error = %e, "desktop notification failed");
                }
            }
        });
        Ok(())
    }
}

#[cfg(any(test, feature = "test-support"))]
mod fake {
    use super::{Notification, NotifyError, NotifySink};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Fake notification sink for testing; records published envelopes.
    ///
    /// `fail_next` makes the next publish return an error, for exercising
    /// callers' fault handling.
    #[derive(Clone, Default)]
    pub struct FakeNotifySink {
        inner: Arc<Mutex<FakeSinkState>>,
    }

    #[derive(Default)]
    struct FakeSinkState {
        published: Vec<Notification>,
        fail_next: bool,
    }

    impl FakeNotifySink {
        pub fn new() -> Self {
            Self::default()
        }

        /// All envelopes published so far
        pub fn published(&self) -> Vec<Notification> {
            self.inner.lock().published.clone()
        }

        /// Make the next publish fail
        pub fn fail_next(&self) {
            self.inner.lock().fail_next = true;
        }
    }

    #[async_trait]
    impl NotifySink for FakeNotifySink {
        async fn publish(&self, note: Notification) -> Result<(), NotifyError> {
            let mut state = self.inner.lock();
            if state.fail_next {
                state.fail_next = false;
                return Err(NotifyError::PublishFailed("induced failure".to_string()));
            }
            state.published.push(note);
            Ok(())
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeNotifySink;

#[cfg(test)]
#[path = "notify_tests.rs"]
mod tests;
