// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bridges snapshot lifecycle transitions to a user-facing notification sink.

use crate::dispatch::SubscriberId;
use crate::scheduler::Scheduler;
use gig_adapters::{Notification, NotifySink, Severity};
use gig_core::{Clock, Snapshot, WorkId, WorkState};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Subscriber that converts lifecycle transitions into notifications.
///
/// Observes every published snapshot; notifies on the first transition
/// into each state (progress events within `Running` stay quiet) and
/// prunes its per-work bookkeeping once the terminal notification is
/// out. The subscription handler stays synchronous and cheap: envelopes
/// are handed to a forwarder task which awaits the sink call, preserving
/// emission order. Sink failures are logged and swallowed.
pub struct NotificationRelay<N: NotifySink> {
    sink: N,
    last_state: Arc<Mutex<HashMap<WorkId, WorkState>>>,
    subscription: Mutex<Option<SubscriberId>>,
    queue_tx: Mutex<Option<mpsc::UnboundedSender<Notification>>>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl<N: NotifySink> NotificationRelay<N> {
    pub fn new(sink: N) -> Self {
        Self {
            sink,
            last_state: Arc::new(Mutex::new(HashMap::new())),
            subscription: Mutex::new(None),
            queue_tx: Mutex::new(None),
            forwarder: Mutex::new(None),
        }
    }

    /// Subscribe to the scheduler and spawn the forwarder task.
    pub fn start<C: Clock>(&self, scheduler: &Scheduler<C>) {
        let mut subscription = self.subscription.lock();
        if subscription.is_some() {
            return;
        }
        let (tx, mut rx) = mpsc::unbounded_channel::<Notification>();
        let sink = self.sink.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(note) = rx.recv().await {
                if let Err(err) = sink.publish(note).await {
                    tracing::warn!(error = %err, "notification sink publish failed");
                }
            }
        });

        let last_state = self.last_state.clone();
        let handler_tx = tx.clone();
        let id = scheduler.subscribe(move |snapshot| {
            if let Some(note) = envelope_for(&last_state, snapshot) {
                let _ = handler_tx.send(note);
            }
        });

        *subscription = Some(id);
        *self.queue_tx.lock() = Some(tx);
        *self.forwarder.lock() = Some(forwarder);
        tracing::debug!("notification relay started");
    }

    /// Unsubscribe and drain the forwarder. Envelopes already queued are
    /// still delivered.
    pub async fn stop<C: Clock>(&self, scheduler: &Scheduler<C>) {
        let id = self.subscription.lock().take();
        let Some(id) = id else { return };
        // After unsubscribe returns, no further envelopes can be queued;
        // dropping our sender closes the channel once the handler (and
        // its sender clone) is gone.
        scheduler.unsubscribe(id);
        self.queue_tx.lock().take();
        let forwarder = self.forwarder.lock().take();
        if let Some(forwarder) = forwarder {
            if let Err(err) = forwarder.await {
                tracing::warn!(error = %err, "relay forwarder task failed");
            }
        }
        tracing::debug!("notification relay stopped");
    }

    #[cfg(test)]
    pub(crate) fn tracked(&self) -> usize {
        self.last_state.lock().len()
    }
}

/// Decide whether a snapshot is a transition worth notifying about, and
/// build the envelope if so.
fn envelope_for(
    last_state: &Mutex<HashMap<WorkId, WorkState>>,
    snapshot: &Snapshot,
) -> Option<Notification> {
    {
        let mut last = last_state.lock();
        if last.get(&snapshot.work_id) == Some(&snapshot.state) {
            return None;
        }
        if snapshot.is_terminal() {
            last.remove(&snapshot.work_id);
        } else {
            last.insert(snapshot.work_id, snapshot.state);
        }
    }

    let (phrase, severity) = match snapshot.state {
        WorkState::Pending => ("queued", Severity::Info),
        WorkState::Running => ("running", Severity::Info),
        WorkState::Succeeded => ("succeeded", Severity::Info),
        WorkState::Failed => ("failed", Severity::Error),
        WorkState::Cancelled => ("cancelled", Severity::Warning),
    };
    let message = match snapshot.state {
        WorkState::Failed => snapshot.error_message.clone(),
        _ => snapshot.message.clone(),
    };

    let mut note = Notification::new(format!("{} {}", snapshot.kind.label(), phrase), severity)
        .correlation_id(snapshot.work_id.as_str());
    if let Some(message) = message {
        note = note.message(message);
    }
    Some(note)
}

#[cfg(test)]
#[path = "relay_tests.rs"]
mod tests;
