//! Fan-out of decoded push events to registered subscribers.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use talentsync_shared::{ClientFrame, InboundEvent};

use super::connection::WsHandle;
use super::dedup::DedupWindow;
use crate::error::SyncResult;

/// A registered event consumer. Returning an error (or panicking) only
/// affects this one delivery.
pub type Callback = Arc<dyn Fn(&InboundEvent) -> anyhow::Result<()> + Send + Sync>;

/// What happened to one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Dispatched,
    Duplicate,
    Ignored,
    Malformed,
}

/// Decodes frames, filters duplicates, and delivers events to subscribers
/// in registration order.
pub struct EventDispatcher {
    subscribers: Mutex<Vec<(u64, Callback)>>,
    next_id: AtomicU64,
    dedup: Mutex<DedupWindow>,
    outbound: WsHandle,
}

impl EventDispatcher {
    pub fn new(outbound: WsHandle, dedup_capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            dedup: Mutex::new(DedupWindow::new(dedup_capacity)),
            outbound,
        }
    }

    /// Register a callback. It stays registered until the returned
    /// [`Subscription`] is explicitly unsubscribed, across reconnects.
    pub fn subscribe<F>(self: &Arc<Self>, callback: F) -> Subscription
    where
        F: Fn(&InboundEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().push((id, Arc::new(callback)));
        Subscription {
            id,
            dispatcher: Arc::downgrade(self),
        }
    }

    fn unsubscribe(&self, id: u64) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Outbound pass-through to the connection.
    pub fn send(&self, frame: ClientFrame) -> SyncResult<()> {
        self.outbound.send(frame)
    }

    /// Run one raw frame through decode, dedup and fan-out.
    pub fn handle_frame(&self, text: &str) -> FrameOutcome {
        let event = match InboundEvent::decode(text) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, len = text.len(), "dropping malformed frame");
                return FrameOutcome::Malformed;
            }
        };
        self.handle_event(event)
    }

    /// Dedup and fan-out an already decoded event.
    pub fn handle_event(&self, event: InboundEvent) -> FrameOutcome {
        if let InboundEvent::Ignored = event {
            tracing::debug!("ignoring frame of unknown kind");
            return FrameOutcome::Ignored;
        }

        if let Some(key) = event.identity() {
            if !self.dedup.lock().insert(&key) {
                tracing::debug!(%key, "dropping duplicate event");
                return FrameOutcome::Duplicate;
            }
        }

        self.dispatch(&event);
        FrameOutcome::Dispatched
    }

    fn dispatch(&self, event: &InboundEvent) {
        // Snapshot so callbacks may subscribe or unsubscribe re-entrantly.
        let subscribers: Vec<(u64, Callback)> = self.subscribers.lock().clone();
        for (id, callback) in subscribers {
            match catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(subscriber = id, kind = event.kind(), error = %e, "subscriber failed");
                }
                Err(_) => {
                    tracing::error!(subscriber = id, kind = event.kind(), "subscriber panicked");
                }
            }
        }
    }

    /// Forget every remembered event identity.
    pub fn reset_dedup(&self) {
        self.dedup.lock().clear();
    }
}

/// Registration handle returned by [`EventDispatcher::subscribe`].
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    dispatcher: Weak<EventDispatcher>,
}

impl Subscription {
    /// Remove the callback. Returns `false` if it was already gone.
    pub fn unsubscribe(self) -> bool {
        match self.dispatcher.upgrade() {
            Some(dispatcher) => dispatcher.unsubscribe(self.id),
            None => false,
        }
    }
}
