//! Push channel transport with state management.
//!
//! This module provides the shared types and includes the native
//! tokio-tungstenite implementation of [`Connector`].

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_channel::mpsc::UnboundedSender;
use futures_util::stream::BoxStream;
use futures_util::Sink;
use parking_lot::Mutex;
use talentsync_shared::ClientFrame;

use crate::error::{SyncError, SyncResult};

/// Connection state of the push channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// A close or error happened; the single reconnect timer is armed.
    ReconnectScheduled,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Outgoing half of an open transport, one text frame per item.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = SyncError> + Send>>;

/// Incoming half of an open transport. The stream ends when the peer closes.
pub type FrameStream = BoxStream<'static, SyncResult<String>>;

/// An open bidirectional text channel.
pub struct Transport {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Opens transports. The production implementation is [`TungsteniteConnector`].
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn open(&self, url: &str) -> SyncResult<Transport>;
}

/// Handle for sending frames through the current connection.
///
/// The handle stays valid across reconnects; it is re-pointed at the live
/// connection each time the manager connects.
#[derive(Clone, Default)]
pub struct WsHandle {
    sender: Arc<Mutex<Option<UnboundedSender<ClientFrame>>>>,
}

impl WsHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn attach(&self, sender: UnboundedSender<ClientFrame>) {
        *self.sender.lock() = Some(sender);
    }

    pub(crate) fn detach(&self) {
        self.sender.lock().take();
    }

    /// Queue a frame for the server. No delivery acknowledgement is modeled.
    /// Frames still queued when a transport opens are dropped.
    pub fn send(&self, frame: ClientFrame) -> SyncResult<()> {
        tracing::debug!(?frame, "queueing outbound frame");
        let guard = self.sender.lock();
        let Some(sender) = guard.as_ref() else {
            return Err(SyncError::Transport("not connected".to_string()));
        };
        sender
            .unbounded_send(frame)
            .map_err(|e| SyncError::Transport(format!("Failed to send: {e}")))
    }
}

mod connection_native;
pub use connection_native::TungsteniteConnector;
