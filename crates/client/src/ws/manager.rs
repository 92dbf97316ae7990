//! Connection manager for the per-subject push channel.
//!
//! The reconnect loop is an explicit state machine:
//!
//! ```text
//!  disconnected ──connect──▶ connecting ──open ok──▶ connected
//!       ▲                       │   ▲                    │
//!       │                  open │   │ timer fires        │ close / error /
//!   disconnect             fails│   │                    │ liveness timeout
//!       │                       ▼   │                    │
//!       └──────────────── reconnect-scheduled ◀──────────┘
//! ```
//!
//! Exactly one driver task exists per connected subject, so opens are
//! serialized. The reconnect timer lives inside that task and is dropped on
//! every exit from reconnect-scheduled.

use std::sync::Arc;

use futures_channel::mpsc::{unbounded, UnboundedReceiver};
use futures_util::{SinkExt, StreamExt};
use talentsync_shared::ClientFrame;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::connection::{ConnectionState, Connector, FrameSink, Transport, WsHandle};
use super::dispatcher::EventDispatcher;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};

/// Why a connected transport stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Closed {
    Cancelled,
    Peer,
    Error(String),
    LivenessTimeout,
}

struct Shared<C> {
    connector: C,
    config: SyncConfig,
    dispatcher: Arc<EventDispatcher>,
    state: watch::Sender<ConnectionState>,
}

impl<C> Shared<C> {
    fn set_state(&self, next: ConnectionState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            tracing::debug!(from = ?prev, to = ?next, "connection state changed");
        }
    }
}

#[derive(Default)]
struct Driver {
    subject: Option<String>,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

/// Owns the transport lifecycle for one subject at a time.
pub struct ConnectionManager<C: Connector> {
    shared: Arc<Shared<C>>,
    handle: WsHandle,
    driver: tokio::sync::Mutex<Driver>,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(
        connector: C,
        config: SyncConfig,
        dispatcher: Arc<EventDispatcher>,
        handle: WsHandle,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                connector,
                config,
                dispatcher,
                state,
            }),
            handle,
            driver: tokio::sync::Mutex::new(Driver::default()),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Watch the connected signal.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Start keeping a channel open for `subject`.
    ///
    /// A no-op if a driver for the same subject is already running. A driver
    /// for a different subject is shut down and awaited first.
    pub async fn connect(&self, subject: &str) {
        let mut driver = self.driver.lock().await;

        let running = driver
            .task
            .as_ref()
            .is_some_and(|task| !task.is_finished());
        if running && driver.subject.as_deref() == Some(subject) {
            tracing::debug!(subject, "connect already in flight");
            return;
        }
        Self::stop_driver(&mut driver, &self.handle).await;

        let (sender, receiver) = unbounded();
        self.handle.attach(sender);

        let cancel = CancellationToken::new();
        let shared = self.shared.clone();
        let task = tokio::spawn(run(shared, subject.to_string(), receiver, cancel.clone()));

        tracing::info!(subject, url = %self.shared.config.ws_url(), "push channel started");
        driver.subject = Some(subject.to_string());
        driver.cancel = Some(cancel);
        driver.task = Some(task);
    }

    /// Cancel any pending reconnect and close the transport without retry.
    /// Safe to call repeatedly and from any state.
    pub async fn disconnect(&self) {
        let mut driver = self.driver.lock().await;
        if let Some(subject) = driver.subject.as_deref() {
            tracing::info!(subject, "push channel stopping");
        }
        Self::stop_driver(&mut driver, &self.handle).await;
        self.shared.set_state(ConnectionState::Disconnected);
    }

    async fn stop_driver(driver: &mut Driver, handle: &WsHandle) {
        handle.detach();
        driver.subject = None;
        if let Some(cancel) = driver.cancel.take() {
            cancel.cancel();
        }
        if let Some(task) = driver.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "push channel driver ended abnormally");
            }
        }
    }
}

impl<C: Connector> Drop for ConnectionManager<C> {
    fn drop(&mut self) {
        self.handle.detach();
        let driver = self.driver.get_mut();
        if let Some(cancel) = driver.cancel.take() {
            cancel.cancel();
        }
        if let Some(task) = driver.task.take() {
            task.abort();
        }
        self.shared.set_state(ConnectionState::Disconnected);
    }
}

async fn run<C: Connector>(
    shared: Arc<Shared<C>>,
    subject: String,
    mut outbound: UnboundedReceiver<ClientFrame>,
    cancel: CancellationToken,
) {
    let url = shared.config.ws_url();

    loop {
        shared.set_state(ConnectionState::Connecting);
        let opened = tokio::select! {
            _ = cancel.cancelled() => break,
            opened = shared.connector.open(&url) => opened,
        };

        match opened {
            Ok(transport) => {
                let closed = pump(&shared, &subject, transport, &mut outbound, &cancel).await;
                match closed {
                    Closed::Cancelled => break,
                    Closed::Peer => tracing::info!(%subject, "push channel closed by peer"),
                    Closed::Error(e) => {
                        tracing::warn!(%subject, error = %e, "push channel failed")
                    }
                    Closed::LivenessTimeout => {
                        tracing::warn!(%subject, "liveness timeout, dropping connection")
                    }
                }
            }
            Err(e) => tracing::warn!(%subject, error = %e, "push channel open failed"),
        }

        if cancel.is_cancelled() {
            break;
        }

        shared.set_state(ConnectionState::ReconnectScheduled);
        let delay = shared.config.reconnect_delay;
        tracing::info!(%subject, delay_ms = delay.as_millis() as u64, "reconnect scheduled");
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    shared.set_state(ConnectionState::Disconnected);
}

/// Authenticate, then shuttle frames until the transport ends.
async fn pump<C>(
    shared: &Shared<C>,
    subject: &str,
    transport: Transport,
    outbound: &mut UnboundedReceiver<ClientFrame>,
    cancel: &CancellationToken,
) -> Closed {
    let Transport {
        mut sink,
        mut stream,
    } = transport;

    // Frames queued while no transport was open are dropped, not replayed.
    let mut stale = 0usize;
    while let Ok(Some(_)) = outbound.try_next() {
        stale += 1;
    }
    if stale > 0 {
        tracing::debug!(subject, dropped = stale, "discarding frames queued while disconnected");
    }

    let hello = ClientFrame::Authenticate {
        user_id: subject.to_string(),
    };
    if let Err(e) = send_frame(&mut sink, &hello).await {
        return Closed::Error(e.to_string());
    }
    shared.set_state(ConnectionState::Connected);
    tracing::info!(subject, "push channel connected");

    let liveness = shared.config.liveness_timeout;
    let mut last_inbound = Instant::now();

    let closed = loop {
        let deadline = liveness.map(|timeout| last_inbound + timeout);
        tokio::select! {
            _ = cancel.cancelled() => break Closed::Cancelled,
            frame = stream.next() => match frame {
                Some(Ok(text)) => {
                    last_inbound = Instant::now();
                    shared.dispatcher.handle_frame(&text);
                }
                Some(Err(e)) => break Closed::Error(e.to_string()),
                None => break Closed::Peer,
            },
            Some(frame) = outbound.next() => {
                if let Err(e) = send_frame(&mut sink, &frame).await {
                    break Closed::Error(e.to_string());
                }
            }
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                break Closed::LivenessTimeout;
            }
        }
    };

    if let Err(e) = sink.close().await {
        tracing::debug!(error = %e, "closing transport");
    }
    closed
}

async fn send_frame(sink: &mut FrameSink, frame: &ClientFrame) -> SyncResult<()> {
    let json = serde_json::to_string(frame).map_err(|e| SyncError::Encode(e.to_string()))?;
    sink.send(json).await
}
