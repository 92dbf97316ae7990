//! Per-subject sync context, constructed on login and torn down on logout.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use talentsync_shared::{ClientFrame, InboundEvent, Notification};
use tokio::sync::watch;

use crate::analysis::AnalysisTracker;
use crate::api_client::SyncApi;
use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::stores::{CacheKey, CacheReconciler, QueryCache, Resource};
use crate::ws::{
    ConnectionManager, ConnectionState, Connector, EventDispatcher, Subscription, WsHandle,
};

/// Monotonic session generation. Async result handlers hold an
/// [`EpochTicket`] and become no-ops once the epoch moves on.
#[derive(Clone, Default)]
pub struct SessionEpoch {
    current: Arc<AtomicU64>,
}

impl SessionEpoch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ticket(&self) -> EpochTicket {
        EpochTicket {
            current: self.current.clone(),
            issued: self.current.load(Ordering::SeqCst),
        }
    }

    /// Invalidate every outstanding ticket.
    pub fn advance(&self) {
        self.current.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct EpochTicket {
    current: Arc<AtomicU64>,
    issued: u64,
}

impl EpochTicket {
    pub fn is_current(&self) -> bool {
        self.current.load(Ordering::SeqCst) == self.issued
    }
}

/// Everything the sync layer owns for one authenticated subject: the push
/// channel, the subscriber registry, the cache and the analysis tracker.
pub struct SyncSession<C: Connector> {
    subject: String,
    cache: QueryCache,
    epoch: SessionEpoch,
    dispatcher: Arc<EventDispatcher>,
    manager: ConnectionManager<C>,
    reconciler: Arc<CacheReconciler>,
    analysis: Arc<AnalysisTracker>,
    api: Arc<dyn SyncApi>,
    internal: Mutex<Vec<Subscription>>,
}

impl<C: Connector> SyncSession<C> {
    /// Build the session context for `subject` and open its push channel.
    pub async fn login(
        subject: impl Into<String>,
        config: SyncConfig,
        api: Arc<dyn SyncApi>,
        connector: C,
    ) -> Self {
        let subject = subject.into();
        let cache = QueryCache::new();
        let epoch = SessionEpoch::new();
        let handle = WsHandle::new();
        let dispatcher = Arc::new(EventDispatcher::new(handle.clone(), config.dedup_capacity));

        let reconciler = Arc::new(CacheReconciler::new(
            cache.clone(),
            api.clone(),
            epoch.clone(),
            subject.clone(),
        ));
        let analysis = Arc::new(AnalysisTracker::new(
            api.clone(),
            cache.clone(),
            epoch.clone(),
            &subject,
            config.poll_interval,
        ));

        let internal = {
            let reconciler = reconciler.clone();
            let on_cache = dispatcher.subscribe(move |event: &InboundEvent| {
                reconciler.apply(event);
                Ok(())
            });
            let tracker = analysis.clone();
            let on_analysis = dispatcher.subscribe(move |event: &InboundEvent| {
                tracker.handle_event(event);
                Ok(())
            });
            vec![on_cache, on_analysis]
        };

        let manager = ConnectionManager::new(connector, config, dispatcher.clone(), handle);

        let session = Self {
            subject,
            cache,
            epoch,
            dispatcher,
            manager,
            reconciler,
            analysis,
            api,
            internal: Mutex::new(internal),
        };

        tracing::info!(subject = %session.subject, "session started");
        session.load_initial();
        session.analysis.start();
        session.manager.connect(&session.subject).await;
        session
    }

    /// Seed badge counts and notifications from the REST collaborators.
    fn load_initial(&self) {
        let api = self.api.clone();
        let reconciler = self.reconciler.clone();
        let cache = self.cache.clone();
        let notifications = self.key(Resource::Notifications);
        let ticket = self.epoch.ticket();

        tokio::spawn(async move {
            match api.fetch_badge_counts().await {
                Ok(counts) if ticket.is_current() => reconciler.apply_badge_counts(counts),
                Ok(_) => return,
                Err(e) => tracing::warn!(error = %e, "initial badge counts load failed"),
            }

            if cache.contains(&notifications) {
                return;
            }
            match api.fetch_notifications().await {
                Ok(list) if ticket.is_current() => {
                    // A push may have seeded the list meanwhile; it wins.
                    cache.update::<Vec<Notification>, _>(&notifications, |current| match current {
                        Some(_) => None,
                        None => Some(list),
                    });
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "initial notifications load failed"),
            }
        });
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn key(&self, resource: Resource) -> CacheKey {
        CacheKey::new(resource, self.subject.clone())
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn analysis(&self) -> &Arc<AnalysisTracker> {
        &self.analysis
    }

    pub fn is_connected(&self) -> bool {
        self.manager.is_connected()
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.manager.state_changes()
    }

    /// Register an additional event consumer.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&InboundEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.dispatcher.subscribe(callback)
    }

    pub fn send(&self, frame: ClientFrame) -> SyncResult<()> {
        self.dispatcher.send(frame)
    }

    /// Cancel the reconnect timer and the poll interval, close the transport,
    /// and drop everything cached for the subject. Late async results are
    /// ignored from here on.
    pub async fn logout(self) {
        self.epoch.advance();
        self.analysis.stop();
        self.manager.disconnect().await;
        for subscription in self.internal.lock().drain(..) {
            subscription.unsubscribe();
        }
        self.dispatcher.reset_dedup();
        self.cache.remove_subject(&self.subject);
        tracing::info!(subject = %self.subject, "session ended");
    }
}

/// Dropping a session without [`SyncSession::logout`] still stops its
/// background work; the connection manager cancels its own driver.
impl<C: Connector> Drop for SyncSession<C> {
    fn drop(&mut self) {
        self.epoch.advance();
        self.analysis.stop();
    }
}
