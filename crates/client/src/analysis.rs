//! Status tracker for the background document-analysis job.
//!
//! ```text
//! none ──▶ pending ──▶ parsing ──▶ completed ──▶ confirmed
//!            ▲                  │      └──────▶ rejected
//!            │                  ▼
//!            └──── re-run ── failed
//! ```
//!
//! The job can advance from pushed `job_status_update` events or from
//! polling, which runs every `poll_interval` while the job is pending or
//! parsing. Both producers write full snapshots into the same cache entry.
//! A poll response is applied only if nothing else wrote the entry while the
//! request was in flight, so a late poll never regresses a push.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use talentsync_shared::{AnalysisJob, AnalysisStatus, FieldSelection, InboundEvent};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::api_client::SyncApi;
use crate::error::{SyncError, SyncResult};
use crate::session::SessionEpoch;
use crate::stores::{CacheChange, CacheKey, QueryCache, Resource};

pub struct AnalysisTracker {
    api: Arc<dyn SyncApi>,
    cache: QueryCache,
    epoch: SessionEpoch,
    job_key: CacheKey,
    profile_key: CacheKey,
    poll_interval: Duration,
    poller: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl AnalysisTracker {
    pub fn new(
        api: Arc<dyn SyncApi>,
        cache: QueryCache,
        epoch: SessionEpoch,
        subject: &str,
        poll_interval: Duration,
    ) -> Self {
        Self {
            api,
            cache,
            epoch,
            job_key: CacheKey::new(Resource::AnalysisJob, subject),
            profile_key: CacheKey::new(Resource::Profile, subject),
            poll_interval,
            poller: Mutex::new(None),
        }
    }

    /// Latest known snapshot, if any has been observed yet.
    pub fn snapshot(&self) -> Option<AnalysisJob> {
        self.cache.get::<AnalysisJob>(&self.job_key)
    }

    pub fn status(&self) -> AnalysisStatus {
        self.snapshot().map(|job| job.status).unwrap_or_default()
    }

    /// Whether the poller is currently on its fixed cadence.
    pub fn is_polling(&self) -> bool {
        self.status().is_in_progress()
    }

    /// Push path: a server-asserted snapshot applies immediately.
    pub fn apply_push(&self, job: AnalysisJob) {
        tracing::debug!(status = %job.status, "analysis status pushed");
        self.cache.set(&self.job_key, job);
    }

    /// Dispatcher callback.
    pub fn handle_event(&self, event: &InboundEvent) {
        if let InboundEvent::JobStatusUpdate(job) = event {
            self.apply_push(job.clone());
        }
    }

    /// Fetch the current snapshot once. The result is dropped if anything
    /// wrote the job entry while the request was in flight.
    pub async fn refresh(&self) -> SyncResult<AnalysisJob> {
        let ticket = self.epoch.ticket();
        let revision = self.cache.revision(&self.job_key);
        let job = self.api.fetch_analysis_job().await.map_err(|e| {
            tracing::warn!(error = %e, "analysis status poll failed");
            SyncError::from(e)
        })?;
        if !ticket.is_current() {
            return Err(SyncError::SessionChanged);
        }
        if !self.cache.set_if_revision(&self.job_key, job.clone(), revision) {
            tracing::debug!(status = %job.status, "discarding poll response overtaken by a newer write");
        }
        Ok(job)
    }

    /// Start the poll loop. Calling it again while running is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut poller = self.poller.lock();
        if poller.as_ref().is_some_and(|(_, task)| !task.is_finished()) {
            return;
        }
        let cancel = CancellationToken::new();
        let task = tokio::spawn(Self::run_poller(Arc::downgrade(self), cancel.clone()));
        *poller = Some((cancel, task));
    }

    /// Stop polling. In-flight requests are abandoned.
    pub fn stop(&self) {
        if let Some((cancel, task)) = self.poller.lock().take() {
            cancel.cancel();
            task.abort();
        }
    }

    /// Holds the tracker weakly so dropping the last owner ends the loop.
    async fn run_poller(tracker: Weak<Self>, cancel: CancellationToken) {
        let (mut changes, job_key) = match tracker.upgrade() {
            Some(this) => (this.cache.subscribe(), this.job_key.clone()),
            None => return,
        };
        let mut fetch_now = true;
        let mut next_poll: Option<Instant> = None;

        loop {
            let Some(this) = tracker.upgrade() else {
                break;
            };
            if fetch_now {
                fetch_now = false;
                next_poll = None;
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = this.refresh() => {}
                }
            }

            if this.status().is_in_progress() {
                next_poll.get_or_insert_with(|| Instant::now() + this.poll_interval);
            } else {
                next_poll = None;
            }
            drop(this);

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep_until(next_poll.unwrap_or_else(Instant::now)), if next_poll.is_some() => {
                    fetch_now = true;
                }
                change = changes.recv() => match change {
                    Ok(CacheChange::Invalidated(key)) if key == job_key => fetch_now = true,
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                },
            }
        }
        tracing::debug!("analysis poller stopped");
    }

    /// Commit the selected extracted fields into the profile.
    pub async fn confirm(&self, selection: &FieldSelection) -> SyncResult<AnalysisJob> {
        let current = self.snapshot().unwrap_or_default();
        if !current.status.awaits_review() {
            return Err(SyncError::InvalidTransition {
                action: "confirm",
                status: current.status,
            });
        }

        let ticket = self.epoch.ticket();
        let returned = self.api.confirm_analysis(selection).await.map_err(|e| {
            tracing::warn!(error = %e, "confirm failed");
            SyncError::from(e)
        })?;
        if !ticket.is_current() {
            return Err(SyncError::SessionChanged);
        }

        let job = match returned {
            Some(job) if job.status == AnalysisStatus::Confirmed => job,
            _ => AnalysisJob {
                status: AnalysisStatus::Confirmed,
                confirmed_at: Some(chrono::Utc::now()),
                ..current
            },
        };
        tracing::info!(fields = selection.values().filter(|keep| **keep).count(), "analysis confirmed");
        self.cache.set(&self.job_key, job.clone());
        // The server merged the fields; both views refetch.
        self.cache.invalidate(&self.job_key);
        self.cache.invalidate(&self.profile_key);
        Ok(job)
    }

    /// Discard the extracted fields. The profile is not touched.
    pub async fn reject(&self) -> SyncResult<AnalysisJob> {
        let current = self.snapshot().unwrap_or_default();
        if !current.status.awaits_review() {
            return Err(SyncError::InvalidTransition {
                action: "reject",
                status: current.status,
            });
        }

        let ticket = self.epoch.ticket();
        let returned = self.api.reject_analysis().await.map_err(|e| {
            tracing::warn!(error = %e, "reject failed");
            SyncError::from(e)
        })?;
        if !ticket.is_current() {
            return Err(SyncError::SessionChanged);
        }

        let job = match returned {
            Some(job) if job.status == AnalysisStatus::Rejected => job,
            _ => AnalysisJob {
                status: AnalysisStatus::Rejected,
                ..current
            },
        };
        tracing::info!("analysis rejected");
        self.cache.set(&self.job_key, job.clone());
        Ok(job)
    }

    /// Ask the server to analyse the document again. Optimistically moves the
    /// job to pending and invalidates it so the next poll or push confirms.
    pub async fn rerun(&self) -> SyncResult<AnalysisJob> {
        let status = self.status();
        if !status.can_rerun() {
            return Err(SyncError::InvalidTransition {
                action: "re-run",
                status,
            });
        }

        let ticket = self.epoch.ticket();
        let returned = self.api.rerun_analysis().await.map_err(|e| {
            tracing::warn!(error = %e, "re-run failed");
            SyncError::from(e)
        })?;
        if !ticket.is_current() {
            return Err(SyncError::SessionChanged);
        }

        let job = match returned {
            Some(job) if job.status.is_in_progress() => job,
            _ => AnalysisJob::with_status(AnalysisStatus::Pending),
        };
        tracing::info!("analysis re-run requested");
        self.cache.set(&self.job_key, job.clone());
        self.cache.invalidate(&self.job_key);
        Ok(job)
    }
}

impl Drop for AnalysisTracker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeApi;
    use talentsync_shared::ApiError;

    const SUBJECT: &str = "u-1";

    fn tracker(api: &Arc<FakeApi>) -> (Arc<AnalysisTracker>, QueryCache, SessionEpoch) {
        let cache = QueryCache::new();
        let epoch = SessionEpoch::new();
        let tracker = Arc::new(AnalysisTracker::new(
            api.clone(),
            cache.clone(),
            epoch.clone(),
            SUBJECT,
            Duration::from_millis(3000),
        ));
        (tracker, cache, epoch)
    }

    fn completed() -> AnalysisJob {
        let mut fields = talentsync_shared::ExtractedFields::new();
        fields.insert("headline".into(), serde_json::json!("Line cook"));
        fields.insert("skills".into(), serde_json::json!(["knife work"]));
        AnalysisJob {
            status: AnalysisStatus::Completed,
            extracted_fields: Some(fields),
            ..AnalysisJob::default()
        }
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    async fn advance(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        settle().await;
    }

    #[tokio::test(start_paused = true)]
    async fn polls_while_in_progress_and_stops_when_completed() {
        let api = Arc::new(FakeApi::default());
        api.queue_jobs([
            AnalysisJob::with_status(AnalysisStatus::Pending),
            AnalysisJob::with_status(AnalysisStatus::Parsing),
            completed(),
        ]);
        let (tracker, _, _) = tracker(&api);

        tracker.start();
        settle().await;
        assert_eq!(api.job_fetches(), 1);
        assert_eq!(tracker.status(), AnalysisStatus::Pending);

        advance(3000).await;
        assert_eq!(api.job_fetches(), 2);
        assert_eq!(tracker.status(), AnalysisStatus::Parsing);

        advance(3000).await;
        assert_eq!(api.job_fetches(), 3);
        assert_eq!(tracker.status(), AnalysisStatus::Completed);

        advance(30_000).await;
        assert_eq!(api.job_fetches(), 3);
        tracker.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_tracker_stops_polling() {
        let api = Arc::new(FakeApi::default());
        api.queue_jobs([AnalysisJob::with_status(AnalysisStatus::Pending)]);
        let (tracker, _, _) = tracker(&api);

        tracker.start();
        settle().await;
        assert_eq!(api.job_fetches(), 1);

        drop(tracker);
        advance(30_000).await;
        assert_eq!(api.job_fetches(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn does_not_poll_from_terminal_states() {
        let api = Arc::new(FakeApi::default());
        api.queue_jobs([AnalysisJob::with_status(AnalysisStatus::Idle)]);
        let (tracker, _, _) = tracker(&api);
        tracker.start();
        settle().await;
        advance(20_000).await;
        assert_eq!(api.job_fetches(), 1);
        assert!(!tracker.is_polling());
        tracker.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn push_mid_interval_applies_immediately_and_ends_polling() {
        let api = Arc::new(FakeApi::default());
        api.queue_jobs([AnalysisJob::with_status(AnalysisStatus::Pending)]);
        let (tracker, _, _) = tracker(&api);
        tracker.start();
        settle().await;
        assert_eq!(tracker.status(), AnalysisStatus::Pending);

        advance(1500).await;
        let event = InboundEvent::decode(
            r#"{"type":"job_status_update","status":"completed","extractedFields":{"headline":"Line cook"}}"#,
        )
        .unwrap();
        tracker.handle_event(&event);
        assert_eq!(tracker.status(), AnalysisStatus::Completed);
        assert!(tracker.snapshot().unwrap().extracted_fields.is_some());

        advance(10_000).await;
        assert_eq!(api.job_fetches(), 1);
        assert_eq!(tracker.status(), AnalysisStatus::Completed);
        tracker.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn late_poll_response_does_not_regress_push() {
        let api = Arc::new(FakeApi::default());
        api.queue_jobs([
            AnalysisJob::with_status(AnalysisStatus::Pending),
            AnalysisJob::with_status(AnalysisStatus::Parsing),
        ]);
        let (tracker, _, _) = tracker(&api);
        tracker.start();
        settle().await;

        api.hold_jobs();
        advance(3000).await;
        assert_eq!(api.job_fetches(), 2);

        tracker.apply_push(completed());
        api.release_jobs();
        settle().await;

        assert_eq!(tracker.status(), AnalysisStatus::Completed);
        advance(10_000).await;
        assert_eq!(api.job_fetches(), 2);
        tracker.stop();
    }

    #[tokio::test]
    async fn confirm_commits_and_invalidates_job_and_profile() {
        let api = Arc::new(FakeApi::default());
        let (tracker, cache, _) = tracker(&api);
        tracker.apply_push(completed());
        let mut changes = cache.subscribe();

        let mut selection = FieldSelection::new();
        selection.insert("headline".into(), true);
        selection.insert("skills".into(), false);
        let job = tracker.confirm(&selection).await.unwrap();

        assert_eq!(job.status, AnalysisStatus::Confirmed);
        assert_eq!(tracker.status(), AnalysisStatus::Confirmed);
        assert_eq!(api.last_selection(), Some(selection));

        let mut invalidated = Vec::new();
        while let Ok(change) = changes.try_recv() {
            if let CacheChange::Invalidated(key) = change {
                invalidated.push(key.resource);
            }
        }
        assert!(invalidated.contains(&Resource::AnalysisJob));
        assert!(invalidated.contains(&Resource::Profile));
    }

    #[tokio::test]
    async fn confirm_failure_leaves_status_untouched() {
        let api = Arc::new(FakeApi::default());
        api.fail_actions(ApiError::Http {
            status: 409,
            body: r#"{"title":"Conflict","status":409,"detail":"Document changed, re-run analysis"}"#
                .into(),
        });
        let (tracker, _, _) = tracker(&api);
        tracker.apply_push(completed());

        let err = tracker.confirm(&FieldSelection::new()).await.unwrap_err();
        assert_eq!(err.user_message(), "Document changed, re-run analysis");
        assert_eq!(tracker.status(), AnalysisStatus::Completed);

        let err = tracker.reject().await.unwrap_err();
        assert!(matches!(err, SyncError::Api(_)));
        assert_eq!(tracker.status(), AnalysisStatus::Completed);
    }

    #[tokio::test]
    async fn reject_moves_to_rejected_without_profile_invalidation() {
        let api = Arc::new(FakeApi::default());
        let (tracker, cache, _) = tracker(&api);
        tracker.apply_push(completed());
        let mut changes = cache.subscribe();

        let job = tracker.reject().await.unwrap();
        assert_eq!(job.status, AnalysisStatus::Rejected);
        while let Ok(change) = changes.try_recv() {
            assert_ne!(
                change,
                CacheChange::Invalidated(CacheKey::new(Resource::Profile, SUBJECT))
            );
        }
    }

    #[tokio::test]
    async fn actions_require_a_valid_source_state() {
        let api = Arc::new(FakeApi::default());
        let (tracker, _, _) = tracker(&api);
        tracker.apply_push(AnalysisJob::with_status(AnalysisStatus::Parsing));

        assert!(matches!(
            tracker.confirm(&FieldSelection::new()).await,
            Err(SyncError::InvalidTransition { action: "confirm", .. })
        ));
        assert!(matches!(
            tracker.rerun().await,
            Err(SyncError::InvalidTransition { action: "re-run", .. })
        ));
        assert_eq!(api.action_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rerun_from_failed_goes_pending_and_resumes_polling() {
        let api = Arc::new(FakeApi::default());
        api.queue_jobs([
            AnalysisJob {
                status: AnalysisStatus::Failed,
                error_message: Some("unreadable scan".into()),
                ..AnalysisJob::default()
            },
            AnalysisJob::with_status(AnalysisStatus::Parsing),
            completed(),
        ]);
        let (tracker, _, _) = tracker(&api);
        tracker.start();
        settle().await;
        assert_eq!(tracker.status(), AnalysisStatus::Failed);
        advance(10_000).await;
        assert_eq!(api.job_fetches(), 1);

        let job = tracker.rerun().await.unwrap();
        assert_eq!(job.status, AnalysisStatus::Pending);
        settle().await;
        // The invalidation triggers an immediate fetch.
        assert_eq!(api.job_fetches(), 2);
        assert_eq!(tracker.status(), AnalysisStatus::Parsing);

        advance(3000).await;
        assert_eq!(api.job_fetches(), 3);
        assert_eq!(tracker.status(), AnalysisStatus::Completed);
        tracker.stop();
    }

    #[tokio::test]
    async fn results_after_session_change_are_dropped() {
        let api = Arc::new(FakeApi::default());
        api.hold_actions();
        let (tracker, _, epoch) = tracker(&api);
        tracker.apply_push(completed());

        let pending = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.reject().await })
        };
        settle().await;
        epoch.advance();
        api.release_actions();

        let result = pending.await.unwrap();
        assert_eq!(result, Err(SyncError::SessionChanged));
        assert_eq!(tracker.status(), AnalysisStatus::Completed);
    }
}
