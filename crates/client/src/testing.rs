//! In-memory REST collaborator for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use talentsync_shared::{AnalysisJob, ApiError, BadgeCounts, FieldSelection, Notification};
use tokio::sync::watch;

use crate::api_client::SyncApi;

/// Blocks callers while closed.
struct Gate(watch::Sender<bool>);

impl Default for Gate {
    fn default() -> Self {
        Self(watch::channel(true).0)
    }
}

impl Gate {
    fn close(&self) {
        self.0.send_replace(false);
    }

    fn open(&self) {
        self.0.send_replace(true);
    }

    async fn pass(&self) {
        let mut rx = self.0.subscribe();
        let _ = rx.wait_for(|open| *open).await;
    }
}

#[derive(Default)]
pub(crate) struct FakeApi {
    jobs: Mutex<VecDeque<AnalysisJob>>,
    job_fetches: AtomicUsize,
    job_gate: Gate,

    notifications: Mutex<Vec<Notification>>,
    notification_fetches: AtomicUsize,
    notification_gate: Gate,

    badge_counts: Mutex<BadgeCounts>,
    badge_fetches: AtomicUsize,

    action_error: Mutex<Option<ApiError>>,
    action_calls: AtomicUsize,
    action_gate: Gate,
    last_selection: Mutex<Option<FieldSelection>>,
}

impl FakeApi {
    /// Poll responses in order; the last one repeats.
    pub fn queue_jobs(&self, jobs: impl IntoIterator<Item = AnalysisJob>) {
        self.jobs.lock().extend(jobs);
    }

    pub fn job_fetches(&self) -> usize {
        self.job_fetches.load(Ordering::SeqCst)
    }

    pub fn hold_jobs(&self) {
        self.job_gate.close();
    }

    pub fn release_jobs(&self) {
        self.job_gate.open();
    }

    pub fn set_notifications(&self, list: Vec<Notification>) {
        *self.notifications.lock() = list;
    }

    pub fn notification_fetches(&self) -> usize {
        self.notification_fetches.load(Ordering::SeqCst)
    }

    pub fn hold_notifications(&self) {
        self.notification_gate.close();
    }

    pub fn release_notifications(&self) {
        self.notification_gate.open();
    }

    pub fn set_badge_counts(&self, counts: BadgeCounts) {
        *self.badge_counts.lock() = counts;
    }

    pub fn badge_fetches(&self) -> usize {
        self.badge_fetches.load(Ordering::SeqCst)
    }

    pub fn fail_actions(&self, error: ApiError) {
        *self.action_error.lock() = Some(error);
    }

    pub fn action_calls(&self) -> usize {
        self.action_calls.load(Ordering::SeqCst)
    }

    pub fn hold_actions(&self) {
        self.action_gate.close();
    }

    pub fn release_actions(&self) {
        self.action_gate.open();
    }

    pub fn last_selection(&self) -> Option<FieldSelection> {
        self.last_selection.lock().clone()
    }

    async fn action(&self) -> Result<Option<AnalysisJob>, ApiError> {
        self.action_calls.fetch_add(1, Ordering::SeqCst);
        self.action_gate.pass().await;
        match self.action_error.lock().clone() {
            Some(error) => Err(error),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl SyncApi for FakeApi {
    async fn fetch_analysis_job(&self) -> Result<AnalysisJob, ApiError> {
        self.job_fetches.fetch_add(1, Ordering::SeqCst);
        let job = {
            let mut jobs = self.jobs.lock();
            if jobs.len() > 1 {
                jobs.pop_front()
            } else {
                jobs.front().cloned()
            }
        };
        self.job_gate.pass().await;
        Ok(job.unwrap_or_default())
    }

    async fn confirm_analysis(
        &self,
        selection: &FieldSelection,
    ) -> Result<Option<AnalysisJob>, ApiError> {
        *self.last_selection.lock() = Some(selection.clone());
        self.action().await
    }

    async fn reject_analysis(&self) -> Result<Option<AnalysisJob>, ApiError> {
        self.action().await
    }

    async fn rerun_analysis(&self) -> Result<Option<AnalysisJob>, ApiError> {
        self.action().await
    }

    async fn fetch_badge_counts(&self) -> Result<BadgeCounts, ApiError> {
        self.badge_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(*self.badge_counts.lock())
    }

    async fn fetch_notifications(&self) -> Result<Vec<Notification>, ApiError> {
        self.notification_fetches.fetch_add(1, Ordering::SeqCst);
        self.notification_gate.pass().await;
        Ok(self.notifications.lock().clone())
    }
}
