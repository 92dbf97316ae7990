//! HTTP API client for the REST collaborators the sync layer depends on.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use talentsync_shared::{
    AnalysisJob, ApiError, BadgeCounts, ConfirmAnalysisRequest, FieldSelection, Notification,
};

use crate::config::SyncConfig;

pub const ANALYSIS_PATH: &str = "/api/profile/document-analysis";
pub const BADGE_COUNTS_PATH: &str = "/api/badge-counts";
pub const NOTIFICATIONS_PATH: &str = "/api/notifications";

/// REST endpoints consumed by the sync core.
#[async_trait]
pub trait SyncApi: Send + Sync + 'static {
    /// Current analysis job snapshot for the authenticated subject.
    async fn fetch_analysis_job(&self) -> Result<AnalysisJob, ApiError>;

    /// Commit the selected extracted fields into the subject's profile.
    ///
    /// The action endpoints may answer with an updated snapshot or an empty body.
    async fn confirm_analysis(
        &self,
        selection: &FieldSelection,
    ) -> Result<Option<AnalysisJob>, ApiError>;

    async fn reject_analysis(&self) -> Result<Option<AnalysisJob>, ApiError>;

    async fn rerun_analysis(&self) -> Result<Option<AnalysisJob>, ApiError>;

    /// Authoritative badge-count snapshot.
    async fn fetch_badge_counts(&self) -> Result<BadgeCounts, ApiError>;

    async fn fetch_notifications(&self) -> Result<Vec<Notification>, ApiError>;
}

/// HTTP client for the talentsync REST API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl Default for ApiClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ApiClient {
    /// Create a new API client
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            base_url: String::new(),
            token: None,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new()
            .with_base_url(config.api_url.clone())
            .with_token(config.token.clone())
    }

    /// Set the base URL for API requests
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Configure the bearer token
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        if self.base_url.is_empty() {
            if path.starts_with('/') {
                path.to_string()
            } else {
                format!("/{path}")
            }
        } else {
            let base = self.base_url.trim_end_matches('/');
            let path = path.trim_start_matches('/');
            format!("{base}/{path}")
        }
    }

    fn authorize(&self, rb: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => rb.bearer_auth(token),
            None => rb,
        }
    }

    /// Make a GET request
    pub async fn get_json<TRes: DeserializeOwned>(&self, path: &str) -> Result<TRes, ApiError> {
        let rb = self.authorize(self.client.get(self.url(path)));
        let resp = rb.send().await.map_err(|e| ApiError::Network(e.to_string()))?;
        Self::read_json(resp).await
    }

    /// Make a POST request with JSON body
    pub async fn post_json<TReq: Serialize + ?Sized, TRes: DeserializeOwned>(
        &self,
        path: &str,
        body: &TReq,
    ) -> Result<TRes, ApiError> {
        let body_bytes =
            serde_json::to_vec(body).map_err(|e| ApiError::Deserialize(e.to_string()))?;

        let resp = self
            .authorize(self.client.post(self.url(path)))
            .body(body_bytes)
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Self::read_json(resp).await
    }

    async fn read_json<TRes: DeserializeOwned>(resp: reqwest::Response) -> Result<TRes, ApiError> {
        let status = resp.status().as_u16();
        let is_success = resp.status().is_success();
        let text = resp
            .text()
            .await
            .map_err(|e| ApiError::Network(format!("failed to read body: {e}")))?;

        if !is_success {
            return Err(ApiError::Http { status, body: text });
        }

        if text.is_empty() {
            serde_json::from_str("null").map_err(|e| ApiError::Deserialize(e.to_string()))
        } else {
            serde_json::from_str(&text).map_err(|e| ApiError::Deserialize(e.to_string()))
        }
    }
}

#[async_trait]
impl SyncApi for ApiClient {
    async fn fetch_analysis_job(&self) -> Result<AnalysisJob, ApiError> {
        self.get_json(ANALYSIS_PATH).await
    }

    async fn confirm_analysis(
        &self,
        selection: &FieldSelection,
    ) -> Result<Option<AnalysisJob>, ApiError> {
        let body = ConfirmAnalysisRequest {
            selected_fields: selection.clone(),
        };
        self.post_json(&format!("{ANALYSIS_PATH}/confirm"), &body).await
    }

    async fn reject_analysis(&self) -> Result<Option<AnalysisJob>, ApiError> {
        self.post_json(&format!("{ANALYSIS_PATH}/reject"), &serde_json::json!({}))
            .await
    }

    async fn rerun_analysis(&self) -> Result<Option<AnalysisJob>, ApiError> {
        self.post_json(&format!("{ANALYSIS_PATH}/rerun"), &serde_json::json!({}))
            .await
    }

    async fn fetch_badge_counts(&self) -> Result<BadgeCounts, ApiError> {
        self.get_json(BADGE_COUNTS_PATH).await
    }

    async fn fetch_notifications(&self) -> Result<Vec<Notification>, ApiError> {
        self.get_json(NOTIFICATIONS_PATH).await
    }
}
