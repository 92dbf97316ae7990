//! Sync layer configuration from environment variables.

use std::time::Duration;

use talentsync_shared::DEFAULT_WS_PATH;
use url::Url;

pub const DEFAULT_API_URL: &str = "http://localhost:3000";
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3000);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(3000);
pub const DEFAULT_DEDUP_CAPACITY: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Origin of the REST collaborators, e.g. `https://app.example.com`.
    pub api_url: String,
    /// Path of the push channel on the same origin.
    pub ws_path: String,
    /// Bearer token for REST calls. Issued by the (external) auth layer.
    pub token: Option<String>,
    /// Fixed delay between a close/error and the next connect attempt.
    pub reconnect_delay: Duration,
    /// Analysis status poll interval while a job is in progress.
    pub poll_interval: Duration,
    /// Number of event identities remembered by the dedup window.
    pub dedup_capacity: usize,
    /// Close the transport if no frame arrives for this long. Disabled when `None`.
    pub liveness_timeout: Option<Duration>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            ws_path: DEFAULT_WS_PATH.to_string(),
            token: None,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            poll_interval: DEFAULT_POLL_INTERVAL,
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
            liveness_timeout: None,
        }
    }
}

impl SyncConfig {
    /// Read configuration from the environment.
    ///
    /// Environment variables:
    /// - `TALENTSYNC_API_URL` (default: "http://localhost:3000")
    /// - `TALENTSYNC_WS_PATH` (default: "/ws")
    /// - `TALENTSYNC_TOKEN` (default: unset)
    /// - `TALENTSYNC_RECONNECT_DELAY_MS` (default: 3000)
    /// - `TALENTSYNC_POLL_INTERVAL_MS` (default: 3000)
    /// - `TALENTSYNC_DEDUP_CAPACITY` (default: 100)
    /// - `TALENTSYNC_LIVENESS_TIMEOUT_MS` (default: unset)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let millis = |key: &str| -> Option<Duration> {
            let raw = lookup(key)?;
            match raw.trim().parse::<u64>() {
                Ok(ms) => Some(Duration::from_millis(ms)),
                Err(_) => {
                    tracing::warn!(key, value = %raw, "ignoring invalid duration");
                    None
                }
            }
        };

        let dedup_capacity = match lookup("TALENTSYNC_DEDUP_CAPACITY") {
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    tracing::warn!(value = %raw, "ignoring invalid dedup capacity");
                    defaults.dedup_capacity
                }
            },
            None => defaults.dedup_capacity,
        };

        Self {
            api_url: lookup("TALENTSYNC_API_URL")
                .and_then(|raw| match Url::parse(raw.trim()) {
                    Ok(url) if matches!(url.scheme(), "http" | "https") => {
                        Some(raw.trim().trim_end_matches('/').to_string())
                    }
                    _ => {
                        tracing::warn!(value = %raw, "ignoring invalid api url");
                        None
                    }
                })
                .unwrap_or(defaults.api_url),
            ws_path: lookup("TALENTSYNC_WS_PATH").unwrap_or(defaults.ws_path),
            token: lookup("TALENTSYNC_TOKEN").filter(|t| !t.trim().is_empty()),
            reconnect_delay: millis("TALENTSYNC_RECONNECT_DELAY_MS")
                .unwrap_or(defaults.reconnect_delay),
            poll_interval: millis("TALENTSYNC_POLL_INTERVAL_MS").unwrap_or(defaults.poll_interval),
            dedup_capacity,
            liveness_timeout: millis("TALENTSYNC_LIVENESS_TIMEOUT_MS")
                .filter(|timeout| !timeout.is_zero()),
        }
    }

    /// Construct the push channel URL from the API origin.
    pub fn ws_url(&self) -> String {
        let base = http_to_ws(self.api_url.trim_end_matches('/'));
        if self.ws_path.starts_with('/') {
            format!("{base}{}", self.ws_path)
        } else {
            format!("{base}/{}", self.ws_path)
        }
    }
}

/// Convert HTTP/HTTPS URL to WS/WSS
fn http_to_ws(url: &str) -> String {
    if url.starts_with("https://") {
        url.replacen("https://", "wss://", 1)
    } else if url.starts_with("http://") {
        url.replacen("http://", "ws://", 1)
    } else {
        url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = SyncConfig::from_lookup(lookup(&[]));
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.reconnect_delay, Duration::from_millis(3000));
        assert_eq!(config.poll_interval, Duration::from_millis(3000));
        assert_eq!(config.dedup_capacity, 100);
    }

    #[test]
    fn reads_overrides_and_skips_garbage() {
        let config = SyncConfig::from_lookup(lookup(&[
            ("TALENTSYNC_API_URL", "https://jobs.example.com/"),
            ("TALENTSYNC_POLL_INTERVAL_MS", "soon"),
            ("TALENTSYNC_RECONNECT_DELAY_MS", "500"),
            ("TALENTSYNC_DEDUP_CAPACITY", "0"),
            ("TALENTSYNC_LIVENESS_TIMEOUT_MS", "45000"),
        ]));
        assert_eq!(config.api_url, "https://jobs.example.com");
        assert_eq!(config.poll_interval, DEFAULT_POLL_INTERVAL);
        assert_eq!(config.reconnect_delay, Duration::from_millis(500));
        assert_eq!(config.dedup_capacity, DEFAULT_DEDUP_CAPACITY);
        assert_eq!(config.liveness_timeout, Some(Duration::from_secs(45)));
    }

    #[test]
    fn rejects_non_http_api_url() {
        let config = SyncConfig::from_lookup(lookup(&[("TALENTSYNC_API_URL", "localhost:3000")]));
        assert_eq!(config.api_url, DEFAULT_API_URL);
        let config = SyncConfig::from_lookup(lookup(&[("TALENTSYNC_API_URL", "ftp://files")]));
        assert_eq!(config.api_url, DEFAULT_API_URL);
    }

    #[test]
    fn ws_url_follows_api_scheme() {
        let mut config = SyncConfig::default();
        assert_eq!(config.ws_url(), "ws://localhost:3000/ws");
        config.api_url = "https://jobs.example.com".into();
        config.ws_path = "live".into();
        assert_eq!(config.ws_url(), "wss://jobs.example.com/live");
    }
}
