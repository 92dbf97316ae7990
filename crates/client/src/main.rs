//! talentsync-watch - headless sync watcher
//!
//! Logs in as the subject given on the command line (or `TALENTSYNC_SUBJECT`),
//! keeps the push channel open and logs every event until Ctrl-C.

use std::sync::Arc;

use talentsync_client::{ApiClient, Resource, SyncConfig, SyncSession, TungsteniteConnector};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("talentsync_client=debug")),
        )
        .init();

    let subject = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("TALENTSYNC_SUBJECT").ok())
        .ok_or_else(|| anyhow::anyhow!("usage: talentsync-watch <subject-id>"))?;

    let config = SyncConfig::from_env();
    let api = Arc::new(ApiClient::from_config(&config));
    let session = SyncSession::login(subject, config, api, TungsteniteConnector).await;

    let _events = session.subscribe(|event| {
        tracing::info!(kind = event.kind(), "event");
        Ok(())
    });

    let mut state = session.connection_state();
    let mut changes = session.cache().subscribe();
    let total_key = session.key(Resource::UnreadTotal);
    let job_key = session.key(Resource::AnalysisJob);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *state.borrow_and_update();
                tracing::info!(state = ?current, "connection");
            }
            change = changes.recv() => {
                let Ok(talentsync_client::CacheChange::Updated(key)) = change else {
                    continue;
                };
                if key == total_key {
                    let total = session.cache().get::<u64>(&key).unwrap_or_default();
                    tracing::info!(total, "unread total");
                } else if key == job_key {
                    tracing::info!(status = %session.analysis().status(), "document analysis");
                }
            }
        }
    }

    session.logout().await;
    Ok(())
}
