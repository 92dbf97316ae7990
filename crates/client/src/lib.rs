//! talentsync client sync layer
//!
//! Keeps one push channel open per authenticated subject, fans inbound
//! events out to registered consumers, reconciles the local cache against
//! server-asserted truth, and tracks the document-analysis job.

pub mod analysis;
pub mod api_client;
pub mod config;
pub mod error;
pub mod session;
pub mod stores;
pub mod ws;

#[cfg(test)]
pub(crate) mod testing;

pub use analysis::AnalysisTracker;
pub use api_client::{ApiClient, SyncApi};
pub use config::SyncConfig;
pub use error::{SyncError, SyncResult};
pub use session::{SessionEpoch, SyncSession};
pub use stores::{CacheChange, CacheKey, QueryCache, Resource};
pub use ws::{ConnectionState, Connector, Subscription, TungsteniteConnector};
