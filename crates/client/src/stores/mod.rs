//! Local caches fed by the push channel and the REST collaborators.

pub mod cache;
pub mod reconciler;

pub use cache::{CacheChange, CacheKey, QueryCache, Resource};
pub use reconciler::CacheReconciler;
