//! Shared types for the talentsync push channel and REST collaborators.

pub mod error;
pub mod models;
pub mod protocol;

pub use error::*;
pub use models::*;
pub use protocol::*;
