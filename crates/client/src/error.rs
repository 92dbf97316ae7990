//! Client-side error type.

use talentsync_shared::{AnalysisStatus, ApiError};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SyncError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("could not encode frame: {0}")]
    Encode(String),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("cannot {action} while analysis is {status}")]
    InvalidTransition {
        action: &'static str,
        status: AnalysisStatus,
    },
    #[error("session changed before the request completed")]
    SessionChanged,
}

impl SyncError {
    /// Actionable text for the user. Local state is untouched whenever one of
    /// these is returned, so the action can simply be retried.
    pub fn user_message(&self) -> String {
        match self {
            SyncError::Api(err) => err.user_message(),
            SyncError::InvalidTransition { action, status } => {
                format!("You can't {action} the document analysis while it is {status}.")
            }
            SyncError::SessionChanged => "You were signed out. Please sign in again.".to_string(),
            SyncError::Transport(_) => {
                "Live updates are unavailable right now. Retrying automatically.".to_string()
            }
            SyncError::Encode(_) => {
                "Something went wrong. Please try again.".to_string()
            }
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
