//! Push channel frames.
//!
//! Outbound frames are a closed [`ClientFrame`] enum. Inbound frames decode
//! into [`InboundEvent`], a closed tagged union keyed by the `type` field;
//! kinds this client does not know about land in [`InboundEvent::Ignored`].

use serde::{Deserialize, Serialize};

use crate::models::{
    opt_id_from_str_or_int, AnalysisJob, BadgeCounts, ChatMessage, Notification,
};

/// Path of the push channel relative to the API origin.
pub const DEFAULT_WS_PATH: &str = "/ws";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Must be the first frame after every successful open.
    #[serde(rename_all = "camelCase")]
    Authenticate { user_id: String },
}

/// Free-form payload of push kinds that only other UI collaborators consume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DomainPayload {
    #[serde(default, deserialize_with = "opt_id_from_str_or_int")]
    pub id: Option<String>,
    #[serde(flatten)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    NewMessage {
        message: ChatMessage,
    },
    BadgeCountsUpdate(BadgeCounts),
    NewNotification {
        notification: Notification,
    },
    NotificationUpdated {
        notification: Notification,
    },
    AllNotificationsUpdated {
        notifications: Vec<Notification>,
    },
    JobStatusUpdate(AnalysisJob),
    ApplicationUpdate(DomainPayload),
    JobUpdate(DomainPayload),
    NewRating(DomainPayload),
    #[serde(other)]
    Ignored,
}

impl InboundEvent {
    /// Decode one text frame.
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Wire name of the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::NewMessage { .. } => "new_message",
            InboundEvent::BadgeCountsUpdate(_) => "badge_counts_update",
            InboundEvent::NewNotification { .. } => "new_notification",
            InboundEvent::NotificationUpdated { .. } => "notification_updated",
            InboundEvent::AllNotificationsUpdated { .. } => "all_notifications_updated",
            InboundEvent::JobStatusUpdate(_) => "job_status_update",
            InboundEvent::ApplicationUpdate(_) => "application_update",
            InboundEvent::JobUpdate(_) => "job_update",
            InboundEvent::NewRating(_) => "new_rating",
            InboundEvent::Ignored => "ignored",
        }
    }

    /// Idempotency key for kinds that carry a stable identity.
    ///
    /// `None` means every delivery is logically unique and must always be
    /// dispatched.
    pub fn identity(&self) -> Option<String> {
        match self {
            InboundEvent::NewNotification { notification } => {
                Some(format!("{}:{}", self.kind(), notification.id))
            }
            // Key is `kind:id@updatedAt`, not `kind:id`: one notification is
            // edited many times and each edit must dispatch. Without a
            // revision there is nothing stable to key on, so it always passes.
            InboundEvent::NotificationUpdated { notification } => notification
                .updated_at
                .map(|at| format!("{}:{}@{}", self.kind(), notification.id, at.to_rfc3339())),
            InboundEvent::ApplicationUpdate(payload)
            | InboundEvent::JobUpdate(payload)
            | InboundEvent::NewRating(payload) => payload
                .id
                .as_ref()
                .map(|id| format!("{}:{}", self.kind(), id)),
            InboundEvent::NewMessage { .. }
            | InboundEvent::BadgeCountsUpdate(_)
            | InboundEvent::AllNotificationsUpdated { .. }
            | InboundEvent::JobStatusUpdate(_)
            | InboundEvent::Ignored => None,
        }
    }
}
