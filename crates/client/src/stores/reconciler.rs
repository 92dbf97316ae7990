//! Per-event-kind merge policies for the shared cache.
//!
//! | kind                        | policy                                         |
//! |-----------------------------|------------------------------------------------|
//! | `new_message`               | mark the conversation list stale               |
//! | `badge_counts_update`       | overwrite counts, unread total := `total`      |
//! | `new_notification`          | prepend unless present, then refetch           |
//! | `notification_updated`      | replace by id (or prepend), then refetch       |
//! | `all_notifications_updated` | replace the list exactly                       |
//!
//! Snapshot kinds are not followed by a refetch: the payload already is the
//! server's full answer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use talentsync_shared::{BadgeCounts, InboundEvent, Notification};

use super::cache::{CacheKey, QueryCache, Resource};
use crate::api_client::SyncApi;
use crate::session::SessionEpoch;

/// Coalesces background refetches: one in flight, at most one queued.
#[derive(Default)]
struct RefetchGate {
    in_flight: AtomicBool,
    pending: AtomicBool,
}

pub struct CacheReconciler {
    cache: QueryCache,
    api: Arc<dyn SyncApi>,
    epoch: SessionEpoch,
    subject: String,
    gate: Arc<RefetchGate>,
}

impl CacheReconciler {
    pub fn new(
        cache: QueryCache,
        api: Arc<dyn SyncApi>,
        epoch: SessionEpoch,
        subject: impl Into<String>,
    ) -> Self {
        Self {
            cache,
            api,
            epoch,
            subject: subject.into(),
            gate: Arc::new(RefetchGate::default()),
        }
    }

    fn key(&self, resource: Resource) -> CacheKey {
        CacheKey::new(resource, self.subject.clone())
    }

    /// Apply one pushed event to the cache.
    pub fn apply(&self, event: &InboundEvent) {
        match event {
            InboundEvent::NewMessage { message } => {
                // Message bodies are left to whoever is viewing the conversation.
                tracing::debug!(conversation = %message.conversation_id, "conversation list stale");
                self.cache.invalidate(&self.key(Resource::Conversations));
            }
            InboundEvent::BadgeCountsUpdate(counts) => self.apply_badge_counts(*counts),
            InboundEvent::NewNotification { notification } => {
                self.upsert_notification(notification);
                self.schedule_refetch();
            }
            InboundEvent::NotificationUpdated { notification } => {
                self.replace_notification(notification);
                self.schedule_refetch();
            }
            InboundEvent::AllNotificationsUpdated { notifications } => {
                self.cache
                    .set(&self.key(Resource::Notifications), notifications.clone());
            }
            InboundEvent::JobStatusUpdate(_)
            | InboundEvent::ApplicationUpdate(_)
            | InboundEvent::JobUpdate(_)
            | InboundEvent::NewRating(_)
            | InboundEvent::Ignored => {}
        }
    }

    /// Overwrite the counts wholesale. The unread total is taken verbatim
    /// from the snapshot, never summed from the categories.
    pub fn apply_badge_counts(&self, counts: BadgeCounts) {
        self.cache.set(&self.key(Resource::BadgeCounts), counts);
        self.cache.set(&self.key(Resource::UnreadTotal), counts.total);
    }

    fn upsert_notification(&self, notification: &Notification) {
        let written = self.cache.update::<Vec<Notification>, _>(
            &self.key(Resource::Notifications),
            |current| match current {
                Some(list) if list.iter().any(|n| n.id == notification.id) => None,
                Some(list) => {
                    let mut next = Vec::with_capacity(list.len() + 1);
                    next.push(notification.clone());
                    next.extend(list.iter().cloned());
                    Some(next)
                }
                None => Some(vec![notification.clone()]),
            },
        );
        if !written {
            tracing::debug!(id = %notification.id, "notification already cached");
        }
    }

    fn replace_notification(&self, notification: &Notification) {
        self.cache.update::<Vec<Notification>, _>(
            &self.key(Resource::Notifications),
            |current| {
                let mut next = current.cloned().unwrap_or_default();
                match next.iter_mut().find(|n| n.id == notification.id) {
                    Some(slot) => *slot = notification.clone(),
                    None => next.insert(0, notification.clone()),
                }
                Some(next)
            },
        );
    }

    /// Fire-and-forget refetch of the notification list.
    pub fn schedule_refetch(&self) {
        let gate = self.gate.clone();
        if gate.in_flight.swap(true, Ordering::SeqCst) {
            gate.pending.store(true, Ordering::SeqCst);
            return;
        }

        let api = self.api.clone();
        let cache = self.cache.clone();
        let key = self.key(Resource::Notifications);
        let ticket = self.epoch.ticket();

        tokio::spawn(async move {
            loop {
                gate.pending.store(false, Ordering::SeqCst);
                let revision = cache.revision(&key);
                match api.fetch_notifications().await {
                    Ok(list) if ticket.is_current() => {
                        // A write that landed meanwhile is newer than this
                        // response. Partial writes set `pending` and refetch.
                        if !cache.set_if_revision(&key, list, revision) {
                            tracing::debug!("discarding notifications refetch, list changed meanwhile");
                        }
                    }
                    Ok(_) => {
                        tracing::debug!("session ended, discarding notifications refetch");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "notifications refetch failed");
                    }
                }

                if gate.pending.load(Ordering::SeqCst) {
                    continue;
                }
                gate.in_flight.store(false, Ordering::SeqCst);
                // A request may have slipped in between the check and the release.
                if !gate.pending.load(Ordering::SeqCst)
                    || gate.in_flight.swap(true, Ordering::SeqCst)
                {
                    return;
                }
            }
            gate.in_flight.store(false, Ordering::SeqCst);
        });
    }
}
