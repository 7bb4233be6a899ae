//! Transactional outbox.
//!
//! Events are inserted by the store methods that perform the state change they
//! describe, inside the same transaction. [`publisher::OutboxPublisher`] drains
//! pending rows to an [`broker::EventPublisher`] and flags each one published
//! with a single conditional update.

pub mod broker;
pub mod publisher;
pub mod repo;

pub use broker::{AmqpPublisher, EventPublisher, LogPublisher, PublishError};
pub use publisher::{spawn_outbox_worker, BatchReport, OutboxConfig, OutboxPublisher};

use crate::store::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

pub const TOPIC_EMAIL_VERIFICATION: &str = "user.email_verification";
pub const TOPIC_USER_CREATED: &str = "user.created";
pub const TOPIC_PASSWORD_RESET: &str = "user.password_reset";
pub const TOPIC_USER_EVENTS: &str = "user.events";

pub const EVENT_EMAIL_VERIFICATION_REQUESTED: &str = "EmailVerificationRequested";
pub const EVENT_USER_CREATED: &str = "UserCreated";
pub const EVENT_PASSWORD_RESET_REQUESTED: &str = "PasswordResetRequested";
pub const EVENT_PASSWORD_CHANGED: &str = "PasswordChanged";

/// Event waiting to be written alongside a state change.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOutboxEvent {
    pub aggregate_id: Uuid,
    pub topic: &'static str,
    pub event_type: &'static str,
    pub payload: Value,
}

impl NewOutboxEvent {
    #[must_use]
    pub fn email_verification_requested(
        user_id: Uuid,
        email: &str,
        name: &str,
        verification_link: &str,
    ) -> Self {
        Self {
            aggregate_id: user_id,
            topic: TOPIC_EMAIL_VERIFICATION,
            event_type: EVENT_EMAIL_VERIFICATION_REQUESTED,
            payload: json!({
                "user_id": user_id,
                "email": email,
                "name": name,
                "verification_link": verification_link,
            }),
        }
    }

    #[must_use]
    pub fn user_created(user_id: Uuid, email: &str, verified_at: DateTime<Utc>) -> Self {
        Self {
            aggregate_id: user_id,
            topic: TOPIC_USER_CREATED,
            event_type: EVENT_USER_CREATED,
            payload: json!({
                "user_id": user_id,
                "email": email,
                "verified_at": verified_at,
            }),
        }
    }

    #[must_use]
    pub fn password_reset_requested(
        user_id: Uuid,
        email: &str,
        reset_link: &str,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            aggregate_id: user_id,
            topic: TOPIC_PASSWORD_RESET,
            event_type: EVENT_PASSWORD_RESET_REQUESTED,
            payload: json!({
                "user_id": user_id,
                "email": email,
                "reset_link": reset_link,
                "expires_at": expires_at,
            }),
        }
    }

    #[must_use]
    pub fn password_changed(user_id: Uuid, email: &str, changed_at: DateTime<Utc>) -> Self {
        Self {
            aggregate_id: user_id,
            topic: TOPIC_USER_EVENTS,
            event_type: EVENT_PASSWORD_CHANGED,
            payload: json!({
                "user_id": user_id,
                "email": email,
                "changed_at": changed_at,
            }),
        }
    }
}

/// Persisted outbox row. Pending iff `published_at` is `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxRecord {
    pub id: i64,
    pub aggregate_id: Uuid,
    pub topic: String,
    pub event_type: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl OutboxRecord {
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.published_at.is_none()
    }
}

#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Oldest pending records first, at most `limit`.
    async fn pending(&self, limit: usize) -> Result<Vec<OutboxRecord>, StoreError>;

    /// Set `published_at` if still unset. Returns whether this call flipped it.
    async fn mark_published(&self, id: i64, at: DateTime<Utc>) -> Result<bool, StoreError>;

    async fn delete_published_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verification_event_carries_link() {
        let user_id = Uuid::new_v4();
        let event = NewOutboxEvent::email_verification_requested(
            user_id,
            "alice@example.com",
            "Alice",
            "https://custodia.dev/verify-email?token=abc",
        );
        assert_eq!(event.topic, TOPIC_EMAIL_VERIFICATION);
        assert_eq!(event.event_type, EVENT_EMAIL_VERIFICATION_REQUESTED);
        assert_eq!(event.aggregate_id, user_id);
        assert_eq!(
            event.payload["verification_link"],
            "https://custodia.dev/verify-email?token=abc"
        );
        assert_eq!(event.payload["user_id"], user_id.to_string());
    }

    #[test]
    fn password_events_use_distinct_topics() {
        let user_id = Uuid::new_v4();
        let now = Utc::now();
        let reset = NewOutboxEvent::password_reset_requested(user_id, "a@b.io", "link", now);
        let changed = NewOutboxEvent::password_changed(user_id, "a@b.io", now);
        assert_eq!(reset.topic, TOPIC_PASSWORD_RESET);
        assert_eq!(changed.topic, TOPIC_USER_EVENTS);
        assert_ne!(reset.event_type, changed.event_type);
    }
}
