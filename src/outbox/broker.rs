//! Broker side of the outbox: where pending records get pushed.

use super::OutboxRecord;
use async_trait::async_trait;
use lapin::{
    options::{BasicPublishOptions, ConfirmSelectOptions, ExchangeDeclareOptions},
    types::{AMQPValue, FieldTable},
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// AMQP delivery mode for messages that survive a broker restart.
const PERSISTENT: u8 = 2;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("amqp error: {0}")]
    Amqp(#[from] lapin::Error),
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("broker rejected message: {0}")]
    Rejected(String),
}

/// Publishes one outbox record. `Ok` must only be returned once the broker has
/// accepted the message.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, record: &OutboxRecord) -> Result<(), PublishError>;
}

/// Topic-exchange publisher with publisher confirms.
///
/// The connection is opened lazily and dropped after any failure so the next
/// call reconnects.
pub struct AmqpPublisher {
    url: String,
    exchange: String,
    link: Mutex<Option<(Connection, Channel)>>,
}

impl AmqpPublisher {
    #[must_use]
    pub fn new(url: String, exchange: String) -> Self {
        Self {
            url,
            exchange,
            link: Mutex::new(None),
        }
    }

    /// Open the connection now instead of on first publish.
    ///
    /// # Errors
    /// Returns an error if the broker is unreachable or the exchange cannot be declared.
    pub async fn connect(url: String, exchange: String) -> Result<Self, PublishError> {
        let publisher = Self::new(url, exchange);
        publisher.channel().await?;
        Ok(publisher)
    }

    async fn channel(&self) -> Result<Channel, PublishError> {
        let mut link = self.link.lock().await;
        if let Some((_, channel)) = link.as_ref() {
            if channel.status().connected() {
                return Ok(channel.clone());
            }
        }

        debug!(exchange = %self.exchange, "opening amqp channel");
        let connection = Connection::connect(&self.url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;
        channel
            .exchange_declare(
                &self.exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;

        *link = Some((connection, channel.clone()));
        Ok(channel)
    }

    async fn reset(&self) {
        let mut link = self.link.lock().await;
        if let Some((connection, _)) = link.take() {
            if let Err(err) = connection.close(200, "reconnecting").await {
                debug!("amqp close failed: {err}");
            }
        }
    }

    fn properties(record: &OutboxRecord) -> BasicProperties {
        let mut headers = FieldTable::default();
        headers.insert(
            "aggregate_id".into(),
            AMQPValue::LongString(record.aggregate_id.to_string().into()),
        );
        headers.insert(
            "event_type".into(),
            AMQPValue::LongString(record.event_type.clone().into()),
        );

        BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(PERSISTENT)
            .with_kind(record.event_type.as_str().into())
            .with_message_id(record.id.to_string().into())
            .with_timestamp(u64::try_from(record.created_at.timestamp()).unwrap_or_default())
            .with_headers(headers)
    }

    async fn try_publish(&self, record: &OutboxRecord) -> Result<(), PublishError> {
        let channel = self.channel().await?;
        let payload = serde_json::to_vec(&record.payload)?;
        let confirmation = channel
            .basic_publish(
                &self.exchange,
                &record.topic,
                BasicPublishOptions::default(),
                &payload,
                Self::properties(record),
            )
            .await?
            .await?;

        if confirmation.is_nack() {
            return Err(PublishError::Rejected(format!(
                "nack for outbox record {}",
                record.id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for AmqpPublisher {
    async fn publish(&self, record: &OutboxRecord) -> Result<(), PublishError> {
        let result = self.try_publish(record).await;
        if let Err(PublishError::Amqp(err)) = &result {
            warn!(record_id = record.id, "amqp publish failed, dropping connection: {err}");
            self.reset().await;
        }
        result
    }
}

/// Writes events to the log instead of a broker. Used when no broker URL is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogPublisher;

#[async_trait]
impl EventPublisher for LogPublisher {
    async fn publish(&self, record: &OutboxRecord) -> Result<(), PublishError> {
        info!(
            record_id = record.id,
            aggregate_id = %record.aggregate_id,
            topic = %record.topic,
            event_type = %record.event_type,
            "outbox event (log publisher)"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn record() -> OutboxRecord {
        OutboxRecord {
            id: 42,
            aggregate_id: Uuid::new_v4(),
            topic: "user.created".to_string(),
            event_type: "UserCreated".to_string(),
            payload: json!({"email": "alice@example.com"}),
            created_at: Utc::now(),
            published_at: None,
        }
    }

    #[test]
    fn properties_mark_delivery_persistent_and_carry_headers() {
        let record = record();
        let properties = AmqpPublisher::properties(&record);

        assert_eq!(properties.delivery_mode(), &Some(PERSISTENT));
        assert_eq!(
            properties.content_type().as_ref().map(|value| value.as_str()),
            Some("application/json")
        );
        assert_eq!(
            properties.kind().as_ref().map(|value| value.as_str()),
            Some("UserCreated")
        );

        let headers = properties.headers().clone().unwrap_or_default();
        let keys: Vec<&str> = headers.inner().keys().map(|key| key.as_str()).collect();
        assert!(keys.contains(&"aggregate_id"));
        assert!(keys.contains(&"event_type"));
    }

    #[tokio::test]
    async fn log_publisher_always_succeeds() {
        assert!(LogPublisher.publish(&record()).await.is_ok());
    }
}
