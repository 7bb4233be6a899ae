//! Outbox polling loop.
//!
//! Each pass loads a bounded batch of pending records (oldest first), publishes
//! them one by one and flags each success with a conditional update. A failed
//! publish leaves the record pending for the next pass; there is no attempt cap.
//! A crash between publish and flag produces a duplicate on the next pass, so
//! consumers must deduplicate on the message id.

use super::{EventPublisher, OutboxStore};
use crate::store::StoreError;
use chrono::{DateTime, Utc};
use std::{sync::Arc, time::Duration};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, error, info, warn};

#[derive(Clone, Copy, Debug)]
pub struct OutboxConfig {
    poll_interval: Duration,
    batch_size: usize,
    retention: Duration,
}

impl OutboxConfig {
    /// Default: 5s poll interval, 50 records per batch, 7 day retention of
    /// published rows.
    #[must_use]
    pub fn new() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 50,
            retention: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }

    #[must_use]
    pub fn with_poll_interval_seconds(mut self, seconds: u64) -> Self {
        self.poll_interval = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[must_use]
    pub fn with_retention_seconds(mut self, seconds: u64) -> Self {
        self.retention = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn normalize(self) -> Self {
        let poll_interval = if self.poll_interval.is_zero() {
            Duration::from_secs(1)
        } else {
            self.poll_interval
        };
        Self {
            poll_interval,
            batch_size: self.batch_size.max(1),
            retention: self.retention,
        }
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    #[must_use]
    pub fn retention(&self) -> Duration {
        self.retention
    }
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of one polling pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub fetched: usize,
    pub published: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct OutboxPublisher {
    store: Arc<dyn OutboxStore>,
    publisher: Arc<dyn EventPublisher>,
    config: OutboxConfig,
}

impl OutboxPublisher {
    #[must_use]
    pub fn new(
        store: Arc<dyn OutboxStore>,
        publisher: Arc<dyn EventPublisher>,
        config: OutboxConfig,
    ) -> Self {
        Self {
            store,
            publisher,
            config: config.normalize(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &OutboxConfig {
        &self.config
    }

    /// Publish one batch of pending records.
    ///
    /// Stops early, leaving the rest pending, once `shutdown` flips to `true`.
    ///
    /// # Errors
    /// Returns an error only if the batch cannot be loaded. Individual publish or
    /// flag failures are logged and counted.
    pub async fn process_batch(
        &self,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> Result<BatchReport, StoreError> {
        let records = self.store.pending(self.config.batch_size()).await?;
        let mut report = BatchReport {
            fetched: records.len(),
            ..BatchReport::default()
        };

        for record in records {
            if shutdown.is_some_and(|rx| *rx.borrow()) {
                debug!("outbox batch interrupted by shutdown");
                break;
            }

            if let Err(err) = self.publisher.publish(&record).await {
                warn!(
                    record_id = record.id,
                    topic = %record.topic,
                    "outbox publish failed, will retry: {err}"
                );
                report.failed += 1;
                continue;
            }

            match self.store.mark_published(record.id, Utc::now()).await {
                Ok(true) => report.published += 1,
                Ok(false) => {
                    // Another publisher got there first; the broker saw a duplicate.
                    debug!(record_id = record.id, "outbox record already published");
                }
                Err(err) => {
                    error!(record_id = record.id, "failed to mark outbox record published: {err}");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Delete published records older than the retention window.
    ///
    /// # Errors
    /// Returns an error if the delete fails.
    pub async fn purge_published(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let retention =
            chrono::Duration::from_std(self.config.retention()).unwrap_or(chrono::Duration::MAX);
        let cutoff = now.checked_sub_signed(retention).unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.store.delete_published_before(cutoff).await
    }

    /// Poll until `shutdown` flips to `true`. The first pass runs immediately.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            poll_interval = ?self.config.poll_interval(),
            batch_size = self.config.batch_size(),
            "outbox publisher started"
        );

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    match self.process_batch(Some(&shutdown)).await {
                        Ok(report) if report.fetched > 0 => {
                            debug!(
                                fetched = report.fetched,
                                published = report.published,
                                failed = report.failed,
                                "outbox batch processed"
                            );
                        }
                        Ok(_) => {}
                        Err(err) => error!("outbox batch failed: {err}"),
                    }
                }
            }
        }

        info!("outbox publisher stopped");
    }
}

/// Spawn the publisher loop on the runtime.
pub fn spawn_outbox_worker(
    publisher: OutboxPublisher,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(publisher.run(shutdown))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_clamps_zero_values() {
        let config = OutboxConfig::new()
            .with_poll_interval_seconds(0)
            .with_batch_size(0)
            .normalize();
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.batch_size(), 1);
    }

    #[test]
    fn builders_override_defaults() {
        let config = OutboxConfig::new()
            .with_poll_interval_seconds(2)
            .with_batch_size(7)
            .with_retention_seconds(60);
        assert_eq!(config.poll_interval(), Duration::from_secs(2));
        assert_eq!(config.batch_size(), 7);
        assert_eq!(config.retention(), Duration::from_secs(60));
    }
}
