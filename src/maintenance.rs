//! Periodic sweep of rows that can no longer matter.
//!
//! Each pass deletes expired sessions, dead refresh tokens, expired password
//! reset links, login attempts past their retention and published outbox rows
//! past theirs. Every step runs even if an earlier one failed.

use crate::{
    outbox::OutboxPublisher,
    session::SessionStore,
    store::{StoreError, Stores},
};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, error, info};

#[derive(Clone, Copy, Debug)]
pub struct MaintenanceConfig {
    interval: Duration,
    login_attempt_retention: Duration,
}

impl MaintenanceConfig {
    /// Default: hourly sweep, 90 day login ledger.
    #[must_use]
    pub fn new() -> Self {
        Self {
            interval: Duration::from_secs(60 * 60),
            login_attempt_retention: Duration::from_secs(90 * 24 * 60 * 60),
        }
    }

    #[must_use]
    pub fn with_interval_seconds(mut self, seconds: u64) -> Self {
        self.interval = Duration::from_secs(seconds.max(1));
        self
    }

    #[must_use]
    pub fn with_login_attempt_retention_days(mut self, days: u64) -> Self {
        self.login_attempt_retention = Duration::from_secs(days.saturating_mul(24 * 60 * 60));
        self
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    #[must_use]
    pub fn login_attempt_retention(&self) -> Duration {
        self.login_attempt_retention
    }
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Rows removed by one sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub sessions: u64,
    pub refresh_tokens: u64,
    pub password_resets: u64,
    pub login_attempts: u64,
    pub outbox: u64,
}

impl SweepReport {
    #[must_use]
    pub fn total(&self) -> u64 {
        self.sessions + self.refresh_tokens + self.password_resets + self.login_attempts + self.outbox
    }
}

fn settle(step: &str, result: Result<u64, StoreError>) -> u64 {
    result.unwrap_or_else(|err| {
        error!(step, "maintenance step failed: {err}");
        0
    })
}

#[derive(Clone)]
pub struct Maintenance {
    stores: Stores,
    sessions: SessionStore,
    outbox: OutboxPublisher,
    config: MaintenanceConfig,
}

impl Maintenance {
    #[must_use]
    pub fn new(
        stores: Stores,
        sessions: SessionStore,
        outbox: OutboxPublisher,
        config: MaintenanceConfig,
    ) -> Self {
        Self {
            stores,
            sessions,
            outbox,
            config,
        }
    }

    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let retention = chrono::Duration::from_std(self.config.login_attempt_retention)
            .unwrap_or(chrono::Duration::MAX);
        let attempt_cutoff = now
            .checked_sub_signed(retention)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        // Refresh tokens reference sessions, so they go first.
        let refresh_tokens = settle(
            "refresh_tokens",
            self.stores.refresh_tokens.delete_expired(now).await,
        );
        let sessions = settle("sessions", self.sessions.purge_expired(now).await);
        let password_resets = settle(
            "password_resets",
            self.stores.accounts.delete_expired_password_resets(now).await,
        );
        let login_attempts = settle(
            "login_attempts",
            self.stores.attempts.prune_before(attempt_cutoff).await,
        );
        let outbox = settle("outbox", self.outbox.purge_published(now).await);

        SweepReport {
            sessions,
            refresh_tokens,
            password_resets,
            login_attempts,
            outbox,
        }
    }

    /// Sweep on every tick until `shutdown` flips to `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval = ?self.config.interval, "maintenance started");

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let report = self.sweep(Utc::now()).await;
                    if report.total() > 0 {
                        info!(
                            sessions = report.sessions,
                            refresh_tokens = report.refresh_tokens,
                            password_resets = report.password_resets,
                            login_attempts = report.login_attempts,
                            outbox = report.outbox,
                            "maintenance sweep removed rows"
                        );
                    } else {
                        debug!("maintenance sweep found nothing");
                    }
                }
            }
        }

        info!("maintenance stopped");
    }
}

pub fn spawn_maintenance(
    maintenance: Maintenance,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(maintenance.run(shutdown))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cache::MemoryCache,
        outbox::{LogPublisher, OutboxConfig},
        session::{ClientInfo, DEFAULT_SESSION_TTL_SECONDS},
        store::{memory::MemoryStore, LoginAttempt},
    };
    use anyhow::Result;
    use std::sync::Arc;
    use uuid::Uuid;

    fn maintenance(store: &Arc<MemoryStore>) -> Maintenance {
        let stores = Stores::from_backend(store);
        let sessions = SessionStore::new(
            stores.sessions.clone(),
            Arc::new(MemoryCache::new()),
            Duration::from_secs(DEFAULT_SESSION_TTL_SECONDS),
            Duration::from_secs(60),
        );
        let outbox = OutboxPublisher::new(
            stores.outbox.clone(),
            Arc::new(LogPublisher),
            OutboxConfig::new(),
        );
        Maintenance::new(
            stores,
            sessions,
            outbox,
            MaintenanceConfig::new().with_login_attempt_retention_days(30),
        )
    }

    #[tokio::test]
    async fn sweep_drops_expired_sessions_and_old_attempts() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let maintenance = maintenance(&store);
        let now = Utc::now();
        let account_id = Uuid::new_v4();

        let stale = maintenance
            .sessions
            .create(
                account_id,
                "alice@example.com",
                &ClientInfo::default(),
                now - chrono::Duration::days(31),
            )
            .await?;
        let fresh = maintenance
            .sessions
            .create(account_id, "alice@example.com", &ClientInfo::default(), now)
            .await?;

        for days in [40, 1] {
            maintenance
                .stores
                .attempts
                .record(LoginAttempt {
                    account_id: Some(account_id),
                    email: "alice@example.com".to_string(),
                    ip: None,
                    success: true,
                    reason: "success",
                    attempted_at: now - chrono::Duration::days(days),
                })
                .await?;
        }

        let report = maintenance.sweep(now).await;
        assert_eq!(report.sessions, 1);
        assert_eq!(report.login_attempts, 1);
        assert!(store.session(stale.id).await.is_none());
        assert!(store.session(fresh.id).await.is_some());
        assert_eq!(store.login_attempts().await.len(), 1);
        Ok(())
    }

    #[test]
    fn interval_is_never_zero() {
        assert_eq!(
            MaintenanceConfig::new().with_interval_seconds(0).interval(),
            Duration::from_secs(1)
        );
    }
}
