use super::{
    code::OneTimeCodeVerifier,
    crypto::SeedCipher,
    models::{MfaKind, MfaMethod, MfaMethodSummary},
    repo::MfaStore,
};
use crate::{
    error::AuthError,
    store::{AuditRecord, StoreError},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};
use utoipa::ToSchema;
use uuid::Uuid;

pub const DEFAULT_TOTP_ISSUER: &str = "Custodia";

#[derive(Debug, Clone)]
pub struct TotpConfig {
    issuer: String,
}

impl TotpConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            issuer: DEFAULT_TOTP_ISSUER.to_string(),
        }
    }

    #[must_use]
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }
}

impl Default for TotpConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Returned once by setup; the secret is never shown again.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TotpSetup {
    pub method_id: Uuid,
    pub secret: String,
    pub otpauth_uri: String,
}

/// Result of the MFA gate during login.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MfaOutcome {
    NotEnrolled,
    Verified,
}

fn unix_seconds(now: DateTime<Utc>) -> Result<u64, AuthError> {
    u64::try_from(now.timestamp()).map_err(|_| AuthError::Internal("clock before epoch".to_string()))
}

#[derive(Clone)]
pub struct TotpService {
    store: Arc<dyn MfaStore>,
    verifier: OneTimeCodeVerifier,
    cipher: SeedCipher,
}

impl TotpService {
    #[must_use]
    pub fn new(store: Arc<dyn MfaStore>, cipher: SeedCipher, config: &TotpConfig) -> Self {
        Self {
            store,
            verifier: OneTimeCodeVerifier::new(config.issuer()),
            cipher,
        }
    }

    #[must_use]
    pub fn verifier(&self) -> &OneTimeCodeVerifier {
        &self.verifier
    }

    /// Generate and store a pending secret. The method stays disabled until
    /// [`Self::verify_setup`] sees a valid code.
    ///
    /// # Errors
    /// `MfaAlreadyEnabled` when TOTP is already active on the account.
    pub async fn setup(
        &self,
        account_id: Uuid,
        account_email: &str,
        now: DateTime<Utc>,
    ) -> Result<TotpSetup, AuthError> {
        if let Some(existing) = self.store.find(account_id, MfaKind::Totp).await? {
            if existing.enabled {
                return Err(AuthError::MfaAlreadyEnabled);
            }
        }

        let secret = OneTimeCodeVerifier::generate_secret()?;
        let enrollment = self.verifier.enrollment(&secret, account_email)?;
        let method_id = Uuid::new_v4();

        let method = MfaMethod {
            id: method_id,
            account_id,
            kind: MfaKind::Totp,
            secret_ciphertext: self.cipher.seal(&secret, account_id, method_id)?,
            label: Some(account_email.to_string()),
            enabled: false,
            created_at: now,
            last_used_at: None,
        };

        match self.store.save_pending(&method).await {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => return Err(AuthError::MfaAlreadyEnabled),
            Err(err) => return Err(err.into()),
        }

        debug!(%account_id, %method_id, "pending TOTP secret stored");
        Ok(TotpSetup {
            method_id,
            secret: enrollment.secret_base32,
            otpauth_uri: enrollment.otpauth_uri,
        })
    }

    /// Prove possession of the pending secret and enable it.
    ///
    /// # Errors
    /// `MfaMethodNotFound` without a pending setup, `MfaAlreadyEnabled` when
    /// already active, `InvalidMfaCode` for a wrong code.
    pub async fn verify_setup(
        &self,
        account_id: Uuid,
        code: &str,
        now: DateTime<Utc>,
        ip: Option<String>,
    ) -> Result<(), AuthError> {
        let method = self
            .store
            .find(account_id, MfaKind::Totp)
            .await?
            .ok_or(AuthError::MfaMethodNotFound)?;
        if method.enabled {
            return Err(AuthError::MfaAlreadyEnabled);
        }

        if !self.check(&method, code, now)? {
            return Err(AuthError::InvalidMfaCode);
        }

        let audit = AuditRecord::new(account_id, "mfa.enabled", now)
            .with_metadata(serde_json::json!({ "kind": MfaKind::Totp.as_str() }))
            .with_ip(ip);
        if !self.store.enable(method.id, account_id, audit).await? {
            // A concurrent setup replaced the row between read and write.
            return Err(AuthError::MfaMethodNotFound);
        }

        info!(%account_id, "TOTP enabled");
        Ok(())
    }

    /// Login gate. Accounts without enabled TOTP pass through.
    ///
    /// # Errors
    /// `InvalidMfaCode` when TOTP is enabled and the code is missing or wrong.
    pub async fn verify_login(
        &self,
        account_id: Uuid,
        code: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<MfaOutcome, AuthError> {
        let Some(method) = self
            .store
            .find(account_id, MfaKind::Totp)
            .await?
            .filter(|method| method.enabled)
        else {
            return Ok(MfaOutcome::NotEnrolled);
        };

        let code = code.map(str::trim).filter(|code| !code.is_empty());
        let Some(code) = code else {
            return Err(AuthError::InvalidMfaCode);
        };

        if !self.check(&method, code, now)? {
            return Err(AuthError::InvalidMfaCode);
        }

        self.store.touch(method.id, now).await?;
        Ok(MfaOutcome::Verified)
    }

    /// Remove TOTP from the account. The caller re-checks the password first.
    ///
    /// # Errors
    /// `MfaMethodNotFound` when nothing is configured.
    pub async fn disable(
        &self,
        account_id: Uuid,
        now: DateTime<Utc>,
        ip: Option<String>,
    ) -> Result<(), AuthError> {
        let audit = AuditRecord::new(account_id, "mfa.disabled", now)
            .with_metadata(serde_json::json!({ "kind": MfaKind::Totp.as_str() }))
            .with_ip(ip);
        if self.store.remove(account_id, MfaKind::Totp, audit).await? {
            info!(%account_id, "TOTP disabled");
            Ok(())
        } else {
            Err(AuthError::MfaMethodNotFound)
        }
    }

    /// # Errors
    /// Returns an error if the store fails.
    pub async fn list(&self, account_id: Uuid) -> Result<Vec<MfaMethodSummary>, AuthError> {
        Ok(self
            .store
            .list(account_id)
            .await?
            .iter()
            .map(MfaMethodSummary::from)
            .collect())
    }

    fn check(&self, method: &MfaMethod, code: &str, now: DateTime<Utc>) -> Result<bool, AuthError> {
        let secret = self
            .cipher
            .open(&method.secret_ciphertext, method.account_id, method.id)?;
        Ok(self.verifier.verify_at(&secret, code, unix_seconds(now)?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use anyhow::Result;
    use totp_rs::Secret;

    fn service() -> (Arc<MemoryStore>, TotpService) {
        let store = Arc::new(MemoryStore::new());
        let service = TotpService::new(store.clone(), SeedCipher::new(&[3u8; 32]), &TotpConfig::new());
        (store, service)
    }

    fn code_for(service: &TotpService, setup: &TotpSetup, now: DateTime<Utc>) -> Result<String> {
        let secret = Secret::Encoded(setup.secret.clone())
            .to_bytes()
            .map_err(|err| anyhow::anyhow!("{err}"))?;
        Ok(service
            .verifier()
            .code_at(&secret, u64::try_from(now.timestamp())?)?)
    }

    fn wrong_code(code: &str) -> String {
        code.chars()
            .map(|digit| match digit {
                '9' => '0',
                other => char::from(other as u8 + 1),
            })
            .collect()
    }

    #[tokio::test]
    async fn method_is_inactive_until_verified() -> Result<()> {
        let (_, service) = service();
        let account = Uuid::new_v4();
        let now = Utc::now();

        let setup = service.setup(account, "alice@example.com", now).await?;
        assert_eq!(
            service.verify_login(account, None, now).await?,
            MfaOutcome::NotEnrolled
        );

        let code = code_for(&service, &setup, now)?;
        assert!(matches!(
            service.verify_setup(account, &wrong_code(&code), now, None).await,
            Err(AuthError::InvalidMfaCode)
        ));
        service.verify_setup(account, &code, now, None).await?;

        assert!(matches!(
            service.verify_login(account, None, now).await,
            Err(AuthError::InvalidMfaCode)
        ));
        assert_eq!(
            service.verify_login(account, Some(&code), now).await?,
            MfaOutcome::Verified
        );

        let methods = service.list(account).await?;
        assert_eq!(methods.len(), 1);
        assert!(methods[0].enabled);
        assert!(methods[0].last_used_at.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn setup_refuses_when_enabled_and_disable_removes() -> Result<()> {
        let (_, service) = service();
        let account = Uuid::new_v4();
        let now = Utc::now();

        let setup = service.setup(account, "bob@example.com", now).await?;
        let code = code_for(&service, &setup, now)?;
        service.verify_setup(account, &code, now, None).await?;

        assert!(matches!(
            service.setup(account, "bob@example.com", now).await,
            Err(AuthError::MfaAlreadyEnabled)
        ));

        service.disable(account, now, None).await?;
        assert!(service.list(account).await?.is_empty());
        assert!(matches!(
            service.disable(account, now, None).await,
            Err(AuthError::MfaMethodNotFound)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn repeated_setup_replaces_pending_secret() -> Result<()> {
        let (_, service) = service();
        let account = Uuid::new_v4();
        let now = Utc::now();

        let first = service.setup(account, "carol@example.com", now).await?;
        let second = service.setup(account, "carol@example.com", now).await?;
        assert_ne!(first.secret, second.secret);
        assert_eq!(service.list(account).await?.len(), 1);

        let code = code_for(&service, &second, now)?;
        service.verify_setup(account, &code, now, None).await?;
        Ok(())
    }
}
