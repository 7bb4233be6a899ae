//! Shared wiring for the integration suite: the whole core over the
//! in-memory store and cache.

#![allow(dead_code)]

use anyhow::{Context, Result};
use custodia::{
    auth::{AuthConfig, AuthService, LoginRequest, RegisterRequest},
    cache::MemoryCache,
    password::PasswordHasher,
    rate_limit::{RateLimitConfig, RateLimiter},
    session::{ClientInfo, SessionStore, DEFAULT_SESSION_TTL_SECONDS},
    store::{memory::MemoryStore, Stores},
    token::{TokenConfig, TokenIssuer},
    totp::{SeedCipher, TotpConfig, TotpService},
};
use secrecy::SecretString;
use std::{sync::Arc, time::Duration};

pub const PASSWORD: &str = "Str0ng!Pass";
pub const CLIENT_IP: &str = "198.51.100.23";

pub struct TestApp {
    pub store: Arc<MemoryStore>,
    pub cache: Arc<MemoryCache>,
    pub service: Arc<AuthService>,
}

impl TestApp {
    pub fn new() -> Result<Self> {
        Self::with_limits(RateLimitConfig::new())
    }

    pub fn with_limits(limits: RateLimitConfig) -> Result<Self> {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(MemoryCache::new());
        let stores = Stores::from_backend(&store);

        let token_config = TokenConfig::new().with_issuer("custodia-it");
        let sessions = SessionStore::new(
            stores.sessions.clone(),
            cache.clone(),
            Duration::from_secs(DEFAULT_SESSION_TTL_SECONDS),
            token_config.access_ttl(),
        );
        let tokens = TokenIssuer::new(
            &SecretString::from("integration-jwt-secret".to_string()),
            &SecretString::from("integration-pepper".to_string()),
            token_config,
        )?;
        let totp = TotpService::new(
            stores.mfa.clone(),
            SeedCipher::new(&[7u8; 32]),
            &TotpConfig::new().with_issuer("Custodia IT"),
        );

        let service = AuthService::new(
            stores,
            sessions,
            tokens,
            // Cheap parameters; the hash format is what matters here.
            PasswordHasher::with_cost(64, 1, 1)?,
            RateLimiter::new(cache.clone(), limits),
            totp,
            AuthConfig::new("https://app.custodia.test".to_string()),
        );

        Ok(Self {
            store,
            cache,
            service: Arc::new(service),
        })
    }

    /// Raw token carried by the newest outbox payload that has `field`.
    pub async fn link_token(&self, field: &str) -> Option<String> {
        self.store
            .outbox_records()
            .await
            .iter()
            .rev()
            .find_map(|record| record.payload.get(field)?.as_str().map(str::to_string))
            .and_then(|link| link.split("token=").nth(1).map(str::to_string))
    }

    /// Register and verify `email` with [`PASSWORD`].
    pub async fn verified_account(&self, email: &str) -> Result<uuid::Uuid> {
        let account = self
            .service
            .register(RegisterRequest {
                email: email.to_string(),
                password: PASSWORD.to_string(),
                name: None,
                ip: Some(CLIENT_IP.to_string()),
            })
            .await?;
        let token = self
            .link_token("verification_link")
            .await
            .context("verification link not queued")?;
        self.service.verify_email(&token, None).await?;
        Ok(account.id)
    }
}

pub fn login_request(email: &str, password: &str) -> LoginRequest {
    LoginRequest {
        email: email.to_string(),
        password: password.to_string(),
        mfa_code: None,
        client: ClientInfo {
            user_agent: Some("integration-suite/1.0".to_string()),
            ip: Some(CLIENT_IP.to_string()),
        },
    }
}
