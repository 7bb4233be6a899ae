//! In-process implementation of every store trait.
//!
//! One lock guards all tables, so each trait method is atomic the same way a
//! Postgres transaction would be. Used by the test suites and for local runs
//! without a database.

use super::{
    Account, AccountStatus, AccountStore, AuditRecord, LoginAttempt, LoginAttemptStore,
    NewAccount, PasswordReset, StoreError, VerificationState,
};
use crate::{
    outbox::{NewOutboxEvent, OutboxRecord, OutboxStore},
    session::{repo::SessionRepo, Session},
    token::repo::{RefreshTokenRecord, RefreshTokenStore},
    totp::{models::MfaMethod, repo::MfaStore, MfaKind},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Profile {
    pub display_name: String,
    pub locale: String,
    pub timezone: String,
}

#[derive(Default)]
struct State {
    accounts: HashMap<Uuid, Account>,
    profiles: HashMap<Uuid, Profile>,
    audit: Vec<AuditRecord>,
    attempts: Vec<LoginAttempt>,
    resets: HashMap<Uuid, PasswordReset>,
    sessions: HashMap<Uuid, Session>,
    refresh_tokens: HashMap<Uuid, RefreshTokenRecord>,
    mfa: Vec<MfaMethod>,
    outbox: Vec<OutboxRecord>,
    next_outbox_id: i64,
}

impl State {
    fn push_event(&mut self, event: &NewOutboxEvent, created_at: DateTime<Utc>) {
        self.next_outbox_id += 1;
        self.outbox.push(OutboxRecord {
            id: self.next_outbox_id,
            aggregate_id: event.aggregate_id,
            topic: event.topic.to_string(),
            event_type: event.event_type.to_string(),
            payload: event.payload.clone(),
            created_at,
            published_at: None,
        });
    }

    fn revoke_refresh_for(&mut self, session_ids: &[Uuid], now: DateTime<Utc>) {
        for token in self.refresh_tokens.values_mut() {
            if session_ids.contains(&token.session_id) && token.revoked_at.is_none() {
                token.revoked_at = Some(now);
            }
        }
    }

    fn set_password(&mut self, account_id: Uuid, password_hash: &str, now: DateTime<Utc>) {
        if let Some(account) = self.accounts.get_mut(&account_id) {
            account.password_hash = password_hash.to_string();
            account.updated_at = now;
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn outbox_records(&self) -> Vec<OutboxRecord> {
        self.state.lock().await.outbox.clone()
    }

    pub async fn login_attempts(&self) -> Vec<LoginAttempt> {
        self.state.lock().await.attempts.clone()
    }

    pub async fn audit_actions(&self) -> Vec<&'static str> {
        self.state
            .lock()
            .await
            .audit
            .iter()
            .map(|audit| audit.action)
            .collect()
    }

    pub async fn profile(&self, account_id: Uuid) -> Option<Profile> {
        self.state.lock().await.profiles.get(&account_id).cloned()
    }

    pub async fn session(&self, session_id: Uuid) -> Option<Session> {
        self.state.lock().await.sessions.get(&session_id).cloned()
    }

    pub async fn refresh_tokens_for(&self, session_id: Uuid) -> Vec<RefreshTokenRecord> {
        self.state
            .lock()
            .await
            .refresh_tokens
            .values()
            .filter(|token| token.session_id == session_id)
            .cloned()
            .collect()
    }

    /// Moderation hook: force an account status.
    pub async fn set_status(&self, account_id: Uuid, status: AccountStatus) {
        if let Some(account) = self.state.lock().await.accounts.get_mut(&account_id) {
            account.status = status;
        }
    }

    /// Rewrite verification expiry, e.g. to simulate an expired link.
    pub async fn set_verification_expiry(&self, account_id: Uuid, expires_at: Option<DateTime<Utc>>) {
        if let Some(account) = self.state.lock().await.accounts.get_mut(&account_id) {
            account.verification_expires_at = expires_at;
        }
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn register(
        &self,
        account: NewAccount,
        audit: AuditRecord,
        event: NewOutboxEvent,
    ) -> Result<Account, StoreError> {
        let mut state = self.state.lock().await;
        if state.accounts.values().any(|existing| existing.email == account.email) {
            return Err(StoreError::Conflict("accounts_email_key".to_string()));
        }

        let stored = Account {
            id: account.id,
            email: account.email,
            password_hash: account.password_hash,
            verification: VerificationState::Unverified,
            verification_token_hash: Some(account.verification_token_hash),
            verification_expires_at: Some(account.verification_expires_at),
            status: AccountStatus::Active,
            last_login_at: None,
            last_login_ip: None,
            lockout_until: None,
            created_at: account.created_at,
            updated_at: account.created_at,
        };
        state.accounts.insert(stored.id, stored.clone());
        state.profiles.insert(
            stored.id,
            Profile {
                display_name: account.display_name,
                locale: account.locale,
                timezone: account.timezone,
            },
        );
        state.audit.push(audit);
        state.push_event(&event, stored.created_at);
        Ok(stored)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, StoreError> {
        Ok(self.state.lock().await.accounts.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .accounts
            .values()
            .find(|account| account.email == email)
            .cloned())
    }

    async fn find_by_verification_hash(&self, hash: &[u8]) -> Result<Option<Account>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .accounts
            .values()
            .find(|account| account.verification_token_hash.as_deref() == Some(hash))
            .cloned())
    }

    async fn mark_verified(
        &self,
        account_id: Uuid,
        audit: AuditRecord,
        event: NewOutboxEvent,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let at = audit.created_at;
        match state.accounts.get_mut(&account_id) {
            Some(account) if account.verification == VerificationState::Unverified => {
                account.verification = VerificationState::Verified;
                account.verification_expires_at = None;
                account.updated_at = at;
            }
            _ => return Ok(false),
        }
        state.audit.push(audit);
        state.push_event(&event, at);
        Ok(true)
    }

    async fn replace_verification_token(
        &self,
        account_id: Uuid,
        token_hash: Vec<u8>,
        expires_at: DateTime<Utc>,
        event: NewOutboxEvent,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        match state.accounts.get_mut(&account_id) {
            Some(account) if account.verification == VerificationState::Unverified => {
                account.verification_token_hash = Some(token_hash);
                account.verification_expires_at = Some(expires_at);
                account.updated_at = now;
            }
            _ => return Ok(false),
        }
        state.push_event(&event, now);
        Ok(true)
    }

    async fn record_login(
        &self,
        account_id: Uuid,
        ip: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if let Some(account) = self.state.lock().await.accounts.get_mut(&account_id) {
            account.last_login_at = Some(at);
            account.last_login_ip = ip.map(str::to_string);
            account.updated_at = at;
        }
        Ok(())
    }

    async fn create_password_reset(
        &self,
        reset: PasswordReset,
        audit: AuditRecord,
        event: NewOutboxEvent,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state
            .resets
            .retain(|_, existing| existing.account_id != reset.account_id || existing.consumed_at.is_some());
        let at = reset.created_at;
        state.resets.insert(reset.id, reset);
        state.audit.push(audit);
        state.push_event(&event, at);
        Ok(())
    }

    async fn find_password_reset(
        &self,
        token_hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Option<PasswordReset>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .resets
            .values()
            .find(|reset| {
                reset.token_hash == token_hash && reset.consumed_at.is_none() && reset.expires_at > now
            })
            .cloned())
    }

    async fn complete_password_reset(
        &self,
        reset_id: Uuid,
        password_hash: &str,
        now: DateTime<Utc>,
        audit: AuditRecord,
        event: NewOutboxEvent,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let account_id = match state.resets.get_mut(&reset_id) {
            Some(reset) if reset.consumed_at.is_none() && reset.expires_at > now => {
                reset.consumed_at = Some(now);
                reset.account_id
            }
            _ => return Ok(false),
        };
        state.set_password(account_id, password_hash, now);
        state.audit.push(audit);
        state.push_event(&event, now);
        Ok(true)
    }

    async fn update_password(
        &self,
        account_id: Uuid,
        password_hash: &str,
        audit: AuditRecord,
        event: NewOutboxEvent,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let at = audit.created_at;
        state.set_password(account_id, password_hash, at);
        state.audit.push(audit);
        state.push_event(&event, at);
        Ok(())
    }

    async fn record_audit(&self, audit: AuditRecord) -> Result<(), StoreError> {
        self.state.lock().await.audit.push(audit);
        Ok(())
    }

    async fn delete_expired_password_resets(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let before = state.resets.len();
        state
            .resets
            .retain(|_, reset| reset.expires_at > now && reset.consumed_at.is_none());
        Ok((before - state.resets.len()) as u64)
    }
}

#[async_trait]
impl LoginAttemptStore for MemoryStore {
    async fn record(&self, attempt: LoginAttempt) -> Result<(), StoreError> {
        self.state.lock().await.attempts.push(attempt);
        Ok(())
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let before = state.attempts.len();
        state.attempts.retain(|attempt| attempt.attempted_at >= cutoff);
        Ok((before - state.attempts.len()) as u64)
    }
}

#[async_trait]
impl SessionRepo for MemoryStore {
    async fn insert(&self, session: &Session) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.sessions.contains_key(&session.id) {
            return Err(StoreError::Conflict("sessions_pkey".to_string()));
        }
        state.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn find(&self, id: Uuid) -> Result<Option<Session>, StoreError> {
        Ok(self.state.lock().await.sessions.get(&id).cloned())
    }

    async fn list_active(
        &self,
        account_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, StoreError> {
        let mut sessions: Vec<Session> = self
            .state
            .lock()
            .await
            .sessions
            .values()
            .filter(|session| session.account_id == account_id && session.is_active(now))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn revoke(
        &self,
        session_id: Uuid,
        account_id: Uuid,
        now: DateTime<Utc>,
        audit: Option<AuditRecord>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        match state.sessions.get_mut(&session_id) {
            Some(session) if session.account_id == account_id && session.revoked_at.is_none() => {
                session.revoked_at = Some(now);
            }
            _ => return Ok(false),
        }
        state.revoke_refresh_for(&[session_id], now);
        if let Some(audit) = audit {
            state.audit.push(audit);
        }
        Ok(true)
    }

    async fn revoke_all(
        &self,
        account_id: Uuid,
        except: Option<Uuid>,
        now: DateTime<Utc>,
        audit: Option<AuditRecord>,
    ) -> Result<Vec<Uuid>, StoreError> {
        let mut state = self.state.lock().await;
        let mut revoked = Vec::new();
        for session in state.sessions.values_mut() {
            if session.account_id == account_id
                && session.is_active(now)
                && Some(session.id) != except
            {
                session.revoked_at = Some(now);
                revoked.push(session.id);
            }
        }
        state.revoke_refresh_for(&revoked, now);
        if let Some(audit) = audit {
            state.audit.push(audit);
        }
        Ok(revoked)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let expired: Vec<Uuid> = state
            .sessions
            .values()
            .filter(|session| session.expires_at <= now)
            .map(|session| session.id)
            .collect();
        for id in &expired {
            state.sessions.remove(id);
        }
        state
            .refresh_tokens
            .retain(|_, token| !expired.contains(&token.session_id));
        Ok(expired.len() as u64)
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryStore {
    async fn insert(&self, record: &RefreshTokenRecord) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state
            .refresh_tokens
            .values()
            .any(|token| token.token_hash == record.token_hash)
        {
            return Err(StoreError::Conflict("refresh_tokens_token_hash_key".to_string()));
        }
        state.refresh_tokens.insert(record.id, record.clone());
        Ok(())
    }

    async fn consume(
        &self,
        token_hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        let mut state = self.state.lock().await;
        Ok(state
            .refresh_tokens
            .values_mut()
            .find(|token| token.token_hash == token_hash && token.is_usable(now))
            .map(|token| {
                token.consumed_at = Some(now);
                token.clone()
            }))
    }

    async fn revoke(
        &self,
        token_hash: &[u8],
        account_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        Ok(state
            .refresh_tokens
            .values_mut()
            .find(|token| {
                token.token_hash == token_hash
                    && token.account_id == account_id
                    && token.revoked_at.is_none()
            })
            .map(|token| token.revoked_at = Some(now))
            .is_some())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let before = state.refresh_tokens.len();
        state.refresh_tokens.retain(|_, token| token.is_usable(now));
        Ok((before - state.refresh_tokens.len()) as u64)
    }
}

#[async_trait]
impl MfaStore for MemoryStore {
    async fn save_pending(&self, method: &MfaMethod) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state
            .mfa
            .iter_mut()
            .find(|existing| existing.account_id == method.account_id && existing.kind == method.kind)
        {
            if existing.enabled {
                return Err(StoreError::Conflict("mfa_methods_account_id_kind_key".to_string()));
            }
            *existing = method.clone();
            existing.enabled = false;
            return Ok(());
        }
        let mut pending = method.clone();
        pending.enabled = false;
        state.mfa.push(pending);
        Ok(())
    }

    async fn find(&self, account_id: Uuid, kind: MfaKind) -> Result<Option<MfaMethod>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .mfa
            .iter()
            .find(|method| method.account_id == account_id && method.kind == kind)
            .cloned())
    }

    async fn enable(
        &self,
        method_id: Uuid,
        account_id: Uuid,
        audit: AuditRecord,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        match state
            .mfa
            .iter_mut()
            .find(|method| method.id == method_id && method.account_id == account_id)
        {
            Some(method) if !method.enabled => method.enabled = true,
            _ => return Ok(false),
        }
        state.audit.push(audit);
        Ok(true)
    }

    async fn touch(&self, method_id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        if let Some(method) = self
            .state
            .lock()
            .await
            .mfa
            .iter_mut()
            .find(|method| method.id == method_id)
        {
            method.last_used_at = Some(at);
        }
        Ok(())
    }

    async fn remove(
        &self,
        account_id: Uuid,
        kind: MfaKind,
        audit: AuditRecord,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let before = state.mfa.len();
        state
            .mfa
            .retain(|method| !(method.account_id == account_id && method.kind == kind));
        if state.mfa.len() == before {
            return Ok(false);
        }
        state.audit.push(audit);
        Ok(true)
    }

    async fn list(&self, account_id: Uuid) -> Result<Vec<MfaMethod>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .mfa
            .iter()
            .filter(|method| method.account_id == account_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl OutboxStore for MemoryStore {
    async fn pending(&self, limit: usize) -> Result<Vec<OutboxRecord>, StoreError> {
        let state = self.state.lock().await;
        let mut pending: Vec<OutboxRecord> = state
            .outbox
            .iter()
            .filter(|record| record.is_pending())
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        pending.truncate(limit);
        Ok(pending)
    }

    async fn mark_published(&self, id: i64, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        Ok(state
            .outbox
            .iter_mut()
            .find(|record| record.id == id && record.is_pending())
            .map(|record| record.published_at = Some(at))
            .is_some())
    }

    async fn delete_published_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let before = state.outbox.len();
        state
            .outbox
            .retain(|record| record.published_at.map_or(true, |at| at >= cutoff));
        Ok((before - state.outbox.len()) as u64)
    }
}
