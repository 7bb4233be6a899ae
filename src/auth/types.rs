//! Inputs and outputs of the authentication flows.

use crate::{
    rate_limit::RateLimitStatus,
    session::{ClientInfo, Session},
    store::{Account, AccountStatus, VerificationState},
    token::IssuedTokens,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

/// Public projection of an account. Never carries hashes or tokens.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct AccountView {
    pub id: Uuid,
    pub email: String,
    pub verification: VerificationState,
    pub status: AccountStatus,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl From<&Account> for AccountView {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id,
            email: account.email.clone(),
            verification: account.verification,
            status: account.status,
            created_at: account.created_at,
            last_login_at: account.last_login_at,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: Option<String>,
    pub ip: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub mfa_code: Option<String>,
    pub client: ClientInfo,
}

#[derive(Clone, Debug)]
pub struct LoginOutcome {
    pub account: AccountView,
    pub session_id: Uuid,
    pub tokens: IssuedTokens,
    /// Header values from the login gate, when limiting is active.
    pub rate_limit: Option<RateLimitStatus>,
}

/// Authenticated caller resolved from a bearer token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    pub account_id: Uuid,
    pub email: String,
    pub session_id: Uuid,
}

#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct SessionView {
    pub id: Uuid,
    pub user_agent: Option<String>,
    pub ip: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// True for the session that made the request.
    pub current: bool,
}

impl SessionView {
    #[must_use]
    pub fn new(session: &Session, current_session: Uuid) -> Self {
        Self {
            id: session.id,
            user_agent: session.user_agent.clone(),
            ip: session.ip.clone(),
            created_at: session.created_at,
            expires_at: session.expires_at,
            current: session.id == current_session,
        }
    }
}
