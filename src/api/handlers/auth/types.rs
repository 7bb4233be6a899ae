//! Request and response bodies of the `/v1/auth` routes.

use crate::{auth::AccountView, token::IssuedTokens};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

#[derive(Deserialize, Debug, ToSchema)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    /// Display name; defaults to the local part of the email.
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    /// Current TOTP code, required once TOTP is enabled.
    #[serde(default)]
    pub mfa_code: Option<String>,
}

#[derive(Serialize, Debug, ToSchema)]
pub struct LoginResponse {
    pub account: AccountView,
    pub session_id: Uuid,
    pub tokens: IssuedTokens,
}

#[derive(Deserialize, Debug, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct VerifyEmailQuery {
    /// Token from the verification link.
    pub token: String,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct EmailRequest {
    pub email: String,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct PasswordResetConfirmRequest {
    pub token: String,
    pub new_password: String,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Deserialize, Debug, Default, ToSchema)]
pub struct RevokeAllRequest {
    /// Keep the session that makes the request.
    #[serde(default)]
    pub keep_current: bool,
}

#[derive(Serialize, Debug, ToSchema)]
pub struct RevokeAllResponse {
    pub revoked: usize,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct MfaCodeRequest {
    pub code: String,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct MfaDisableRequest {
    pub password: String,
}
