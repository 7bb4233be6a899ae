use super::{
    principal::require_auth,
    types::{ChangePasswordRequest, EmailRequest, PasswordResetConfirmRequest},
};
use crate::{
    api::{
        client_ip::ClientIp,
        response::{self, ErrorEnvelope},
    },
    auth::AuthService,
    error::AuthError,
};
use axum::{
    extract::Extension,
    http::HeaderMap,
    response::{Json, Response},
};
use std::sync::Arc;

#[utoipa::path(
    post,
    path = "/v1/auth/password-reset",
    request_body = EmailRequest,
    responses(
        (status = 200, description = "A reset link was sent if the account exists"),
        (status = 400, description = "Malformed email", body = ErrorEnvelope),
    ),
    tag = "password"
)]
pub async fn request_reset(
    client_ip: ClientIp,
    service: Extension<Arc<AuthService>>,
    Json(request): Json<EmailRequest>,
) -> Result<Response, AuthError> {
    service
        .request_password_reset(&request.email, client_ip.known())
        .await?;
    Ok(response::message(
        "If the account exists, a password reset email is on its way",
    ))
}

#[utoipa::path(
    post,
    path = "/v1/auth/password-reset/confirm",
    request_body = PasswordResetConfirmRequest,
    responses(
        (status = 200, description = "Password replaced; all sessions revoked"),
        (status = 400, description = "Weak password", body = ErrorEnvelope),
        (status = 401, description = "Invalid, used or expired reset link", body = ErrorEnvelope),
    ),
    tag = "password"
)]
pub async fn confirm_reset(
    client_ip: ClientIp,
    service: Extension<Arc<AuthService>>,
    Json(request): Json<PasswordResetConfirmRequest>,
) -> Result<Response, AuthError> {
    service
        .confirm_password_reset(
            &request.token,
            &request.new_password,
            client_ip.known(),
        )
        .await?;
    Ok(response::message("Password updated. Sign in with the new password."))
}

#[utoipa::path(
    post,
    path = "/v1/auth/password/change",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed; other sessions revoked"),
        (status = 400, description = "Weak password", body = ErrorEnvelope),
        (status = 401, description = "Not authenticated or wrong current password", body = ErrorEnvelope),
    ),
    security(("bearer" = [])),
    tag = "password"
)]
pub async fn change(
    headers: HeaderMap,
    client_ip: ClientIp,
    service: Extension<Arc<AuthService>>,
    Json(request): Json<ChangePasswordRequest>,
) -> Result<Response, AuthError> {
    let principal = require_auth(&headers, &service).await?;
    service
        .change_password(
            &principal,
            &request.current_password,
            &request.new_password,
            client_ip.known(),
        )
        .await?;
    Ok(response::message("Password changed"))
}
