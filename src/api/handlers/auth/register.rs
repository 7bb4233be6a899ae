use super::types::{EmailRequest, RegisterRequest, VerifyEmailQuery};
use crate::{
    api::{
        client_ip::ClientIp,
        response::{self, ErrorEnvelope},
    },
    auth::{self, AccountView, AuthService},
    error::AuthError,
};
use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    response::{Json, Response},
};
use std::sync::Arc;

#[utoipa::path(
    post,
    path = "/v1/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created; verification email queued", body = AccountView),
        (status = 400, description = "Malformed email or weak password", body = ErrorEnvelope),
        (status = 409, description = "Email already registered", body = ErrorEnvelope),
        (status = 429, description = "Too many requests", body = ErrorEnvelope),
    ),
    tag = "auth"
)]
pub async fn register(
    client_ip: ClientIp,
    service: Extension<Arc<AuthService>>,
    Json(request): Json<RegisterRequest>,
) -> Result<Response, AuthError> {
    let account = service
        .register(auth::RegisterRequest {
            email: request.email,
            password: request.password,
            name: request.name,
            ip: client_ip.known(),
        })
        .await?;

    Ok(response::with_status(
        StatusCode::CREATED,
        Some("Registration successful. Check your email to verify the account."),
        account,
    ))
}

#[utoipa::path(
    get,
    path = "/v1/auth/verify-email",
    params(VerifyEmailQuery),
    responses(
        (status = 200, description = "Email verified", body = AccountView),
        (status = 401, description = "Invalid or expired verification link", body = ErrorEnvelope),
    ),
    tag = "auth"
)]
pub async fn verify_email(
    client_ip: ClientIp,
    service: Extension<Arc<AuthService>>,
    Query(query): Query<VerifyEmailQuery>,
) -> Result<Response, AuthError> {
    let account = service
        .verify_email(&query.token, client_ip.known())
        .await?;
    Ok(response::ok(account))
}

#[utoipa::path(
    post,
    path = "/v1/auth/resend-verification",
    request_body = EmailRequest,
    responses(
        (status = 200, description = "A new link was sent if the account exists and is unverified"),
        (status = 400, description = "Malformed email", body = ErrorEnvelope),
    ),
    tag = "auth"
)]
pub async fn resend_verification(
    service: Extension<Arc<AuthService>>,
    Json(request): Json<EmailRequest>,
) -> Result<Response, AuthError> {
    service.resend_verification(&request.email).await?;
    Ok(response::message(
        "If the account exists and is unverified, a new verification email is on its way",
    ))
}
