use super::{principal::require_auth, types::RefreshTokenRequest};
use crate::{
    api::response::{self, ErrorEnvelope},
    auth::AuthService,
    error::AuthError,
    token::IssuedTokens,
};
use axum::{
    extract::Extension,
    http::HeaderMap,
    response::{Json, Response},
};
use std::sync::Arc;

#[utoipa::path(
    post,
    path = "/v1/auth/refresh",
    request_body = RefreshTokenRequest,
    responses(
        (status = 200, description = "Token pair rotated; the presented refresh token is spent", body = IssuedTokens),
        (status = 401, description = "Unknown, used or expired refresh token", body = ErrorEnvelope),
    ),
    tag = "auth"
)]
pub async fn refresh(
    service: Extension<Arc<AuthService>>,
    Json(request): Json<RefreshTokenRequest>,
) -> Result<Response, AuthError> {
    let tokens = service.refresh(&request.refresh_token).await?;
    Ok(response::ok(tokens))
}

#[utoipa::path(
    post,
    path = "/v1/auth/revoke",
    request_body = RefreshTokenRequest,
    responses(
        (status = 200, description = "Refresh token revoked"),
        (status = 401, description = "Not authenticated, or the token is not revocable", body = ErrorEnvelope),
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn revoke(
    headers: HeaderMap,
    service: Extension<Arc<AuthService>>,
    Json(request): Json<RefreshTokenRequest>,
) -> Result<Response, AuthError> {
    let principal = require_auth(&headers, &service).await?;
    service
        .revoke_refresh_token(&principal, &request.refresh_token)
        .await?;
    Ok(response::message("Refresh token revoked"))
}
