use super::{
    principal::require_auth,
    types::{RevokeAllRequest, RevokeAllResponse},
};
use crate::{
    api::{
        client_ip::ClientIp,
        response::{self, ErrorEnvelope},
    },
    auth::{AuthService, SessionView},
    error::AuthError,
};
use axum::{
    extract::{Extension, Path},
    http::HeaderMap,
    response::{Json, Response},
};
use std::sync::Arc;
use uuid::Uuid;

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    responses(
        (status = 200, description = "Session ended"),
        (status = 401, description = "Not authenticated", body = ErrorEnvelope),
    ),
    security(("bearer" = [])),
    tag = "sessions"
)]
pub async fn logout(
    headers: HeaderMap,
    client_ip: ClientIp,
    service: Extension<Arc<AuthService>>,
) -> Result<Response, AuthError> {
    let principal = require_auth(&headers, &service).await?;
    service
        .logout(&principal, client_ip.known())
        .await?;
    Ok(response::message("Logged out"))
}

#[utoipa::path(
    get,
    path = "/v1/auth/sessions",
    responses(
        (status = 200, description = "Active sessions of the caller", body = [SessionView]),
        (status = 401, description = "Not authenticated", body = ErrorEnvelope),
    ),
    security(("bearer" = [])),
    tag = "sessions"
)]
pub async fn list_sessions(
    headers: HeaderMap,
    service: Extension<Arc<AuthService>>,
) -> Result<Response, AuthError> {
    let principal = require_auth(&headers, &service).await?;
    let sessions = service.list_sessions(&principal).await?;
    Ok(response::ok(sessions))
}

#[utoipa::path(
    delete,
    path = "/v1/auth/sessions/{session_id}",
    params(("session_id" = Uuid, Path, description = "Session to revoke")),
    responses(
        (status = 200, description = "Session revoked"),
        (status = 401, description = "Not authenticated", body = ErrorEnvelope),
        (status = 404, description = "No such active session for the caller", body = ErrorEnvelope),
    ),
    security(("bearer" = [])),
    tag = "sessions"
)]
pub async fn revoke_session(
    headers: HeaderMap,
    client_ip: ClientIp,
    service: Extension<Arc<AuthService>>,
    Path(session_id): Path<Uuid>,
) -> Result<Response, AuthError> {
    let principal = require_auth(&headers, &service).await?;
    service
        .revoke_session(&principal, session_id, client_ip.known())
        .await?;
    Ok(response::message("Session revoked"))
}

#[utoipa::path(
    post,
    path = "/v1/auth/sessions/revoke-all",
    request_body(content = RevokeAllRequest, description = "Defaults to revoking every session"),
    responses(
        (status = 200, description = "Sessions revoked", body = RevokeAllResponse),
        (status = 401, description = "Not authenticated", body = ErrorEnvelope),
    ),
    security(("bearer" = [])),
    tag = "sessions"
)]
pub async fn revoke_all_sessions(
    headers: HeaderMap,
    client_ip: ClientIp,
    service: Extension<Arc<AuthService>>,
    request: Option<Json<RevokeAllRequest>>,
) -> Result<Response, AuthError> {
    let principal = require_auth(&headers, &service).await?;
    let request = request.map(|Json(body)| body).unwrap_or_default();
    let revoked = service
        .revoke_all_sessions(&principal, request.keep_current, client_ip.known())
        .await?;
    Ok(response::ok(RevokeAllResponse { revoked }))
}
