use super::{
    principal::require_auth,
    types::{MfaCodeRequest, MfaDisableRequest},
};
use crate::{
    api::{
        client_ip::ClientIp,
        response::{self, ErrorEnvelope},
    },
    auth::AuthService,
    error::AuthError,
    totp::{MfaMethodSummary, TotpSetup},
};
use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{Json, Response},
};
use std::sync::Arc;

#[utoipa::path(
    post,
    path = "/v1/auth/mfa/totp/setup",
    responses(
        (status = 201, description = "Pending TOTP method created; confirm it with a code", body = TotpSetup),
        (status = 401, description = "Not authenticated", body = ErrorEnvelope),
        (status = 409, description = "TOTP already enabled", body = ErrorEnvelope),
    ),
    security(("bearer" = [])),
    tag = "mfa"
)]
pub async fn totp_setup(
    headers: HeaderMap,
    service: Extension<Arc<AuthService>>,
) -> Result<Response, AuthError> {
    let principal = require_auth(&headers, &service).await?;
    let setup = service.mfa_setup(&principal).await?;
    Ok(response::with_status(
        StatusCode::CREATED,
        Some("Scan the secret and confirm with a code"),
        setup,
    ))
}

#[utoipa::path(
    post,
    path = "/v1/auth/mfa/totp/verify",
    request_body = MfaCodeRequest,
    responses(
        (status = 200, description = "TOTP enabled"),
        (status = 401, description = "Not authenticated or wrong code", body = ErrorEnvelope),
        (status = 404, description = "No pending TOTP setup", body = ErrorEnvelope),
    ),
    security(("bearer" = [])),
    tag = "mfa"
)]
pub async fn totp_verify(
    headers: HeaderMap,
    client_ip: ClientIp,
    service: Extension<Arc<AuthService>>,
    Json(request): Json<MfaCodeRequest>,
) -> Result<Response, AuthError> {
    let principal = require_auth(&headers, &service).await?;
    service
        .mfa_verify(&principal, &request.code, client_ip.known())
        .await?;
    Ok(response::message("TOTP enabled"))
}

#[utoipa::path(
    post,
    path = "/v1/auth/mfa/totp/disable",
    request_body = MfaDisableRequest,
    responses(
        (status = 200, description = "TOTP removed"),
        (status = 401, description = "Not authenticated or wrong password", body = ErrorEnvelope),
        (status = 404, description = "TOTP is not configured", body = ErrorEnvelope),
    ),
    security(("bearer" = [])),
    tag = "mfa"
)]
pub async fn totp_disable(
    headers: HeaderMap,
    client_ip: ClientIp,
    service: Extension<Arc<AuthService>>,
    Json(request): Json<MfaDisableRequest>,
) -> Result<Response, AuthError> {
    let principal = require_auth(&headers, &service).await?;
    service
        .mfa_disable(&principal, &request.password, client_ip.known())
        .await?;
    Ok(response::message("TOTP disabled"))
}

#[utoipa::path(
    get,
    path = "/v1/auth/mfa/methods",
    responses(
        (status = 200, description = "Configured second factors", body = [MfaMethodSummary]),
        (status = 401, description = "Not authenticated", body = ErrorEnvelope),
    ),
    security(("bearer" = [])),
    tag = "mfa"
)]
pub async fn methods(
    headers: HeaderMap,
    service: Extension<Arc<AuthService>>,
) -> Result<Response, AuthError> {
    let principal = require_auth(&headers, &service).await?;
    let methods = service.mfa_methods(&principal).await?;
    Ok(response::ok(methods))
}

#[utoipa::path(
    post,
    path = "/v1/auth/mfa/webauthn/register",
    responses(
        (status = 400, description = "Security keys are not supported", body = ErrorEnvelope),
        (status = 401, description = "Not authenticated", body = ErrorEnvelope),
    ),
    security(("bearer" = [])),
    tag = "mfa"
)]
pub async fn webauthn_register(
    headers: HeaderMap,
    service: Extension<Arc<AuthService>>,
) -> Result<Response, AuthError> {
    let principal = require_auth(&headers, &service).await?;
    service.webauthn_register(&principal)?;
    Ok(response::message("Security key registered"))
}
