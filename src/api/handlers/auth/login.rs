use super::{
    types::{LoginRequest, LoginResponse},
    utils::client_info,
};
use crate::{
    api::{
        client_ip::ClientIp,
        response::{self, ErrorEnvelope},
    },
    auth::{self, AuthService},
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
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Session opened; access and refresh tokens issued", body = LoginResponse),
        (status = 400, description = "Missing email or password", body = ErrorEnvelope),
        (status = 401, description = "Invalid credentials or MFA code", body = ErrorEnvelope),
        (status = 403, description = "Account unverified, locked or disabled", body = ErrorEnvelope),
        (status = 429, description = "Rate limited or temporarily locked out", body = ErrorEnvelope),
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    client_ip: ClientIp,
    service: Extension<Arc<AuthService>>,
    Json(request): Json<LoginRequest>,
) -> Result<Response, AuthError> {
    let outcome = service
        .login(auth::LoginRequest {
            email: request.email,
            password: request.password,
            mfa_code: request.mfa_code,
            client: client_info(&headers, &client_ip),
        })
        .await?;

    let mut response = response::ok(LoginResponse {
        account: outcome.account,
        session_id: outcome.session_id,
        tokens: outcome.tokens,
    });
    if let Some(status) = &outcome.rate_limit {
        response::apply_rate_limit_headers(response.headers_mut(), status);
    }
    Ok(response)
}
