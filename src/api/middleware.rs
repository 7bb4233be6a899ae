//! Per-IP, per-route request throttling.

use super::{client_ip::ClientIp, handlers::auth::LOGIN_PATH, response};
use crate::{auth::AuthService, rate_limit::UNKNOWN_CLIENT};
use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use std::sync::Arc;

const THROTTLED_PREFIX: &str = "/v1/";

/// Count the request against the `{ip, route}` window and decorate the
/// response with the `X-RateLimit-*` headers.
///
/// Only `/v1/` routes are throttled, login excluded. Requests without a
/// resolvable client IP share the unknown-client window.
pub async fn rate_limit(
    State(service): State<Arc<AuthService>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path();
    if !path.starts_with(THROTTLED_PREFIX) || path == LOGIN_PATH {
        return next.run(request).await;
    }

    let ip = request
        .extensions()
        .get::<ClientIp>()
        .map_or(UNKNOWN_CLIENT, ClientIp::as_str)
        .to_string();

    // Parameterized routes share one window.
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| path.to_string(), |matched| matched.as_str().to_string());

    match service.limiter().check_ip(&ip, &route, Utc::now()).await {
        Ok(status) => {
            let mut response = next.run(request).await;
            if let Some(status) = status {
                response::apply_rate_limit_headers(response.headers_mut(), &status);
            }
            response
        }
        Err(err) => err.into_response(),
    }
}
