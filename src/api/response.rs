//! Response envelope and error mapping.
//!
//! Every JSON body has the shape `{status, message?, data?, error?}`. Errors
//! carry a stable machine code; internal details stay in the logs.

use crate::{
    error::{AuthError, ErrorKind},
    rate_limit::RateLimitStatus,
};
use axum::{
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use tracing::{debug, error, warn};
use utoipa::ToSchema;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

#[derive(Serialize, Debug)]
pub struct Envelope<T: Serialize> {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

#[derive(Serialize, Debug, ToSchema)]
pub struct ErrorBody {
    pub code: &'static str,
}

/// Documented shape of every error response.
#[derive(Serialize, Debug, ToSchema)]
pub struct ErrorEnvelope {
    /// Always `error`.
    pub status: String,
    pub message: String,
    pub error: ErrorBody,
}

/// `200` with a data payload.
pub fn ok<T: Serialize>(data: T) -> Response {
    with_status(StatusCode::OK, None, data)
}

/// Any status with a message and a data payload.
pub fn with_status<T: Serialize>(status: StatusCode, message: Option<&str>, data: T) -> Response {
    let body = Envelope {
        status: "success",
        message: message.map(str::to_string),
        data: Some(data),
        error: None,
    };
    (status, Json(body)).into_response()
}

/// `200` with only a message.
pub fn message(message: &str) -> Response {
    let body: Envelope<()> = Envelope {
        status: "success",
        message: Some(message.to_string()),
        data: None,
        error: None,
    };
    (StatusCode::OK, Json(body)).into_response()
}

#[must_use]
pub const fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Authentication => StatusCode::UNAUTHORIZED,
        ErrorKind::Authorization => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::RateLimit => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::External => StatusCode::BAD_GATEWAY,
    }
}

/// Write the `X-RateLimit-*` headers, plus `Retry-After` when rejected.
pub fn apply_rate_limit_headers(headers: &mut HeaderMap, status: &RateLimitStatus) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(status.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(status.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(status.reset_at));
    if let Some(retry_after) = status.retry_after {
        headers.insert(
            axum::http::header::RETRY_AFTER,
            HeaderValue::from(retry_after.as_secs().max(1)),
        );
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let code = self.code();
        match kind {
            ErrorKind::Internal => error!(code, "request failed: {self}"),
            ErrorKind::External => warn!(code, "dependency failure: {self}"),
            _ => debug!(code, "request rejected: {self}"),
        }

        let body: Envelope<()> = Envelope {
            status: "error",
            message: Some(self.public_message()),
            data: None,
            error: Some(ErrorBody { code }),
        };
        let mut response = (status_for(kind), Json(body)).into_response();

        match &self {
            Self::RateLimited(status) => apply_rate_limit_headers(response.headers_mut(), status),
            Self::LockedOut { retry_after } => {
                response.headers_mut().insert(
                    axum::http::header::RETRY_AFTER,
                    HeaderValue::from(retry_after.as_secs().max(1)),
                );
            }
            _ => {}
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use axum::http::header::RETRY_AFTER;
    use http_body_util::BodyExt;
    use std::time::Duration;

    async fn json(response: Response) -> Result<serde_json::Value> {
        let bytes = response.into_body().collect().await?.to_bytes();
        Ok(serde_json::from_slice(&bytes)?)
    }

    #[tokio::test]
    async fn credential_errors_share_one_body() -> Result<()> {
        let unknown = AuthError::UserNotFound.into_response();
        let wrong = AuthError::InvalidCredentials.into_response();
        assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json(unknown).await?, json(wrong).await?);
        Ok(())
    }

    #[tokio::test]
    async fn internal_errors_are_masked() -> Result<()> {
        let response = AuthError::Internal("pool timed out".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json(response).await?;
        assert_eq!(body["status"], "error");
        assert_eq!(body["error"]["code"], "INTERNAL_ERROR");
        assert!(!body["message"].as_str().unwrap_or_default().contains("pool"));
        Ok(())
    }

    #[test]
    fn throttling_sets_headers() {
        let status = RateLimitStatus {
            limit: 5,
            remaining: 0,
            reset_at: 1_700_000_060,
            retry_after: Some(Duration::from_secs(12)),
        };
        let response = AuthError::RateLimited(status).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let headers = response.headers();
        assert_eq!(headers.get(X_RATELIMIT_LIMIT).and_then(|v| v.to_str().ok()), Some("5"));
        assert_eq!(headers.get(X_RATELIMIT_REMAINING).and_then(|v| v.to_str().ok()), Some("0"));
        assert_eq!(headers.get(RETRY_AFTER).and_then(|v| v.to_str().ok()), Some("12"));

        let locked = AuthError::LockedOut {
            retry_after: Duration::from_secs(900),
        }
        .into_response();
        assert_eq!(locked.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            locked.headers().get(RETRY_AFTER).and_then(|v| v.to_str().ok()),
            Some("900")
        );
    }

    #[tokio::test]
    async fn success_envelope_omits_empty_fields() -> Result<()> {
        let body = json(message("done")).await?;
        assert_eq!(body, serde_json::json!({"status": "success", "message": "done"}));
        Ok(())
    }
}
