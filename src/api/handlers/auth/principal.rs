//! Bearer token resolution for authenticated routes.

use crate::{
    auth::{AuthService, Principal},
    error::AuthError,
};
use axum::http::{header::AUTHORIZATION, HeaderMap};

/// Resolve the `Authorization: Bearer` header into the calling principal.
///
/// # Errors
/// `SessionInvalid` when the header is missing, malformed, or names a dead session.
pub(crate) async fn require_auth(
    headers: &HeaderMap,
    auth: &AuthService,
) -> Result<Principal, AuthError> {
    let token = bearer_token(headers).ok_or(AuthError::SessionInvalid)?;
    auth.authenticate(token).await
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn bearer_scheme_is_case_insensitive() {
        assert_eq!(bearer_token(&headers("Bearer abc.def")), Some("abc.def"));
        assert_eq!(bearer_token(&headers("bearer abc.def")), Some("abc.def"));
    }

    #[test]
    fn other_schemes_are_rejected() {
        assert_eq!(bearer_token(&headers("Basic dXNlcjpwYXNz")), None);
        assert_eq!(bearer_token(&headers("Bearer ")), None);
        assert_eq!(bearer_token(&headers("Bearer")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }
}
