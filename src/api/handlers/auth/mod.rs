//! `/v1/auth` handlers.
//!
//! Handlers translate HTTP into calls on [`crate::auth::AuthService`] and back.
//! Authenticated routes resolve the bearer token first via
//! [`principal::require_auth`]; no handler touches a store directly.

pub mod login;
pub mod mfa;
pub mod password;
pub(crate) mod principal;
pub mod register;
pub mod session;
pub mod token;
pub mod types;
pub(crate) mod utils;

/// Path of the login route. The login gate does its own IP accounting, so
/// the generic limiter skips it.
pub const LOGIN_PATH: &str = "/v1/auth/login";
