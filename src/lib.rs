//! # Custodia (Identity & Session Authority)
//!
//! `custodia` owns registration, credential verification, multi-factor
//! authentication, session issuance, token rotation, brute-force throttling and
//! the reliable propagation of identity events to other services.
//!
//! ## Sessions
//!
//! A session lives in two places. The Postgres row is the source of truth and
//! survives cache loss. The Redis entry is a projection used on the request fast
//! path; it may be missing for a valid session, in which case the durable row is
//! consulted and the projection rebuilt. A cached projection that names a
//! different account than the presented token is a hard rejection.
//!
//! ## Tokens
//!
//! Access tokens are short-lived HS256 JWTs bound to an account and a session.
//! Refresh tokens are opaque random values stored only as keyed hashes. They are
//! single use: every refresh consumes the presented token with a conditional
//! update and mints a new one for the same session.
//!
//! ## Throttling
//!
//! Requests pass a sliding-window limiter keyed by client IP and route. Login
//! additionally runs a per-account window whose allowance shrinks as failures
//! accumulate, and a time-boxed lock once failures reach the lock threshold. A
//! successful login clears the counter, the lock and the account window in one
//! cache operation.
//!
//! ## Identity events
//!
//! State changes that other services care about are written to an outbox table
//! in the same transaction as the change. A background publisher drains pending
//! rows to the broker (AMQP) and marks them published; delivery is at least once.

pub mod api;
pub mod auth;
pub mod cache;
pub mod cli;
pub mod error;
pub mod maintenance;
pub mod outbox;
pub mod password;
pub mod rate_limit;
pub mod session;
pub mod store;
pub mod token;
pub mod totp;
pub mod webauthn;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
