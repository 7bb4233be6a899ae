//! Time-based one-time codes as a second factor.

pub mod code;
pub mod crypto;
pub mod models;
pub mod repo;
pub mod service;

pub use code::{Enrollment, OneTimeCodeVerifier};
pub use crypto::SeedCipher;
pub use models::{MfaKind, MfaMethod, MfaMethodSummary};
pub use repo::MfaStore;
pub use service::{TotpConfig, TotpService, TotpSetup, DEFAULT_TOTP_ISSUER};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TotpError {
    #[error("invalid TOTP secret: {0}")]
    Secret(String),
    #[error("MFA secret key must be 32 bytes of base64")]
    Key,
    #[error("seed encryption failure")]
    Cipher,
    #[error("sealed seed is truncated")]
    Malformed,
}
