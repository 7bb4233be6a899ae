use crate::{
    auth::AuthConfig,
    password::{PasswordPolicy, DEFAULT_MIN_CLASSES, DEFAULT_MIN_LENGTH},
    totp::TotpConfig,
};
use anyhow::bail;
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_FRONTEND_BASE_URL: &str = "frontend-base-url";
pub const ARG_VERIFICATION_TTL_SECONDS: &str = "verification-ttl-seconds";
pub const ARG_RESET_TTL_SECONDS: &str = "reset-ttl-seconds";
pub const ARG_SESSION_TTL_SECONDS: &str = "session-ttl-seconds";
pub const ARG_PASSWORD_MIN_LENGTH: &str = "password-min-length";
pub const ARG_PASSWORD_MIN_CLASSES: &str = "password-min-classes";
pub const ARG_MFA_SECRET_KEY: &str = "mfa-secret-key";
pub const ARG_TOTP_ISSUER: &str = "totp-issuer";

#[derive(Debug, Clone)]
pub struct Options {
    pub frontend_base_url: String,
    pub verification_ttl_seconds: i64,
    pub reset_ttl_seconds: i64,
    pub session_ttl_seconds: u64,
    pub password_min_length: usize,
    pub password_min_classes: usize,
    pub mfa_secret_key: SecretString,
    pub totp_issuer: String,
}

impl Options {
    /// Parse account flow arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the MFA key is missing.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let Some(mfa_secret_key) = matches
            .get_one::<String>(ARG_MFA_SECRET_KEY)
            .filter(|value| !value.trim().is_empty())
        else {
            bail!("missing required argument: --{ARG_MFA_SECRET_KEY}");
        };

        Ok(Self {
            frontend_base_url: matches
                .get_one::<String>(ARG_FRONTEND_BASE_URL)
                .cloned()
                .unwrap_or_default(),
            verification_ttl_seconds: matches
                .get_one::<i64>(ARG_VERIFICATION_TTL_SECONDS)
                .copied()
                .unwrap_or(86_400),
            reset_ttl_seconds: matches
                .get_one::<i64>(ARG_RESET_TTL_SECONDS)
                .copied()
                .unwrap_or(3_600),
            session_ttl_seconds: matches
                .get_one::<u64>(ARG_SESSION_TTL_SECONDS)
                .copied()
                .unwrap_or(crate::session::DEFAULT_SESSION_TTL_SECONDS),
            password_min_length: matches
                .get_one::<usize>(ARG_PASSWORD_MIN_LENGTH)
                .copied()
                .unwrap_or(DEFAULT_MIN_LENGTH),
            password_min_classes: matches
                .get_one::<usize>(ARG_PASSWORD_MIN_CLASSES)
                .copied()
                .unwrap_or(DEFAULT_MIN_CLASSES),
            mfa_secret_key: SecretString::from(mfa_secret_key.clone()),
            totp_issuer: matches
                .get_one::<String>(ARG_TOTP_ISSUER)
                .cloned()
                .unwrap_or_else(|| crate::totp::DEFAULT_TOTP_ISSUER.to_string()),
        })
    }

    #[must_use]
    pub fn auth_config(&self) -> AuthConfig {
        AuthConfig::new(self.frontend_base_url.clone())
            .with_verification_ttl_seconds(self.verification_ttl_seconds)
            .with_reset_ttl_seconds(self.reset_ttl_seconds)
            .with_password_policy(PasswordPolicy::new(
                self.password_min_length,
                self.password_min_classes,
            ))
    }

    #[must_use]
    pub fn totp_config(&self) -> TotpConfig {
        TotpConfig::new().with_issuer(self.totp_issuer.clone())
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_FRONTEND_BASE_URL)
                .long(ARG_FRONTEND_BASE_URL)
                .help("Frontend base URL used for verification and reset links")
                .env("CUSTODIA_FRONTEND_BASE_URL")
                .default_value("http://localhost:8080"),
        )
        .arg(
            Arg::new(ARG_VERIFICATION_TTL_SECONDS)
                .long(ARG_VERIFICATION_TTL_SECONDS)
                .help("Email verification link TTL in seconds")
                .env("CUSTODIA_VERIFICATION_TTL_SECONDS")
                .default_value("86400")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_RESET_TTL_SECONDS)
                .long(ARG_RESET_TTL_SECONDS)
                .help("Password reset link TTL in seconds")
                .env("CUSTODIA_RESET_TTL_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_SESSION_TTL_SECONDS)
                .long(ARG_SESSION_TTL_SECONDS)
                .help("Session lifetime in seconds")
                .env("CUSTODIA_SESSION_TTL_SECONDS")
                .default_value("2592000")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_PASSWORD_MIN_LENGTH)
                .long(ARG_PASSWORD_MIN_LENGTH)
                .help("Minimum password length")
                .env("CUSTODIA_PASSWORD_MIN_LENGTH")
                .default_value("8")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new(ARG_PASSWORD_MIN_CLASSES)
                .long(ARG_PASSWORD_MIN_CLASSES)
                .help("Character classes a password must mix (lower, upper, digit, symbol)")
                .env("CUSTODIA_PASSWORD_MIN_CLASSES")
                .default_value("3")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new(ARG_MFA_SECRET_KEY)
                .long(ARG_MFA_SECRET_KEY)
                .help("Base64 encoded 32 byte key sealing TOTP seeds at rest")
                .env("CUSTODIA_MFA_SECRET_KEY")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_TOTP_ISSUER)
                .long(ARG_TOTP_ISSUER)
                .help("Issuer label shown in authenticator apps")
                .env("CUSTODIA_TOTP_ISSUER")
                .default_value(crate::totp::DEFAULT_TOTP_ISSUER),
        )
}
