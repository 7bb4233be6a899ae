use crate::token::{
    access::{DEFAULT_ACCESS_TTL_SECONDS, DEFAULT_ISSUER, DEFAULT_REFRESH_TTL_SECONDS},
    TokenConfig,
};
use anyhow::bail;
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_JWT_SECRET: &str = "jwt-secret";
pub const ARG_REFRESH_TOKEN_PEPPER: &str = "refresh-token-pepper";
pub const ARG_JWT_ISSUER: &str = "jwt-issuer";
pub const ARG_ACCESS_TOKEN_TTL_SECONDS: &str = "access-token-ttl-seconds";
pub const ARG_REFRESH_TOKEN_TTL_SECONDS: &str = "refresh-token-ttl-seconds";

#[derive(Debug, Clone)]
pub struct Options {
    pub jwt_secret: SecretString,
    pub refresh_token_pepper: SecretString,
    pub issuer: String,
    pub access_ttl_seconds: u64,
    pub refresh_ttl_seconds: u64,
}

impl Options {
    /// Parse token arguments from matches.
    ///
    /// # Errors
    /// Returns an error if a signing secret is missing.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let secret = |id: &str| {
            matches
                .get_one::<String>(id)
                .filter(|value| !value.trim().is_empty())
                .map(|value| SecretString::from(value.clone()))
        };

        let Some(jwt_secret) = secret(ARG_JWT_SECRET) else {
            bail!("missing required argument: --{ARG_JWT_SECRET}");
        };
        let Some(refresh_token_pepper) = secret(ARG_REFRESH_TOKEN_PEPPER) else {
            bail!("missing required argument: --{ARG_REFRESH_TOKEN_PEPPER}");
        };

        Ok(Self {
            jwt_secret,
            refresh_token_pepper,
            issuer: matches
                .get_one::<String>(ARG_JWT_ISSUER)
                .cloned()
                .unwrap_or_else(|| DEFAULT_ISSUER.to_string()),
            access_ttl_seconds: matches
                .get_one::<u64>(ARG_ACCESS_TOKEN_TTL_SECONDS)
                .copied()
                .unwrap_or(DEFAULT_ACCESS_TTL_SECONDS),
            refresh_ttl_seconds: matches
                .get_one::<u64>(ARG_REFRESH_TOKEN_TTL_SECONDS)
                .copied()
                .unwrap_or(DEFAULT_REFRESH_TTL_SECONDS),
        })
    }

    #[must_use]
    pub fn token_config(&self) -> TokenConfig {
        TokenConfig::new()
            .with_issuer(self.issuer.clone())
            .with_access_ttl_seconds(self.access_ttl_seconds)
            .with_refresh_ttl_seconds(self.refresh_ttl_seconds)
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_JWT_SECRET)
                .long(ARG_JWT_SECRET)
                .help("HMAC secret signing access tokens")
                .env("CUSTODIA_JWT_SECRET")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_REFRESH_TOKEN_PEPPER)
                .long(ARG_REFRESH_TOKEN_PEPPER)
                .help("Key for hashing refresh tokens at rest")
                .env("CUSTODIA_REFRESH_TOKEN_PEPPER")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_JWT_ISSUER)
                .long(ARG_JWT_ISSUER)
                .help("Issuer (iss) of access tokens")
                .env("CUSTODIA_JWT_ISSUER")
                .default_value(DEFAULT_ISSUER),
        )
        .arg(
            Arg::new(ARG_ACCESS_TOKEN_TTL_SECONDS)
                .long(ARG_ACCESS_TOKEN_TTL_SECONDS)
                .help("Access token lifetime in seconds")
                .env("CUSTODIA_ACCESS_TOKEN_TTL_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_REFRESH_TOKEN_TTL_SECONDS)
                .long(ARG_REFRESH_TOKEN_TTL_SECONDS)
                .help("Refresh token lifetime in seconds")
                .env("CUSTODIA_REFRESH_TOKEN_TTL_SECONDS")
                .default_value("2592000")
                .value_parser(clap::value_parser!(u64)),
        )
}
