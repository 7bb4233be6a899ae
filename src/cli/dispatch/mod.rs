//! Command-line argument dispatch.
//!
//! Maps validated CLI matches to the action to run, carrying every option
//! group the server needs.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{
    auth, broker, maintenance, rate_limit, tokens, ARG_DSN, ARG_ENVIRONMENT, ARG_PORT,
    ARG_REDIS_URL, ARG_REQUEST_TIMEOUT_SECONDS, ARG_TRUSTED_PROXIES,
};
use crate::api::client_ip::TrustedProxies;
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>(ARG_DSN)
        .cloned()
        .context("missing required argument: --dsn")?;
    let redis_url = matches
        .get_one::<String>(ARG_REDIS_URL)
        .cloned()
        .context("missing required argument: --redis-url")?;
    let production = matches
        .get_one::<String>(ARG_ENVIRONMENT)
        .is_some_and(|value| value == "production");
    let request_timeout_seconds = matches
        .get_one::<u64>(ARG_REQUEST_TIMEOUT_SECONDS)
        .copied()
        .unwrap_or(crate::api::DEFAULT_REQUEST_TIMEOUT_SECONDS);
    let trusted_proxies = matches
        .get_one::<TrustedProxies>(ARG_TRUSTED_PROXIES)
        .cloned()
        .unwrap_or_default();

    Ok(Action::Server(Box::new(Args {
        port,
        dsn,
        redis_url,
        production,
        request_timeout_seconds,
        trusted_proxies,
        auth: auth::Options::parse(matches)?,
        tokens: tokens::Options::parse(matches)?,
        rate_limit: rate_limit::Options::parse(matches),
        broker: broker::Options::parse(matches),
        maintenance: maintenance::Options::parse(matches),
    })))
}

/// Parse without the process arguments, for tests.
#[cfg(test)]
fn handler_from(args: &[&str]) -> Result<Action> {
    let matches = crate::cli::commands::new().try_get_matches_from(args)?;
    handler(&matches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::FailurePolicy;

    const CLEARED: [(&str, Option<&str>); 7] = [
        ("CUSTODIA_JWT_SECRET", None),
        ("CUSTODIA_REFRESH_TOKEN_PEPPER", None),
        ("CUSTODIA_MFA_SECRET_KEY", None),
        ("CUSTODIA_ENVIRONMENT", None),
        ("CUSTODIA_RATE_LIMIT_FAILURE_MODE", None),
        ("CUSTODIA_AMQP_URL", None),
        ("CUSTODIA_TRUSTED_PROXIES", None),
    ];

    const BASE: [&str; 9] = [
        "custodia",
        "--dsn",
        "postgres://custodia@localhost:5432/custodia",
        "--jwt-secret",
        "jwt",
        "--refresh-token-pepper",
        "pepper",
        "--mfa-secret-key",
        "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=",
    ];

    #[test]
    fn jwt_secret_required() {
        temp_env::with_vars(CLEARED, || {
            let result = handler_from(&[
                "custodia",
                "--dsn",
                "postgres://custodia@localhost:5432/custodia",
                "--mfa-secret-key",
                "key",
            ]);
            assert!(result.is_err());
            if let Err(err) = result {
                assert!(err
                    .to_string()
                    .contains("missing required argument: --jwt-secret"));
            }
        });
    }

    #[test]
    fn mfa_key_required() {
        temp_env::with_vars(CLEARED, || {
            let result = handler_from(&BASE[..7]);
            assert!(result.is_err());
            if let Err(err) = result {
                assert!(err
                    .to_string()
                    .contains("missing required argument: --mfa-secret-key"));
            }
        });
    }

    #[test]
    fn production_fails_open_by_default() -> Result<()> {
        temp_env::with_vars(CLEARED, || {
            let mut args = BASE.to_vec();
            args.extend(["--environment", "production"]);
            let Action::Server(server) = handler_from(&args)?;
            assert!(server.production);
            assert_eq!(
                server.rate_limit.rate_limit_config(server.production).failure_policy(),
                FailurePolicy::Open
            );
            assert!(server.broker.amqp_url.is_none());
            Ok(())
        })
    }

    #[test]
    fn development_fails_closed_by_default() -> Result<()> {
        temp_env::with_vars(CLEARED, || {
            let Action::Server(server) = handler_from(&BASE)?;
            assert!(!server.production);
            assert_eq!(
                server.rate_limit.rate_limit_config(server.production).failure_policy(),
                FailurePolicy::Closed
            );
            assert_eq!(server.port, 8080);
            assert!(server.trusted_proxies.is_empty());
            Ok(())
        })
    }

    #[test]
    fn trusted_proxies_parse_from_flag() -> Result<()> {
        temp_env::with_vars(CLEARED, || {
            let mut args = BASE.to_vec();
            args.extend(["--trusted-proxies", "10.0.0.0/8, 127.0.0.1"]);
            let Action::Server(server) = handler_from(&args)?;
            assert!(server.trusted_proxies.contains("10.1.2.3".parse()?));
            assert!(!server.trusted_proxies.contains("192.0.2.1".parse()?));

            let mut args = BASE.to_vec();
            args.extend(["--trusted-proxies", "not-an-address"]);
            assert!(handler_from(&args).is_err());
            Ok(())
        })
    }
}
