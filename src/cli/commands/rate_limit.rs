use crate::rate_limit::{
    FailurePolicy, RateLimitConfig, DEFAULT_IP_LIMIT, DEFAULT_IP_WINDOW_SECONDS,
};
use clap::{Arg, ArgAction, ArgMatches, Command};

pub const ARG_RATE_LIMIT_DISABLED: &str = "rate-limit-disabled";
pub const ARG_RATE_LIMIT_IP_LIMIT: &str = "rate-limit-ip-limit";
pub const ARG_RATE_LIMIT_IP_WINDOW_SECONDS: &str = "rate-limit-ip-window-seconds";
pub const ARG_RATE_LIMIT_FAILURE_MODE: &str = "rate-limit-failure-mode";

#[derive(Debug, Clone, Copy)]
pub struct Options {
    pub enabled: bool,
    pub ip_limit: u32,
    pub ip_window_seconds: u64,
    /// Explicit mode; `None` falls back to the environment default.
    pub failure_mode: Option<FailurePolicy>,
}

impl Options {
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        Self {
            enabled: !matches.get_flag(ARG_RATE_LIMIT_DISABLED),
            ip_limit: matches
                .get_one::<u32>(ARG_RATE_LIMIT_IP_LIMIT)
                .copied()
                .unwrap_or(DEFAULT_IP_LIMIT),
            ip_window_seconds: matches
                .get_one::<u64>(ARG_RATE_LIMIT_IP_WINDOW_SECONDS)
                .copied()
                .unwrap_or(DEFAULT_IP_WINDOW_SECONDS),
            failure_mode: matches
                .get_one::<FailurePolicy>(ARG_RATE_LIMIT_FAILURE_MODE)
                .copied(),
        }
    }

    /// Open in production, closed elsewhere, unless set explicitly.
    #[must_use]
    pub fn rate_limit_config(&self, production: bool) -> RateLimitConfig {
        let policy = self.failure_mode.unwrap_or(if production {
            FailurePolicy::Open
        } else {
            FailurePolicy::Closed
        });
        RateLimitConfig::new()
            .with_enabled(self.enabled)
            .with_ip_limit(self.ip_limit)
            .with_ip_window_seconds(self.ip_window_seconds)
            .with_failure_policy(policy)
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_RATE_LIMIT_DISABLED)
                .long(ARG_RATE_LIMIT_DISABLED)
                .help("Disable request and login throttling")
                .env("CUSTODIA_RATE_LIMIT_DISABLED")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_RATE_LIMIT_IP_LIMIT)
                .long(ARG_RATE_LIMIT_IP_LIMIT)
                .help("Requests allowed per client IP and route within one window")
                .env("CUSTODIA_RATE_LIMIT_IP_LIMIT")
                .default_value("60")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new(ARG_RATE_LIMIT_IP_WINDOW_SECONDS)
                .long(ARG_RATE_LIMIT_IP_WINDOW_SECONDS)
                .help("Length of the per-IP sliding window in seconds")
                .env("CUSTODIA_RATE_LIMIT_IP_WINDOW_SECONDS")
                .default_value("60")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_RATE_LIMIT_FAILURE_MODE)
                .long(ARG_RATE_LIMIT_FAILURE_MODE)
                .help("Behavior when the cache is unreachable: open or closed")
                .long_help(
                    "Behavior when the cache is unreachable.\n\n`open` lets requests through and logs; `closed` rejects them with a dependency error.\nDefaults to `open` in production and `closed` otherwise.",
                )
                .env("CUSTODIA_RATE_LIMIT_FAILURE_MODE")
                .value_parser(|value: &str| value.parse::<FailurePolicy>()),
        )
}
