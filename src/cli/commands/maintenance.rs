use crate::maintenance::MaintenanceConfig;
use clap::{Arg, ArgMatches, Command};

pub const ARG_MAINTENANCE_INTERVAL_SECONDS: &str = "maintenance-interval-seconds";
pub const ARG_LOGIN_ATTEMPT_RETENTION_DAYS: &str = "login-attempt-retention-days";

#[derive(Debug, Clone, Copy)]
pub struct Options {
    pub interval_seconds: u64,
    pub login_attempt_retention_days: u64,
}

impl Options {
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        Self {
            interval_seconds: matches
                .get_one::<u64>(ARG_MAINTENANCE_INTERVAL_SECONDS)
                .copied()
                .unwrap_or(3_600),
            login_attempt_retention_days: matches
                .get_one::<u64>(ARG_LOGIN_ATTEMPT_RETENTION_DAYS)
                .copied()
                .unwrap_or(90),
        }
    }

    #[must_use]
    pub fn maintenance_config(&self) -> MaintenanceConfig {
        MaintenanceConfig::new()
            .with_interval_seconds(self.interval_seconds)
            .with_login_attempt_retention_days(self.login_attempt_retention_days)
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_MAINTENANCE_INTERVAL_SECONDS)
                .long(ARG_MAINTENANCE_INTERVAL_SECONDS)
                .help("Seconds between cleanup sweeps")
                .env("CUSTODIA_MAINTENANCE_INTERVAL_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_LOGIN_ATTEMPT_RETENTION_DAYS)
                .long(ARG_LOGIN_ATTEMPT_RETENTION_DAYS)
                .help("Days the login attempt ledger is kept")
                .env("CUSTODIA_LOGIN_ATTEMPT_RETENTION_DAYS")
                .default_value("90")
                .value_parser(clap::value_parser!(u64)),
        )
}
