use crate::outbox::OutboxConfig;
use clap::{Arg, ArgMatches, Command};

pub const ARG_AMQP_URL: &str = "amqp-url";
pub const ARG_AMQP_EXCHANGE: &str = "amqp-exchange";
pub const ARG_OUTBOX_POLL_SECONDS: &str = "outbox-poll-seconds";
pub const ARG_OUTBOX_BATCH_SIZE: &str = "outbox-batch-size";
pub const ARG_OUTBOX_RETENTION_SECONDS: &str = "outbox-retention-seconds";

#[derive(Debug, Clone)]
pub struct Options {
    /// Without a broker URL events are only logged.
    pub amqp_url: Option<String>,
    pub exchange: String,
    pub poll_seconds: u64,
    pub batch_size: usize,
    pub retention_seconds: u64,
}

impl Options {
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        Self {
            amqp_url: matches
                .get_one::<String>(ARG_AMQP_URL)
                .cloned()
                .filter(|value| !value.trim().is_empty()),
            exchange: matches
                .get_one::<String>(ARG_AMQP_EXCHANGE)
                .cloned()
                .unwrap_or_else(|| "custodia.events".to_string()),
            poll_seconds: matches
                .get_one::<u64>(ARG_OUTBOX_POLL_SECONDS)
                .copied()
                .unwrap_or(5),
            batch_size: matches
                .get_one::<usize>(ARG_OUTBOX_BATCH_SIZE)
                .copied()
                .unwrap_or(50),
            retention_seconds: matches
                .get_one::<u64>(ARG_OUTBOX_RETENTION_SECONDS)
                .copied()
                .unwrap_or(7 * 24 * 60 * 60),
        }
    }

    #[must_use]
    pub fn outbox_config(&self) -> OutboxConfig {
        OutboxConfig::new()
            .with_poll_interval_seconds(self.poll_seconds)
            .with_batch_size(self.batch_size)
            .with_retention_seconds(self.retention_seconds)
            .normalize()
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_AMQP_URL)
                .long(ARG_AMQP_URL)
                .help("AMQP broker URL for identity events; events are only logged when unset")
                .env("CUSTODIA_AMQP_URL")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_AMQP_EXCHANGE)
                .long(ARG_AMQP_EXCHANGE)
                .help("Topic exchange identity events are published to")
                .env("CUSTODIA_AMQP_EXCHANGE")
                .default_value("custodia.events"),
        )
        .arg(
            Arg::new(ARG_OUTBOX_POLL_SECONDS)
                .long(ARG_OUTBOX_POLL_SECONDS)
                .help("Outbox poll interval in seconds")
                .env("CUSTODIA_OUTBOX_POLL_SECONDS")
                .default_value("5")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_OUTBOX_BATCH_SIZE)
                .long(ARG_OUTBOX_BATCH_SIZE)
                .help("Outbox records published per poll")
                .env("CUSTODIA_OUTBOX_BATCH_SIZE")
                .default_value("50")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new(ARG_OUTBOX_RETENTION_SECONDS)
                .long(ARG_OUTBOX_RETENTION_SECONDS)
                .help("How long published outbox records are kept, in seconds")
                .env("CUSTODIA_OUTBOX_RETENTION_SECONDS")
                .default_value("604800")
                .value_parser(clap::value_parser!(u64)),
        )
}
