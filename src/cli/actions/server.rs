use crate::{
    api::{self, client_ip::TrustedProxies, handlers::HealthProbes},
    auth::AuthService,
    cache::RedisCache,
    cli::commands,
    maintenance::{spawn_maintenance, Maintenance},
    outbox::{spawn_outbox_worker, AmqpPublisher, EventPublisher, LogPublisher, OutboxPublisher},
    password::PasswordHasher,
    rate_limit::RateLimiter,
    session::SessionStore,
    store::{postgres::PgStore, Stores},
    token::TokenIssuer,
    totp::{SeedCipher, TotpService},
};
use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::sync::watch;
use tracing::{info, warn};
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub redis_url: String,
    pub production: bool,
    pub request_timeout_seconds: u64,
    pub trusted_proxies: TrustedProxies,
    pub auth: commands::auth::Options,
    pub tokens: commands::tokens::Options,
    pub rate_limit: commands::rate_limit::Options,
    pub broker: commands::broker::Options,
    pub maintenance: commands::maintenance::Options,
}

/// Execute the server action.
///
/// Connects Postgres, Redis and (optionally) the broker, starts the outbox
/// and maintenance loops and serves HTTP until a shutdown signal arrives.
///
/// # Errors
/// Returns an error if a dependency cannot be reached at startup, a secret is
/// malformed, or the server fails.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(10)
        .max_lifetime(Duration::from_secs(60 * 30))
        .test_before_acquire(true)
        .connect(&args.dsn)
        .await
        .context("Failed to connect to database")?;
    let database = Arc::new(PgStore::new(pool));
    let stores = Stores::from_backend(&database);

    let cache = Arc::new(
        RedisCache::connect(&args.redis_url)
            .await
            .context("Failed to connect to Redis")?,
    );

    let token_config = args.tokens.token_config();
    let sessions = SessionStore::new(
        stores.sessions.clone(),
        cache.clone(),
        Duration::from_secs(args.auth.session_ttl_seconds),
        token_config.access_ttl(),
    );
    let tokens = TokenIssuer::new(
        &args.tokens.jwt_secret,
        &args.tokens.refresh_token_pepper,
        token_config,
    )
    .context("Invalid token secrets")?;

    let rate_limit = args.rate_limit.rate_limit_config(args.production);
    info!(
        enabled = rate_limit.enabled(),
        failure_mode = rate_limit.failure_policy().as_str(),
        ip_limit = rate_limit.ip_limit(),
        "rate limiter configured"
    );
    let limiter = RateLimiter::new(cache.clone(), rate_limit);

    let cipher =
        SeedCipher::from_base64(&args.auth.mfa_secret_key).context("Invalid MFA secret key")?;
    let totp = TotpService::new(stores.mfa.clone(), cipher, &args.auth.totp_config());

    let service = Arc::new(AuthService::new(
        stores.clone(),
        sessions.clone(),
        tokens,
        PasswordHasher::default(),
        limiter,
        totp,
        args.auth.auth_config(),
    ));

    let publisher = event_publisher(&args.broker).await;
    let outbox = OutboxPublisher::new(
        stores.outbox.clone(),
        publisher,
        args.broker.outbox_config(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let outbox_worker = spawn_outbox_worker(outbox.clone(), shutdown_rx.clone());
    let maintenance_worker = spawn_maintenance(
        Maintenance::new(
            stores,
            sessions,
            outbox,
            args.maintenance.maintenance_config(),
        ),
        shutdown_rx,
    );

    let probes = Arc::new(HealthProbes::new(database, cache));
    let app = api::app(
        service,
        probes,
        Duration::from_secs(args.request_timeout_seconds),
        args.trusted_proxies.clone(),
    )?;

    let served = api::serve(args.port, app, shutdown_signal()).await;

    // Let the loops finish their current pass before exiting.
    let _ = shutdown_tx.send(true);
    let (outbox_done, maintenance_done) = tokio::join!(outbox_worker, maintenance_worker);
    if let Err(err) = outbox_done {
        warn!("outbox worker ended abnormally: {err}");
    }
    if let Err(err) = maintenance_done {
        warn!("maintenance worker ended abnormally: {err}");
    }

    served
}

async fn event_publisher(options: &commands::broker::Options) -> Arc<dyn EventPublisher> {
    let Some(url) = &options.amqp_url else {
        warn!("no AMQP broker configured, identity events will only be logged");
        return Arc::new(LogPublisher);
    };

    match AmqpPublisher::connect(url.clone(), options.exchange.clone()).await {
        Ok(publisher) => {
            info!(exchange = %options.exchange, "connected to AMQP broker");
            Arc::new(publisher)
        }
        Err(err) => {
            // The outbox retries, so a broker that is down at boot only delays delivery.
            warn!("AMQP broker unavailable at startup, will retry on publish: {err}");
            Arc::new(AmqpPublisher::new(url.clone(), options.exchange.clone()))
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!("Failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT, starting graceful shutdown"),
        () = terminate => info!("Received SIGTERM, starting graceful shutdown"),
    }
}

fn log_startup_args(args: &Args) {
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        ("dsn", redact_url(&args.dsn)),
        ("redis", redact_url(&args.redis_url)),
        (
            "environment",
            if args.production {
                "production".to_string()
            } else {
                "development".to_string()
            },
        ),
        ("frontend_base_url", args.auth.frontend_base_url.clone()),
        (
            "amqp",
            args.broker
                .amqp_url
                .as_deref()
                .map_or_else(|| "log only".to_string(), redact_url),
        ),
        ("amqp_exchange", args.broker.exchange.clone()),
        ("access_ttl_seconds", args.tokens.access_ttl_seconds.to_string()),
        ("refresh_ttl_seconds", args.tokens.refresh_ttl_seconds.to_string()),
        ("session_ttl_seconds", args.auth.session_ttl_seconds.to_string()),
        ("trusted_proxies", args.trusted_proxies.to_string()),
    ];

    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!(
        "custodia {} - {}\n\nStartup configuration:",
        env!("CARGO_PKG_VERSION"),
        short_commit(crate::GIT_COMMIT_HASH)
    );
    for (key, value) in &entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn redact_url(value: &str) -> String {
    match Url::parse(value) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-url".to_string(),
    }
}

fn short_commit(hash: &str) -> String {
    let trimmed = hash.trim();
    if trimmed.len() > 7 {
        trimmed[..7].to_string()
    } else {
        trimmed.to_string()
    }
}
