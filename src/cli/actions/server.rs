use crate::{
    api::{self, ApiConfig, AppState, Environment, LogActivationNotifier},
    limiter::{LimiterConfig, RateLimiter},
    store::{MemoryStore, PgStore, Store, TimedStore},
};
use anyhow::Result;
use secrecy::{ExposeSecret, SecretString};
use std::{fmt::Write, sync::Arc, time::Duration};
use tracing::{info, warn};
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: Option<SecretString>,
    pub environment: Environment,
    pub store_timeout_seconds: u64,
    pub cors_trusted_origins: Vec<String>,
    pub limiter: LimiterConfig,
    pub token_ttl_seconds: i64,
    pub activation_ttl_seconds: i64,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database is unreachable or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let timeout = Duration::from_secs(args.store_timeout_seconds);
    let config = ApiConfig::new()
        .with_environment(args.environment)
        .with_token_ttl_seconds(args.token_ttl_seconds)?
        .with_activation_ttl_seconds(args.activation_ttl_seconds)?
        .with_cors_trusted_origins(args.cors_trusted_origins);
    let limiter = Arc::new(RateLimiter::new(args.limiter));

    match args.dsn {
        Some(dsn) => {
            let store = PgStore::connect(dsn.expose_secret(), timeout).await?;
            serve(args.port, store, timeout, limiter, config).await
        }
        None => {
            warn!("No DSN configured, records and accounts live in memory only");
            serve(args.port, MemoryStore::new(), timeout, limiter, config).await
        }
    }
}

async fn serve<S: Store + 'static>(
    port: u16,
    store: S,
    timeout: Duration,
    limiter: Arc<RateLimiter>,
    config: ApiConfig,
) -> Result<()> {
    let state = AppState::new(
        Arc::new(TimedStore::new(store, timeout)),
        limiter,
        Arc::new(LogActivationNotifier),
        config,
    );

    api::serve(port, Arc::new(state)).await
}

fn log_startup_args(args: &Args) {
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        (
            "dsn",
            args.dsn
                .as_ref()
                .map_or_else(|| "memory".to_string(), |dsn| redact_dsn(dsn.expose_secret())),
        ),
        ("environment", args.environment.to_string()),
        ("store_timeout_seconds", args.store_timeout_seconds.to_string()),
        ("limiter_enabled", args.limiter.enabled.to_string()),
        ("limiter_rps", args.limiter.rps.to_string()),
        ("limiter_burst", args.limiter.burst.to_string()),
        ("token_ttl_seconds", args.token_ttl_seconds.to_string()),
        ("activation_ttl_seconds", args.activation_ttl_seconds.to_string()),
        (
            "cors_trusted_origins",
            if args.cors_trusted_origins.is_empty() {
                "*".to_string()
            } else {
                args.cors_trusted_origins.join(" ")
            },
        ),
    ];

    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = String::from("Startup configuration:");
    for (key, value) in &entries {
        let _ = write!(message, "\n  {key:<max_key_len$}  {value}");
    }
    info!("{message}");
}

fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-dsn".to_string(),
    }
}
