//! authgate - request authentication and abuse control
//!
//! This is the main entry point for the authgate server.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tracing::{debug, error, info};

use authgate::auth::{hash_password, LogMailSender, StaticAccounts};
use authgate::config::Config;
use authgate::otel::{init_tracing, Metrics, OtelProvider};
use authgate::server::{AppState, Pipeline, Server};
use authgate::store::{CounterStore, MemoryStore, RedisStore};

/// Interval between sweeps of expired in-memory keys
const MEMORY_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// authgate - session tokens, rate limiting and request pipeline
#[derive(Parser, Debug)]
#[command(name = "authgate")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env = "AUTHGATE_CONFIG")]
    config: Option<String>,

    /// Print an argon2 hash of the given password and exit
    #[arg(long, value_name = "PASSWORD")]
    hash_password: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if let Some(password) = &args.hash_password {
        println!("{}", hash_password(password)?);
        return Ok(());
    }

    let config = load_config(&args)?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    let otel_provider = OtelProvider::new(&config.otel)?;
    init_tracing(&otel_provider, &config.logging)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting authgate");

    let store = connect_store(&config).await?;
    info!(backend = store.name(), "Counter store initialized");

    let accounts = Arc::new(StaticAccounts::new(config.accounts.clone()));
    info!(accounts = accounts.len(), "Account directory loaded");

    let metrics = Arc::new(Metrics::new(&otel_provider.meter()));
    let state = AppState::from_config(
        &config,
        store,
        accounts,
        Arc::new(LogMailSender),
        metrics,
    );

    let pipeline = Pipeline::standard();
    debug!(stages = ?pipeline.stages(), "Request pipeline assembled");

    let server = Server::new(config.server.clone(), state, &pipeline);

    info!(
        host = %config.server.host,
        port = %config.server.port,
        "Starting HTTP server"
    );

    let result = server.run(shutdown_signal()).await;

    if let Err(e) = otel_provider.shutdown() {
        error!(error = %e, "Failed to shutdown OpenTelemetry");
    }

    info!("authgate shutdown complete");

    result.map_err(Into::into)
}

/// Load configuration from file or environment
fn load_config(args: &Args) -> anyhow::Result<Config> {
    match &args.config {
        Some(path) => {
            // Use eprintln! since tracing is not yet initialized
            eprintln!("Loading configuration from file: {}", path);
            Config::from_file(path).map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
        }
        None => {
            eprintln!("Loading configuration from environment variables");
            Config::from_env().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
        }
    }
}

/// Open the configured counter store
async fn connect_store(config: &Config) -> anyhow::Result<Arc<dyn CounterStore>> {
    match config.redis_store_config() {
        Some(redis_config) => {
            let store = RedisStore::connect(redis_config).await?;
            info!(prefix = %store.prefix(), "Connected to Redis");
            Ok(Arc::new(store))
        }
        None => {
            let store = Arc::new(MemoryStore::new());
            spawn_memory_sweeper(Arc::clone(&store));
            Ok(store)
        }
    }
}

fn spawn_memory_sweeper(store: Arc<MemoryStore>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(MEMORY_SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            let purged = store.purge_expired().await;
            if purged > 0 {
                debug!(purged, "Purged expired counter keys");
            }
        }
    });
}

/// Create a future that resolves when a shutdown signal is received
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
