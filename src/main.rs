//! ShuffleStore -- file gateway over multiple object stores.
//!
//! SIGTERM/SIGINT stop accepting connections, stop the background cleanup
//! task, and let in-flight requests finish before exiting.

use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use shufflestore::config::LoggingConfig;
use shufflestore::AppState;

/// Command-line arguments for the ShuffleStore server.
#[derive(Parser, Debug)]
#[command(
    name = "shufflestore",
    version,
    about = "File gateway over interchangeable object stores"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "shufflestore.example.yaml")]
    config: String,

    /// Override the bind address (host:port).
    #[arg(short, long)]
    bind: Option<String>,
}

/// Initialize tracing.  `RUST_LOG` overrides the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = shufflestore::config::load_config(&cli.config)?;
    init_tracing(&config.logging);
    info!("Loaded configuration from {}", cli.config);

    let bind_addr = cli
        .bind
        .unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));

    if config.observability.metrics {
        shufflestore::metrics::init_metrics();
        shufflestore::metrics::describe_metrics();
        info!("Prometheus metrics initialized");
    }

    if config.auth.identities.is_empty() {
        warn!("No identities configured; every /files request will be rejected");
    }

    let state = Arc::new(AppState::from_config(config).await?);
    info!(
        engine = %state.config.metadata.engine,
        providers = ?state
            .config
            .storage
            .providers
            .iter()
            .map(|p| format!("{}({})", p.id, p.kind.name()))
            .collect::<Vec<_>>(),
        "Gateway initialized"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = state
        .cleanup_interval()
        .map(|every| tokio::spawn(run_cleanup_loop(state.clone(), every, shutdown_rx)));

    let app = shufflestore::server::app(state.clone());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("ShuffleStore listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    if let Some(sweeper) = sweeper {
        let grace = std::time::Duration::from_secs(state.config.server.shutdown_timeout);
        if tokio::time::timeout(grace, sweeper).await.is_err() {
            warn!("Cleanup task did not stop within {}s", grace.as_secs());
        }
    }

    info!("ShuffleStore shut down");
    Ok(())
}

/// Purge expired soft-deleted files every `every` until shutdown.
async fn run_cleanup_loop(
    state: Arc<AppState>,
    every: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match state.files.cleanup().await {
                    Ok(report) if report.is_clean() => {
                        info!(purged = report.purged.len(), "Scheduled cleanup finished");
                    }
                    Ok(report) => {
                        warn!(
                            purged = report.purged.len(),
                            failed = report.failures.len(),
                            "Scheduled cleanup finished with failures"
                        );
                    }
                    Err(e) => warn!("Scheduled cleanup failed: {e}"),
                }
            }
            _ = shutdown.changed() => {
                info!("Cleanup task stopping");
                return;
            }
        }
    }
}

/// Wait for SIGTERM or SIGINT (Ctrl+C), then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, shutting down");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        },
    }
}
