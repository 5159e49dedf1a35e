//! CLI entry point for shufflestore-admin: offline cleanup, shuffle and
//! listing against the configured metadata store and providers.
//!
//! The tool takes its own per-record locks, so `cleanup` and `shuffle`
//! must only run while the server is stopped.

use clap::{Parser, Subcommand};
use serde::Serialize;
use shufflestore::metadata::store::FileQuery;
use shufflestore::AppState;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "shufflestore-admin",
    about = "ShuffleStore administrative tool",
    long_about = "ShuffleStore administrative tool.\n\n\
                  Run `cleanup` and `shuffle` only while the server is stopped: \
                  the server's per-record locks do not extend to this process, \
                  and storage keys generated here may collide with the server's."
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, default_value = "shufflestore.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Purge soft-deleted files past the retention period
    Cleanup,
    /// Move every active file to a different provider
    Shuffle,
    /// Print file records as JSON
    List {
        /// Include soft-deleted records
        #[arg(long, default_value_t = false)]
        all: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let rc = match run(cli).await {
        Ok(rc) => rc,
        Err(e) => {
            eprintln!("Error: {e:#}");
            1
        }
    };
    std::process::exit(rc);
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let config = shufflestore::config::load_config(&cli.config)?;
    let state = AppState::from_config(config).await?;

    match cli.command {
        Commands::Cleanup => {
            let report = state.files.cleanup().await?;
            print_json(&report)?;
            Ok(exit_code(report.is_clean()))
        }
        Commands::Shuffle => {
            let report = state.migrations.migrate_all().await?;
            print_json(&report)?;
            Ok(exit_code(report.is_clean()))
        }
        Commands::List { all } => {
            let query = if all {
                FileQuery::all()
            } else {
                FileQuery::active()
            };
            let records = state.files.list_all(query).await?;
            print_json(&records)?;
            Ok(0)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn exit_code(clean: bool) -> i32 {
    if clean {
        0
    } else {
        2
    }
}
