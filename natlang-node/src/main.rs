//! natlang-node: NatLangChain ledger node
//!
//! Serves the admission pipeline over HTTP, or runs one-off chain
//! maintenance commands against the configured storage backend.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use natlang_core::storage::shared_backend;
use natlang_core::{validate_chain, BackendKind};
use natlang_node::api::create_router;
use natlang_node::{Config, Coordinator};
use natlang_validator::build_providers;

#[derive(Parser)]
#[command(name = "natlang-node")]
#[command(about = "NatLangChain ledger node")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "natlang-node.toml", env = "NATLANG_CONFIG")]
    config: PathBuf,

    /// Data directory
    #[arg(short, long, env = "NATLANG_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// HTTP port (overrides config file)
    #[arg(short, long, env = "NATLANG_PORT")]
    port: Option<u16>,

    /// Storage backend: memory, json or sqlite
    #[arg(long, env = "NATLANG_BACKEND")]
    backend: Option<BackendKind>,

    /// Default mining difficulty in leading zero bits
    #[arg(long)]
    difficulty: Option<u32>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Verify the stored chain and exit
    ValidateChain,
    /// Print the chain as prose and exit
    Narrative,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("natlang_node=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(&cli.config)?;
    if let Some(data_dir) = cli.data_dir {
        config.node.data_dir = data_dir;
    }
    if let Some(port) = cli.port {
        config.api.port = port;
    }
    if let Some(backend) = cli.backend {
        config.storage.backend = backend;
    }
    if let Some(difficulty) = cli.difficulty {
        config.sealer.default_difficulty = difficulty;
    }

    let storage_config = config.storage_config();
    if let Some(parent) = storage_config.path.parent() {
        if config.storage.backend != BackendKind::Memory && !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let storage = shared_backend(&storage_config).await?;

    match cli.command {
        Some(Command::ValidateChain) => {
            let report = validate_chain(&storage.load_chain().await?);
            println!("{}", serde_json::to_string_pretty(&report)?);
            storage.close().await?;
            if !report.valid {
                std::process::exit(1);
            }
            return Ok(());
        }
        Some(Command::Narrative) => {
            println!("{}", natlang_core::narrative(&storage.load_chain().await?));
            storage.close().await?;
            return Ok(());
        }
        None => {}
    }

    info!(
        config = %cli.config.display(),
        backend = ?storage_config.backend,
        path = %storage_config.path.display(),
        "Starting natlang-node"
    );

    let providers = build_providers(&config.providers);
    let coordinator = match Coordinator::start(&config, storage, providers).await {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!(error = %e, "Startup self-check failed");
            return Err(e.into());
        }
    };

    let app = create_router(coordinator.clone());
    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    coordinator.shutdown().await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
