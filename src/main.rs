//! tickdb server
//!
//! Opens the storage engine and serves the HTTP API until Ctrl+C or SIGTERM,
//! then drains the ingest queue before exiting.
//!
//! Run with: cargo run -- --data-dir ./data

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tickdb::api::{serve, ApiConfig, AppState};
use tickdb::config::{generate_default_config, Config, LoggingConfig};
use tickdb::storage::{EngineConfig, StorageEngine};
use tracing_subscriber::{
    fmt::MakeWriter, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

#[derive(Parser, Debug)]
#[command(name = "tickdb")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Minimal time-series storage engine with an HTTP API")]
struct Cli {
    /// Config file (default: search the usual locations)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data directory, overriding the config file
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// API port, overriding the config file
    #[arg(short, long)]
    port: Option<u16>,

    /// Print a default config file and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.print_config {
        print!("{}", generate_default_config());
        return Ok(());
    }

    // The configured subscriber depends on the config, so loading logs
    // through a plain stderr one
    let config = tracing::subscriber::with_default(bootstrap_subscriber(std::io::stderr), || {
        load_config(&cli)
    })?;

    init_tracing(&config.logging);

    tracing::info!("Starting tickdb v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Data directory: {}", config.storage.data_dir);

    let engine_config = EngineConfig::from(&config.storage);
    let engine = Arc::new(
        StorageEngine::open(engine_config)
            .await
            .context("failed to open storage engine")?,
    );
    tracing::info!("Storage stats: {}", engine.stats().await);

    let api_config = ApiConfig::from(&config.api);
    let state = AppState::new(Arc::clone(&engine), api_config.clone());
    let served = serve(state, &api_config).await;

    // Drain accepted points even if the server failed
    engine.close().await;
    tracing::info!("Final storage stats: {}", engine.stats().await);

    served.context("API server failed")?;
    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => {
            let config = Config::load_with_env(path)?;
            tracing::info!("Loaded config from {:?}", path);
            config
        }
        None => Config::load_default(),
    };
    if let Some(data_dir) = &cli.data_dir {
        config.storage.data_dir = data_dir.to_string_lossy().to_string();
    }
    if let Some(port) = cli.port {
        config.api.port = port;
    }
    Ok(config)
}

fn bootstrap_subscriber<W>(writer: W) -> impl tracing::Subscriber + Send + Sync + 'static
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    tracing_subscriber::fmt()
        .with_writer(writer)
        .with_ansi(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish()
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("tickdb={},tower_http=info", logging.level))
    });

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
