mod cli;
mod commands;
mod output;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use murmur_cache::CacheLayer;
use murmur_store::{KeyNamespace, MemoryStore, StoreConfig};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use output::print_error;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

fn init_tracing(level: &str) {
    // Prefer RUST_LOG from env, otherwise use the provided level.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

async fn connect(cli: &Cli) -> Result<CacheLayer> {
    if cli.local {
        tracing::info!("Using in-process store");
        return Ok(CacheLayer::new(
            Arc::new(MemoryStore::new()),
            KeyNamespace::new("murmur"),
        ));
    }
    let config = StoreConfig::from_env().context("Invalid Redis configuration")?;
    CacheLayer::connect(&config)
        .await
        .with_context(|| format!("Failed to connect to Redis at {}", config.display_addr()))
}

async fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(&cli.log_level);
    let format = cli.format.unwrap_or_default();

    let layer = connect(&cli).await?;
    let result = match &cli.command {
        Commands::Ping => commands::store::ping(&layer).await,
        Commands::Get(args) => commands::store::get(&layer, &args.key, format).await,
        Commands::Ttl(args) => commands::store::ttl(&layer, &args.key).await,
        Commands::Lock(args) => commands::store::lock(&layer, &args.name, format).await,
        Commands::Invalidate(args) => commands::invalidate::run(&layer, &args.command).await,
        Commands::Tags(args) => commands::tags::run(&layer, &args.command, format).await,
        Commands::RateLimit(args) => commands::rate_limit::run(&layer, &args.command, format).await,
    };
    layer.shutdown().await;
    result
}
