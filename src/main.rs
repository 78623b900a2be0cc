// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use regoserve::config::ServerConfig;
use regoserve::storage::InMemoryStore;
use regoserve::Server;

#[derive(Parser)]
#[command(name = "regoserve")]
#[command(about = "Policy decision service", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file.
    #[arg(short, long, env = "REGOSERVE_CONFIG")]
    config: Option<String>,

    /// Listen address.
    #[arg(short, long)]
    addr: Option<String>,

    /// Directory of policy modules loaded at startup.
    #[arg(long)]
    policy_dir: Option<PathBuf>,

    /// Persist policy changes to --policy-dir.
    #[arg(long)]
    persist: bool,

    /// Log level, used when RUST_LOG is not set.
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON.
    #[arg(long)]
    log_json: bool,

    /// Initial base documents (JSON file).
    #[arg(short, long)]
    data: Option<PathBuf>,
}

fn init_logging(config: &ServerConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.log_level.clone().into());

    if config.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = ServerConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(addr) = &cli.addr {
        config.listen_addr = addr
            .parse()
            .with_context(|| format!("invalid listen address {addr}"))?;
    }
    if cli.policy_dir.is_some() {
        config.policy_dir = cli.policy_dir.clone();
    }
    if cli.persist {
        config.persist_policies = true;
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    if cli.log_json {
        config.log_json = true;
    }

    init_logging(&config);

    let store = match &cli.data {
        Some(file) => {
            let json = std::fs::read_to_string(file)
                .with_context(|| format!("reading {}", file.display()))?;
            InMemoryStore::from_json_str(&json)?
        }
        None => InMemoryStore::new(),
    };

    let server = Server::new(
        Arc::new(store),
        config.listen_addr,
        config.policy_dir.clone(),
        config.persist_policies,
    )?;
    server.run().await
}
