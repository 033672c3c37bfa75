// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Dropsort HTTP API
//!
//! Standalone server exposing the pipeline jobs and the notification stream.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use dropsort::config::AppConfig;
use dropsort::Pipeline;

#[derive(Parser, Debug)]
#[command(name = "dropsort-web")]
#[command(author = "Jonathan D. A. Jewell <hyperpolymath>")]
#[command(version)]
#[command(about = "Dropsort HTTP API server")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Host to bind to
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // tower-http request spans are logged at debug
    let filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("Dropsort API v{}", env!("CARGO_PKG_VERSION"));

    let mut config = AppConfig::load(&args.config)
        .with_context(|| format!("loading configuration from {:?}", args.config))?;

    if let Some(host) = args.host {
        config.web.host = host;
    }
    if let Some(port) = args.port {
        config.web.port = port;
    }
    config.validate()?;

    let db_path = config.database.path.clone();
    let pipeline = Pipeline::open(config).with_context(|| format!("opening inventory {}", db_path))?;
    info!("Database: {}", db_path);

    dropsort::web::start_server(Arc::new(pipeline)).await?;
    Ok(())
}
