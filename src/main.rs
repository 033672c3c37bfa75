// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Dropsort CLI
//!
//! Inventory an inbox directory, predict categories from file names and file
//! confirmed files into a per-category tree.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};

use dropsort::config::{keys, AppConfig, ConfigProvider};
use dropsort::db::FileState;
use dropsort::jobs::{JobDispatcher, JobStatus};
use dropsort::relocate::RelocationItem;
use dropsort::watcher::watch_origin;
use dropsort::Pipeline;

/// Dropsort CLI - watched-folder file sorter
#[derive(Parser, Debug)]
#[command(name = "dropsort")]
#[command(author = "Jonathan D. A. Jewell <hyperpolymath>")]
#[command(version)]
#[command(about = "Sort an inbox folder into categories learned from your own moves", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (JSON format)
    #[arg(short, long, default_value = "config.json", global = true)]
    config: PathBuf,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable trace logging (most verbose)
    #[arg(long, global = true)]
    trace: bool,

    /// Suppress non-essential output (quiet mode)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Inventory new files in the origin directory and classify them
    Sync,

    /// Move records into their category folders
    Relocate {
        /// Items as <record-id>=<Category>
        #[arg(value_parser = parse_item, required_unless_present = "pending")]
        items: Vec<RelocationItem>,

        /// Relocate every categorized record that is not on hold
        #[arg(long, conflicts_with = "items")]
        pending: bool,
    },

    /// Retrain the model from the training corpus
    Train,

    /// Predict categories for file names
    Classify {
        /// File names to classify
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// List inventory records
    Files {
        /// Only records in this state
        #[arg(short, long, value_parser = FileState::NAMES)]
        state: Option<String>,

        /// Maximum number to show
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Keep a record out of pending relocations
    Hold {
        /// Record id
        id: String,

        /// Clear the hold instead of setting it
        #[arg(long)]
        release: bool,
    },

    /// Retire (soft-delete) a record
    Retire {
        /// Record id
        id: String,
    },

    /// Watch the origin directory and synchronize as files arrive
    Watch,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Initialize a new dropsort workspace
    Init {
        /// Directory to initialize (default: current)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Force overwrite existing configuration
        #[arg(long)]
        force: bool,
    },

    /// Show model and inventory status
    Status,
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Generate default configuration file
    Generate {
        /// Output file path
        #[arg(short, long, default_value = "config.json")]
        output: PathBuf,
    },

    /// Validate configuration file
    Validate,
}

fn parse_item(raw: &str) -> Result<RelocationItem, String> {
    match raw.split_once('=') {
        Some((id, category)) if !id.trim().is_empty() && !category.trim().is_empty() => {
            Ok(RelocationItem::new(id.trim(), category.trim()))
        }
        _ => Err(format!("expected <id>=<Category>, got '{}'", raw)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = AppConfig::load(&cli.config)
        .with_context(|| format!("loading configuration from {:?}", cli.config))?;

    match cli.command {
        Some(Commands::Config { action }) => run_config_command(config, action, &cli.config),
        Some(Commands::Init { dir, force }) => run_init(dir, force),
        Some(command) => {
            let pipeline = open_pipeline(config)?;
            run_pipeline_command(pipeline, command).await
        }
        None => {
            let pipeline = open_pipeline(config)?;
            run_watch(pipeline).await
        }
    }
}

fn open_pipeline(config: AppConfig) -> anyhow::Result<Arc<Pipeline>> {
    let db_path = config.database.path.clone();
    let pipeline = Pipeline::open(config).with_context(|| format!("opening inventory {}", db_path))?;
    Ok(Arc::new(pipeline))
}

async fn run_pipeline_command(pipeline: Arc<Pipeline>, command: Commands) -> anyhow::Result<()> {
    let dispatcher = JobDispatcher::new(pipeline.clone());

    match command {
        Commands::Sync => {
            let handle = dispatcher.request_synchronize()?;
            report_job(&dispatcher, handle.id).await
        }
        Commands::Relocate { items, pending } => {
            let items = if pending { pipeline.relocation_candidates()? } else { items };
            if items.is_empty() {
                println!("Nothing to relocate");
                return Ok(());
            }
            let handle = dispatcher.request_relocate(items)?;
            report_job(&dispatcher, handle.id).await
        }
        Commands::Train => {
            let summary = tokio::task::spawn_blocking(move || pipeline.train()).await??;
            println!(
                "Trained {} on {} examples ({} categories, {} tokens) -> {}",
                summary.model_version,
                summary.examples,
                summary.categories.len(),
                summary.vocabulary_size,
                summary.model_path.display()
            );
            Ok(())
        }
        Commands::Classify { names } => {
            let results = tokio::task::spawn_blocking(move || pipeline.classify(&names)).await??;
            for (name, prediction) in results {
                println!("{}: {} ({:.0}%)", name, prediction.category, prediction.confidence * 100.0);
            }
            Ok(())
        }
        Commands::Files { state, limit } => {
            let files = pipeline.db().list_files(state.as_deref(), limit)?;
            for file in &files {
                let hold = if file.not_to_move { " [hold]" } else { "" };
                println!(
                    "{}  {:<24} {:<16} {}{}",
                    file.id,
                    file.state.name(),
                    file.category().unwrap_or("-"),
                    file.name,
                    hold
                );
            }
            println!("\n{} records", files.len());
            Ok(())
        }
        Commands::Hold { id, release } => {
            let record = pipeline.db().set_not_to_move(&id, !release)?;
            let verb = if record.not_to_move { "Holding" } else { "Released" };
            println!("{} {} ({})", verb, record.name, record.id);
            Ok(())
        }
        Commands::Retire { id } => {
            let record = pipeline.db().retire(&id)?;
            println!("Retired {} ({})", record.name, record.id);
            Ok(())
        }
        Commands::Watch => run_watch(pipeline).await,
        Commands::Status => run_status(&pipeline),
        Commands::Config { .. } | Commands::Init { .. } => bail!("command does not run on the pipeline"),
    }
}

/// Wait for a job and print its outcome
async fn report_job(dispatcher: &JobDispatcher, id: uuid::Uuid) -> anyhow::Result<()> {
    let info = dispatcher
        .wait(id)
        .await?
        .with_context(|| format!("job {} disappeared", id))?;

    match info.status {
        JobStatus::Completed { summary } => {
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        JobStatus::Cancelled { summary } => {
            warn!("Job {} was cancelled", id);
            if let Some(summary) = summary {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            }
            Ok(())
        }
        JobStatus::Failed { error } => bail!("job {} failed: {}", id, error),
        JobStatus::Queued | JobStatus::Running => bail!("job {} did not finish", id),
    }
}

/// Run the watch mode until Ctrl+C or SIGTERM
async fn run_watch(pipeline: Arc<Pipeline>) -> anyhow::Result<()> {
    let stable_wait = Duration::from_secs(pipeline.config().sync.stable_wait_secs);
    let dispatcher = JobDispatcher::new(pipeline);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl+C: {}", e);
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
                    warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = terminate => info!("Received SIGTERM, shutting down..."),
        }

        let _ = shutdown_tx.send(true);
    });

    info!("Watching for files. Press Ctrl+C to stop.");
    watch_origin(dispatcher, stable_wait, shutdown_rx).await?;
    info!("Dropsort stopped.");
    Ok(())
}

/// Run config commands
fn run_config_command(config: AppConfig, action: ConfigCommands, config_path: &Path) -> anyhow::Result<()> {
    match action {
        ConfigCommands::Show => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ConfigCommands::Generate { output } => {
            AppConfig::default().save(&output)?;
            println!("Generated config at {:?}", output);
        }
        ConfigCommands::Validate => {
            config
                .validate()
                .with_context(|| format!("configuration at {:?} is incomplete", config_path))?;
            println!("Configuration at {:?} is valid", config_path);
            println!("  Environment: {}", config.environment);
            for key in keys::REQUIRED {
                println!("  {}: {}", key, config.get(key)?);
            }
            println!("  Database: {}", config.database.path);
        }
    }

    Ok(())
}

/// Show model and inventory status
fn run_status(pipeline: &Pipeline) -> anyhow::Result<()> {
    println!("Dropsort v{} Status", env!("CARGO_PKG_VERSION"));
    println!("======================");

    let status = pipeline.model_status()?;
    println!("\nModel ({}):", status.model_path.display());
    match (&status.version, status.trained_at) {
        (Some(version), Some(trained_at)) => {
            println!("  Version: {}", version);
            println!("  Trained: {}", trained_at.format("%Y-%m-%d %H:%M"));
            println!("  Examples: {}", status.examples.unwrap_or(0));
            if status.stale {
                println!("  Corpus changed since training; run `dropsort train`");
            }
        }
        _ => println!("  Not trained yet"),
    }

    let stats = pipeline.db().get_stats()?;
    println!("\nInventory ({}):", pipeline.config().database.path);
    println!("  Records: {}", stats.file_count);
    for (state, count) in &stats.by_state {
        println!("  {:<24} {}", state, count);
    }
    if !stats.by_category.is_empty() {
        println!("\nCategories:");
        for (category, count) in &stats.by_category {
            println!("  {:<24} {}", category, count);
        }
    }

    Ok(())
}

/// Initialize a new dropsort workspace
fn run_init(dir: Option<PathBuf>, force: bool) -> anyhow::Result<()> {
    let target = dir.unwrap_or_else(|| PathBuf::from("."));
    let config_path = target.join("config.json");

    if config_path.exists() && !force {
        bail!("{:?} already exists. Use --force to overwrite", config_path);
    }

    let config = AppConfig::rooted_at(&target);
    for key in [keys::ORIGIN_DIRECTORY, keys::DESTINATION_ROOT, keys::MODEL_PATH, keys::TRAINING_CORPUS_PATH] {
        let dir = config.get_path(key)?;
        std::fs::create_dir_all(&dir).with_context(|| format!("creating {:?}", dir))?;
    }
    config.save(&config_path)?;

    println!("Dropsort initialized in {:?}", target);
    println!("\nCreated:");
    println!("  - config.json");
    println!("  - inbox/ sorted/ models/ data/");
    println!("\nNext steps:");
    println!("  1. Drop files into inbox/ and run: dropsort sync");
    println!("  2. Confirm categories with: dropsort relocate <id>=<Category>");

    Ok(())
}
