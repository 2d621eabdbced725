use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use email_scheduler::config::Config;
use email_scheduler::storage::open_repository;

mod commands;

#[derive(Parser)]
#[command(
    name = "email-scheduler",
    version,
    about = "Batch email scheduler with compliance exclusion windows and load balancing",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file (defaults to SCHEDULER_* environment variables)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database path, overrides the configured one
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema
    Init,

    /// Generate and persist schedules
    Run {
        /// Scheduling date (YYYY-MM-DD), defaults to today
        #[arg(short, long)]
        date: Option<NaiveDate>,

        /// Compute schedules without writing anything
        #[arg(long, default_value = "false")]
        dry_run: bool,

        /// Fixed run id instead of a random one
        #[arg(long)]
        run_id: Option<String>,

        /// Write Prometheus metrics to this file after the run
        #[arg(long)]
        metrics_out: Option<PathBuf>,
    },

    /// Fill the database with deterministic synthetic contacts
    GenerateContacts {
        /// Number of contacts
        #[arg(short = 'n', long, default_value = "1000")]
        count: usize,

        /// RNG seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Also create sample campaign types, instances and enrollments
        #[arg(long, default_value = "false")]
        with_campaigns: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(db) = cli.db {
        config.database.sqlite_path = db;
    }

    let log_format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| config.logging.format.clone());
    setup_tracing(&log_format, &config.logging.level, cli.verbose)?;

    tracing::info!("email-scheduler starting");
    let today = chrono::Local::now().date_naive();

    match cli.command {
        Commands::Init => {
            tracing::info!(path = %config.database.sqlite_path.display(), "Starting init command");
            commands::init(&config)?;
        }

        Commands::Run {
            date,
            dry_run,
            run_id,
            metrics_out,
        } => {
            let today = date.unwrap_or(today);
            tracing::info!(%today, dry_run, run_id = ?run_id, "Starting run command");
            let repo = open_repository(&config.database)?;
            commands::run(
                repo,
                config,
                commands::RunParams {
                    today,
                    dry_run,
                    run_id,
                    metrics_out,
                },
            )
            .await?;
        }

        Commands::GenerateContacts {
            count,
            seed,
            with_campaigns,
        } => {
            tracing::info!(count, seed, with_campaigns, "Starting generate-contacts command");
            let repo = open_repository(&config.database)?;
            commands::generate_contacts(repo, count, seed, with_campaigns, today).await?;
        }
    }

    tracing::info!("email-scheduler completed successfully");
    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("email_scheduler=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .or_else(|_| tracing_subscriber::EnvFilter::try_new(format!("email_scheduler={level},warn")))
            .context("Invalid log level")?
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
