//! orm-walkthrough - runs the client walkthrough against a SQLite database.
//!
//! Usage:
//!   orm-walkthrough run                          # every step, in order
//!   orm-walkthrough run --step findAllUsers      # selected steps only
//!   orm-walkthrough run --reset                  # wipe all tables first
//!   orm-walkthrough steps                        # list step names
//!
//! Environment variables:
//!   DATABASE_URL    # e.g. file:./dev.db (also read from .env)
//!   RUST_LOG        # log filter (default from config, else info)

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use rust_user_orm::config::WalkthroughConfig;
use rust_user_orm::walkthrough::{self, STEPS};
use rust_user_orm::Client;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "orm-walkthrough",
    version,
    about = "Walk through create, read, update and delete calls on a User/Post SQLite database"
)]
struct Cli {
    /// Database location; accepts file: and sqlite:// URLs
    #[arg(long, global = true, env = "DATABASE_URL")]
    database: Option<String>,

    /// TOML config file (defaults to ./walkthrough.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging unless RUST_LOG is set
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the walkthrough, stopping at the first failing step
    Run {
        /// Only run these steps (repeatable); order follows the walkthrough
        #[arg(long = "step", value_name = "NAME")]
        steps: Vec<String>,

        /// Delete every row before the first step
        #[arg(long)]
        reset: bool,
    },
    /// List step names in walkthrough order
    Steps,
}

fn init_tracing(default_level: &str, debug: bool) -> Result<()> {
    let fallback = if debug { "debug" } else { default_level };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(debug)
        .with_writer(std::io::stderr)
        .compact()
        .try_init()
        .map_err(|err| anyhow!(err))
}

async fn execute(cli: Cli) -> Result<()> {
    let mut config = WalkthroughConfig::load(cli.config.as_deref()).context("loading config")?;
    if let Some(url) = &cli.database {
        config.apply_database_url(url);
    }
    init_tracing(&config.logging.level, cli.debug)?;
    match WalkthroughConfig::resolve_path(cli.config.as_deref()) {
        Some(path) => debug!(path = %path.display(), "loaded config file"),
        None => debug!("no config file, using defaults"),
    }
    debug!(database = %config.database.path, overridden = cli.database.is_some(), "database selected");

    match cli.command {
        Commands::Steps => {
            for step in STEPS {
                println!("{}", step.name);
            }
            Ok(())
        }
        Commands::Run { steps, reset } => {
            let selected = walkthrough::select_steps(&steps)?;
            let client = Client::connect(config.sqlite_config())
                .await
                .with_context(|| format!("opening {}", config.database.path))?;
            info!(path = %config.database.path, steps = selected.len(), "connected");

            let outcome = async {
                if reset {
                    client.reset().await?;
                }
                walkthrough::run(&client, &selected, |name, output| {
                    let rendered =
                        serde_json::to_string_pretty(output).unwrap_or_else(|_| output.to_string());
                    println!("{name}: {rendered}");
                })
                .await?;
                Ok::<_, anyhow::Error>(())
            }
            .await;

            let closed = client.disconnect().await.context("closing database");
            outcome.and(closed)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = dotenvy::dotenv() {
        if !err.not_found() {
            eprintln!("failed to read .env: {err}");
        }
    }
    let cli = Cli::parse();
    match execute(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
