use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use kh_cli::commands::query::{self, QueryKind};
use kh_cli::commands::{merge, stats, track};
use kh_cli::{Cli, Commands, Config};

/// Load config, apply the `--db` override and ensure the database directory exists.
fn load_config(config_path: Option<&Path>, db: Option<&Path>) -> Result<Config> {
    let mut config = Config::load_from(config_path).context("failed to load configuration")?;
    if let Some(db) = db {
        config.database_path = db.to_path_buf();
    }
    tracing::debug!(?config, "loaded configuration");

    if let Some(parent) = config.database_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).context("failed to create database directory")?;
        }
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // Logs go to stderr so query output stays pipeable.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match &cli.command {
        Some(Commands::Track {
            files,
            no_wait_history,
        }) => {
            let config = load_config(cli.config.as_deref(), cli.db.as_deref())?;
            let report = track::run(&config, files, !*no_wait_history, cli.verbose).await?;
            track::print_summary(&mut io::stdout().lock(), &report)?;
        }
        Some(Commands::Combos {
            position,
            limit,
            json,
        }) => {
            let config = load_config(cli.config.as_deref(), cli.db.as_deref())?;
            query::run(
                &mut io::stdout().lock(),
                &config,
                QueryKind::Combos,
                *position,
                *limit,
                *json,
            )
            .await?;
        }
        Some(Commands::Neighbors {
            position,
            limit,
            json,
        }) => {
            let config = load_config(cli.config.as_deref(), cli.db.as_deref())?;
            query::run(
                &mut io::stdout().lock(),
                &config,
                QueryKind::Neighbors,
                *position,
                *limit,
                *json,
            )
            .await?;
        }
        Some(Commands::Stats { json }) => {
            let config = load_config(cli.config.as_deref(), cli.db.as_deref())?;
            stats::run(&mut io::stdout().lock(), &config, *json)?;
        }
        Some(Commands::Merge { files, out }) => {
            // Merge works on explicit paths only.
            merge::run(&mut io::stdout().lock(), files, out)?;
        }
        None => {
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!();
        }
    }

    Ok(())
}
