use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use sqlgate::config::Config;
use sqlgate::query::Dialect;

mod commands;

/// sqlgate - inspect filter translation and paginated statement formatting
#[derive(Parser)]
#[command(name = "sqlgate")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file (defaults to ./sqlgate.toml)
    #[arg(long, global = true, value_name = "PATH", env = "SQLGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Target dialect (sqlserver, postgres); overrides the configured one
    #[arg(long, global = true, value_name = "DIALECT")]
    dialect: Option<Dialect>,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Translate a filter expression into a SQL predicate fragment
    Translate {
        /// Filter expression, e.g. "name eq 'a' and age ge 18"
        #[arg(value_name = "FILTER")]
        filter: String,
    },
    /// Format a base query with filter, ordering, and pagination
    Format(commands::format::FormatArgs),
}

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let cli = Cli::parse();

    // Execute command
    let result = run(cli).await;

    // Handle result
    match result {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);

            // Show context if available
            if let Some(source) = e.source() {
                eprintln!("\n{} {}", "Caused by:".yellow(), source);
            }

            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => Config::load().context("Failed to load configuration")?,
    };
    sqlgate::observability::init_tracing(&config)?;

    let dialect = cli.dialect.unwrap_or(config.database.dialect);

    match cli.command {
        Commands::Translate { filter } => commands::translate::execute(&filter, dialect, cli.json),
        Commands::Format(args) => commands::format::execute(args, dialect, cli.json),
    }
}
