mod cli;
mod config;
mod db;
mod error;
mod models;
mod services;
mod sports;
mod store;
mod utils;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use crate::cli::{ExportFormat, ExportKind, ImportKind};
use crate::config::EngineConfig;
use crate::models::Sport;

#[derive(Parser)]
#[command(name = "forecast")]
#[command(about = "Team ratings, efficiency metrics and game forecasts")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    InitDb,
    /// Load teams, games, box scores or odds from a CSV file
    Import {
        #[arg(short, long, value_enum)]
        kind: ImportKind,
        #[arg(short, long)]
        sport: Sport,
        file: PathBuf,
    },
    /// Apply Elo updates for final games
    Elo {
        /// Limit to one sport; all sports run in parallel otherwise
        #[arg(short, long)]
        sport: Option<Sport>,
        #[arg(long)]
        season: i32,
        /// Rewind and replay everything from this season onward
        #[arg(long)]
        recompute: bool,
    },
    /// Offseason regression toward the default rating
    Regress {
        #[arg(short, long)]
        sport: Sport,
    },
    /// Recompute raw and opponent-adjusted team metrics
    Metrics {
        #[arg(short, long)]
        sport: Sport,
        #[arg(long)]
        season: i32,
    },
    /// Generate pregame predictions for scheduled games
    Predict {
        #[arg(short, long)]
        sport: Sport,
        #[arg(long)]
        season: i32,
    },
    /// Refresh live predictions for in-progress games
    Live {
        #[arg(short, long)]
        sport: Sport,
    },
    /// Grade predictions for finished games
    Grade {
        #[arg(short, long)]
        sport: Sport,
        #[arg(long)]
        season: i32,
    },
    /// Export ratings, metrics or predictions
    Export {
        #[arg(short, long, value_enum)]
        kind: ExportKind,
        #[arg(short, long)]
        sport: Sport,
        #[arg(long)]
        season: i32,
        #[arg(short, long, value_enum, default_value = "csv")]
        format: ExportFormat,
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Show a team's rating history and season metrics
    Team {
        id: String,
        #[arg(long)]
        season: Option<i32>,
    },
    /// Load and validate the configuration
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    dotenv::dotenv().ok();

    let cli = Cli::parse();

    // Validated on load, before anything is written
    let config = EngineConfig::load()?;

    if let Commands::CheckConfig = cli.command {
        cli::check_config(&config);
        return Ok(());
    }
    if let Commands::InitDb = cli.command {
        tracing::info!("Initializing database...");
        db::init_database().await?;
        return Ok(());
    }

    let pool = db::create_pool().await?;
    db::init_database_with_pool(&pool).await?;

    match cli.command {
        Commands::Import { kind, sport, file } => {
            cli::run_import(&pool, &config, kind, sport, &file).await?;
        }
        Commands::Elo { sport, season, recompute } => {
            tracing::info!("Running Elo from season {} (recompute: {})", season, recompute);
            cli::run_elo(&pool, &config, sport, season, recompute).await?;
        }
        Commands::Regress { sport } => {
            cli::run_regress(&pool, &config, sport).await?;
        }
        Commands::Metrics { sport, season } => {
            cli::run_metrics(&pool, &config, sport, season).await?;
        }
        Commands::Predict { sport, season } => {
            tracing::info!("Generating predictions...");
            cli::run_predict(&pool, &config, sport, season).await?;
        }
        Commands::Live { sport } => {
            cli::run_live(&pool, &config, sport).await?;
        }
        Commands::Grade { sport, season } => {
            cli::run_grade(&pool, sport, season).await?;
        }
        Commands::Export { kind, sport, season, format, out } => {
            cli::run_export(&pool, kind, sport, season, format, out.as_deref()).await?;
        }
        Commands::Team { id, season } => {
            cli::run_team(&pool, &id, season).await?;
        }
        Commands::InitDb | Commands::CheckConfig => {}
    }

    Ok(())
}
