use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sqlx::SqlitePool;
use std::path::Path;

use crate::config::EngineConfig;
use crate::db;
use crate::models::{ClockState, Game, GameStatus, InningHalf, MarketOdds, PlayerStat, Sport, Team, TeamStat};
use crate::services::BatchReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ImportKind {
    Teams,
    Games,
    TeamStats,
    PlayerStats,
    Odds,
}

#[derive(Debug, Deserialize)]
struct TeamRow {
    id: String,
    name: String,
    conference: Option<String>,
    division: Option<String>,
}

/// Flat CSV shape of a game; the clock columns are only filled for games
/// in progress.
#[derive(Debug, Deserialize)]
struct GameRow {
    id: String,
    season: i32,
    game_date: DateTime<Utc>,
    home_team_id: Option<String>,
    away_team_id: Option<String>,
    status: GameStatus,
    home_score: Option<i32>,
    away_score: Option<i32>,
    #[serde(default)]
    is_postseason: bool,
    #[serde(default)]
    is_neutral_site: bool,
    period: Option<i32>,
    clock: Option<String>,
    inning_half: Option<InningHalf>,
    outs: Option<i32>,
}

impl GameRow {
    fn into_game(self, sport: Sport) -> Game {
        Game {
            id: self.id,
            sport,
            season: self.season,
            game_date: self.game_date,
            home_team_id: self.home_team_id,
            away_team_id: self.away_team_id,
            status: self.status,
            home_score: self.home_score,
            away_score: self.away_score,
            is_postseason: self.is_postseason,
            is_neutral_site: self.is_neutral_site,
            clock: ClockState {
                period: self.period,
                clock: self.clock,
                inning_half: self.inning_half,
                outs: self.outs,
            },
        }
    }
}

/// Load feed rows from a CSV file. Unreadable rows and rows the database
/// rejects are counted as failed and the rest of the file still loads.
pub async fn run_import(
    pool: &SqlitePool,
    config: &EngineConfig,
    kind: ImportKind,
    sport: Sport,
    path: &Path,
) -> Result<BatchReport> {
    println!("📥 Importing {:?} for {} from {}...", kind, sport, path.display());
    let mut report = BatchReport::default();

    match kind {
        ImportKind::Teams => {
            let now = Utc::now();
            let default_rating = config.sport(sport).elo.default_rating;
            for row in read_rows::<TeamRow>(path, &mut report)? {
                let team = Team {
                    id: row.id,
                    name: row.name,
                    sport,
                    conference: row.conference,
                    division: row.division,
                    elo_rating: default_rating,
                    created_at: now,
                    updated_at: now,
                };
                tally(&mut report, &team.id, db::upsert_team(pool, &team).await);
            }
        }
        ImportKind::Games => {
            for row in read_rows::<GameRow>(path, &mut report)? {
                let game = row.into_game(sport);
                tally(&mut report, &game.id, db::upsert_game(pool, &game).await);
            }
        }
        ImportKind::TeamStats => {
            for stat in read_rows::<TeamStat>(path, &mut report)? {
                let outcome = db::upsert_team_stat(pool, &stat).await;
                tally(&mut report, &stat.game_id, outcome);
            }
        }
        ImportKind::PlayerStats => {
            for stat in read_rows::<PlayerStat>(path, &mut report)? {
                let outcome = db::upsert_player_stat(pool, &stat).await;
                tally(&mut report, &stat.game_id, outcome);
            }
        }
        ImportKind::Odds => {
            for odds in read_rows::<MarketOdds>(path, &mut report)? {
                let outcome = db::upsert_market_odds(pool, &odds).await;
                tally(&mut report, &odds.game_id, outcome);
            }
        }
    }

    println!("✅ Import complete: {}", report);
    Ok(report)
}

fn read_rows<T: DeserializeOwned>(path: &Path, report: &mut BatchReport) -> Result<Vec<T>> {
    let mut reader = csv::Reader::from_path(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut rows = Vec::new();
    for (line, record) in reader.deserialize::<T>().enumerate() {
        match record {
            Ok(row) => rows.push(row),
            Err(e) => {
                tracing::warn!("Skipping row {} of {}: {}", line + 1, path.display(), e);
                report.failed += 1;
            }
        }
    }
    Ok(rows)
}

fn tally(report: &mut BatchReport, id: &str, outcome: Result<()>) {
    match outcome {
        Ok(()) => report.processed += 1,
        Err(e) => {
            tracing::warn!("Failed to store {}: {}", id, e);
            report.failed += 1;
        }
    }
}
