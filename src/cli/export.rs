use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::Serialize;
use sqlx::SqlitePool;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use crate::db;
use crate::models::{Prediction, Sport, TeamMetric};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExportKind {
    Ratings,
    Metrics,
    Predictions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExportFormat {
    Csv,
    Json,
}

#[derive(Debug, Serialize)]
struct RatingRow {
    entity_kind: String,
    entity_id: String,
    name: Option<String>,
    rating: f64,
}

#[derive(Debug, Serialize)]
struct MetricRow {
    team_id: String,
    season: i32,
    games_played: i32,
    offensive_efficiency: f64,
    defensive_efficiency: f64,
    net_rating: f64,
    pace: f64,
    adj_offensive_efficiency: Option<f64>,
    adj_defensive_efficiency: Option<f64>,
    adj_net_rating: Option<f64>,
    rolling_offensive_efficiency: f64,
    rolling_defensive_efficiency: f64,
    points_per_game: f64,
    points_allowed_per_game: f64,
    earned_run_average: Option<f64>,
    meets_minimum_games: bool,
}

impl From<&TeamMetric> for MetricRow {
    fn from(m: &TeamMetric) -> Self {
        Self {
            team_id: m.team_id.clone(),
            season: m.season,
            games_played: m.games_played,
            offensive_efficiency: m.offensive_efficiency,
            defensive_efficiency: m.defensive_efficiency,
            net_rating: m.net_rating,
            pace: m.pace,
            adj_offensive_efficiency: m.adj_offensive_efficiency,
            adj_defensive_efficiency: m.adj_defensive_efficiency,
            adj_net_rating: m.adj_net_rating,
            rolling_offensive_efficiency: m.rolling_offensive_efficiency,
            rolling_defensive_efficiency: m.rolling_defensive_efficiency,
            points_per_game: m.points_per_game,
            points_allowed_per_game: m.points_allowed_per_game,
            earned_run_average: m.earned_run_average,
            meets_minimum_games: m.meets_minimum_games,
        }
    }
}

#[derive(Debug, Serialize)]
struct PredictionRow {
    game_id: String,
    home_team_id: String,
    away_team_id: String,
    predicted_spread: f64,
    predicted_total: f64,
    predicted_home_score: f64,
    predicted_away_score: f64,
    home_win_probability: f64,
    confidence_score: f64,
    market_spread: Option<f64>,
    live_spread: Option<f64>,
    live_home_win_probability: Option<f64>,
    favored_correct: Option<bool>,
    spread_error: Option<f64>,
    total_error: Option<f64>,
    model_version: String,
}

impl From<&Prediction> for PredictionRow {
    fn from(p: &Prediction) -> Self {
        Self {
            game_id: p.game_id.clone(),
            home_team_id: p.home_team_id.clone(),
            away_team_id: p.away_team_id.clone(),
            predicted_spread: p.predicted_spread,
            predicted_total: p.predicted_total,
            predicted_home_score: p.predicted_home_score,
            predicted_away_score: p.predicted_away_score,
            home_win_probability: p.home_win_probability,
            confidence_score: p.confidence_score,
            market_spread: p.market_spread,
            live_spread: p.live.live_spread,
            live_home_win_probability: p.live.live_home_win_probability,
            favored_correct: p.grade.favored_correct,
            spread_error: p.grade.spread_error,
            total_error: p.grade.total_error,
            model_version: p.model_version.clone(),
        }
    }
}

enum ExportRows {
    Ratings(Vec<RatingRow>),
    Metrics(Vec<TeamMetric>),
    Predictions(Vec<Prediction>),
}

/// Dump ratings, metrics or predictions for offline analysis. Writes to
/// stdout when no path is given.
pub async fn run_export(
    pool: &SqlitePool,
    kind: ExportKind,
    sport: Sport,
    season: i32,
    format: ExportFormat,
    out: Option<&Path>,
) -> Result<usize> {
    // All queries finish before the output is opened.
    let rows = match kind {
        ExportKind::Ratings => ExportRows::Ratings(rating_rows(pool, sport).await?),
        ExportKind::Metrics => ExportRows::Metrics(db::get_team_metrics(pool, sport, season).await?),
        ExportKind::Predictions => ExportRows::Predictions(db::get_predictions(pool, sport, season).await?),
    };

    let writer: Box<dyn Write> = match out {
        Some(path) => Box::new(
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
        ),
        None => Box::new(io::stdout()),
    };

    let written = match (rows, format) {
        (ExportRows::Ratings(rows), ExportFormat::Json) => write_json(writer, &rows)?,
        (ExportRows::Ratings(rows), ExportFormat::Csv) => write_csv(writer, rows.iter())?,
        (ExportRows::Metrics(metrics), ExportFormat::Json) => write_json(writer, &metrics)?,
        (ExportRows::Metrics(metrics), ExportFormat::Csv) => write_csv(writer, metrics.iter().map(MetricRow::from))?,
        (ExportRows::Predictions(predictions), ExportFormat::Json) => write_json(writer, &predictions)?,
        (ExportRows::Predictions(predictions), ExportFormat::Csv) => {
            write_csv(writer, predictions.iter().map(PredictionRow::from))?
        }
    };

    if let Some(path) = out {
        eprintln!("💾 Wrote {} rows to {}", written, path.display());
    }
    Ok(written)
}

async fn rating_rows(pool: &SqlitePool, sport: Sport) -> Result<Vec<RatingRow>> {
    let mut rows: Vec<RatingRow> = db::get_teams(pool, sport)
        .await?
        .into_iter()
        .map(|t| RatingRow {
            entity_kind: "team".to_string(),
            entity_id: t.id,
            name: Some(t.name),
            rating: t.elo_rating,
        })
        .collect();
    rows.extend(db::get_player_ratings(pool, sport).await?.into_iter().map(|(entity, rating)| RatingRow {
        entity_kind: entity.kind.as_str().to_string(),
        entity_id: entity.id,
        name: None,
        rating,
    }));
    rows.sort_by(|a, b| b.rating.total_cmp(&a.rating));
    Ok(rows)
}

fn write_json<T: Serialize>(mut writer: Box<dyn Write>, rows: &[T]) -> Result<usize> {
    serde_json::to_writer_pretty(&mut writer, rows)?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(rows.len())
}

fn write_csv<T: Serialize>(writer: Box<dyn Write>, rows: impl Iterator<Item = T>) -> Result<usize> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    let mut count = 0;
    for row in rows {
        csv_writer.serialize(row)?;
        count += 1;
    }
    csv_writer.flush()?;
    Ok(count)
}
