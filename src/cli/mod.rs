use anyhow::Result;
use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::HashMap;

use crate::config::EngineConfig;
use crate::db;
use crate::models::{EntityKey, Prediction, Sport, Team};
use crate::services::{
    replay_partitions, BatchReport, EfficiencyCalculator, EloCalculator, EloPartition, LivePredictionUpdater,
    LiveUpdate, OpponentAdjustmentSolver, PredictionEnsemble, PredictionGrader, PredictionRequest,
};

pub mod export;
pub mod import;

pub use export::{run_export, ExportFormat, ExportKind};
pub use import::{run_import, ImportKind};

const RECENT_RATING_ROWS: usize = 5;

/// Apply Elo for final games of `season`. With `recompute`, history from
/// that season onward is rewound and every later game replayed. Without a
/// sport, all sports are replayed in parallel.
pub async fn run_elo(
    pool: &SqlitePool,
    config: &EngineConfig,
    sport: Option<Sport>,
    season: i32,
    recompute: bool,
) -> Result<BatchReport> {
    let sports: Vec<Sport> = sport.map_or_else(|| Sport::ALL.to_vec(), |s| vec![s]);

    let mut partitions = Vec::with_capacity(sports.len());
    for sport in sports {
        let mut store = db::load_rating_store(pool, sport).await?;
        let mut games = db::get_final_games(pool, sport, season).await?;
        let players = db::get_player_stats(pool, sport, season).await?;

        if recompute {
            let calculator = EloCalculator::new(sport, &config.sport(sport).elo);
            let rewound = calculator.rewind_from_season(&mut store, season);
            println!("⏪ {}: rewound {} rating rows from season {}", sport, rewound, season);
        } else {
            games.retain(|g| g.season == season);
        }
        partitions.push(EloPartition { sport, store, games, players });
    }

    println!("📈 Rating {} partition(s) from season {}...", partitions.len(), season);
    let report = replay_partitions(config, &mut partitions, !recompute);

    for partition in &partitions {
        db::save_rating_store(pool, partition.sport, &partition.store).await?;
        tracing::info!("{}: {} rating history rows stored", partition.sport, partition.store.history_len());
    }

    if report.total() == 0 {
        println!("📭 No final games found from season {}", season);
    }
    println!("✅ Elo complete: {}", report);
    Ok(report)
}

/// Offseason regression toward the default rating.
pub async fn run_regress(pool: &SqlitePool, config: &EngineConfig, sport: Sport) -> Result<usize> {
    let mut store = db::load_rating_store(pool, sport).await?;
    let calculator = EloCalculator::new(sport, &config.sport(sport).elo);
    let changed = calculator.regress_to_mean(&mut store);
    db::save_rating_store(pool, sport, &store).await?;

    println!("✅ Regressed {} {} ratings toward the mean", changed, sport);
    Ok(changed)
}

/// Recompute raw and opponent-adjusted team metrics for a season.
pub async fn run_metrics(pool: &SqlitePool, config: &EngineConfig, sport: Sport, season: i32) -> Result<BatchReport> {
    let sport_config = config.sport(sport);
    let games = db::get_games_for_season(pool, sport, season).await?;
    let stats = db::get_team_stats_for_season(pool, sport, season).await?;
    let teams = db::get_teams(pool, sport).await?;

    println!("📊 Computing {} {} metrics from {} games...", sport, season, games.len());

    let calculator = EfficiencyCalculator::new(sport, &sport_config.efficiency);
    let (mut metrics, lines) = calculator.calculate_season(season, &games, &stats);

    let solver = OpponentAdjustmentSolver::new(&sport_config.adjustment, calculator.scale());
    let adjustment = solver.solve(&metrics, &lines);
    adjustment.apply(&mut metrics);

    db::replace_team_metrics(pool, sport, season, &metrics).await?;

    let report = BatchReport {
        processed: metrics.len(),
        skipped: teams.len().saturating_sub(metrics.len()),
        failed: 0,
    };
    println!(
        "✅ Metrics complete: {} (adjusted {} teams in {} iterations)",
        report,
        adjustment.teams.len(),
        adjustment.iterations
    );
    if !adjustment.converged {
        println!("⚠️  Adjustment stopped at the iteration cap, last step {:.5}", adjustment.max_delta);
    }
    Ok(report)
}

/// Pregame forecasts for every scheduled game in the season.
pub async fn run_predict(pool: &SqlitePool, config: &EngineConfig, sport: Sport, season: i32) -> Result<BatchReport> {
    let sport_config = config.sport(sport);
    let games = db::get_scheduled_games(pool, sport, season).await?;

    if games.is_empty() {
        println!("📭 No scheduled {} games found for {}", sport, season);
        return Ok(BatchReport::default());
    }

    let ratings: HashMap<String, f64> = db::get_teams(pool, sport)
        .await?
        .into_iter()
        .map(|t| (t.id, t.elo_rating))
        .collect();
    let metrics: HashMap<String, _> = db::get_team_metrics(pool, sport, season)
        .await?
        .into_iter()
        .map(|m| (m.team_id.clone(), m))
        .collect();
    let odds = db::get_market_odds_for_season(pool, sport, season).await?;

    let default_rating = sport_config.elo.default_rating;
    let rating_of = |id: Option<&String>| id.and_then(|id| ratings.get(id)).copied().unwrap_or(default_rating);
    let requests: Vec<PredictionRequest> = games
        .iter()
        .map(|game| PredictionRequest {
            game,
            home_elo: rating_of(game.home_team_id.as_ref()),
            away_elo: rating_of(game.away_team_id.as_ref()),
            home_metric: game.home_team_id.as_ref().and_then(|id| metrics.get(id)),
            away_metric: game.away_team_id.as_ref().and_then(|id| metrics.get(id)),
            market: odds.get(&game.id),
        })
        .collect();

    println!("🔮 Generating predictions for {} scheduled games...", games.len());
    let ensemble = PredictionEnsemble::new(sport, sport_config);
    let predictions = ensemble.predict_all(&requests);
    db::upsert_predictions(pool, &predictions).await?;

    for prediction in &predictions {
        tracing::info!(
            "Generated prediction for {} vs {}: spread {:+.1}, total {:.1}, home {:.1}%",
            prediction.home_team_id,
            prediction.away_team_id,
            prediction.predicted_spread,
            prediction.predicted_total,
            prediction.home_win_probability * 100.0
        );
    }

    println!("\n🎯 Sample predictions:");
    for (i, prediction) in predictions.iter().take(5).enumerate() {
        print_prediction(i + 1, prediction);
    }

    let report = BatchReport {
        processed: predictions.len(),
        skipped: games.len() - predictions.len(),
        failed: 0,
    };
    println!("✅ Predictions complete: {}", report);
    Ok(report)
}

fn print_prediction(rank: usize, prediction: &Prediction) {
    println!("{}. {} vs {}:", rank, prediction.home_team_id, prediction.away_team_id);
    println!(
        "   Spread: {:+.1} | Total: {:.1} | Score: {:.1}-{:.1}",
        prediction.predicted_spread,
        prediction.predicted_total,
        prediction.predicted_home_score,
        prediction.predicted_away_score
    );
    println!(
        "   Home win: {:.1}% | Away win: {:.1}% | Confidence: {:.0}\n",
        prediction.home_win_probability * 100.0,
        prediction.away_win_probability() * 100.0,
        prediction.confidence_score
    );
}

/// Refresh live fields for in-progress games and null them on games that
/// have moved on.
pub async fn run_live(pool: &SqlitePool, config: &EngineConfig, sport: Sport) -> Result<BatchReport> {
    let updater = LivePredictionUpdater::new(sport, config.sport(sport));
    let candidates = db::get_live_candidates(pool, sport).await?;
    let mut report = BatchReport::default();

    println!("📡 Updating {} live {} predictions...", candidates.len(), sport);

    for (game, mut prediction) in candidates {
        match updater.refresh(&game, &prediction) {
            LiveUpdate::Refreshed(fields) => prediction.live = fields,
            LiveUpdate::Cleared => LivePredictionUpdater::clear(&mut prediction),
            LiveUpdate::Unavailable => {
                tracing::debug!("No readable score or clock for game {}", game.id);
                report.skipped += 1;
                continue;
            }
        }
        match db::update_live_fields(pool, &game.id, &prediction.live).await {
            Ok(()) => report.processed += 1,
            Err(e) => {
                tracing::warn!("Failed to write live fields for {}: {}", game.id, e);
                report.failed += 1;
            }
        }
    }

    println!("✅ Live update complete: {}", report);
    Ok(report)
}

/// Grade newly final games and print season accuracy.
pub async fn run_grade(pool: &SqlitePool, sport: Sport, season: i32) -> Result<BatchReport> {
    let predictions = db::get_predictions(pool, sport, season).await?;
    let games = db::get_games_for_season(pool, sport, season).await?;

    let pending = PredictionGrader::grade_pending(&predictions, &games);
    let now = Utc::now();
    let grades: Vec<(String, _)> = pending.iter().map(|r| (r.game_id.clone(), r.fields(now))).collect();
    db::record_grades(pool, &grades).await?;

    let by_id: HashMap<&str, _> = games.iter().map(|g| (g.id.as_str(), g)).collect();
    let all_records: Vec<_> = predictions
        .iter()
        .filter_map(|p| PredictionGrader::grade(p, by_id.get(p.game_id.as_str())?))
        .collect();
    let summary = PredictionGrader::summarize(&all_records);

    println!("📋 {} {} grading", sport, season);
    println!("   Graded now: {} | Total graded: {}", pending.len(), summary.count);
    if let Some(accuracy) = summary.accuracy_pct {
        println!("   Accuracy: {:.1}% ({} of {})", accuracy, summary.correct, summary.decided);
    }
    if let (Some(brier), Some(log_loss)) = (summary.brier_score, summary.log_loss) {
        println!("   Brier: {:.4} | Log loss: {:.4}", brier, log_loss);
    }
    if let (Some(spread), Some(total)) = (summary.mean_abs_spread_error, summary.mean_abs_total_error) {
        println!("   Mean abs error: spread {:.2} | total {:.2}", spread, total);
    }
    for bucket in summary.buckets.iter().filter(|b| b.count > 0) {
        println!(
            "   Confidence {:>3.0}-{:<3.0}: {:>4} games | accuracy {} | predicted {} | observed {}",
            bucket.lower,
            bucket.upper,
            bucket.count,
            percent(bucket.accuracy.map(|a| a / 100.0)),
            percent(bucket.mean_predicted_probability),
            percent(bucket.observed_home_win_rate)
        );
    }

    let report = BatchReport {
        processed: pending.len(),
        skipped: predictions.len() - all_records.len(),
        failed: 0,
    };
    println!("✅ Grading complete: {}", report);
    Ok(report)
}

/// Rating, recent rating moves and season metrics for one team.
pub async fn run_team(pool: &SqlitePool, team_id: &str, season: Option<i32>) -> Result<Team> {
    let Some(team) = db::get_team_by_id(pool, team_id).await? else {
        anyhow::bail!("Team {} not found", team_id);
    };
    let history = db::get_rating_history(pool, &EntityKey::team(&team.id)).await?;

    println!("📋 {} ({}) | {}", team.name, team.id, team.sport);
    if let (Some(conference), Some(division)) = (&team.conference, &team.division) {
        println!("   {} / {}", conference, division);
    }
    println!("   Elo: {:.1} | Rated games: {}", team.elo_rating, history.len());
    for row in history.iter().rev().take(RECENT_RATING_ROWS) {
        println!(
            "   {} {}: {:.1} -> {:.1} ({:+.1})",
            row.game_date.format("%Y-%m-%d"),
            row.game_id,
            row.rating_before,
            row.rating_after,
            row.delta
        );
    }

    if let Some(season) = season {
        let metrics = db::get_team_metrics(pool, team.sport, season).await?;
        match metrics.iter().find(|m| m.team_id == team.id) {
            Some(m) => {
                println!(
                    "📊 {}: {} games | off {:.1} | def {:.1} | net {:+.1} | pace {:.1}",
                    season, m.games_played, m.offensive_efficiency, m.defensive_efficiency, m.net_rating, m.pace
                );
                if let Some(adj_net) = m.adj_net_rating {
                    println!("   Adjusted net: {:+.1}", adj_net);
                }
            }
            None => println!("📭 No {} metrics for {}", season, team.id),
        }
    }
    Ok(team)
}

fn percent(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.1}%", v * 100.0))
}

pub fn check_config(config: &EngineConfig) {
    println!("⚙️  Configuration is valid");
    for sport in Sport::ALL {
        let c = config.sport(sport);
        let w = &c.prediction.weights;
        println!(
            "   • {}: K {} | home adv {} | weights elo {:.2} eff {:.2} form {:.2} market {:.2} | {} pts ≈ {:.0}%",
            sport,
            c.elo.base_k,
            c.elo.home_advantage,
            w.elo,
            w.efficiency,
            w.form,
            w.market,
            c.prediction.reference_spread,
            c.prediction.reference_probability * 100.0
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClockState, EntityKind, Game, GameStatus, MarketOdds, PlayerStat, TeamStat};
    use chrono::{Duration, TimeZone};

    async fn seeded_pool() -> SqlitePool {
        let pool = db::connect("sqlite::memory:").await.unwrap();
        db::init_database_with_pool(&pool).await.unwrap();
        for id in ["bos", "nyk", "mia"] {
            db::upsert_team(
                &pool,
                &Team {
                    id: id.to_string(),
                    name: id.to_uppercase(),
                    sport: Sport::Basketball,
                    conference: None,
                    division: None,
                    elo_rating: 1500.0,
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                },
            )
            .await
            .unwrap();
        }

        let schedule = [
            ("g1", "bos", "nyk", Some((110, 100))),
            ("g2", "nyk", "mia", Some((98, 101))),
            ("g3", "mia", "bos", Some((95, 104))),
            ("g4", "bos", "mia", None),
        ];
        let start = Utc.with_ymd_and_hms(2024, 11, 1, 0, 0, 0).unwrap();
        for (day, (id, home, away, score)) in schedule.into_iter().enumerate() {
            let game = Game {
                id: id.to_string(),
                sport: Sport::Basketball,
                season: 2025,
                game_date: start + Duration::days(day as i64),
                home_team_id: Some(home.to_string()),
                away_team_id: Some(away.to_string()),
                status: if score.is_some() { GameStatus::Final } else { GameStatus::Scheduled },
                home_score: score.map(|s| s.0),
                away_score: score.map(|s| s.1),
                is_postseason: false,
                is_neutral_site: false,
                clock: ClockState::default(),
            };
            db::upsert_game(&pool, &game).await.unwrap();
            if let Some((home_points, away_points)) = score {
                for (team, points) in [(home, home_points), (away, away_points)] {
                    let stat = TeamStat {
                        game_id: id.to_string(),
                        team_id: team.to_string(),
                        points,
                        possessions: Some(96.0),
                        ..TeamStat::default()
                    };
                    db::upsert_team_stat(&pool, &stat).await.unwrap();
                }
            }
        }
        pool
    }

    #[tokio::test]
    async fn test_season_pipeline() {
        let pool = seeded_pool().await;
        let config = EngineConfig::default();

        let elo = run_elo(&pool, &config, Some(Sport::Basketball), 2025, false).await.unwrap();
        assert_eq!(elo.processed, 3);
        let again = run_elo(&pool, &config, Some(Sport::Basketball), 2025, false).await.unwrap();
        assert_eq!(again.processed, 0);
        assert_eq!(again.skipped, 3);

        let before = db::get_team_by_id(&pool, "bos").await.unwrap().unwrap().elo_rating;
        let recomputed = run_elo(&pool, &config, Some(Sport::Basketball), 2025, true).await.unwrap();
        assert_eq!(recomputed.processed, 3);
        let after = db::get_team_by_id(&pool, "bos").await.unwrap().unwrap().elo_rating;
        assert_eq!(before, after);

        let metrics = run_metrics(&pool, &config, Sport::Basketball, 2025).await.unwrap();
        assert_eq!(metrics.processed, 3);

        let predicted = run_predict(&pool, &config, Sport::Basketball, 2025).await.unwrap();
        assert_eq!(predicted.processed, 1);
        let prediction = db::get_prediction_by_game_id(&pool, "g4").await.unwrap().unwrap();
        assert!(prediction.home_elo > 1500.0);
        assert!(prediction.home_win_probability > 0.5);
    }

    #[tokio::test]
    async fn test_live_then_final_clears() {
        let pool = seeded_pool().await;
        let config = EngineConfig::default();
        run_predict(&pool, &config, Sport::Basketball, 2025).await.unwrap();

        let mut game = db::get_game_by_id(&pool, "g4").await.unwrap().unwrap();
        game.status = GameStatus::InProgress;
        game.home_score = Some(50);
        game.away_score = Some(44);
        game.clock = ClockState { period: Some(2), clock: Some("12:00".to_string()), ..ClockState::default() };
        db::upsert_game(&pool, &game).await.unwrap();

        let report = run_live(&pool, &config, Sport::Basketball).await.unwrap();
        assert_eq!(report.processed, 1);
        let live = db::get_prediction_by_game_id(&pool, "g4").await.unwrap().unwrap();
        assert_eq!(live.live.live_home_score, Some(50));
        assert!(live.live.live_home_win_probability.unwrap() > 0.5);

        game.status = GameStatus::Final;
        game.home_score = Some(101);
        game.away_score = Some(99);
        db::upsert_game(&pool, &game).await.unwrap();
        run_live(&pool, &config, Sport::Basketball).await.unwrap();
        let cleared = db::get_prediction_by_game_id(&pool, "g4").await.unwrap().unwrap();
        assert!(cleared.live.is_empty());

        let graded = run_grade(&pool, Sport::Basketball, 2025).await.unwrap();
        assert_eq!(graded.processed, 1);
        let regraded = run_grade(&pool, Sport::Basketball, 2025).await.unwrap();
        assert_eq!(regraded.processed, 0);
    }

    #[tokio::test]
    async fn test_market_quote_blends_into_forecast() {
        let pool = seeded_pool().await;
        let config = EngineConfig::default();
        run_elo(&pool, &config, Some(Sport::Basketball), 2025, false).await.unwrap();
        run_metrics(&pool, &config, Sport::Basketball, 2025).await.unwrap();

        run_predict(&pool, &config, Sport::Basketball, 2025).await.unwrap();
        let model_only = db::get_prediction_by_game_id(&pool, "g4").await.unwrap().unwrap();
        assert_eq!(model_only.market_spread, None);
        assert!(model_only.predicted_total < 230.0);

        let odds = MarketOdds {
            game_id: "g4".to_string(),
            bookmaker: "book".to_string(),
            home_moneyline: Some(-200),
            away_moneyline: Some(170),
            home_spread: Some(-5.0),
            total: Some(230.0),
            fetched_at: "2024-11-04T00:00:00Z".to_string(),
        };
        db::upsert_market_odds(&pool, &odds).await.unwrap();

        run_predict(&pool, &config, Sport::Basketball, 2025).await.unwrap();
        let blended = db::get_prediction_by_game_id(&pool, "g4").await.unwrap().unwrap();
        assert_eq!(blended.market_spread, Some(5.0));
        assert!(blended.predicted_total > model_only.predicted_total);
        assert!(blended.predicted_total < 230.0);
        assert!((blended.predicted_spread - 5.0).abs() <= (model_only.predicted_spread - 5.0).abs());
        assert!(blended.confidence_score > model_only.confidence_score);
    }

    #[tokio::test]
    async fn test_starting_pitchers_rated_and_stored() {
        let pool = db::connect("sqlite::memory:").await.unwrap();
        db::init_database_with_pool(&pool).await.unwrap();
        for id in ["nyy", "bos"] {
            db::upsert_team(
                &pool,
                &Team {
                    id: id.to_string(),
                    name: id.to_uppercase(),
                    sport: Sport::Baseball,
                    conference: None,
                    division: None,
                    elo_rating: 1500.0,
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                },
            )
            .await
            .unwrap();
        }

        let start = Utc.with_ymd_and_hms(2024, 6, 1, 23, 0, 0).unwrap();
        let schedule = [("g1", "nyy", "bos", 5, 3, "nyy-ace", "bos-ace"), ("g2", "bos", "nyy", 4, 2, "bos-two", "nyy-two")];
        for (day, (id, home, away, home_runs, away_runs, home_starter, away_starter)) in
            schedule.into_iter().enumerate()
        {
            let game = Game {
                id: id.to_string(),
                sport: Sport::Baseball,
                season: 2024,
                game_date: start + Duration::days(day as i64),
                home_team_id: Some(home.to_string()),
                away_team_id: Some(away.to_string()),
                status: GameStatus::Final,
                home_score: Some(home_runs),
                away_score: Some(away_runs),
                is_postseason: false,
                is_neutral_site: false,
                clock: ClockState::default(),
            };
            db::upsert_game(&pool, &game).await.unwrap();
            for (team, player, innings) in
                [(home, home_starter, 6.0), (home, "closer", 1.0), (away, away_starter, 7.0)]
            {
                let stat = PlayerStat {
                    game_id: id.to_string(),
                    team_id: team.to_string(),
                    player_id: format!("{}-{}", player, id),
                    playing_time: innings,
                };
                db::upsert_player_stat(&pool, &stat).await.unwrap();
            }
        }

        let report = run_elo(&pool, &EngineConfig::default(), Some(Sport::Baseball), 2024, false).await.unwrap();
        assert_eq!(report.processed, 2);

        let ratings: HashMap<String, f64> = db::get_player_ratings(&pool, Sport::Baseball)
            .await
            .unwrap()
            .into_iter()
            .inspect(|(entity, _)| assert_eq!(entity.kind, EntityKind::Pitcher))
            .map(|(entity, rating)| (entity.id, rating))
            .collect();
        assert_eq!(ratings.len(), 4);
        assert!(ratings["nyy-ace-g1"] > 1500.0);
        assert!(ratings["bos-ace-g1"] < 1500.0);
        assert!(ratings["bos-two-g2"] > 1500.0);
        assert!(!ratings.keys().any(|id| id.starts_with("closer")));

        let history = db::get_rating_history(&pool, &EntityKey::pitcher("nyy-ace-g1")).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].game_id, "g1");
    }

    #[tokio::test]
    async fn test_team_summary() {
        let pool = seeded_pool().await;
        let config = EngineConfig::default();
        run_elo(&pool, &config, Some(Sport::Basketball), 2025, false).await.unwrap();
        run_metrics(&pool, &config, Sport::Basketball, 2025).await.unwrap();

        let team = run_team(&pool, "bos", Some(2025)).await.unwrap();
        assert_eq!(team.id, "bos");
        assert!(team.elo_rating > 1500.0);
        assert!(run_team(&pool, "lal", None).await.is_err());
    }
}
