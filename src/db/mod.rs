use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::env;
use std::str::FromStr;

use crate::error::EngineError;
use crate::models::*;
use crate::store::MemoryRatingStore;

const DEFAULT_DATABASE_URL: &str = "sqlite:data/forecast.db";
const IN_PROGRESS_STATUSES: &str = "('in_progress', 'halftime', 'end_of_period', 'delayed')";

pub async fn create_pool() -> Result<SqlitePool> {
    let database_url = env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());

    // Strip the "sqlite:" prefix to get the file path, create parent dir if needed
    let file_path = database_url
        .strip_prefix("sqlite:///")
        .or_else(|| database_url.strip_prefix("sqlite://"))
        .or_else(|| database_url.strip_prefix("sqlite:"))
        .unwrap_or(&database_url);

    if !file_path.starts_with(":memory:") {
        if let Some(parent) = std::path::Path::new(file_path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.ok();
            }
        }
    }

    connect(&database_url).await
}

/// In-memory databases live per connection, so they get a single one.
pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
    let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Called from the CLI where no pool exists yet.
pub async fn init_database() -> Result<()> {
    let pool = create_pool().await?;
    init_database_with_pool(&pool).await
}

pub async fn init_database_with_pool(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS teams (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            sport TEXT NOT NULL,
            conference TEXT,
            division TEXT,
            elo_rating REAL NOT NULL DEFAULT 1500.0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS games (
            id TEXT PRIMARY KEY,
            sport TEXT NOT NULL,
            season INTEGER NOT NULL,
            game_date TEXT NOT NULL,
            home_team_id TEXT,
            away_team_id TEXT,
            status TEXT NOT NULL DEFAULT 'scheduled',
            home_score INTEGER,
            away_score INTEGER,
            is_postseason INTEGER NOT NULL DEFAULT 0,
            is_neutral_site INTEGER NOT NULL DEFAULT 0,
            period INTEGER,
            clock TEXT,
            inning_half TEXT,
            outs INTEGER,
            FOREIGN KEY (home_team_id) REFERENCES teams (id),
            FOREIGN KEY (away_team_id) REFERENCES teams (id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS team_stats (
            game_id TEXT NOT NULL,
            team_id TEXT NOT NULL,
            points INTEGER NOT NULL,
            possessions REAL,
            field_goals_attempted INTEGER,
            offensive_rebounds INTEGER,
            turnovers INTEGER,
            free_throws_attempted INTEGER,
            at_bats INTEGER,
            walks INTEGER,
            hit_by_pitch INTEGER,
            sacrifice_flies INTEGER,
            innings_pitched REAL,
            earned_runs INTEGER,
            offensive_plays INTEGER,
            PRIMARY KEY (game_id, team_id),
            FOREIGN KEY (game_id) REFERENCES games (id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS player_stats (
            game_id TEXT NOT NULL,
            team_id TEXT NOT NULL,
            player_id TEXT NOT NULL,
            playing_time REAL NOT NULL,
            PRIMARY KEY (game_id, player_id),
            FOREIGN KEY (game_id) REFERENCES games (id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS player_ratings (
            entity_kind TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            sport TEXT NOT NULL,
            rating REAL NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (entity_kind, entity_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS rating_history (
            id TEXT PRIMARY KEY,
            entity_kind TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            game_id TEXT NOT NULL,
            sport TEXT NOT NULL,
            season INTEGER NOT NULL,
            rating_before REAL NOT NULL,
            rating_after REAL NOT NULL,
            delta REAL NOT NULL,
            game_date TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE (entity_kind, entity_id, game_id),
            FOREIGN KEY (game_id) REFERENCES games (id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS team_metrics (
            team_id TEXT NOT NULL,
            sport TEXT NOT NULL,
            season INTEGER NOT NULL,
            games_played INTEGER NOT NULL,
            offensive_efficiency REAL NOT NULL,
            defensive_efficiency REAL NOT NULL,
            net_rating REAL NOT NULL,
            pace REAL NOT NULL,
            adj_offensive_efficiency REAL,
            adj_defensive_efficiency REAL,
            adj_net_rating REAL,
            rolling_games INTEGER NOT NULL,
            rolling_offensive_efficiency REAL NOT NULL,
            rolling_defensive_efficiency REAL NOT NULL,
            rolling_pace REAL NOT NULL,
            home_games INTEGER NOT NULL,
            home_offensive_efficiency REAL NOT NULL,
            home_defensive_efficiency REAL NOT NULL,
            away_games INTEGER NOT NULL,
            away_offensive_efficiency REAL NOT NULL,
            away_defensive_efficiency REAL NOT NULL,
            points_per_game REAL NOT NULL,
            points_allowed_per_game REAL NOT NULL,
            earned_run_average REAL,
            meets_minimum_games INTEGER NOT NULL,
            adjustment_iterations INTEGER,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (team_id, season),
            FOREIGN KEY (team_id) REFERENCES teams (id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS predictions (
            game_id TEXT PRIMARY KEY,
            sport TEXT NOT NULL,
            season INTEGER NOT NULL,
            home_team_id TEXT NOT NULL,
            away_team_id TEXT NOT NULL,
            home_elo REAL NOT NULL,
            away_elo REAL NOT NULL,
            home_offensive_efficiency REAL NOT NULL,
            home_defensive_efficiency REAL NOT NULL,
            away_offensive_efficiency REAL NOT NULL,
            away_defensive_efficiency REAL NOT NULL,
            elo_spread REAL NOT NULL,
            efficiency_spread REAL NOT NULL,
            form_spread REAL NOT NULL,
            market_spread REAL,
            predicted_spread REAL NOT NULL,
            predicted_total REAL NOT NULL,
            predicted_home_score REAL NOT NULL,
            predicted_away_score REAL NOT NULL,
            home_win_probability REAL NOT NULL,
            confidence_score REAL NOT NULL,
            model_version TEXT NOT NULL,
            live_spread REAL,
            live_total REAL,
            live_home_win_probability REAL,
            live_home_score INTEGER,
            live_away_score INTEGER,
            live_period INTEGER,
            live_clock TEXT,
            live_updated_at TEXT,
            graded_at TEXT,
            favored_correct INTEGER,
            spread_error REAL,
            total_error REAL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY (game_id) REFERENCES games (id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // market_odds: one row per game, latest quote wins
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS market_odds (
            game_id TEXT PRIMARY KEY,
            bookmaker TEXT NOT NULL,
            home_moneyline INTEGER,
            away_moneyline INTEGER,
            home_spread REAL,
            total REAL,
            fetched_at TEXT NOT NULL,
            FOREIGN KEY (game_id) REFERENCES games (id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_games_sport_season ON games(sport, season)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_games_status ON games(status)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_rating_history_sport ON rating_history(sport, season)")
        .execute(pool)
        .await?;

    tracing::info!("Database initialized successfully");
    Ok(())
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

fn parse_optional_time(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.as_deref().map(parse_time).transpose()
}

fn parse_stored<T: FromStr>(table: &'static str, column: &'static str, value: String) -> Result<T> {
    value
        .parse::<T>()
        .map_err(|_| EngineError::InvalidStoredValue { table, column, value }.into())
}

// Team operations
pub async fn upsert_team(pool: &SqlitePool, team: &Team) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO teams (id, name, sport, conference, division, elo_rating, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            sport = excluded.sport,
            conference = excluded.conference,
            division = excluded.division,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&team.id)
    .bind(&team.name)
    .bind(team.sport.as_str())
    .bind(&team.conference)
    .bind(&team.division)
    .bind(team.elo_rating)
    .bind(team.created_at.to_rfc3339())
    .bind(team.updated_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

fn team_from_row(row: &SqliteRow) -> Result<Team> {
    Ok(Team {
        id: row.get("id"),
        name: row.get("name"),
        sport: parse_stored("teams", "sport", row.get("sport"))?,
        conference: row.get("conference"),
        division: row.get("division"),
        elo_rating: row.get("elo_rating"),
        created_at: parse_time(&row.get::<String, _>("created_at"))?,
        updated_at: parse_time(&row.get::<String, _>("updated_at"))?,
    })
}

pub async fn get_teams(pool: &SqlitePool, sport: Sport) -> Result<Vec<Team>> {
    let rows = sqlx::query("SELECT * FROM teams WHERE sport = ? ORDER BY elo_rating DESC, name")
        .bind(sport.as_str())
        .fetch_all(pool)
        .await?;

    rows.iter().map(team_from_row).collect()
}

pub async fn get_team_by_id(pool: &SqlitePool, team_id: &str) -> Result<Option<Team>> {
    let row = sqlx::query("SELECT * FROM teams WHERE id = ?")
        .bind(team_id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(team_from_row).transpose()
}

// Game operations
pub async fn upsert_game(pool: &SqlitePool, game: &Game) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO games
        (id, sport, season, game_date, home_team_id, away_team_id, status, home_score, away_score,
         is_postseason, is_neutral_site, period, clock, inning_half, outs)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            season = excluded.season,
            game_date = excluded.game_date,
            home_team_id = excluded.home_team_id,
            away_team_id = excluded.away_team_id,
            status = excluded.status,
            home_score = excluded.home_score,
            away_score = excluded.away_score,
            is_postseason = excluded.is_postseason,
            is_neutral_site = excluded.is_neutral_site,
            period = excluded.period,
            clock = excluded.clock,
            inning_half = excluded.inning_half,
            outs = excluded.outs
        "#,
    )
    .bind(&game.id)
    .bind(game.sport.as_str())
    .bind(game.season)
    .bind(game.game_date.to_rfc3339())
    .bind(&game.home_team_id)
    .bind(&game.away_team_id)
    .bind(game.status.as_str())
    .bind(game.home_score)
    .bind(game.away_score)
    .bind(game.is_postseason)
    .bind(game.is_neutral_site)
    .bind(game.clock.period)
    .bind(&game.clock.clock)
    .bind(game.clock.inning_half.map(|h| h.as_str()))
    .bind(game.clock.outs)
    .execute(pool)
    .await?;

    Ok(())
}

fn game_from_row(row: &SqliteRow) -> Result<Game> {
    let inning_half = row
        .get::<Option<String>, _>("inning_half")
        .map(|h| parse_stored("games", "inning_half", h))
        .transpose()?;

    Ok(Game {
        id: row.get("id"),
        sport: parse_stored("games", "sport", row.get("sport"))?,
        season: row.get("season"),
        game_date: parse_time(&row.get::<String, _>("game_date"))?,
        home_team_id: row.get("home_team_id"),
        away_team_id: row.get("away_team_id"),
        status: parse_stored("games", "status", row.get("status"))?,
        home_score: row.get("home_score"),
        away_score: row.get("away_score"),
        is_postseason: row.get("is_postseason"),
        is_neutral_site: row.get("is_neutral_site"),
        clock: ClockState {
            period: row.get("period"),
            clock: row.get("clock"),
            inning_half,
            outs: row.get("outs"),
        },
    })
}

pub async fn get_game_by_id(pool: &SqlitePool, game_id: &str) -> Result<Option<Game>> {
    let row = sqlx::query("SELECT * FROM games WHERE id = ?")
        .bind(game_id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(game_from_row).transpose()
}

pub async fn get_games_for_season(pool: &SqlitePool, sport: Sport, season: i32) -> Result<Vec<Game>> {
    let rows = sqlx::query("SELECT * FROM games WHERE sport = ? AND season = ? ORDER BY game_date, id")
        .bind(sport.as_str())
        .bind(season)
        .fetch_all(pool)
        .await?;

    rows.iter().map(game_from_row).collect()
}

/// Final games from `min_season` onward, oldest first.
pub async fn get_final_games(pool: &SqlitePool, sport: Sport, min_season: i32) -> Result<Vec<Game>> {
    let rows = sqlx::query(
        r#"SELECT * FROM games
           WHERE sport = ? AND season >= ? AND status = 'final'
           ORDER BY game_date, id"#,
    )
    .bind(sport.as_str())
    .bind(min_season)
    .fetch_all(pool)
    .await?;

    rows.iter().map(game_from_row).collect()
}

pub async fn get_scheduled_games(pool: &SqlitePool, sport: Sport, season: i32) -> Result<Vec<Game>> {
    let rows = sqlx::query(
        r#"SELECT * FROM games
           WHERE sport = ? AND season = ? AND status = 'scheduled'
           ORDER BY game_date, id"#,
    )
    .bind(sport.as_str())
    .bind(season)
    .fetch_all(pool)
    .await?;

    rows.iter().map(game_from_row).collect()
}

/// Games that are in progress, plus any whose prediction still carries
/// live fields and therefore needs clearing.
pub async fn get_live_candidates(pool: &SqlitePool, sport: Sport) -> Result<Vec<(Game, Prediction)>> {
    let query = format!(
        r#"SELECT g.id AS candidate_id FROM games g
           JOIN predictions p ON p.game_id = g.id
           WHERE g.sport = ? AND (g.status IN {} OR p.live_updated_at IS NOT NULL)
           ORDER BY g.game_date"#,
        IN_PROGRESS_STATUSES
    );
    let ids: Vec<String> = sqlx::query(&query)
        .bind(sport.as_str())
        .fetch_all(pool)
        .await?
        .iter()
        .map(|row| row.get("candidate_id"))
        .collect();

    let mut candidates = Vec::with_capacity(ids.len());
    for id in ids {
        if let (Some(game), Some(prediction)) =
            (get_game_by_id(pool, &id).await?, get_prediction_by_game_id(pool, &id).await?)
        {
            candidates.push((game, prediction));
        }
    }
    Ok(candidates)
}

// Box score operations
pub async fn upsert_team_stat(pool: &SqlitePool, stat: &TeamStat) -> Result<()> {
    sqlx::query(
        r#"
        INSERT OR REPLACE INTO team_stats
        (game_id, team_id, points, possessions, field_goals_attempted, offensive_rebounds, turnovers,
         free_throws_attempted, at_bats, walks, hit_by_pitch, sacrifice_flies, innings_pitched,
         earned_runs, offensive_plays)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&stat.game_id)
    .bind(&stat.team_id)
    .bind(stat.points)
    .bind(stat.possessions)
    .bind(stat.field_goals_attempted)
    .bind(stat.offensive_rebounds)
    .bind(stat.turnovers)
    .bind(stat.free_throws_attempted)
    .bind(stat.at_bats)
    .bind(stat.walks)
    .bind(stat.hit_by_pitch)
    .bind(stat.sacrifice_flies)
    .bind(stat.innings_pitched)
    .bind(stat.earned_runs)
    .bind(stat.offensive_plays)
    .execute(pool)
    .await?;

    Ok(())
}

/// Box scores for a season keyed by `(game_id, team_id)`.
pub async fn get_team_stats_for_season(
    pool: &SqlitePool,
    sport: Sport,
    season: i32,
) -> Result<HashMap<(String, String), TeamStat>> {
    let rows = sqlx::query(
        r#"SELECT s.* FROM team_stats s
           JOIN games g ON g.id = s.game_id
           WHERE g.sport = ? AND g.season = ?"#,
    )
    .bind(sport.as_str())
    .bind(season)
    .fetch_all(pool)
    .await?;

    let mut stats = HashMap::with_capacity(rows.len());
    for row in rows {
        let stat = TeamStat {
            game_id: row.get("game_id"),
            team_id: row.get("team_id"),
            points: row.get("points"),
            possessions: row.get("possessions"),
            field_goals_attempted: row.get("field_goals_attempted"),
            offensive_rebounds: row.get("offensive_rebounds"),
            turnovers: row.get("turnovers"),
            free_throws_attempted: row.get("free_throws_attempted"),
            at_bats: row.get("at_bats"),
            walks: row.get("walks"),
            hit_by_pitch: row.get("hit_by_pitch"),
            sacrifice_flies: row.get("sacrifice_flies"),
            innings_pitched: row.get("innings_pitched"),
            earned_runs: row.get("earned_runs"),
            offensive_plays: row.get("offensive_plays"),
        };
        stats.insert((stat.game_id.clone(), stat.team_id.clone()), stat);
    }
    Ok(stats)
}

pub async fn upsert_player_stat(pool: &SqlitePool, stat: &PlayerStat) -> Result<()> {
    sqlx::query(
        "INSERT OR REPLACE INTO player_stats (game_id, team_id, player_id, playing_time) VALUES (?, ?, ?, ?)",
    )
    .bind(&stat.game_id)
    .bind(&stat.team_id)
    .bind(&stat.player_id)
    .bind(stat.playing_time)
    .execute(pool)
    .await?;

    Ok(())
}

/// Player lines from `min_season` onward, grouped by game id.
pub async fn get_player_stats(
    pool: &SqlitePool,
    sport: Sport,
    min_season: i32,
) -> Result<HashMap<String, Vec<PlayerStat>>> {
    let rows = sqlx::query(
        r#"SELECT p.* FROM player_stats p
           JOIN games g ON g.id = p.game_id
           WHERE g.sport = ? AND g.season >= ?"#,
    )
    .bind(sport.as_str())
    .bind(min_season)
    .fetch_all(pool)
    .await?;

    let mut by_game: HashMap<String, Vec<PlayerStat>> = HashMap::new();
    for row in rows {
        let stat = PlayerStat {
            game_id: row.get("game_id"),
            team_id: row.get("team_id"),
            player_id: row.get("player_id"),
            playing_time: row.get("playing_time"),
        };
        by_game.entry(stat.game_id.clone()).or_default().push(stat);
    }
    Ok(by_game)
}

// Rating operations
fn history_from_row(row: &SqliteRow) -> Result<RatingHistory> {
    Ok(RatingHistory {
        id: row.get("id"),
        entity: EntityKey {
            kind: parse_stored("rating_history", "entity_kind", row.get("entity_kind"))?,
            id: row.get("entity_id"),
        },
        game_id: row.get("game_id"),
        sport: parse_stored("rating_history", "sport", row.get("sport"))?,
        season: row.get("season"),
        rating_before: row.get("rating_before"),
        rating_after: row.get("rating_after"),
        delta: row.get("delta"),
        game_date: parse_time(&row.get::<String, _>("game_date"))?,
        created_at: parse_time(&row.get::<String, _>("created_at"))?,
    })
}

/// Current ratings and full history for one sport, ready for a batch run.
pub async fn load_rating_store(pool: &SqlitePool, sport: Sport) -> Result<MemoryRatingStore> {
    let mut store = MemoryRatingStore::new();

    for team in get_teams(pool, sport).await? {
        store.load_rating(EntityKey::team(team.id), team.elo_rating);
    }

    let players = sqlx::query("SELECT entity_kind, entity_id, rating FROM player_ratings WHERE sport = ?")
        .bind(sport.as_str())
        .fetch_all(pool)
        .await?;
    for row in players {
        let kind = parse_stored("player_ratings", "entity_kind", row.get("entity_kind"))?;
        store.load_rating(EntityKey { kind, id: row.get("entity_id") }, row.get("rating"));
    }

    let history = sqlx::query("SELECT * FROM rating_history WHERE sport = ?")
        .bind(sport.as_str())
        .fetch_all(pool)
        .await?;
    for row in &history {
        store.load_history(history_from_row(row)?);
    }

    Ok(store)
}

/// Write back everything a batch run changed in one transaction.
pub async fn save_rating_store(pool: &SqlitePool, sport: Sport, store: &MemoryRatingStore) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    let mut tx = pool.begin().await?;

    for (entity, rating) in store.changed_ratings() {
        match entity.kind {
            EntityKind::Team => {
                sqlx::query("UPDATE teams SET elo_rating = ?, updated_at = ? WHERE id = ?")
                    .bind(rating)
                    .bind(&now)
                    .bind(&entity.id)
                    .execute(&mut *tx)
                    .await?;
            }
            kind => {
                sqlx::query(
                    r#"INSERT INTO player_ratings (entity_kind, entity_id, sport, rating, updated_at)
                       VALUES (?, ?, ?, ?, ?)
                       ON CONFLICT(entity_kind, entity_id) DO UPDATE SET
                           rating = excluded.rating,
                           updated_at = excluded.updated_at"#,
                )
                .bind(kind.as_str())
                .bind(&entity.id)
                .bind(sport.as_str())
                .bind(rating)
                .bind(&now)
                .execute(&mut *tx)
                .await?;
            }
        }
    }

    for (entity, game_id) in store.removed_history() {
        sqlx::query("DELETE FROM rating_history WHERE entity_kind = ? AND entity_id = ? AND game_id = ?")
            .bind(entity.kind.as_str())
            .bind(&entity.id)
            .bind(&game_id)
            .execute(&mut *tx)
            .await?;
    }

    for row in store.changed_history() {
        sqlx::query(
            r#"INSERT INTO rating_history
               (id, entity_kind, entity_id, game_id, sport, season, rating_before, rating_after, delta,
                game_date, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(entity_kind, entity_id, game_id) DO UPDATE SET
                   rating_before = excluded.rating_before,
                   rating_after = excluded.rating_after,
                   delta = excluded.delta,
                   season = excluded.season,
                   game_date = excluded.game_date"#,
        )
        .bind(&row.id)
        .bind(row.entity.kind.as_str())
        .bind(&row.entity.id)
        .bind(&row.game_id)
        .bind(row.sport.as_str())
        .bind(row.season)
        .bind(row.rating_before)
        .bind(row.rating_after)
        .bind(row.delta)
        .bind(row.game_date.to_rfc3339())
        .bind(row.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

pub async fn get_rating_history(pool: &SqlitePool, entity: &EntityKey) -> Result<Vec<RatingHistory>> {
    let rows = sqlx::query(
        "SELECT * FROM rating_history WHERE entity_kind = ? AND entity_id = ? ORDER BY game_date, game_id",
    )
    .bind(entity.kind.as_str())
    .bind(&entity.id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(history_from_row).collect()
}

/// Pitchers and other sub-entity ratings for a sport, highest first.
pub async fn get_player_ratings(pool: &SqlitePool, sport: Sport) -> Result<Vec<(EntityKey, f64)>> {
    let rows = sqlx::query(
        "SELECT entity_kind, entity_id, rating FROM player_ratings WHERE sport = ? ORDER BY rating DESC",
    )
    .bind(sport.as_str())
    .fetch_all(pool)
    .await?;

    let mut ratings = Vec::with_capacity(rows.len());
    for row in rows {
        let kind = parse_stored("player_ratings", "entity_kind", row.get("entity_kind"))?;
        ratings.push((EntityKey { kind, id: row.get("entity_id") }, row.get("rating")));
    }
    Ok(ratings)
}

// Metric operations

/// Replace a season's metric rows wholesale. Teams missing from `metrics`
/// lose their row for that season.
pub async fn replace_team_metrics(pool: &SqlitePool, sport: Sport, season: i32, metrics: &[TeamMetric]) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM team_metrics WHERE sport = ? AND season = ?")
        .bind(sport.as_str())
        .bind(season)
        .execute(&mut *tx)
        .await?;
    for metric in metrics {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO team_metrics
            (team_id, sport, season, games_played, offensive_efficiency, defensive_efficiency, net_rating, pace,
             adj_offensive_efficiency, adj_defensive_efficiency, adj_net_rating,
             rolling_games, rolling_offensive_efficiency, rolling_defensive_efficiency, rolling_pace,
             home_games, home_offensive_efficiency, home_defensive_efficiency,
             away_games, away_offensive_efficiency, away_defensive_efficiency,
             points_per_game, points_allowed_per_game, earned_run_average,
             meets_minimum_games, adjustment_iterations, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&metric.team_id)
        .bind(metric.sport.as_str())
        .bind(metric.season)
        .bind(metric.games_played)
        .bind(metric.offensive_efficiency)
        .bind(metric.defensive_efficiency)
        .bind(metric.net_rating)
        .bind(metric.pace)
        .bind(metric.adj_offensive_efficiency)
        .bind(metric.adj_defensive_efficiency)
        .bind(metric.adj_net_rating)
        .bind(metric.rolling_games)
        .bind(metric.rolling_offensive_efficiency)
        .bind(metric.rolling_defensive_efficiency)
        .bind(metric.rolling_pace)
        .bind(metric.home.games)
        .bind(metric.home.offensive_efficiency)
        .bind(metric.home.defensive_efficiency)
        .bind(metric.away.games)
        .bind(metric.away.offensive_efficiency)
        .bind(metric.away.defensive_efficiency)
        .bind(metric.points_per_game)
        .bind(metric.points_allowed_per_game)
        .bind(metric.earned_run_average)
        .bind(metric.meets_minimum_games)
        .bind(metric.adjustment_iterations)
        .bind(metric.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

fn metric_from_row(row: &SqliteRow) -> Result<TeamMetric> {
    Ok(TeamMetric {
        team_id: row.get("team_id"),
        sport: parse_stored("team_metrics", "sport", row.get("sport"))?,
        season: row.get("season"),
        games_played: row.get("games_played"),
        offensive_efficiency: row.get("offensive_efficiency"),
        defensive_efficiency: row.get("defensive_efficiency"),
        net_rating: row.get("net_rating"),
        pace: row.get("pace"),
        adj_offensive_efficiency: row.get("adj_offensive_efficiency"),
        adj_defensive_efficiency: row.get("adj_defensive_efficiency"),
        adj_net_rating: row.get("adj_net_rating"),
        rolling_games: row.get("rolling_games"),
        rolling_offensive_efficiency: row.get("rolling_offensive_efficiency"),
        rolling_defensive_efficiency: row.get("rolling_defensive_efficiency"),
        rolling_pace: row.get("rolling_pace"),
        home: SplitEfficiency {
            games: row.get("home_games"),
            offensive_efficiency: row.get("home_offensive_efficiency"),
            defensive_efficiency: row.get("home_defensive_efficiency"),
        },
        away: SplitEfficiency {
            games: row.get("away_games"),
            offensive_efficiency: row.get("away_offensive_efficiency"),
            defensive_efficiency: row.get("away_defensive_efficiency"),
        },
        points_per_game: row.get("points_per_game"),
        points_allowed_per_game: row.get("points_allowed_per_game"),
        earned_run_average: row.get("earned_run_average"),
        meets_minimum_games: row.get("meets_minimum_games"),
        adjustment_iterations: row.get("adjustment_iterations"),
        updated_at: parse_time(&row.get::<String, _>("updated_at"))?,
    })
}

pub async fn get_team_metrics(pool: &SqlitePool, sport: Sport, season: i32) -> Result<Vec<TeamMetric>> {
    let rows = sqlx::query(
        "SELECT * FROM team_metrics WHERE sport = ? AND season = ? ORDER BY COALESCE(adj_net_rating, net_rating) DESC",
    )
    .bind(sport.as_str())
    .bind(season)
    .fetch_all(pool)
    .await?;

    rows.iter().map(metric_from_row).collect()
}

// Prediction operations

/// Insert or refresh the pregame fields. Live and grading columns on an
/// existing row are left alone.
pub async fn upsert_predictions(pool: &SqlitePool, predictions: &[Prediction]) -> Result<()> {
    let mut tx = pool.begin().await?;
    for prediction in predictions {
        sqlx::query(
            r#"
            INSERT INTO predictions
            (game_id, sport, season, home_team_id, away_team_id, home_elo, away_elo,
             home_offensive_efficiency, home_defensive_efficiency, away_offensive_efficiency, away_defensive_efficiency,
             elo_spread, efficiency_spread, form_spread, market_spread,
             predicted_spread, predicted_total, predicted_home_score, predicted_away_score,
             home_win_probability, confidence_score, model_version, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(game_id) DO UPDATE SET
                home_elo = excluded.home_elo,
                away_elo = excluded.away_elo,
                home_offensive_efficiency = excluded.home_offensive_efficiency,
                home_defensive_efficiency = excluded.home_defensive_efficiency,
                away_offensive_efficiency = excluded.away_offensive_efficiency,
                away_defensive_efficiency = excluded.away_defensive_efficiency,
                elo_spread = excluded.elo_spread,
                efficiency_spread = excluded.efficiency_spread,
                form_spread = excluded.form_spread,
                market_spread = excluded.market_spread,
                predicted_spread = excluded.predicted_spread,
                predicted_total = excluded.predicted_total,
                predicted_home_score = excluded.predicted_home_score,
                predicted_away_score = excluded.predicted_away_score,
                home_win_probability = excluded.home_win_probability,
                confidence_score = excluded.confidence_score,
                model_version = excluded.model_version,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&prediction.game_id)
        .bind(prediction.sport.as_str())
        .bind(prediction.season)
        .bind(&prediction.home_team_id)
        .bind(&prediction.away_team_id)
        .bind(prediction.home_elo)
        .bind(prediction.away_elo)
        .bind(prediction.home_offensive_efficiency)
        .bind(prediction.home_defensive_efficiency)
        .bind(prediction.away_offensive_efficiency)
        .bind(prediction.away_defensive_efficiency)
        .bind(prediction.elo_spread)
        .bind(prediction.efficiency_spread)
        .bind(prediction.form_spread)
        .bind(prediction.market_spread)
        .bind(prediction.predicted_spread)
        .bind(prediction.predicted_total)
        .bind(prediction.predicted_home_score)
        .bind(prediction.predicted_away_score)
        .bind(prediction.home_win_probability)
        .bind(prediction.confidence_score)
        .bind(&prediction.model_version)
        .bind(prediction.created_at.to_rfc3339())
        .bind(prediction.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

fn prediction_from_row(row: &SqliteRow) -> Result<Prediction> {
    Ok(Prediction {
        game_id: row.get("game_id"),
        sport: parse_stored("predictions", "sport", row.get("sport"))?,
        season: row.get("season"),
        home_team_id: row.get("home_team_id"),
        away_team_id: row.get("away_team_id"),
        home_elo: row.get("home_elo"),
        away_elo: row.get("away_elo"),
        home_offensive_efficiency: row.get("home_offensive_efficiency"),
        home_defensive_efficiency: row.get("home_defensive_efficiency"),
        away_offensive_efficiency: row.get("away_offensive_efficiency"),
        away_defensive_efficiency: row.get("away_defensive_efficiency"),
        elo_spread: row.get("elo_spread"),
        efficiency_spread: row.get("efficiency_spread"),
        form_spread: row.get("form_spread"),
        market_spread: row.get("market_spread"),
        predicted_spread: row.get("predicted_spread"),
        predicted_total: row.get("predicted_total"),
        predicted_home_score: row.get("predicted_home_score"),
        predicted_away_score: row.get("predicted_away_score"),
        home_win_probability: row.get("home_win_probability"),
        confidence_score: row.get("confidence_score"),
        model_version: row.get("model_version"),
        live: LiveFields {
            live_spread: row.get("live_spread"),
            live_total: row.get("live_total"),
            live_home_win_probability: row.get("live_home_win_probability"),
            live_home_score: row.get("live_home_score"),
            live_away_score: row.get("live_away_score"),
            live_period: row.get("live_period"),
            live_clock: row.get("live_clock"),
            live_updated_at: parse_optional_time(row.get("live_updated_at"))?,
        },
        grade: GradeFields {
            graded_at: parse_optional_time(row.get("graded_at"))?,
            favored_correct: row.get("favored_correct"),
            spread_error: row.get("spread_error"),
            total_error: row.get("total_error"),
        },
        created_at: parse_time(&row.get::<String, _>("created_at"))?,
        updated_at: parse_time(&row.get::<String, _>("updated_at"))?,
    })
}

pub async fn get_prediction_by_game_id(pool: &SqlitePool, game_id: &str) -> Result<Option<Prediction>> {
    let row = sqlx::query("SELECT * FROM predictions WHERE game_id = ?")
        .bind(game_id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(prediction_from_row).transpose()
}

pub async fn get_predictions(pool: &SqlitePool, sport: Sport, season: i32) -> Result<Vec<Prediction>> {
    let rows = sqlx::query(
        r#"SELECT p.* FROM predictions p
           JOIN games g ON g.id = p.game_id
           WHERE p.sport = ? AND p.season = ?
           ORDER BY g.game_date, p.game_id"#,
    )
    .bind(sport.as_str())
    .bind(season)
    .fetch_all(pool)
    .await?;

    rows.iter().map(prediction_from_row).collect()
}

/// Write the live columns as given; an empty `LiveFields` nulls them.
pub async fn update_live_fields(pool: &SqlitePool, game_id: &str, live: &LiveFields) -> Result<()> {
    sqlx::query(
        r#"UPDATE predictions SET
               live_spread = ?,
               live_total = ?,
               live_home_win_probability = ?,
               live_home_score = ?,
               live_away_score = ?,
               live_period = ?,
               live_clock = ?,
               live_updated_at = ?
           WHERE game_id = ?"#,
    )
    .bind(live.live_spread)
    .bind(live.live_total)
    .bind(live.live_home_win_probability)
    .bind(live.live_home_score)
    .bind(live.live_away_score)
    .bind(live.live_period)
    .bind(&live.live_clock)
    .bind(live.live_updated_at.map(|t| t.to_rfc3339()))
    .bind(game_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Attach grading metadata to existing prediction rows.
pub async fn record_grades(pool: &SqlitePool, grades: &[(String, GradeFields)]) -> Result<()> {
    let mut tx = pool.begin().await?;
    for (game_id, grade) in grades {
        sqlx::query(
            r#"UPDATE predictions SET
                   graded_at = ?,
                   favored_correct = ?,
                   spread_error = ?,
                   total_error = ?
               WHERE game_id = ?"#,
        )
        .bind(grade.graded_at.map(|t| t.to_rfc3339()))
        .bind(grade.favored_correct)
        .bind(grade.spread_error)
        .bind(grade.total_error)
        .bind(game_id)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

// Market odds operations
pub async fn upsert_market_odds(pool: &SqlitePool, odds: &MarketOdds) -> Result<()> {
    sqlx::query(
        r#"INSERT INTO market_odds (game_id, bookmaker, home_moneyline, away_moneyline, home_spread, total, fetched_at)
           VALUES (?, ?, ?, ?, ?, ?, ?)
           ON CONFLICT(game_id) DO UPDATE SET
               bookmaker      = excluded.bookmaker,
               home_moneyline = excluded.home_moneyline,
               away_moneyline = excluded.away_moneyline,
               home_spread    = excluded.home_spread,
               total          = excluded.total,
               fetched_at     = excluded.fetched_at"#,
    )
    .bind(&odds.game_id)
    .bind(&odds.bookmaker)
    .bind(odds.home_moneyline)
    .bind(odds.away_moneyline)
    .bind(odds.home_spread)
    .bind(odds.total)
    .bind(&odds.fetched_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_market_odds_for_season(
    pool: &SqlitePool,
    sport: Sport,
    season: i32,
) -> Result<HashMap<String, MarketOdds>> {
    let rows = sqlx::query(
        r#"SELECT m.* FROM market_odds m
           JOIN games g ON g.id = m.game_id
           WHERE g.sport = ? AND g.season = ?"#,
    )
    .bind(sport.as_str())
    .bind(season)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|r| {
            let odds = MarketOdds {
                game_id:        r.get("game_id"),
                bookmaker:      r.get("bookmaker"),
                home_moneyline: r.get("home_moneyline"),
                away_moneyline: r.get("away_moneyline"),
                home_spread:    r.get("home_spread"),
                total:          r.get("total"),
                fetched_at:     r.get("fetched_at"),
            };
            (odds.game_id.clone(), odds)
        })
        .collect())
}
