use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sport {
    Basketball,
    Baseball,
    Football,
}

impl Sport {
    pub const ALL: [Sport; 3] = [Sport::Basketball, Sport::Baseball, Sport::Football];

    pub fn as_str(&self) -> &'static str {
        match self {
            Sport::Basketball => "basketball",
            Sport::Baseball => "baseball",
            Sport::Football => "football",
        }
    }
}

impl fmt::Display for Sport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "basketball" | "nba" | "ncaab" | "cbb" => Ok(Sport::Basketball),
            "baseball" | "mlb" => Ok(Sport::Baseball),
            "football" | "nfl" | "ncaaf" | "cfb" => Ok(Sport::Football),
            other => Err(format!("unsupported sport: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    Scheduled,
    InProgress,
    Halftime,
    EndOfPeriod,
    Delayed,
    Final,
    Postponed,
    Cancelled,
}

impl GameStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameStatus::Scheduled => "scheduled",
            GameStatus::InProgress => "in_progress",
            GameStatus::Halftime => "halftime",
            GameStatus::EndOfPeriod => "end_of_period",
            GameStatus::Delayed => "delayed",
            GameStatus::Final => "final",
            GameStatus::Postponed => "postponed",
            GameStatus::Cancelled => "cancelled",
        }
    }

    /// Any status during which the clock is live or paused mid-game.
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            GameStatus::InProgress | GameStatus::Halftime | GameStatus::EndOfPeriod | GameStatus::Delayed
        )
    }

    pub fn is_final(&self) -> bool {
        matches!(self, GameStatus::Final)
    }
}

impl FromStr for GameStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "scheduled" | "pre" => Ok(GameStatus::Scheduled),
            "in_progress" | "live" | "in" => Ok(GameStatus::InProgress),
            "halftime" => Ok(GameStatus::Halftime),
            "end_of_period" => Ok(GameStatus::EndOfPeriod),
            "delayed" => Ok(GameStatus::Delayed),
            "final" | "finished" | "post" => Ok(GameStatus::Final),
            "postponed" => Ok(GameStatus::Postponed),
            "cancelled" | "canceled" => Ok(GameStatus::Cancelled),
            other => Err(format!("unknown game status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InningHalf {
    Top,
    Bottom,
}

impl InningHalf {
    pub fn as_str(&self) -> &'static str {
        match self {
            InningHalf::Top => "top",
            InningHalf::Bottom => "bottom",
        }
    }
}

impl FromStr for InningHalf {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "top" | "t" => Ok(InningHalf::Top),
            "bottom" | "bot" | "b" => Ok(InningHalf::Bottom),
            other => Err(format!("unknown inning half: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    pub name: String,
    pub sport: Sport,
    pub conference: Option<String>,
    pub division: Option<String>,
    pub elo_rating: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// In-progress clock as reported by the feed. Basketball and football use
/// `period` + `clock` ("MM:SS" remaining in the period); baseball uses
/// `period` as the inning with `inning_half` and `outs`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClockState {
    pub period: Option<i32>,
    pub clock: Option<String>,
    pub inning_half: Option<InningHalf>,
    pub outs: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Game {
    pub id: String,
    pub sport: Sport,
    pub season: i32,
    pub game_date: DateTime<Utc>,
    pub home_team_id: Option<String>,
    pub away_team_id: Option<String>,
    pub status: GameStatus,
    pub home_score: Option<i32>,
    pub away_score: Option<i32>,
    pub is_postseason: bool,
    pub is_neutral_site: bool,
    pub clock: ClockState,
}

impl Game {
    pub fn participants(&self) -> Option<(&str, &str)> {
        match (&self.home_team_id, &self.away_team_id) {
            (Some(home), Some(away)) if home != away => Some((home.as_str(), away.as_str())),
            _ => None,
        }
    }

    pub fn final_scores(&self) -> Option<(i32, i32)> {
        if !self.status.is_final() {
            return None;
        }
        match (self.home_score, self.away_score) {
            (Some(h), Some(a)) => Some((h, a)),
            _ => None,
        }
    }
}

/// One box-score row per team per game. Which counting stats are populated
/// depends on the sport.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TeamStat {
    pub game_id: String,
    pub team_id: String,
    pub points: i32,
    pub possessions: Option<f64>,
    // basketball
    pub field_goals_attempted: Option<i32>,
    pub offensive_rebounds: Option<i32>,
    pub turnovers: Option<i32>,
    pub free_throws_attempted: Option<i32>,
    // baseball
    pub at_bats: Option<i32>,
    pub walks: Option<i32>,
    pub hit_by_pitch: Option<i32>,
    pub sacrifice_flies: Option<i32>,
    pub innings_pitched: Option<f64>,
    pub earned_runs: Option<i32>,
    // football
    pub offensive_plays: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerStat {
    pub game_id: String,
    pub team_id: String,
    pub player_id: String,
    /// Innings pitched for baseball, minutes for the other sports.
    pub playing_time: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Team,
    Pitcher,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Team => "team",
            EntityKind::Pitcher => "pitcher",
        }
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "team" => Ok(EntityKind::Team),
            "pitcher" => Ok(EntityKind::Pitcher),
            other => Err(format!("unknown entity kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub id: String,
}

impl EntityKey {
    pub fn team(id: impl Into<String>) -> Self {
        Self { kind: EntityKind::Team, id: id.into() }
    }

    pub fn pitcher(id: impl Into<String>) -> Self {
        Self { kind: EntityKind::Pitcher, id: id.into() }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingHistory {
    pub id: String,
    pub entity: EntityKey,
    pub game_id: String,
    pub sport: Sport,
    pub season: i32,
    pub rating_before: f64,
    pub rating_after: f64,
    pub delta: f64,
    pub game_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SplitEfficiency {
    pub games: i32,
    pub offensive_efficiency: f64,
    pub defensive_efficiency: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamMetric {
    pub team_id: String,
    pub sport: Sport,
    pub season: i32,
    pub games_played: i32,
    pub offensive_efficiency: f64,
    pub defensive_efficiency: f64,
    pub net_rating: f64,
    pub pace: f64,
    pub adj_offensive_efficiency: Option<f64>,
    pub adj_defensive_efficiency: Option<f64>,
    pub adj_net_rating: Option<f64>,
    pub rolling_games: i32,
    pub rolling_offensive_efficiency: f64,
    pub rolling_defensive_efficiency: f64,
    pub rolling_pace: f64,
    pub home: SplitEfficiency,
    pub away: SplitEfficiency,
    pub points_per_game: f64,
    pub points_allowed_per_game: f64,
    pub earned_run_average: Option<f64>,
    pub meets_minimum_games: bool,
    pub adjustment_iterations: Option<i32>,
    pub updated_at: DateTime<Utc>,
}

/// Bookmaker quote attached to a game. Prices are American moneylines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketOdds {
    pub game_id: String,
    pub bookmaker: String,
    pub home_moneyline: Option<i32>,
    pub away_moneyline: Option<i32>,
    /// Home line in bookmaker convention (negative when home is favored).
    pub home_spread: Option<f64>,
    pub total: Option<f64>,
    pub fetched_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveFields {
    pub live_spread: Option<f64>,
    pub live_total: Option<f64>,
    pub live_home_win_probability: Option<f64>,
    pub live_home_score: Option<i32>,
    pub live_away_score: Option<i32>,
    pub live_period: Option<i32>,
    pub live_clock: Option<String>,
    pub live_updated_at: Option<DateTime<Utc>>,
}

impl LiveFields {
    pub fn is_empty(&self) -> bool {
        *self == LiveFields::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GradeFields {
    pub graded_at: Option<DateTime<Utc>>,
    pub favored_correct: Option<bool>,
    pub spread_error: Option<f64>,
    pub total_error: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub game_id: String,
    pub sport: Sport,
    pub season: i32,
    pub home_team_id: String,
    pub away_team_id: String,
    pub home_elo: f64,
    pub away_elo: f64,
    pub home_offensive_efficiency: f64,
    pub home_defensive_efficiency: f64,
    pub away_offensive_efficiency: f64,
    pub away_defensive_efficiency: f64,
    pub elo_spread: f64,
    pub efficiency_spread: f64,
    pub form_spread: f64,
    pub market_spread: Option<f64>,
    pub predicted_spread: f64,
    pub predicted_total: f64,
    pub predicted_home_score: f64,
    pub predicted_away_score: f64,
    pub home_win_probability: f64,
    pub confidence_score: f64,
    pub model_version: String,
    pub live: LiveFields,
    pub grade: GradeFields,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Prediction {
    pub fn away_win_probability(&self) -> f64 {
        1.0 - self.home_win_probability
    }
}
