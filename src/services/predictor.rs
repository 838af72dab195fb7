use chrono::Utc;
use rayon::prelude::*;

use crate::config::{PredictionConfig, SportConfig};
use crate::models::{Game, GameStatus, GradeFields, LiveFields, MarketOdds, Prediction, Sport, TeamMetric};
use crate::utils::{american_to_decimal, devigged_home_probability, log_odds, logistic};

pub const MODEL_VERSION: &str = "ensemble_v2.0";

/// Everything the ensemble reads for one scheduled game.
#[derive(Debug, Clone, Copy)]
pub struct PredictionRequest<'m> {
    pub game: &'m Game,
    pub home_elo: f64,
    pub away_elo: f64,
    pub home_metric: Option<&'m TeamMetric>,
    pub away_metric: Option<&'m TeamMetric>,
    pub market: Option<&'m MarketOdds>,
}

/// Efficiency values one side actually contributes to the matchup after
/// the fallback chain has been applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SideEfficiency {
    pub offense: f64,
    pub defense: f64,
    pub adjusted: bool,
}

impl SideEfficiency {
    pub fn net(&self) -> f64 {
        self.offense - self.defense
    }
}

pub struct PredictionEnsemble<'a> {
    sport: Sport,
    config: &'a SportConfig,
}

impl<'a> PredictionEnsemble<'a> {
    pub fn new(sport: Sport, config: &'a SportConfig) -> Self {
        Self { sport, config }
    }

    fn prediction_config(&self) -> &PredictionConfig {
        &self.config.prediction
    }

    fn home_court(&self, neutral: bool) -> f64 {
        if neutral {
            0.0
        } else {
            self.prediction_config().home_court_points
        }
    }

    /// Adjusted, then raw (only with enough games), then league average.
    /// Offense and defense fall back independently.
    pub fn resolve_side(&self, metric: Option<&TeamMetric>) -> SideEfficiency {
        let league = &self.prediction_config().league;
        let reliable = metric.filter(|m| m.meets_minimum_games);

        let adj_off = metric.and_then(|m| m.adj_offensive_efficiency);
        let adj_def = metric.and_then(|m| m.adj_defensive_efficiency);

        SideEfficiency {
            offense: adj_off
                .or_else(|| reliable.map(|m| m.offensive_efficiency))
                .unwrap_or(league.offensive_efficiency),
            defense: adj_def
                .or_else(|| reliable.map(|m| m.defensive_efficiency))
                .unwrap_or(league.defensive_efficiency),
            adjusted: adj_off.is_some() && adj_def.is_some(),
        }
    }

    /// Spread implied by Elo ratings
    pub fn elo_spread(&self, home_elo: f64, away_elo: f64, neutral: bool) -> f64 {
        let advantage = if neutral { 0.0 } else { self.config.elo.home_advantage };
        (home_elo + advantage - away_elo) / self.prediction_config().elo_spread_divisor
    }

    /// Spread implied by season efficiency
    pub fn efficiency_spread(&self, home: &SideEfficiency, away: &SideEfficiency, neutral: bool) -> f64 {
        (home.net() - away.net()) / 2.0 + self.home_court(neutral)
    }

    /// Spread implied by the rolling window. A side with no recent games
    /// contributes nothing beyond home court.
    pub fn form_spread(&self, home: Option<&TeamMetric>, away: Option<&TeamMetric>, neutral: bool) -> f64 {
        let recent_net = |metric: Option<&TeamMetric>| {
            metric
                .filter(|m| m.rolling_games > 0)
                .map(|m| m.rolling_offensive_efficiency - m.rolling_defensive_efficiency)
                .unwrap_or(0.0)
        };
        (recent_net(home) - recent_net(away)) / 2.0 + self.home_court(neutral)
    }

    /// Spread implied by a bookmaker quote. A posted line wins over prices.
    pub fn market_spread(&self, odds: &MarketOdds) -> Option<f64> {
        if let Some(line) = odds.home_spread {
            return Some(-line);
        }
        let home = american_to_decimal(odds.home_moneyline?)?;
        let away = american_to_decimal(odds.away_moneyline?)?;
        let p = devigged_home_probability(home, away)?;
        Some(self.prediction_config().logistic_scale() * log_odds(p))
    }

    /// Home win probability from a home-minus-away spread, kept strictly
    /// inside (0, 1).
    pub fn win_probability(&self, spread: f64) -> f64 {
        let live = &self.config.live;
        logistic(spread / self.prediction_config().logistic_scale()).clamp(live.min_probability, live.max_probability)
    }

    fn pace(&self, metric: Option<&TeamMetric>) -> f64 {
        metric
            .map(|m| m.pace)
            .filter(|p| *p > 0.0)
            .unwrap_or(self.prediction_config().league.pace)
    }

    /// Expected combined score from each side's scoring rate against the
    /// other's defense at the shared pace.
    pub fn model_total(
        &self,
        home: &SideEfficiency,
        away: &SideEfficiency,
        home_metric: Option<&TeamMetric>,
        away_metric: Option<&TeamMetric>,
    ) -> f64 {
        let pace = (self.pace(home_metric) + self.pace(away_metric)) / 2.0;
        let scale = self.config.efficiency.efficiency_scale;
        let home_points = (home.offense + away.defense) / 2.0 * pace / scale;
        let away_points = (away.offense + home.defense) / 2.0 * pace / scale;
        home_points + away_points
    }

    fn confidence(&self, request: &PredictionRequest, home: &SideEfficiency, away: &SideEfficiency, has_market: bool) -> f64 {
        let bonus = &self.prediction_config().confidence;
        let default_rating = self.config.elo.default_rating;
        let mut score = bonus.base;

        for (metric, side, elo) in [
            (request.home_metric, home, request.home_elo),
            (request.away_metric, away, request.away_elo),
        ] {
            if metric.is_some() {
                score += bonus.has_metrics;
            }
            if side.adjusted {
                score += bonus.has_adjusted;
            }
            if (elo - default_rating).abs() > f64::EPSILON {
                score += bonus.experienced_rating;
            }
        }
        if has_market {
            score += bonus.has_market;
        }
        score.min(100.0)
    }

    /// Pregame forecast for one game. `None` unless the game is scheduled
    /// with two known participants.
    pub fn predict(&self, request: &PredictionRequest) -> Option<Prediction> {
        let game = request.game;
        if game.status != GameStatus::Scheduled {
            return None;
        }
        let (home_id, away_id) = game.participants()?;
        let neutral = game.is_neutral_site;
        let weights = &self.prediction_config().weights;

        let home = self.resolve_side(request.home_metric);
        let away = self.resolve_side(request.away_metric);

        let elo_spread = self.elo_spread(request.home_elo, request.away_elo, neutral);
        let efficiency_spread = self.efficiency_spread(&home, &away, neutral);
        let form_spread = self.form_spread(request.home_metric, request.away_metric, neutral);
        let market_spread = request.market.and_then(|odds| self.market_spread(odds));

        let model_spread =
            weights.elo * elo_spread + weights.efficiency * efficiency_spread + weights.form * form_spread;
        let predicted_spread = match market_spread {
            Some(market) => (1.0 - weights.market) * model_spread + weights.market * market,
            None => model_spread,
        };

        let model_total = self.model_total(&home, &away, request.home_metric, request.away_metric);
        let predicted_total = match request.market.and_then(|odds| odds.total).filter(|t| *t > 0.0) {
            Some(line) => (1.0 - weights.market) * model_total + weights.market * line,
            None => model_total,
        };

        let now = Utc::now();
        Some(Prediction {
            game_id: game.id.clone(),
            sport: self.sport,
            season: game.season,
            home_team_id: home_id.to_string(),
            away_team_id: away_id.to_string(),
            home_elo: request.home_elo,
            away_elo: request.away_elo,
            home_offensive_efficiency: home.offense,
            home_defensive_efficiency: home.defense,
            away_offensive_efficiency: away.offense,
            away_defensive_efficiency: away.defense,
            elo_spread,
            efficiency_spread,
            form_spread,
            market_spread,
            predicted_spread,
            predicted_total,
            predicted_home_score: (predicted_total + predicted_spread) / 2.0,
            predicted_away_score: (predicted_total - predicted_spread) / 2.0,
            home_win_probability: self.win_probability(predicted_spread),
            confidence_score: self.confidence(request, &home, &away, market_spread.is_some()),
            model_version: MODEL_VERSION.to_string(),
            live: LiveFields::default(),
            grade: GradeFields::default(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Forecast a batch of games in parallel. Games that are not
    /// predictable are dropped.
    pub fn predict_all(&self, requests: &[PredictionRequest]) -> Vec<Prediction> {
        requests
            .par_iter()
            .filter_map(|request| self.predict(request))
            .collect()
    }
}
