use chrono::Utc;

use crate::config::SportConfig;
use crate::models::{Game, LiveFields, Prediction, Sport};
use crate::sports::{adapter, GameClock};
use crate::utils::logistic;

/// Result of refreshing one prediction's live fields.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveUpdate {
    Refreshed(LiveFields),
    /// The game is no longer in progress and the live fields must be nulled.
    Cleared,
    /// In progress, but the score or clock could not be read.
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiveEstimate {
    pub spread: f64,
    pub total: f64,
    pub home_win_probability: f64,
}

pub struct LivePredictionUpdater<'a> {
    sport: Sport,
    config: &'a SportConfig,
}

impl<'a> LivePredictionUpdater<'a> {
    pub fn new(sport: Sport, config: &'a SportConfig) -> Self {
        Self { sport, config }
    }

    /// Null every live field.
    pub fn clear(prediction: &mut Prediction) {
        prediction.live = LiveFields::default();
    }

    pub fn refresh(&self, game: &Game, prediction: &Prediction) -> LiveUpdate {
        if !game.status.is_in_progress() {
            return LiveUpdate::Cleared;
        }
        let (Some(home_score), Some(away_score)) = (game.home_score, game.away_score) else {
            return LiveUpdate::Unavailable;
        };
        let Some(clock) = adapter(self.sport).normalize_clock(
            &game.clock,
            game.status,
            home_score,
            away_score,
            &self.config.clock,
        ) else {
            return LiveUpdate::Unavailable;
        };

        let estimate = self.estimate(
            prediction.predicted_spread,
            prediction.predicted_total,
            &clock,
            home_score,
            away_score,
        );

        LiveUpdate::Refreshed(LiveFields {
            live_spread: Some(estimate.spread),
            live_total: Some(estimate.total),
            live_home_win_probability: Some(estimate.home_win_probability),
            live_home_score: Some(home_score),
            live_away_score: Some(away_score),
            live_period: game.clock.period,
            live_clock: clock_label(game),
            live_updated_at: Some(Utc::now()),
        })
    }

    /// Blend the pregame numbers with the in-game score, leaning on the game
    /// state more as the clock runs.
    pub fn estimate(
        &self,
        pregame_spread: f64,
        pregame_total: f64,
        clock: &GameClock,
        home_score: i32,
        away_score: i32,
    ) -> LiveEstimate {
        let margin = (home_score - away_score) as f64;
        let current_total = (home_score + away_score) as f64;

        if clock.remaining <= 0.0 {
            return LiveEstimate {
                spread: margin,
                total: current_total,
                home_win_probability: self.win_probability(pregame_spread, clock, margin),
            };
        }

        let live = &self.config.live;
        let elapsed = clock.fraction_elapsed;
        let time_left = clock.time_left_fraction();
        let weight = elapsed.powf(live.weight_exponent);

        let endgame = live.endgame_window_fraction * clock.regulation_length;
        let late = 1.0 - (clock.remaining / endgame).min(1.0);
        let pull = late * late;

        // Pace runs over the whole projected game, overtime included.
        let pace_factor = clock.projected_length() / clock.elapsed.max(f64::EPSILON);
        let blend = |current: f64, pregame: f64| {
            let discounted = current + pregame * time_left;
            let extrapolated = if elapsed >= live.min_elapsed_for_pace {
                current * pace_factor
            } else {
                discounted
            };
            let base = (1.0 - weight) * discounted + weight * extrapolated;
            base * (1.0 - pull) + current * pull
        };

        let spread = blend(margin, pregame_spread);
        let ceiling = (pregame_total * live.total_ceiling_multiplier
            + clock.overtime_periods as f64 * live.overtime_total_allowance)
            .max(current_total);
        let total = blend(current_total, pregame_total).clamp(current_total, ceiling);

        LiveEstimate {
            spread,
            total,
            home_win_probability: self.win_probability(pregame_spread, clock, margin),
        }
    }

    fn win_probability(&self, pregame_spread: f64, clock: &GameClock, margin: f64) -> f64 {
        let live = &self.config.live;
        let decided = |home_ahead: bool| {
            if home_ahead {
                live.max_probability
            } else {
                live.min_probability
            }
        };

        if margin != 0.0 {
            if clock.remaining <= live.certain_remaining {
                return decided(margin > 0.0);
            }
            if let Some(rate) = live.max_comeback_rate {
                if margin.abs() > clock.remaining * rate {
                    return decided(margin > 0.0);
                }
            }
        }

        let elapsed = clock.fraction_elapsed;
        let mut margin_value =
            live.margin_value_early + (live.margin_value_late - live.margin_value_early) * elapsed * elapsed;
        if clock.remaining <= live.late_lead_window && margin.abs() >= live.late_lead_margin {
            margin_value *= live.late_lead_multiplier;
        }

        let logit = (margin * margin_value + pregame_spread * clock.time_left_fraction())
            / self.config.prediction.logistic_scale();
        logistic(logit).clamp(live.min_probability, live.max_probability)
    }
}

fn clock_label(game: &Game) -> Option<String> {
    if let Some(clock) = &game.clock.clock {
        return Some(clock.clone());
    }
    game.clock
        .inning_half
        .map(|half| format!("{} ({} out)", half.as_str(), game.clock.outs.unwrap_or(0)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClockState, GameStatus, GradeFields, InningHalf};

    fn game(sport: Sport, status: GameStatus, home: i32, away: i32, clock: ClockState) -> Game {
        Game {
            id: "g1".to_string(),
            sport,
            season: 2025,
            game_date: Utc::now(),
            home_team_id: Some("home".to_string()),
            away_team_id: Some("away".to_string()),
            status,
            home_score: Some(home),
            away_score: Some(away),
            is_postseason: false,
            is_neutral_site: false,
            clock,
        }
    }

    fn timed(period: i32, on_clock: &str) -> ClockState {
        ClockState { period: Some(period), clock: Some(on_clock.to_string()), ..ClockState::default() }
    }

    fn prediction(spread: f64, total: f64) -> Prediction {
        Prediction {
            game_id: "g1".to_string(),
            sport: Sport::Basketball,
            season: 2025,
            home_team_id: "home".to_string(),
            away_team_id: "away".to_string(),
            home_elo: 1500.0,
            away_elo: 1500.0,
            home_offensive_efficiency: 105.0,
            home_defensive_efficiency: 105.0,
            away_offensive_efficiency: 105.0,
            away_defensive_efficiency: 105.0,
            elo_spread: spread,
            efficiency_spread: spread,
            form_spread: spread,
            market_spread: None,
            predicted_spread: spread,
            predicted_total: total,
            predicted_home_score: (total + spread) / 2.0,
            predicted_away_score: (total - spread) / 2.0,
            home_win_probability: 0.5,
            confidence_score: 40.0,
            model_version: "test".to_string(),
            live: LiveFields::default(),
            grade: GradeFields::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn refreshed(update: LiveUpdate) -> LiveFields {
        match update {
            LiveUpdate::Refreshed(fields) => fields,
            other => panic!("expected refreshed fields, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_remaining_returns_literal_score() {
        let config = SportConfig::defaults(Sport::Basketball);
        let updater = LivePredictionUpdater::new(Sport::Basketball, &config);
        let g = game(Sport::Basketball, GameStatus::InProgress, 80, 72, timed(2, "0:00"));
        let fields = refreshed(updater.refresh(&g, &prediction(-3.0, 140.0)));

        assert_eq!(fields.live_spread, Some(8.0));
        assert_eq!(fields.live_total, Some(152.0));
        assert_eq!(fields.live_home_win_probability, Some(0.999));
        assert_eq!(fields.live_home_score, Some(80));
        assert_eq!(fields.live_period, Some(2));
    }

    #[test]
    fn test_final_status_clears_live_fields() {
        let config = SportConfig::defaults(Sport::Basketball);
        let updater = LivePredictionUpdater::new(Sport::Basketball, &config);
        let mut pred = prediction(-3.0, 140.0);
        let live = game(Sport::Basketball, GameStatus::InProgress, 80, 72, timed(2, "0:00"));
        pred.live = refreshed(updater.refresh(&live, &pred));
        assert!(!pred.live.is_empty());

        let done = game(Sport::Basketball, GameStatus::Final, 80, 72, timed(2, "0:00"));
        assert_eq!(updater.refresh(&done, &pred), LiveUpdate::Cleared);
        LivePredictionUpdater::clear(&mut pred);
        assert!(pred.live.is_empty());
        assert!(pred.live.live_spread.is_none());
        assert!(pred.live.live_updated_at.is_none());
    }

    #[test]
    fn test_tip_off_matches_pregame() {
        let config = SportConfig::defaults(Sport::Basketball);
        let updater = LivePredictionUpdater::new(Sport::Basketball, &config);
        let clock = GameClock { elapsed: 0.0, remaining: 2400.0, regulation_length: 2400.0, fraction_elapsed: 0.0, overtime_periods: 0 };
        let estimate = updater.estimate(4.0, 140.0, &clock, 0, 0);
        assert!((estimate.spread - 4.0).abs() < 1e-12);
        assert!((estimate.total - 140.0).abs() < 1e-12);
        let pregame = logistic(4.0 / config.prediction.logistic_scale());
        assert!((estimate.home_win_probability - pregame).abs() < 1e-12);
    }

    #[test]
    fn test_same_lead_worth_more_later() {
        let config = SportConfig::defaults(Sport::Basketball);
        let updater = LivePredictionUpdater::new(Sport::Basketball, &config);
        let half = GameClock { elapsed: 1200.0, remaining: 1200.0, regulation_length: 2400.0, fraction_elapsed: 0.5, overtime_periods: 0 };
        let late = GameClock { elapsed: 2160.0, remaining: 240.0, regulation_length: 2400.0, fraction_elapsed: 0.9, overtime_periods: 0 };
        let p_half = updater.estimate(0.0, 140.0, &half, 40, 34).home_win_probability;
        let p_late = updater.estimate(0.0, 140.0, &late, 70, 64).home_win_probability;
        assert!(p_half > 0.5);
        assert!(p_late > p_half);
        assert!(p_late < 0.999);
    }

    #[test]
    fn test_insurmountable_late_lead() {
        let config = SportConfig::defaults(Sport::Basketball);
        let updater = LivePredictionUpdater::new(Sport::Basketball, &config);
        let clock = GameClock { elapsed: 2370.0, remaining: 30.0, regulation_length: 2400.0, fraction_elapsed: 0.9875, overtime_periods: 0 };
        let estimate = updater.estimate(2.0, 140.0, &clock, 60, 70);
        assert_eq!(estimate.home_win_probability, 0.001);
    }

    #[test]
    fn test_live_total_bounded() {
        let config = SportConfig::defaults(Sport::Basketball);
        let updater = LivePredictionUpdater::new(Sport::Basketball, &config);
        let clock = GameClock { elapsed: 600.0, remaining: 1800.0, regulation_length: 2400.0, fraction_elapsed: 0.25, overtime_periods: 0 };
        let hot = updater.estimate(0.0, 140.0, &clock, 70, 65);
        assert!(hot.total >= 135.0);
        assert!(hot.total <= 140.0 * 1.6);

        let cold = updater.estimate(0.0, 140.0, &clock, 10, 8);
        assert!(cold.total >= 18.0);
    }

    #[test]
    fn test_spread_pulled_to_margin_near_end() {
        let config = SportConfig::defaults(Sport::Basketball);
        let updater = LivePredictionUpdater::new(Sport::Basketball, &config);
        let mid = GameClock { elapsed: 1200.0, remaining: 1200.0, regulation_length: 2400.0, fraction_elapsed: 0.5, overtime_periods: 0 };
        let end = GameClock { elapsed: 2395.0, remaining: 5.0, regulation_length: 2400.0, fraction_elapsed: 1.0 - 5.0 / 2400.0, overtime_periods: 0 };
        let far = (updater.estimate(-6.0, 140.0, &mid, 50, 47).spread - 3.0).abs();
        let near = (updater.estimate(-6.0, 140.0, &end, 100, 97).spread - 3.0).abs();
        assert!(near < far);
        assert!(near < 0.1);
    }

    #[test]
    fn test_tied_overtime_still_projects_scoring() {
        let config = SportConfig::defaults(Sport::Basketball);
        let updater = LivePredictionUpdater::new(Sport::Basketball, &config);
        let g = game(Sport::Basketball, GameStatus::InProgress, 70, 70, timed(3, "5:00"));
        let fields = refreshed(updater.refresh(&g, &prediction(3.0, 140.0)));

        let total = fields.live_total.unwrap();
        assert!(total > 150.0, "total {}", total);
        assert!(total < 140.0 * config.live.total_ceiling_multiplier + config.live.overtime_total_allowance);
        assert!(fields.live_spread.unwrap().abs() < 1e-12);
        assert_eq!(fields.live_period, Some(3));
    }

    #[test]
    fn test_baseball_walk_off_state_is_final_score() {
        let config = SportConfig::defaults(Sport::Baseball);
        let updater = LivePredictionUpdater::new(Sport::Baseball, &config);
        let clock = ClockState {
            period: Some(9),
            inning_half: Some(InningHalf::Bottom),
            outs: Some(1),
            ..ClockState::default()
        };
        let g = game(Sport::Baseball, GameStatus::InProgress, 5, 3, clock);
        let fields = refreshed(updater.refresh(&g, &prediction(0.3, 8.5)));
        assert_eq!(fields.live_spread, Some(2.0));
        assert_eq!(fields.live_total, Some(8.0));
        assert_eq!(fields.live_home_win_probability, Some(config.live.max_probability));
        assert_eq!(fields.live_clock.as_deref(), Some("bottom (1 out)"));
    }

    #[test]
    fn test_unreadable_clock_leaves_fields_alone() {
        let config = SportConfig::defaults(Sport::Football);
        let updater = LivePredictionUpdater::new(Sport::Football, &config);
        let clock = ClockState { period: Some(3), ..ClockState::default() };
        let g = game(Sport::Football, GameStatus::InProgress, 14, 10, clock);
        assert_eq!(updater.refresh(&g, &prediction(3.0, 44.0)), LiveUpdate::Unavailable);
    }
}
