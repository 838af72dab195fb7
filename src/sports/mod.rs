//! Per-sport behavior behind one engine: how offensive opportunities are
//! counted and how a live clock maps onto "how much game is left".

use crate::config::{ClockConfig, EfficiencyConfig};
use crate::models::{ClockState, EntityKind, GameStatus, InningHalf, Sport, TeamStat};
use crate::utils::parse_clock_seconds;

/// Sport-neutral view of an in-progress clock. Units are seconds for timed
/// sports and outs for baseball.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GameClock {
    pub elapsed: f64,
    pub remaining: f64,
    pub regulation_length: f64,
    /// Clamped to 1.0 once regulation is over.
    pub fraction_elapsed: f64,
    pub overtime_periods: i32,
}

impl GameClock {
    /// Remaining clock as a share of regulation length.
    pub fn time_left_fraction(&self) -> f64 {
        if self.regulation_length <= 0.0 {
            return 0.0;
        }
        (self.remaining / self.regulation_length).max(0.0)
    }

    pub fn is_overtime(&self) -> bool {
        self.overtime_periods > 0
    }

    /// Length the game is on track to run: regulation, or the current
    /// overtime period played to its end.
    pub fn projected_length(&self) -> f64 {
        if self.is_overtime() {
            self.elapsed + self.remaining
        } else {
            self.regulation_length
        }
    }
}

pub trait SportAdapter: Send + Sync {
    /// Opportunities used to normalize scoring (possessions, plate
    /// appearances, offensive plays).
    fn opportunities(&self, stat: &TeamStat, config: &EfficiencyConfig) -> f64;

    fn normalize_clock(
        &self,
        clock: &ClockState,
        status: GameStatus,
        home_score: i32,
        away_score: i32,
        config: &ClockConfig,
    ) -> Option<GameClock>;

    /// Kind of player-level entity rated alongside teams, if any.
    fn secondary_entity(&self) -> Option<EntityKind> {
        None
    }
}

pub struct Basketball;
pub struct Baseball;
pub struct Football;

pub fn adapter(sport: Sport) -> &'static dyn SportAdapter {
    match sport {
        Sport::Basketball => &Basketball,
        Sport::Baseball => &Baseball,
        Sport::Football => &Football,
    }
}

fn count(value: Option<i32>) -> f64 {
    value.unwrap_or(0) as f64
}

fn recorded(stat: &TeamStat) -> Option<f64> {
    stat.possessions.filter(|p| *p > 0.0)
}

impl SportAdapter for Basketball {
    fn opportunities(&self, stat: &TeamStat, config: &EfficiencyConfig) -> f64 {
        if let Some(possessions) = recorded(stat) {
            return possessions;
        }
        let estimate = count(stat.field_goals_attempted) - count(stat.offensive_rebounds)
            + count(stat.turnovers)
            + config.possession_coefficient * count(stat.free_throws_attempted);
        estimate.max(0.0)
    }

    fn normalize_clock(
        &self,
        clock: &ClockState,
        status: GameStatus,
        _home_score: i32,
        _away_score: i32,
        config: &ClockConfig,
    ) -> Option<GameClock> {
        timed_clock(clock, status, config)
    }
}

impl SportAdapter for Football {
    fn opportunities(&self, stat: &TeamStat, _config: &EfficiencyConfig) -> f64 {
        recorded(stat).unwrap_or_else(|| count(stat.offensive_plays))
    }

    fn normalize_clock(
        &self,
        clock: &ClockState,
        status: GameStatus,
        _home_score: i32,
        _away_score: i32,
        config: &ClockConfig,
    ) -> Option<GameClock> {
        timed_clock(clock, status, config)
    }
}

impl SportAdapter for Baseball {
    fn opportunities(&self, stat: &TeamStat, _config: &EfficiencyConfig) -> f64 {
        recorded(stat).unwrap_or_else(|| {
            count(stat.at_bats) + count(stat.walks) + count(stat.hit_by_pitch) + count(stat.sacrifice_flies)
        })
    }

    fn normalize_clock(
        &self,
        clock: &ClockState,
        _status: GameStatus,
        home_score: i32,
        away_score: i32,
        config: &ClockConfig,
    ) -> Option<GameClock> {
        let inning = clock.period.filter(|i| *i >= 1)?;
        let outs_per_inning = config.period_length;
        let outs_per_half = outs_per_inning / 2.0;
        let half = clock.inning_half.unwrap_or(InningHalf::Top);
        let outs = (clock.outs.unwrap_or(0) as f64).clamp(0.0, outs_per_half);
        let into_inning = match half {
            InningHalf::Top => outs,
            InningHalf::Bottom => outs_per_half + outs,
        };

        let regulation = config.regulation_length();
        let elapsed = (inning - 1) as f64 * outs_per_inning + into_inning;
        let overtime_periods = (inning - config.regulation_periods).max(0);

        // Home side never bats in a final inning it already leads.
        let home_done = inning >= config.regulation_periods
            && half == InningHalf::Bottom
            && home_score > away_score;

        let remaining = if home_done {
            0.0
        } else if overtime_periods > 0 {
            (outs_per_inning - into_inning).max(0.0)
        } else {
            (regulation - elapsed).max(0.0)
        };

        Some(GameClock {
            elapsed,
            remaining,
            regulation_length: regulation,
            fraction_elapsed: (elapsed / regulation).min(1.0),
            overtime_periods,
        })
    }

    fn secondary_entity(&self) -> Option<EntityKind> {
        Some(EntityKind::Pitcher)
    }
}

/// Periods of fixed length counting down, followed by fixed-length overtime
/// periods.
fn timed_clock(clock: &ClockState, status: GameStatus, config: &ClockConfig) -> Option<GameClock> {
    let period = clock.period.filter(|p| *p >= 1)?;
    let between_periods = matches!(status, GameStatus::Halftime | GameStatus::EndOfPeriod);
    let on_clock = match clock.clock.as_deref().and_then(parse_clock_seconds) {
        Some(seconds) => seconds,
        None if between_periods => 0.0,
        None => return None,
    };

    let regulation = config.regulation_length();
    let overtime_periods = (period - config.regulation_periods).max(0);

    let (elapsed, remaining) = if overtime_periods == 0 {
        let in_period = on_clock.min(config.period_length);
        let elapsed = (period - 1) as f64 * config.period_length + (config.period_length - in_period);
        (elapsed, (regulation - elapsed).max(0.0))
    } else {
        let in_period = on_clock.min(config.overtime_length);
        let elapsed = regulation
            + (overtime_periods - 1) as f64 * config.overtime_length
            + (config.overtime_length - in_period);
        (elapsed, in_period)
    };

    Some(GameClock {
        elapsed,
        remaining,
        regulation_length: regulation,
        fraction_elapsed: (elapsed / regulation).min(1.0),
        overtime_periods,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SportConfig;

    fn clock(period: i32, on_clock: &str) -> ClockState {
        ClockState {
            period: Some(period),
            clock: Some(on_clock.to_string()),
            ..ClockState::default()
        }
    }

    #[test]
    fn test_possession_estimate() {
        let config = SportConfig::defaults(Sport::Basketball).efficiency;
        let stat = TeamStat {
            field_goals_attempted: Some(60),
            offensive_rebounds: Some(10),
            turnovers: Some(12),
            free_throws_attempted: Some(20),
            ..TeamStat::default()
        };
        let expected = 60.0 - 10.0 + 12.0 + 0.475 * 20.0;
        assert!((Basketball.opportunities(&stat, &config) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_recorded_possessions_preferred() {
        let config = SportConfig::defaults(Sport::Basketball).efficiency;
        let stat = TeamStat {
            possessions: Some(71.5),
            field_goals_attempted: Some(60),
            ..TeamStat::default()
        };
        assert_eq!(Basketball.opportunities(&stat, &config), 71.5);
    }

    #[test]
    fn test_empty_box_score_yields_zero() {
        let config = SportConfig::defaults(Sport::Baseball).efficiency;
        assert_eq!(Baseball.opportunities(&TeamStat::default(), &config), 0.0);
        assert_eq!(Football.opportunities(&TeamStat::default(), &config), 0.0);
    }

    #[test]
    fn test_basketball_clock_second_half() {
        let config = SportConfig::defaults(Sport::Basketball).clock;
        let c = Basketball
            .normalize_clock(&clock(2, "10:00"), GameStatus::InProgress, 50, 45, &config)
            .unwrap();
        assert_eq!(c.remaining, 600.0);
        assert!((c.fraction_elapsed - 0.75).abs() < 1e-12);
        assert!(!c.is_overtime());
    }

    #[test]
    fn test_halftime_without_clock() {
        let config = SportConfig::defaults(Sport::Basketball).clock;
        let state = ClockState { period: Some(1), ..ClockState::default() };
        let c = Basketball
            .normalize_clock(&state, GameStatus::Halftime, 30, 30, &config)
            .unwrap();
        assert_eq!(c.remaining, 1200.0);
        assert!((c.fraction_elapsed - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_missing_clock_in_play_is_unknown() {
        let config = SportConfig::defaults(Sport::Football).clock;
        let state = ClockState { period: Some(3), ..ClockState::default() };
        assert!(Football
            .normalize_clock(&state, GameStatus::InProgress, 7, 3, &config)
            .is_none());
    }

    #[test]
    fn test_overtime_clamps_fraction() {
        let config = SportConfig::defaults(Sport::Basketball).clock;
        let c = Basketball
            .normalize_clock(&clock(3, "2:30"), GameStatus::InProgress, 70, 68, &config)
            .unwrap();
        assert_eq!(c.remaining, 150.0);
        assert_eq!(c.fraction_elapsed, 1.0);
        assert_eq!(c.overtime_periods, 1);
    }

    #[test]
    fn test_baseball_outs_remaining() {
        let config = SportConfig::defaults(Sport::Baseball).clock;
        let state = ClockState {
            period: Some(5),
            inning_half: Some(InningHalf::Bottom),
            outs: Some(1),
            ..ClockState::default()
        };
        let c = Baseball
            .normalize_clock(&state, GameStatus::InProgress, 2, 3, &config)
            .unwrap();
        // 4 full innings (24 outs) + 3 top-half outs + 1
        assert_eq!(c.remaining, 54.0 - 28.0);
        assert!((c.fraction_elapsed - 28.0 / 54.0).abs() < 1e-12);
    }

    #[test]
    fn test_baseball_home_leading_in_final_bottom_is_over() {
        let config = SportConfig::defaults(Sport::Baseball).clock;
        let state = ClockState {
            period: Some(9),
            inning_half: Some(InningHalf::Bottom),
            outs: Some(0),
            ..ClockState::default()
        };
        let c = Baseball
            .normalize_clock(&state, GameStatus::InProgress, 5, 3, &config)
            .unwrap();
        assert_eq!(c.remaining, 0.0);
    }

    #[test]
    fn test_baseball_extra_innings() {
        let config = SportConfig::defaults(Sport::Baseball).clock;
        let state = ClockState {
            period: Some(10),
            inning_half: Some(InningHalf::Top),
            outs: Some(2),
            ..ClockState::default()
        };
        let c = Baseball
            .normalize_clock(&state, GameStatus::InProgress, 4, 4, &config)
            .unwrap();
        assert_eq!(c.remaining, 4.0);
        assert_eq!(c.fraction_elapsed, 1.0);
        assert!(c.is_overtime());
    }
}
