use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

use crate::error::ConfigError;
use crate::models::Sport;

/// Environment variable naming an optional TOML override file.
pub const CONFIG_PATH_VAR: &str = "FORECAST_CONFIG";

const WEIGHT_TOLERANCE: f64 = 1e-9;

/// One row of the margin-of-victory table. The first tier whose
/// `max_margin` is open (`None`) or covers the margin wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarginTier {
    pub max_margin: Option<f64>,
    pub multiplier: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EloConfig {
    pub default_rating: f64,
    pub home_advantage: f64,
    pub base_k: f64,
    pub playoff_multiplier: f64,
    pub margin_tiers: Vec<MarginTier>,
    /// Decimal places kept on stored ratings.
    pub rating_precision: u32,
    pub team_regression: f64,
    pub secondary_regression: f64,
    pub track_secondary: bool,
}

impl EloConfig {
    pub fn margin_multiplier(&self, margin: f64) -> f64 {
        self.margin_tiers
            .iter()
            .find(|tier| tier.max_margin.map_or(true, |max| max >= margin))
            .map(|tier| tier.multiplier)
            .unwrap_or(1.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EfficiencyConfig {
    /// Weight of free-throw attempts in the possession estimate.
    pub possession_coefficient: f64,
    /// Efficiency is expressed as points per `efficiency_scale` opportunities.
    pub efficiency_scale: f64,
    pub min_games: usize,
    pub rolling_window: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdjustmentConfig {
    pub max_iterations: usize,
    pub tolerance: f64,
    /// Fraction of each pass's target applied (1.0 = plain Jacobi step).
    pub relaxation: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnsembleWeights {
    pub elo: f64,
    pub efficiency: f64,
    pub form: f64,
    /// Share given to the market signal when a quote is attached.
    pub market: f64,
}

impl EnsembleWeights {
    pub fn model_sum(&self) -> f64 {
        self.elo + self.efficiency + self.form
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LeagueAverages {
    pub offensive_efficiency: f64,
    pub defensive_efficiency: f64,
    pub pace: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfidenceBonuses {
    pub base: f64,
    pub has_metrics: f64,
    pub has_adjusted: f64,
    pub experienced_rating: f64,
    pub has_market: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PredictionConfig {
    /// Elo points per point of spread.
    pub elo_spread_divisor: f64,
    pub home_court_points: f64,
    pub weights: EnsembleWeights,
    pub league: LeagueAverages,
    pub reference_spread: f64,
    pub reference_probability: f64,
    pub confidence: ConfidenceBonuses,
}

impl PredictionConfig {
    /// Logistic scale chosen so that `reference_spread` maps to
    /// `reference_probability`.
    pub fn logistic_scale(&self) -> f64 {
        let p = self.reference_probability;
        self.reference_spread / (p / (1.0 - p)).ln()
    }
}

/// Regulation structure. Timed sports count seconds per period; baseball
/// counts outs per full inning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClockConfig {
    pub regulation_periods: i32,
    pub period_length: f64,
    pub overtime_length: f64,
}

impl ClockConfig {
    pub fn regulation_length(&self) -> f64 {
        self.regulation_periods as f64 * self.period_length
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LiveConfig {
    /// In-game weight is `elapsed ^ weight_exponent`.
    pub weight_exponent: f64,
    /// Below this elapsed fraction the pace extrapolation is not trusted.
    pub min_elapsed_for_pace: f64,
    /// Share of regulation over which the spread is pulled onto the margin.
    pub endgame_window_fraction: f64,
    pub margin_value_early: f64,
    pub margin_value_late: f64,
    pub late_lead_window: f64,
    pub late_lead_margin: f64,
    pub late_lead_multiplier: f64,
    /// Remaining clock at or below which any lead is treated as decided.
    pub certain_remaining: f64,
    /// Points per remaining clock unit a trailing side can plausibly make up.
    pub max_comeback_rate: Option<f64>,
    pub min_probability: f64,
    pub max_probability: f64,
    pub total_ceiling_multiplier: f64,
    pub overtime_total_allowance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SportConfig {
    pub elo: EloConfig,
    pub efficiency: EfficiencyConfig,
    pub adjustment: AdjustmentConfig,
    pub prediction: PredictionConfig,
    pub clock: ClockConfig,
    pub live: LiveConfig,
}

impl SportConfig {
    pub fn defaults(sport: Sport) -> Self {
        match sport {
            Sport::Basketball => Self::basketball(),
            Sport::Baseball => Self::baseball(),
            Sport::Football => Self::football(),
        }
    }

    fn basketball() -> Self {
        Self {
            elo: EloConfig {
                default_rating: 1500.0,
                home_advantage: 100.0,
                base_k: 20.0,
                playoff_multiplier: 1.25,
                margin_tiers: vec![
                    MarginTier { max_margin: Some(3.0), multiplier: 0.8 },
                    MarginTier { max_margin: Some(10.0), multiplier: 1.0 },
                    MarginTier { max_margin: Some(20.0), multiplier: 1.2 },
                    MarginTier { max_margin: None, multiplier: 1.4 },
                ],
                rating_precision: 1,
                team_regression: 0.25,
                secondary_regression: 0.5,
                track_secondary: false,
            },
            efficiency: EfficiencyConfig {
                possession_coefficient: 0.475,
                efficiency_scale: 100.0,
                min_games: 5,
                rolling_window: 5,
            },
            adjustment: AdjustmentConfig {
                max_iterations: 100,
                tolerance: 0.001,
                relaxation: 0.5,
            },
            prediction: PredictionConfig {
                elo_spread_divisor: 28.0,
                home_court_points: 3.5,
                weights: EnsembleWeights { elo: 0.3, efficiency: 0.5, form: 0.2, market: 0.35 },
                league: LeagueAverages {
                    offensive_efficiency: 105.0,
                    defensive_efficiency: 105.0,
                    pace: 68.0,
                },
                reference_spread: 7.0,
                reference_probability: 0.78,
                confidence: ConfidenceBonuses {
                    base: 40.0,
                    has_metrics: 10.0,
                    has_adjusted: 10.0,
                    experienced_rating: 5.0,
                    has_market: 10.0,
                },
            },
            clock: ClockConfig {
                regulation_periods: 2,
                period_length: 1200.0,
                overtime_length: 300.0,
            },
            live: LiveConfig {
                weight_exponent: 1.5,
                min_elapsed_for_pace: 0.05,
                endgame_window_fraction: 0.15,
                margin_value_early: 1.0,
                margin_value_late: 2.5,
                late_lead_window: 60.0,
                late_lead_margin: 4.0,
                late_lead_multiplier: 2.0,
                certain_remaining: 0.0,
                max_comeback_rate: Some(0.2),
                min_probability: 0.001,
                max_probability: 0.999,
                total_ceiling_multiplier: 1.6,
                overtime_total_allowance: 20.0,
            },
        }
    }

    fn baseball() -> Self {
        Self {
            elo: EloConfig {
                default_rating: 1500.0,
                home_advantage: 24.0,
                base_k: 6.0,
                playoff_multiplier: 1.2,
                margin_tiers: vec![
                    MarginTier { max_margin: Some(1.0), multiplier: 1.0 },
                    MarginTier { max_margin: Some(3.0), multiplier: 1.1 },
                    MarginTier { max_margin: None, multiplier: 1.25 },
                ],
                rating_precision: 1,
                team_regression: 0.33,
                secondary_regression: 0.5,
                track_secondary: true,
            },
            efficiency: EfficiencyConfig {
                possession_coefficient: 0.0,
                efficiency_scale: 100.0,
                min_games: 10,
                rolling_window: 10,
            },
            adjustment: AdjustmentConfig {
                max_iterations: 100,
                tolerance: 0.001,
                relaxation: 0.5,
            },
            prediction: PredictionConfig {
                elo_spread_divisor: 160.0,
                home_court_points: 0.15,
                weights: EnsembleWeights { elo: 0.4, efficiency: 0.4, form: 0.2, market: 0.4 },
                league: LeagueAverages {
                    offensive_efficiency: 11.8,
                    defensive_efficiency: 11.8,
                    pace: 38.0,
                },
                reference_spread: 1.5,
                reference_probability: 0.65,
                confidence: ConfidenceBonuses {
                    base: 40.0,
                    has_metrics: 10.0,
                    has_adjusted: 10.0,
                    experienced_rating: 5.0,
                    has_market: 10.0,
                },
            },
            clock: ClockConfig {
                regulation_periods: 9,
                period_length: 6.0,
                overtime_length: 6.0,
            },
            live: LiveConfig {
                weight_exponent: 1.5,
                min_elapsed_for_pace: 0.1,
                endgame_window_fraction: 0.12,
                margin_value_early: 1.0,
                margin_value_late: 2.0,
                late_lead_window: 3.0,
                late_lead_margin: 3.0,
                late_lead_multiplier: 2.0,
                certain_remaining: 0.0,
                max_comeback_rate: None,
                min_probability: 0.001,
                max_probability: 0.999,
                total_ceiling_multiplier: 2.0,
                overtime_total_allowance: 1.5,
            },
        }
    }

    fn football() -> Self {
        Self {
            elo: EloConfig {
                default_rating: 1500.0,
                home_advantage: 55.0,
                base_k: 20.0,
                playoff_multiplier: 1.2,
                margin_tiers: vec![
                    MarginTier { max_margin: Some(7.0), multiplier: 1.0 },
                    MarginTier { max_margin: Some(14.0), multiplier: 1.25 },
                    MarginTier { max_margin: None, multiplier: 1.5 },
                ],
                rating_precision: 1,
                team_regression: 0.33,
                secondary_regression: 0.5,
                track_secondary: false,
            },
            efficiency: EfficiencyConfig {
                possession_coefficient: 0.0,
                efficiency_scale: 100.0,
                min_games: 4,
                rolling_window: 4,
            },
            adjustment: AdjustmentConfig {
                max_iterations: 100,
                tolerance: 0.001,
                relaxation: 0.5,
            },
            prediction: PredictionConfig {
                elo_spread_divisor: 25.0,
                home_court_points: 2.0,
                weights: EnsembleWeights { elo: 0.4, efficiency: 0.4, form: 0.2, market: 0.4 },
                league: LeagueAverages {
                    offensive_efficiency: 35.0,
                    defensive_efficiency: 35.0,
                    pace: 63.0,
                },
                reference_spread: 7.0,
                reference_probability: 0.72,
                confidence: ConfidenceBonuses {
                    base: 40.0,
                    has_metrics: 10.0,
                    has_adjusted: 10.0,
                    experienced_rating: 5.0,
                    has_market: 10.0,
                },
            },
            clock: ClockConfig {
                regulation_periods: 4,
                period_length: 900.0,
                overtime_length: 600.0,
            },
            live: LiveConfig {
                weight_exponent: 1.5,
                min_elapsed_for_pace: 0.05,
                endgame_window_fraction: 0.1,
                margin_value_early: 1.0,
                margin_value_late: 2.0,
                late_lead_window: 120.0,
                late_lead_margin: 9.0,
                late_lead_multiplier: 2.0,
                certain_remaining: 0.0,
                max_comeback_rate: Some(0.14),
                min_probability: 0.001,
                max_probability: 0.999,
                total_ceiling_multiplier: 1.8,
                overtime_total_allowance: 10.0,
            },
        }
    }

    pub fn validate(&self, sport: Sport) -> Result<(), ConfigError> {
        let invalid = |field: &'static str, reason: String| ConfigError::InvalidValue { sport, field, reason };

        let elo = &self.elo;
        if elo.base_k <= 0.0 {
            return Err(invalid("elo.base_k", format!("must be positive, got {}", elo.base_k)));
        }
        if elo.playoff_multiplier <= 0.0 {
            return Err(invalid("elo.playoff_multiplier", "must be positive".to_string()));
        }
        if elo.margin_tiers.is_empty() {
            return Err(invalid("elo.margin_tiers", "at least one tier is required".to_string()));
        }
        let mut previous: Option<f64> = None;
        for (i, tier) in elo.margin_tiers.iter().enumerate() {
            if tier.multiplier <= 0.0 {
                return Err(invalid("elo.margin_tiers", format!("tier {} has non-positive multiplier", i)));
            }
            match tier.max_margin {
                Some(max) => {
                    if previous.map_or(false, |p| max <= p) {
                        return Err(invalid("elo.margin_tiers", "max_margin must be strictly ascending".to_string()));
                    }
                    previous = Some(max);
                }
                None if i + 1 != elo.margin_tiers.len() => {
                    return Err(invalid("elo.margin_tiers", "only the last tier may be open-ended".to_string()));
                }
                None => {}
            }
        }
        for (field, factor) in [
            ("elo.team_regression", elo.team_regression),
            ("elo.secondary_regression", elo.secondary_regression),
        ] {
            if !(0.0..=1.0).contains(&factor) {
                return Err(invalid(field, format!("must be within [0, 1], got {}", factor)));
            }
        }

        let eff = &self.efficiency;
        if eff.efficiency_scale <= 0.0 {
            return Err(invalid("efficiency.efficiency_scale", "must be positive".to_string()));
        }
        if eff.min_games == 0 {
            return Err(invalid("efficiency.min_games", "must be at least 1".to_string()));
        }
        if eff.rolling_window == 0 {
            return Err(invalid("efficiency.rolling_window", "must be at least 1".to_string()));
        }

        let adj = &self.adjustment;
        if adj.max_iterations == 0 {
            return Err(invalid("adjustment.max_iterations", "must be at least 1".to_string()));
        }
        if adj.tolerance <= 0.0 {
            return Err(invalid("adjustment.tolerance", "must be positive".to_string()));
        }
        if adj.relaxation <= 0.0 || adj.relaxation > 1.0 {
            return Err(invalid("adjustment.relaxation", "must be within (0, 1]".to_string()));
        }

        let pred = &self.prediction;
        let sum = pred.weights.model_sum();
        if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(ConfigError::WeightsDoNotSumToOne { sport, sum });
        }
        for (field, weight) in [
            ("prediction.weights.elo", pred.weights.elo),
            ("prediction.weights.efficiency", pred.weights.efficiency),
            ("prediction.weights.form", pred.weights.form),
            ("prediction.weights.market", pred.weights.market),
        ] {
            if !(0.0..=1.0).contains(&weight) {
                return Err(invalid(field, format!("must be within [0, 1], got {}", weight)));
            }
        }
        if pred.elo_spread_divisor <= 0.0 {
            return Err(invalid("prediction.elo_spread_divisor", "must be positive".to_string()));
        }
        if pred.reference_spread <= 0.0 {
            return Err(invalid("prediction.reference_spread", "must be positive".to_string()));
        }
        if !(pred.reference_probability > 0.5 && pred.reference_probability < 1.0) {
            return Err(invalid(
                "prediction.reference_probability",
                format!("must be within (0.5, 1), got {}", pred.reference_probability),
            ));
        }
        if pred.league.pace <= 0.0 {
            return Err(invalid("prediction.league.pace", "must be positive".to_string()));
        }

        let clock = &self.clock;
        if clock.regulation_periods <= 0 || clock.period_length <= 0.0 || clock.overtime_length <= 0.0 {
            return Err(invalid("clock", "periods and lengths must be positive".to_string()));
        }

        let live = &self.live;
        if live.weight_exponent < 1.0 {
            return Err(invalid("live.weight_exponent", "must be at least 1".to_string()));
        }
        if !(0.0..1.0).contains(&live.min_elapsed_for_pace) {
            return Err(invalid("live.min_elapsed_for_pace", "must be within [0, 1)".to_string()));
        }
        if live.endgame_window_fraction <= 0.0 || live.endgame_window_fraction > 1.0 {
            return Err(invalid("live.endgame_window_fraction", "must be within (0, 1]".to_string()));
        }
        if !(live.min_probability > 0.0
            && live.min_probability < live.max_probability
            && live.max_probability < 1.0)
        {
            return Err(invalid(
                "live.min_probability",
                "bounds must satisfy 0 < min < max < 1".to_string(),
            ));
        }
        if live.total_ceiling_multiplier < 1.0 {
            return Err(invalid("live.total_ceiling_multiplier", "must be at least 1".to_string()));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    pub basketball: SportConfig,
    pub baseball: SportConfig,
    pub football: SportConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            basketball: SportConfig::defaults(Sport::Basketball),
            baseball: SportConfig::defaults(Sport::Baseball),
            football: SportConfig::defaults(Sport::Football),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    basketball: Option<SportConfig>,
    baseball: Option<SportConfig>,
    football: Option<SportConfig>,
}

impl EngineConfig {
    /// Defaults, replaced per sport by the file named in `FORECAST_CONFIG`.
    pub fn load() -> Result<Self, ConfigError> {
        match env::var(CONFIG_PATH_VAR) {
            Ok(path) if !path.trim().is_empty() => Self::load_from(path.trim()),
            _ => {
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::info!("Loaded engine configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(text)?;
        let mut config = Self::default();
        if let Some(basketball) = file.basketball {
            config.basketball = basketball;
        }
        if let Some(baseball) = file.baseball {
            config.baseball = baseball;
        }
        if let Some(football) = file.football {
            config.football = football;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn sport(&self, sport: Sport) -> &SportConfig {
        match sport {
            Sport::Basketball => &self.basketball,
            Sport::Baseball => &self.baseball,
            Sport::Football => &self.football,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for sport in Sport::ALL {
            self.sport(sport).validate(sport)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_default_weights_sum_to_one() {
        for sport in Sport::ALL {
            let weights = &SportConfig::defaults(sport).prediction.weights;
            assert!((weights.model_sum() - 1.0).abs() < 1e-12, "{} weights", sport);
        }
    }

    #[test]
    fn test_bad_weights_rejected() {
        let mut config = EngineConfig::default();
        config.football.prediction.weights.form = 0.5;
        match config.validate() {
            Err(ConfigError::WeightsDoNotSumToOne { sport, sum }) => {
                assert_eq!(sport, Sport::Football);
                assert!((sum - 1.3).abs() < 1e-9);
            }
            other => panic!("expected weight error, got {:?}", other),
        }
    }

    #[test]
    fn test_margin_multiplier_first_matching_tier() {
        let elo = SportConfig::defaults(Sport::Basketball).elo;
        assert_eq!(elo.margin_multiplier(2.0), 0.8);
        assert_eq!(elo.margin_multiplier(3.0), 0.8);
        assert_eq!(elo.margin_multiplier(10.0), 1.0);
        assert_eq!(elo.margin_multiplier(40.0), 1.4);
    }

    #[test]
    fn test_margin_multiplier_falls_back_to_one() {
        let mut elo = SportConfig::defaults(Sport::Basketball).elo;
        elo.margin_tiers = vec![MarginTier { max_margin: Some(5.0), multiplier: 0.9 }];
        assert_eq!(elo.margin_multiplier(12.0), 1.0);
    }

    #[test]
    fn test_open_tier_must_be_last() {
        let mut config = EngineConfig::default();
        config.basketball.elo.margin_tiers = vec![
            MarginTier { max_margin: None, multiplier: 1.0 },
            MarginTier { max_margin: Some(5.0), multiplier: 1.2 },
        ];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "elo.margin_tiers", .. })
        ));
    }

    #[test]
    fn test_logistic_scale_hits_reference() {
        let pred = SportConfig::defaults(Sport::Basketball).prediction;
        let scale = pred.logistic_scale();
        let p = 1.0 / (1.0 + (-pred.reference_spread / scale).exp());
        assert!((p - pred.reference_probability).abs() < 1e-12);
    }

    #[test]
    fn test_toml_table_replaces_sport_defaults() {
        #[derive(Serialize)]
        struct Overrides {
            football: SportConfig,
        }

        let mut football = SportConfig::defaults(Sport::Football);
        football.elo.base_k = 30.0;
        let file = toml::to_string(&Overrides { football }).unwrap();
        let config = EngineConfig::from_toml_str(&file).unwrap();
        assert_eq!(config.football.elo.base_k, 30.0);
        assert_eq!(config.basketball, SportConfig::defaults(Sport::Basketball));
    }

    #[test]
    fn test_toml_missing_constant_is_fatal() {
        let file = "[baseball]\n[baseball.elo]\ndefault_rating = 1500.0\n";
        assert!(matches!(EngineConfig::from_toml_str(file), Err(ConfigError::Parse(_))));
    }
}
