use chrono::{DateTime, Utc};
use serde::Serialize;
use statrs::statistics::Statistics;
use std::collections::HashMap;

use crate::models::{Game, GradeFields, Prediction};

const LOG_LOSS_EPSILON: f64 = 1e-15;

/// Confidence bucket edges; the last bucket is closed at 100.
const CONFIDENCE_BUCKETS: [(f64, f64); 6] = [
    (0.0, 50.0),
    (50.0, 60.0),
    (60.0, 70.0),
    (70.0, 80.0),
    (80.0, 90.0),
    (90.0, 100.0),
];

/// Accuracy facts for one prediction against its final result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GradeRecord {
    pub game_id: String,
    pub home_win_probability: f64,
    pub confidence_score: f64,
    /// `None` when the game ended level.
    pub home_won: Option<bool>,
    pub favored_correct: Option<bool>,
    pub spread_error: f64,
    pub total_error: f64,
}

impl GradeRecord {
    pub fn fields(&self, graded_at: DateTime<Utc>) -> GradeFields {
        GradeFields {
            graded_at: Some(graded_at),
            favored_correct: self.favored_correct,
            spread_error: Some(self.spread_error),
            total_error: Some(self.total_error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationBucket {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
    pub accuracy: Option<f64>,
    pub mean_predicted_probability: Option<f64>,
    pub observed_home_win_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GradeSummary {
    pub count: usize,
    pub decided: usize,
    pub correct: usize,
    pub accuracy_pct: Option<f64>,
    pub brier_score: Option<f64>,
    pub log_loss: Option<f64>,
    pub mean_abs_spread_error: Option<f64>,
    pub mean_abs_total_error: Option<f64>,
    pub buckets: Vec<CalibrationBucket>,
}

fn mean_of(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.mean())
    }
}

fn accuracy(records: &[&GradeRecord]) -> (usize, usize) {
    records.iter().fold((0, 0), |(decided, correct), r| match r.favored_correct {
        Some(true) => (decided + 1, correct + 1),
        Some(false) => (decided + 1, correct),
        None => (decided, correct),
    })
}

pub struct PredictionGrader;

impl PredictionGrader {
    /// Grade one prediction. `None` unless the game is final with both
    /// scores recorded.
    pub fn grade(prediction: &Prediction, game: &Game) -> Option<GradeRecord> {
        let (home, away) = game.final_scores()?;
        let margin = (home - away) as f64;
        let home_won = match home.cmp(&away) {
            std::cmp::Ordering::Greater => Some(true),
            std::cmp::Ordering::Less => Some(false),
            std::cmp::Ordering::Equal => None,
        };
        let favored_home = prediction.home_win_probability >= 0.5;

        Some(GradeRecord {
            game_id: prediction.game_id.clone(),
            home_win_probability: prediction.home_win_probability,
            confidence_score: prediction.confidence_score,
            home_won,
            favored_correct: home_won.map(|won| won == favored_home),
            spread_error: prediction.predicted_spread - margin,
            total_error: prediction.predicted_total - (home + away) as f64,
        })
    }

    /// Grade every not-yet-graded prediction whose game is now final.
    pub fn grade_pending(predictions: &[Prediction], games: &[Game]) -> Vec<GradeRecord> {
        let by_id: HashMap<&str, &Game> = games.iter().map(|g| (g.id.as_str(), g)).collect();
        predictions
            .iter()
            .filter(|p| p.grade.graded_at.is_none())
            .filter_map(|p| Self::grade(p, by_id.get(p.game_id.as_str())?))
            .collect()
    }

    pub fn summarize(records: &[GradeRecord]) -> GradeSummary {
        let all: Vec<&GradeRecord> = records.iter().collect();
        let (decided, correct) = accuracy(&all);

        let mut brier = Vec::with_capacity(decided);
        let mut log_loss = Vec::with_capacity(decided);
        for record in records {
            let Some(won) = record.home_won else { continue };
            let outcome = if won { 1.0 } else { 0.0 };
            let p = record.home_win_probability;
            brier.push((p - outcome).powi(2));
            let clamped = p.clamp(LOG_LOSS_EPSILON, 1.0 - LOG_LOSS_EPSILON);
            log_loss.push(-(outcome * clamped.ln() + (1.0 - outcome) * (1.0 - clamped).ln()));
        }

        let spread_errors: Vec<f64> = records.iter().map(|r| r.spread_error.abs()).collect();
        let total_errors: Vec<f64> = records.iter().map(|r| r.total_error.abs()).collect();

        let last = CONFIDENCE_BUCKETS.len() - 1;
        let buckets = CONFIDENCE_BUCKETS
            .iter()
            .enumerate()
            .map(|(i, &(lower, upper))| {
                let members: Vec<&GradeRecord> = records
                    .iter()
                    .filter(|r| {
                        let c = r.confidence_score;
                        c >= lower && (c < upper || (i == last && c <= upper))
                    })
                    .collect();
                let (bucket_decided, bucket_correct) = accuracy(&members);
                let probabilities: Vec<f64> = members.iter().map(|r| r.home_win_probability).collect();
                let outcomes: Vec<f64> = members
                    .iter()
                    .filter_map(|r| r.home_won)
                    .map(|won| if won { 1.0 } else { 0.0 })
                    .collect();
                CalibrationBucket {
                    lower,
                    upper,
                    count: members.len(),
                    accuracy: (bucket_decided > 0)
                        .then(|| 100.0 * bucket_correct as f64 / bucket_decided as f64),
                    mean_predicted_probability: mean_of(&probabilities),
                    observed_home_win_rate: mean_of(&outcomes),
                }
            })
            .collect();

        GradeSummary {
            count: records.len(),
            decided,
            correct,
            accuracy_pct: (decided > 0).then(|| 100.0 * correct as f64 / decided as f64),
            brier_score: mean_of(&brier),
            log_loss: mean_of(&log_loss),
            mean_abs_spread_error: mean_of(&spread_errors),
            mean_abs_total_error: mean_of(&total_errors),
            buckets,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClockState, GameStatus, LiveFields, Sport};

    fn final_game(id: &str, home: i32, away: i32) -> Game {
        Game {
            id: id.to_string(),
            sport: Sport::Basketball,
            season: 2025,
            game_date: Utc::now(),
            home_team_id: Some("h".to_string()),
            away_team_id: Some("a".to_string()),
            status: GameStatus::Final,
            home_score: Some(home),
            away_score: Some(away),
            is_postseason: false,
            is_neutral_site: false,
            clock: ClockState::default(),
        }
    }

    fn prediction(id: &str, p_home: f64, spread: f64, total: f64, confidence: f64) -> Prediction {
        Prediction {
            game_id: id.to_string(),
            sport: Sport::Basketball,
            season: 2025,
            home_team_id: "h".to_string(),
            away_team_id: "a".to_string(),
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
            home_win_probability: p_home,
            confidence_score: confidence,
            model_version: "test".to_string(),
            live: LiveFields::default(),
            grade: GradeFields::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_grade_single_prediction() {
        let record = PredictionGrader::grade(&prediction("g1", 0.7, 5.0, 150.0, 65.0), &final_game("g1", 80, 78))
            .unwrap();
        assert_eq!(record.favored_correct, Some(true));
        assert_eq!(record.spread_error, 3.0);
        assert_eq!(record.total_error, -8.0);

        let upset = PredictionGrader::grade(&prediction("g2", 0.7, 5.0, 150.0, 65.0), &final_game("g2", 70, 78))
            .unwrap();
        assert_eq!(upset.favored_correct, Some(false));

        let tie = PredictionGrader::grade(&prediction("g3", 0.7, 5.0, 40.0, 65.0), &final_game("g3", 20, 20))
            .unwrap();
        assert_eq!(tie.favored_correct, None);
        assert_eq!(tie.home_won, None);
    }

    #[test]
    fn test_non_final_not_graded() {
        let mut game = final_game("g1", 10, 8);
        game.status = GameStatus::InProgress;
        assert!(PredictionGrader::grade(&prediction("g1", 0.6, 1.0, 20.0, 50.0), &game).is_none());
    }

    #[test]
    fn test_already_graded_skipped() {
        let mut graded = prediction("g1", 0.6, 1.0, 150.0, 50.0);
        graded.grade.graded_at = Some(Utc::now());
        let pending = prediction("g2", 0.6, 1.0, 150.0, 50.0);
        let orphan = prediction("g3", 0.6, 1.0, 150.0, 50.0);
        let games = vec![final_game("g1", 80, 70), final_game("g2", 80, 70)];
        let records = PredictionGrader::grade_pending(&[graded, pending, orphan], &games);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].game_id, "g2");
    }

    #[test]
    fn test_summary_scores() {
        let records = vec![
            PredictionGrader::grade(&prediction("g1", 0.8, 6.0, 150.0, 85.0), &final_game("g1", 80, 70)).unwrap(),
            PredictionGrader::grade(&prediction("g2", 0.6, 2.0, 150.0, 55.0), &final_game("g2", 70, 75)).unwrap(),
        ];
        let summary = PredictionGrader::summarize(&records);

        assert_eq!(summary.count, 2);
        assert_eq!(summary.correct, 1);
        assert_eq!(summary.accuracy_pct, Some(50.0));
        let brier = ((0.8f64 - 1.0).powi(2) + 0.6f64.powi(2)) / 2.0;
        assert!((summary.brier_score.unwrap() - brier).abs() < 1e-12);
        let log_loss = (-(0.8f64.ln()) - 0.4f64.ln()) / 2.0;
        assert!((summary.log_loss.unwrap() - log_loss).abs() < 1e-12);
        assert_eq!(summary.mean_abs_spread_error, Some((4.0 + 7.0) / 2.0));
        assert_eq!(summary.mean_abs_total_error, Some((0.0 + 5.0) / 2.0));

        let high = &summary.buckets[4];
        assert_eq!((high.lower, high.count), (80.0, 1));
        assert_eq!(high.accuracy, Some(100.0));
        assert_eq!(high.observed_home_win_rate, Some(1.0));
        let mid = &summary.buckets[1];
        assert_eq!(mid.count, 1);
        assert_eq!(mid.mean_predicted_probability, Some(0.6));
        assert_eq!(mid.observed_home_win_rate, Some(0.0));
        assert_eq!(summary.buckets[0].count, 0);
        assert_eq!(summary.buckets[0].accuracy, None);
    }

    #[test]
    fn test_confidence_of_100_lands_in_top_bucket() {
        let records =
            vec![PredictionGrader::grade(&prediction("g1", 0.9, 9.0, 150.0, 100.0), &final_game("g1", 90, 70)).unwrap()];
        let summary = PredictionGrader::summarize(&records);
        assert_eq!(summary.buckets[5].count, 1);
    }

    #[test]
    fn test_certain_miss_log_loss_is_finite() {
        let records =
            vec![PredictionGrader::grade(&prediction("g1", 1.0, 9.0, 150.0, 90.0), &final_game("g1", 60, 70)).unwrap()];
        let summary = PredictionGrader::summarize(&records);
        let loss = summary.log_loss.unwrap();
        assert!(loss.is_finite());
        assert!(loss > 30.0);
    }

    #[test]
    fn test_empty_summary() {
        let summary = PredictionGrader::summarize(&[]);
        assert_eq!(summary.count, 0);
        assert_eq!(summary.accuracy_pct, None);
        assert_eq!(summary.brier_score, None);
        assert_eq!(summary.buckets.len(), 6);
    }
}
