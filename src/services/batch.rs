use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

use crate::config::EngineConfig;
use crate::models::{Game, PlayerStat, Sport};
use crate::services::elo_calculator::EloCalculator;
use crate::store::MemoryRatingStore;

/// Counts reported back to whatever triggered a batch run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl BatchReport {
    pub fn merged(self, other: BatchReport) -> BatchReport {
        BatchReport {
            processed: self.processed + other.processed,
            skipped: self.skipped + other.skipped,
            failed: self.failed + other.failed,
        }
    }

    pub fn total(&self) -> usize {
        self.processed + self.skipped + self.failed
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} processed, {} skipped, {} failed",
            self.processed, self.skipped, self.failed
        )
    }
}

/// Rating state and games that share no entity with any other partition.
#[derive(Debug)]
pub struct EloPartition {
    pub sport: Sport,
    pub store: MemoryRatingStore,
    pub games: Vec<Game>,
    pub players: HashMap<String, Vec<PlayerStat>>,
}

/// Replay each partition on its own thread. Within a partition games are
/// still applied strictly in date order.
pub fn replay_partitions(
    config: &EngineConfig,
    partitions: &mut [EloPartition],
    skip_existing: bool,
) -> BatchReport {
    partitions
        .par_iter_mut()
        .map(|partition| {
            let calculator = EloCalculator::new(partition.sport, &config.sport(partition.sport).elo);
            calculator.process_games(
                &mut partition.store,
                &partition.games,
                &partition.players,
                skip_existing,
            )
        })
        .reduce(BatchReport::default, BatchReport::merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClockState, EntityKey, GameStatus};
    use crate::store::RatingStore;
    use chrono::{TimeZone, Utc};

    fn game(sport: Sport, id: &str, home: &str, away: &str) -> Game {
        Game {
            id: id.to_string(),
            sport,
            season: 2024,
            game_date: Utc.with_ymd_and_hms(2024, 10, 1, 0, 0, 0).unwrap(),
            home_team_id: Some(home.to_string()),
            away_team_id: Some(away.to_string()),
            status: GameStatus::Final,
            home_score: Some(3),
            away_score: Some(1),
            is_postseason: false,
            is_neutral_site: false,
            clock: ClockState::default(),
        }
    }

    fn partition(sport: Sport, games: Vec<Game>, teams: &[&str]) -> EloPartition {
        let mut store = MemoryRatingStore::new();
        for team in teams {
            store.load_rating(EntityKey::team(*team), 1500.0);
        }
        EloPartition { sport, store, games, players: HashMap::new() }
    }

    #[test]
    fn test_report_merge_and_display() {
        let a = BatchReport { processed: 2, skipped: 1, failed: 0 };
        let b = BatchReport { processed: 1, skipped: 0, failed: 3 };
        let merged = a.merged(b);
        assert_eq!(merged.total(), 7);
        assert_eq!(merged.to_string(), "3 processed, 1 skipped, 3 failed");
    }

    #[test]
    fn test_partitions_replay_independently() {
        let config = EngineConfig::default();
        let mut partitions = vec![
            partition(Sport::Football, vec![game(Sport::Football, "f1", "kc", "buf")], &["kc", "buf"]),
            partition(
                Sport::Baseball,
                vec![game(Sport::Baseball, "b1", "nyy", "bos"), game(Sport::Baseball, "b2", "x", "y")],
                &["nyy", "bos"],
            ),
        ];

        let report = replay_partitions(&config, &mut partitions, true);
        assert_eq!(report.processed, 2);
        assert_eq!(report.skipped, 1);
        assert!(partitions[0].store.rating(&EntityKey::team("kc")).unwrap() > 1500.0);
        assert!(partitions[1].store.rating(&EntityKey::team("bos")).unwrap() < 1500.0);
    }
}
