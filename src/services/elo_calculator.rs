use chrono::Utc;
use std::collections::HashMap;
use uuid::Uuid;

use crate::config::EloConfig;
use crate::models::{EntityKey, EntityKind, Game, PlayerStat, RatingHistory, Sport};
use crate::services::batch::BatchReport;
use crate::sports::adapter;
use crate::store::RatingStore;
use crate::utils::round_to;

#[derive(Debug, Clone, PartialEq)]
pub struct RatingChange {
    pub entity: EntityKey,
    pub previous: f64,
    pub new: f64,
    pub delta: f64,
    pub expected: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EloUpdate {
    pub game_id: String,
    pub k_factor: f64,
    pub home: RatingChange,
    pub away: RatingChange,
    /// Starting pitchers (or other tracked sub-entities), home side first.
    pub secondary: Vec<RatingChange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotFinal,
    MissingParticipants,
    Tied,
    AlreadyRated,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NotFinal => "not final",
            SkipReason::MissingParticipants => "missing participants",
            SkipReason::Tied => "tied",
            SkipReason::AlreadyRated => "already rated",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EloOutcome {
    Updated(EloUpdate),
    Skipped(SkipReason),
}

struct Side<'g> {
    key: EntityKey,
    team_id: &'g str,
    pre: f64,
    previous_delta: Option<f64>,
}

pub struct EloCalculator<'a> {
    sport: Sport,
    config: &'a EloConfig,
}

impl<'a> EloCalculator<'a> {
    pub fn new(sport: Sport, config: &'a EloConfig) -> Self {
        Self { sport, config }
    }

    /// Calculate expected score based on ELO ratings
    pub fn expected_score(rating_a: f64, rating_b: f64) -> f64 {
        1.0 / (1.0 + 10f64.powf((rating_b - rating_a) / 400.0))
    }

    pub fn k_factor(&self, margin: f64, is_postseason: bool) -> f64 {
        let playoff = if is_postseason { self.config.playoff_multiplier } else { 1.0 };
        self.config.base_k * playoff * self.config.margin_multiplier(margin)
    }

    fn round(&self, value: f64) -> f64 {
        round_to(value, self.config.rating_precision)
    }

    /// Update both teams (and tracked sub-entities) from one final game.
    ///
    /// With `skip_existing`, a game that already has history rows is left
    /// untouched. Without it, the game is recomputed from the ratings the
    /// entities held going into it and the stored rows are replaced.
    pub fn update_game<S: RatingStore>(
        &self,
        store: &mut S,
        game: &Game,
        players: &[PlayerStat],
        skip_existing: bool,
    ) -> EloOutcome {
        let Some((home_score, away_score)) = game.final_scores() else {
            return EloOutcome::Skipped(SkipReason::NotFinal);
        };
        let Some((home_id, away_id)) = game.participants() else {
            return EloOutcome::Skipped(SkipReason::MissingParticipants);
        };
        if home_score == away_score {
            return EloOutcome::Skipped(SkipReason::Tied);
        }

        let home_key = EntityKey::team(home_id);
        let away_key = EntityKey::team(away_id);
        let already_rated = store.history_for(&home_key, &game.id).is_some()
            || store.history_for(&away_key, &game.id).is_some();
        if skip_existing && already_rated {
            return EloOutcome::Skipped(SkipReason::AlreadyRated);
        }

        let Some(home) = self.team_side(store, home_key, home_id, &game.id) else {
            return EloOutcome::Skipped(SkipReason::MissingParticipants);
        };
        let Some(away) = self.team_side(store, away_key, away_id, &game.id) else {
            return EloOutcome::Skipped(SkipReason::MissingParticipants);
        };

        let home_advantage = if game.is_neutral_site { 0.0 } else { self.config.home_advantage };
        let home_won = home_score > away_score;
        let margin = (home_score - away_score).abs() as f64;
        let k_factor = self.k_factor(margin, game.is_postseason);

        // Pre-game ratings for both sides are read before anything is written.
        let secondary_sides = self.secondary_sides(store, game, players, &home, &away);

        let home_change = self.apply(store, game, &home, home_advantage, away.pre, home_won, k_factor);
        let away_change = self.apply(store, game, &away, 0.0, home.pre + home_advantage, !home_won, k_factor);

        let mut secondary = Vec::with_capacity(secondary_sides.len());
        for (side, is_home, opponent_pre) in &secondary_sides {
            let (advantage, won) = if *is_home {
                (home_advantage, home_won)
            } else {
                (0.0, !home_won)
            };
            let opponent = if *is_home { *opponent_pre } else { *opponent_pre + home_advantage };
            secondary.push(self.apply(store, game, side, advantage, opponent, won, k_factor));
        }

        tracing::debug!(
            "Rated {}: {} ({:.1} -> {:.1}), {} ({:.1} -> {:.1}), k={:.2}",
            game.id,
            home_id,
            home_change.previous,
            home_change.new,
            away_id,
            away_change.previous,
            away_change.new,
            k_factor
        );

        EloOutcome::Updated(EloUpdate {
            game_id: game.id.clone(),
            k_factor,
            home: home_change,
            away: away_change,
            secondary,
        })
    }

    fn team_side<'g, S: RatingStore>(
        &self,
        store: &S,
        key: EntityKey,
        team_id: &'g str,
        game_id: &str,
    ) -> Option<Side<'g>> {
        let current = store.rating(&key)?;
        let existing = store.history_for(&key, game_id);
        Some(Side {
            pre: existing.map_or(current, |row| row.rating_before),
            previous_delta: existing.map(|row| row.delta),
            key,
            team_id,
        })
    }

    /// Pick each team's primary sub-entity (most playing time) and read its
    /// pre-game rating. Unknown sub-entities start at the default rating.
    fn secondary_sides<'g, S: RatingStore>(
        &self,
        store: &S,
        game: &Game,
        players: &'g [PlayerStat],
        home: &Side<'_>,
        away: &Side<'_>,
    ) -> Vec<(Side<'g>, bool, f64)> {
        if !self.config.track_secondary {
            return Vec::new();
        }
        let Some(kind) = adapter(self.sport).secondary_entity() else {
            return Vec::new();
        };

        let mut sides = Vec::new();
        for (team, is_home, opponent_pre) in [(home, true, away.pre), (away, false, home.pre)] {
            let Some(starter) = primary_player(players, &game.id, team.team_id) else {
                continue;
            };
            let key = EntityKey { kind, id: starter.player_id.clone() };
            let existing = store.history_for(&key, &game.id);
            let current = store.rating(&key).unwrap_or(self.config.default_rating);
            sides.push((
                Side {
                    pre: existing.map_or(current, |row| row.rating_before),
                    previous_delta: existing.map(|row| row.delta),
                    key,
                    team_id: &starter.team_id,
                },
                is_home,
                opponent_pre,
            ));
        }
        sides
    }

    #[allow(clippy::too_many_arguments)]
    fn apply<S: RatingStore>(
        &self,
        store: &mut S,
        game: &Game,
        side: &Side<'_>,
        advantage: f64,
        opponent_rating: f64,
        won: bool,
        k_factor: f64,
    ) -> RatingChange {
        let expected = Self::expected_score(side.pre + advantage, opponent_rating);
        let actual = if won { 1.0 } else { 0.0 };
        let new = self.round(side.pre + k_factor * (actual - expected));
        let delta = self.round(new - side.pre);

        let current = store.rating(&side.key).unwrap_or(side.pre);
        let updated = match side.previous_delta {
            Some(previous) => self.round(current - previous + delta),
            None => new,
        };
        store.set_rating(&side.key, updated);
        store.record_history(RatingHistory {
            id: Uuid::new_v4().to_string(),
            entity: side.key.clone(),
            game_id: game.id.clone(),
            sport: self.sport,
            season: game.season,
            rating_before: side.pre,
            rating_after: new,
            delta,
            game_date: game.game_date,
            created_at: Utc::now(),
        });

        RatingChange {
            entity: side.key.clone(),
            previous: side.pre,
            new,
            delta,
            expected,
        }
    }

    /// Process games in chronological order. A game's outcome never aborts
    /// the rest of the run.
    pub fn process_games<S: RatingStore>(
        &self,
        store: &mut S,
        games: &[Game],
        players: &HashMap<String, Vec<PlayerStat>>,
        skip_existing: bool,
    ) -> BatchReport {
        let mut ordered: Vec<&Game> = games.iter().collect();
        ordered.sort_by(|a, b| a.game_date.cmp(&b.game_date).then_with(|| a.id.cmp(&b.id)));

        let mut report = BatchReport::default();
        for game in ordered {
            let box_players = players.get(&game.id).map(Vec::as_slice).unwrap_or(&[]);
            match self.update_game(store, game, box_players, skip_existing) {
                EloOutcome::Updated(_) => report.processed += 1,
                EloOutcome::Skipped(reason) => {
                    tracing::debug!("Skipped Elo for game {}: {}", game.id, reason.as_str());
                    report.skipped += 1;
                }
            }
        }

        tracing::info!(
            "Elo {}: {} processed, {} skipped",
            self.sport,
            report.processed,
            report.skipped
        );
        report
    }

    /// Remove history from `season` onward and restore each affected entity
    /// to the rating it held before its first removed game.
    pub fn rewind_from_season<S: RatingStore>(&self, store: &mut S, season: i32) -> usize {
        let mut rows: Vec<RatingHistory> = store
            .history_rows()
            .into_iter()
            .filter(|row| row.season >= season)
            .collect();
        rows.sort_by(|a, b| a.game_date.cmp(&b.game_date).then_with(|| a.game_id.cmp(&b.game_id)));

        let mut starting: HashMap<EntityKey, f64> = HashMap::new();
        for row in &rows {
            starting.entry(row.entity.clone()).or_insert(row.rating_before);
            store.remove_history(&row.entity, &row.game_id);
        }
        for (entity, rating) in &starting {
            store.set_rating(entity, *rating);
        }

        tracing::info!("Rewound {} rating history rows from season {}", rows.len(), season);
        rows.len()
    }

    /// Offseason pull toward the default rating.
    pub fn regress_to_mean<S: RatingStore>(&self, store: &mut S) -> usize {
        let mut changed = 0;
        for entity in store.entities() {
            let Some(old) = store.rating(&entity) else {
                continue;
            };
            let factor = match entity.kind {
                EntityKind::Team => self.config.team_regression,
                EntityKind::Pitcher => self.config.secondary_regression,
            };
            let new = self.round(old + factor * (self.config.default_rating - old));
            if new != old {
                store.set_rating(&entity, new);
                changed += 1;
            }
        }
        tracing::info!("Regressed {} {} ratings toward {}", changed, self.sport, self.config.default_rating);
        changed
    }
}

/// Whoever logged the most playing time for the team in this game.
fn primary_player<'p>(players: &'p [PlayerStat], game_id: &str, team_id: &str) -> Option<&'p PlayerStat> {
    players
        .iter()
        .filter(|p| p.game_id == game_id && p.team_id == team_id && p.playing_time > 0.0)
        .max_by(|a, b| {
            a.playing_time
                .total_cmp(&b.playing_time)
                .then_with(|| b.player_id.cmp(&a.player_id))
        })
}
