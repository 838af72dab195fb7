use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::models::{EntityKey, RatingHistory};

type HistoryKey = (EntityKey, String);

/// Current ratings plus the per-game rating history. The Elo engine only
/// talks to this trait, so batch runs can work against an in-memory copy
/// that is written back in one unit.
pub trait RatingStore {
    /// `None` when the entity is unknown to the store.
    fn rating(&self, entity: &EntityKey) -> Option<f64>;

    fn set_rating(&mut self, entity: &EntityKey, rating: f64);

    fn history_for(&self, entity: &EntityKey, game_id: &str) -> Option<&RatingHistory>;

    /// Insert or replace the row for `(row.entity, row.game_id)`.
    fn record_history(&mut self, row: RatingHistory);

    fn remove_history(&mut self, entity: &EntityKey, game_id: &str) -> Option<RatingHistory>;

    fn history_rows(&self) -> Vec<RatingHistory>;

    fn entities(&self) -> Vec<EntityKey>;
}

#[derive(Debug, Default, Clone)]
pub struct MemoryRatingStore {
    ratings: HashMap<EntityKey, f64>,
    history: BTreeMap<HistoryKey, RatingHistory>,
    changed_ratings: BTreeSet<EntityKey>,
    changed_history: BTreeSet<HistoryKey>,
    removed_history: BTreeSet<HistoryKey>,
}

impl MemoryRatingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a rating without marking it as changed.
    pub fn load_rating(&mut self, entity: EntityKey, rating: f64) {
        self.ratings.insert(entity, rating);
    }

    /// Seed a history row without marking it as changed.
    pub fn load_history(&mut self, row: RatingHistory) {
        self.history.insert((row.entity.clone(), row.game_id.clone()), row);
    }

    pub fn changed_ratings(&self) -> Vec<(EntityKey, f64)> {
        self.changed_ratings
            .iter()
            .filter_map(|key| self.ratings.get(key).map(|r| (key.clone(), *r)))
            .collect()
    }

    pub fn changed_history(&self) -> Vec<&RatingHistory> {
        self.changed_history
            .iter()
            .filter_map(|key| self.history.get(key))
            .collect()
    }

    pub fn removed_history(&self) -> Vec<(EntityKey, String)> {
        self.removed_history.iter().cloned().collect()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }
}

impl RatingStore for MemoryRatingStore {
    fn rating(&self, entity: &EntityKey) -> Option<f64> {
        self.ratings.get(entity).copied()
    }

    fn set_rating(&mut self, entity: &EntityKey, rating: f64) {
        self.ratings.insert(entity.clone(), rating);
        self.changed_ratings.insert(entity.clone());
    }

    fn history_for(&self, entity: &EntityKey, game_id: &str) -> Option<&RatingHistory> {
        self.history.get(&(entity.clone(), game_id.to_string()))
    }

    fn record_history(&mut self, row: RatingHistory) {
        let key = (row.entity.clone(), row.game_id.clone());
        self.removed_history.remove(&key);
        self.changed_history.insert(key.clone());
        self.history.insert(key, row);
    }

    fn remove_history(&mut self, entity: &EntityKey, game_id: &str) -> Option<RatingHistory> {
        let key = (entity.clone(), game_id.to_string());
        let removed = self.history.remove(&key)?;
        self.changed_history.remove(&key);
        self.removed_history.insert(key);
        Some(removed)
    }

    fn history_rows(&self) -> Vec<RatingHistory> {
        self.history.values().cloned().collect()
    }

    fn entities(&self) -> Vec<EntityKey> {
        let mut keys: Vec<EntityKey> = self.ratings.keys().cloned().collect();
        keys.sort();
        keys
    }
}
