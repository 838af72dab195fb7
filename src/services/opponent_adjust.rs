use nalgebra::DVector;
use rayon::prelude::*;
use std::collections::HashMap;

use crate::config::AdjustmentConfig;
use crate::models::TeamMetric;
use crate::services::efficiency::TeamGameLine;

/// Per-game efficiency against an opponent. `opponent` is `None` when the
/// opponent is not part of the solve and is treated as league average.
#[derive(Debug, Clone, Copy)]
struct Sample {
    opponent: Option<usize>,
    offense: f64,
    defense: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdjustedEfficiency {
    pub offense: f64,
    pub defense: f64,
}

impl AdjustedEfficiency {
    pub fn net(&self) -> f64 {
        self.offense - self.defense
    }
}

#[derive(Debug, Clone, Default)]
pub struct AdjustmentResult {
    pub teams: HashMap<String, AdjustedEfficiency>,
    pub iterations: usize,
    pub converged: bool,
    pub max_delta: f64,
}

impl AdjustmentResult {
    /// Copy adjusted values onto the metric rows. Teams left out of the
    /// solve keep `None`.
    pub fn apply(&self, metrics: &mut [TeamMetric]) {
        for metric in metrics.iter_mut() {
            match self.teams.get(&metric.team_id) {
                Some(adj) => {
                    metric.adj_offensive_efficiency = Some(adj.offense);
                    metric.adj_defensive_efficiency = Some(adj.defense);
                    metric.adj_net_rating = Some(adj.net());
                    metric.adjustment_iterations = Some(self.iterations as i32);
                }
                None => {
                    metric.adj_offensive_efficiency = None;
                    metric.adj_defensive_efficiency = None;
                    metric.adj_net_rating = None;
                    metric.adjustment_iterations = None;
                }
            }
        }
    }
}

/// Iteratively corrects each team's efficiency for the strength of the
/// opponents it faced.
pub struct OpponentAdjustmentSolver<'a> {
    config: &'a AdjustmentConfig,
    scale: f64,
}

impl<'a> OpponentAdjustmentSolver<'a> {
    pub fn new(config: &'a AdjustmentConfig, efficiency_scale: f64) -> Self {
        Self { config, scale: efficiency_scale }
    }

    pub fn solve(
        &self,
        metrics: &[TeamMetric],
        lines: &HashMap<String, Vec<TeamGameLine>>,
    ) -> AdjustmentResult {
        let eligible: Vec<&TeamMetric> = metrics.iter().filter(|m| m.meets_minimum_games).collect();
        if eligible.is_empty() {
            return AdjustmentResult { converged: true, ..AdjustmentResult::default() };
        }

        let index: HashMap<&str, usize> = eligible
            .iter()
            .enumerate()
            .map(|(i, m)| (m.team_id.as_str(), i))
            .collect();

        let samples: Vec<Vec<Sample>> = eligible
            .iter()
            .map(|m| {
                lines
                    .get(&m.team_id)
                    .map(|team_lines| {
                        team_lines
                            .iter()
                            .filter(|l| l.opportunities_for > 0.0 && l.opportunities_against > 0.0)
                            .map(|l| Sample {
                                opponent: index.get(l.opponent_id.as_str()).copied(),
                                offense: l.offensive_efficiency(self.scale),
                                defense: l.defensive_efficiency(self.scale),
                            })
                            .collect()
                    })
                    .unwrap_or_default()
            })
            .collect();

        let mut offense = DVector::from_iterator(eligible.len(), eligible.iter().map(|m| m.offensive_efficiency));
        let mut defense = DVector::from_iterator(eligible.len(), eligible.iter().map(|m| m.defensive_efficiency));
        let league_off = offense.mean();
        let league_def = defense.mean();

        let mut iterations = 0;
        let mut converged = false;
        let mut max_delta = 0.0;

        while iterations < self.config.max_iterations {
            iterations += 1;

            let (target_off, target_def): (Vec<f64>, Vec<f64>) = samples
                .par_iter()
                .enumerate()
                .map(|(i, games)| {
                    if games.is_empty() {
                        return (offense[i], defense[i]);
                    }
                    let n = games.len() as f64;
                    let (off_sum, def_sum) = games.iter().fold((0.0, 0.0), |(o, d), g| match g.opponent {
                        Some(j) => (
                            o + g.offense + (league_def - defense[j]),
                            d + g.defense + (league_off - offense[j]),
                        ),
                        None => (o + g.offense, d + g.defense),
                    });
                    (off_sum / n, def_sum / n)
                })
                .unzip();

            let mut target_off = DVector::from_vec(target_off);
            let mut target_def = DVector::from_vec(target_def);
            target_off.add_scalar_mut(league_off - target_off.mean());
            target_def.add_scalar_mut(league_def - target_def.mean());

            let step_off = (&target_off - &offense) * self.config.relaxation;
            let step_def = (&target_def - &defense) * self.config.relaxation;
            max_delta = step_off.amax().max(step_def.amax());
            offense += step_off;
            defense += step_def;

            if max_delta < self.config.tolerance {
                converged = true;
                break;
            }
        }

        if converged {
            tracing::info!("Opponent adjustment converged after {} iterations", iterations);
        } else {
            tracing::warn!(
                "Opponent adjustment stopped at {} iterations (max delta {:.5})",
                iterations,
                max_delta
            );
        }

        let teams = eligible
            .iter()
            .enumerate()
            .map(|(i, m)| {
                (m.team_id.clone(), AdjustedEfficiency { offense: offense[i], defense: defense[i] })
            })
            .collect();

        AdjustmentResult { teams, iterations, converged, max_delta }
    }
}
