use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};

use crate::config::EfficiencyConfig;
use crate::models::{Game, SplitEfficiency, Sport, TeamMetric, TeamStat};
use crate::sports::adapter;
use crate::utils::safe_div;

/// One completed game from a single team's point of view.
#[derive(Debug, Clone, PartialEq)]
pub struct TeamGameLine {
    pub game_id: String,
    pub game_date: DateTime<Utc>,
    pub opponent_id: String,
    pub is_home: bool,
    pub points_for: f64,
    pub points_against: f64,
    pub opportunities_for: f64,
    pub opportunities_against: f64,
    pub innings_pitched: Option<f64>,
    pub earned_runs: Option<i32>,
}

impl TeamGameLine {
    pub fn offensive_efficiency(&self, scale: f64) -> f64 {
        safe_div(scale * self.points_for, self.opportunities_for)
    }

    pub fn defensive_efficiency(&self, scale: f64) -> f64 {
        safe_div(scale * self.points_against, self.opportunities_against)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Totals {
    games: usize,
    points_for: f64,
    points_against: f64,
    opportunities_for: f64,
    opportunities_against: f64,
}

impl Totals {
    fn from_lines<'l>(lines: impl IntoIterator<Item = &'l TeamGameLine>) -> Self {
        lines.into_iter().fold(Totals::default(), |mut t, line| {
            t.games += 1;
            t.points_for += line.points_for;
            t.points_against += line.points_against;
            t.opportunities_for += line.opportunities_for;
            t.opportunities_against += line.opportunities_against;
            t
        })
    }

    fn offense(&self, scale: f64) -> f64 {
        safe_div(scale * self.points_for, self.opportunities_for)
    }

    fn defense(&self, scale: f64) -> f64 {
        safe_div(scale * self.points_against, self.opportunities_against)
    }

    fn pace(&self) -> f64 {
        safe_div(self.opportunities_for + self.opportunities_against, 2.0 * self.games as f64)
    }

    fn split(&self, scale: f64) -> SplitEfficiency {
        SplitEfficiency {
            games: self.games as i32,
            offensive_efficiency: self.offense(scale),
            defensive_efficiency: self.defense(scale),
        }
    }
}

/// Baseball box scores report innings as whole.thirds (6.2 = 6 2/3).
fn innings_to_decimal(innings: f64) -> f64 {
    innings.trunc() + (innings.fract() * 10.0).round() / 3.0
}

pub struct EfficiencyCalculator<'a> {
    sport: Sport,
    config: &'a EfficiencyConfig,
}

impl<'a> EfficiencyCalculator<'a> {
    pub fn new(sport: Sport, config: &'a EfficiencyConfig) -> Self {
        Self { sport, config }
    }

    pub fn scale(&self) -> f64 {
        self.config.efficiency_scale
    }

    /// Build a team's game lines from final games that have box-score rows
    /// for both sides. Games missing either row are left out.
    pub fn game_lines(
        &self,
        team_id: &str,
        games: &[Game],
        stats: &HashMap<(String, String), TeamStat>,
    ) -> Vec<TeamGameLine> {
        let sport = adapter(self.sport);
        let mut lines: Vec<TeamGameLine> = games
            .iter()
            .filter_map(|game| {
                game.final_scores()?;
                let (home, away) = game.participants()?;
                let (is_home, opponent) = if home == team_id {
                    (true, away)
                } else if away == team_id {
                    (false, home)
                } else {
                    return None;
                };
                let own = stats.get(&(game.id.clone(), team_id.to_string()))?;
                let opp = stats.get(&(game.id.clone(), opponent.to_string()))?;
                Some(TeamGameLine {
                    game_id: game.id.clone(),
                    game_date: game.game_date,
                    opponent_id: opponent.to_string(),
                    is_home,
                    points_for: own.points as f64,
                    points_against: opp.points as f64,
                    opportunities_for: sport.opportunities(own, self.config),
                    opportunities_against: sport.opportunities(opp, self.config),
                    innings_pitched: own.innings_pitched,
                    earned_runs: own.earned_runs,
                })
            })
            .collect();
        lines.sort_by(|a, b| a.game_date.cmp(&b.game_date).then_with(|| a.game_id.cmp(&b.game_id)));
        lines
    }

    /// Raw season metrics for one team, or `None` when it has no games.
    pub fn calculate(&self, team_id: &str, season: i32, lines: &[TeamGameLine]) -> Option<TeamMetric> {
        if lines.is_empty() {
            return None;
        }
        let scale = self.scale();

        let season_totals = Totals::from_lines(lines);
        let window_start = lines.len().saturating_sub(self.config.rolling_window);
        let rolling = Totals::from_lines(&lines[window_start..]);
        let home = Totals::from_lines(lines.iter().filter(|l| l.is_home));
        let away = Totals::from_lines(lines.iter().filter(|l| !l.is_home));

        let offense = season_totals.offense(scale);
        let defense = season_totals.defense(scale);
        let games = season_totals.games as f64;

        Some(TeamMetric {
            team_id: team_id.to_string(),
            sport: self.sport,
            season,
            games_played: season_totals.games as i32,
            offensive_efficiency: offense,
            defensive_efficiency: defense,
            net_rating: offense - defense,
            pace: season_totals.pace(),
            adj_offensive_efficiency: None,
            adj_defensive_efficiency: None,
            adj_net_rating: None,
            rolling_games: rolling.games as i32,
            rolling_offensive_efficiency: rolling.offense(scale),
            rolling_defensive_efficiency: rolling.defense(scale),
            rolling_pace: rolling.pace(),
            home: home.split(scale),
            away: away.split(scale),
            points_per_game: safe_div(season_totals.points_for, games),
            points_allowed_per_game: safe_div(season_totals.points_against, games),
            earned_run_average: self.earned_run_average(lines),
            meets_minimum_games: season_totals.games >= self.config.min_games,
            adjustment_iterations: None,
            updated_at: Utc::now(),
        })
    }

    fn earned_run_average(&self, lines: &[TeamGameLine]) -> Option<f64> {
        if self.sport != Sport::Baseball {
            return None;
        }
        let (innings, earned) = lines.iter().fold((0.0, 0.0), |(ip, er), line| {
            (
                ip + line.innings_pitched.map(innings_to_decimal).unwrap_or(0.0),
                er + line.earned_runs.unwrap_or(0) as f64,
            )
        });
        if innings <= 0.0 {
            return None;
        }
        Some(9.0 * earned / innings)
    }

    /// Raw metrics and game lines for every team that appears in `games`.
    /// Teams without usable games produce no metric row.
    pub fn calculate_season(
        &self,
        season: i32,
        games: &[Game],
        stats: &HashMap<(String, String), TeamStat>,
    ) -> (Vec<TeamMetric>, HashMap<String, Vec<TeamGameLine>>) {
        let teams: BTreeSet<&str> = games
            .iter()
            .filter(|g| g.season == season)
            .filter_map(|g| g.participants())
            .flat_map(|(home, away)| [home, away])
            .collect();

        let season_games: Vec<Game> = games.iter().filter(|g| g.season == season).cloned().collect();
        let mut metrics = Vec::new();
        let mut all_lines = HashMap::new();
        for team_id in teams {
            let lines = self.game_lines(team_id, &season_games, stats);
            match self.calculate(team_id, season, &lines) {
                Some(metric) => {
                    metrics.push(metric);
                    all_lines.insert(team_id.to_string(), lines);
                }
                None => tracing::debug!("No box-score data for {} in {}", team_id, season),
            }
        }
        (metrics, all_lines)
    }
}
