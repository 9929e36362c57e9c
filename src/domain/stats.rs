//! Per-competitor aggregate statistics.
//!
//! The book is append-only: every processed record increments counters and
//! nothing is ever subtracted. Resetting means building a fresh book.

use std::collections::HashMap;

use super::record::ContestRecord;

/// Fallback average duration (seconds) for a competitor with no wins or losses
pub const DEFAULT_AVG_DURATION: f64 = 600.0;

/// Head-to-head tally against a single opponent
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Matchup {
    pub wins: f64,
    pub losses: f64,
}

impl Matchup {
    pub fn record(&mut self, win: bool) {
        if win {
            self.wins += 1.0;
        } else {
            self.losses += 1.0;
        }
    }

    /// Net win share in [-1, 1]; 0 when the pair never met
    pub fn score(&self) -> f64 {
        let games = self.wins + self.losses;
        if games == 0.0 {
            return 0.0;
        }
        (self.wins - self.losses) / games
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompetitorStats {
    pub name: String,
    pub wins: f64,
    pub losses: f64,
    pub win_time: f64,
    pub lose_time: f64,
    /// Product of stake ratios, centered on 1.0
    pub favor: f64,
    pub matchups: HashMap<String, Matchup>,
}

impl CompetitorStats {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            wins: 0.0,
            losses: 0.0,
            win_time: 0.0,
            lose_time: 0.0,
            favor: 1.0,
            matchups: HashMap::new(),
        }
    }

    pub fn games(&self) -> f64 {
        self.wins + self.losses
    }

    /// Unseen competitors sit at an even 0.5
    pub fn win_rate(&self) -> f64 {
        let games = self.games();
        if games == 0.0 {
            return 0.5;
        }
        self.wins / games
    }

    pub fn avg_win_time(&self) -> f64 {
        if self.wins == 0.0 {
            return DEFAULT_AVG_DURATION;
        }
        self.win_time / self.wins
    }

    pub fn avg_lose_time(&self) -> f64 {
        if self.losses == 0.0 {
            return DEFAULT_AVG_DURATION;
        }
        self.lose_time / self.losses
    }

    /// Geometric mean of the per-contest stake ratio
    pub fn crowd_favor(&self) -> f64 {
        let games = self.games();
        if games == 0.0 {
            return 1.0;
        }
        self.favor.powf(1.0 / games)
    }

    pub fn matchup(&self, opponent: &str) -> Option<&Matchup> {
        self.matchups.get(opponent)
    }

    fn add_matchup(&mut self, opponent: &str, win: bool) {
        self.matchups
            .entry(opponent.to_string())
            .or_default()
            .record(win);
    }
}

/// All competitor stats for one tier
#[derive(Debug, Clone, Default)]
pub struct StatsBook {
    chars: HashMap<String, CompetitorStats>,
}

impl StatsBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold settled records into the book in the order given.
    ///
    /// There is no deduplication; feeding the same record twice counts it
    /// twice. Unsettled (live) records are ignored.
    pub fn update<'a, I>(&mut self, records: I)
    where
        I: IntoIterator<Item = &'a ContestRecord>,
    {
        for rec in records {
            let Some(win_side) = rec.winner() else {
                continue;
            };
            let lose_side = win_side.opposite();
            let winner = rec.name(win_side);
            let loser = rec.name(lose_side);
            let win_pot = rec.stake(win_side);
            let lose_pot = rec.stake(lose_side);

            let swin = self
                .chars
                .entry(winner.to_string())
                .or_insert_with(|| CompetitorStats::new(winner));
            swin.wins += 1.0;
            swin.win_time += rec.duration();
            swin.add_matchup(loser, true);
            swin.favor *= win_pot / lose_pot;

            let slose = self
                .chars
                .entry(loser.to_string())
                .or_insert_with(|| CompetitorStats::new(loser));
            slose.losses += 1.0;
            slose.lose_time += rec.duration();
            slose.add_matchup(winner, false);
            slose.favor *= lose_pot / win_pot;
        }
    }

    pub fn get(&self, name: &str) -> Option<&CompetitorStats> {
        self.chars.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.chars.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    /// Two-hop comparative strength of `a` against `x`.
    ///
    /// Walks a -> y -> b -> x through the matchup graph and averages
    /// `score(a,y) - score(y,b) + score(b,x)` over every path found.
    pub fn abxy(&self, a: &str, x: &str) -> f64 {
        let Some(astat) = self.chars.get(a) else {
            return 0.0;
        };
        let mut sum = 0.0;
        let mut count = 0.0;
        for (y, ym) in &astat.matchups {
            let Some(ystat) = self.chars.get(y) else {
                continue;
            };
            for (b, bm) in &ystat.matchups {
                if b == a {
                    continue;
                }
                let Some(xm) = self.chars.get(b).and_then(|bstat| bstat.matchup(x)) else {
                    continue;
                };
                sum += ym.score() - bm.score() + xm.score();
                count += 1.0;
            }
        }
        if count == 0.0 {
            return 0.0;
        }
        sum / count
    }
}
