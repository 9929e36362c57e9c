use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use super::tier::{Mode, Tier};
use crate::error::{DuelbetError, Result};

static NEXT_RECORD_ID: AtomicU64 = AtomicU64::new(1);

/// Which member of a canonical pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// First canonical name (lexicographically greater)
    A,
    /// Second canonical name
    B,
}

impl Side {
    pub fn index(&self) -> usize {
        match self {
            Side::A => 0,
            Side::B => 1,
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::A => "A",
            Side::B => "B",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One contest between two competitors.
///
/// Names are stored in canonical order (greater name first) so that the same
/// pair always maps to the same slots; `winner` indexes into that pair. Live
/// records have zero stakes and no winner.
#[derive(Debug, Clone, PartialEq)]
pub struct ContestRecord {
    id: u64,
    tier: Tier,
    names: [String; 2],
    stakes: [f64; 2],
    duration: f64,
    pot_avg: f64,
    winner: Option<Side>,
}

impl ContestRecord {
    /// Build a settled record from raw winner/loser input
    pub fn new(
        tier: Tier,
        winner: &str,
        loser: &str,
        win_stake: f64,
        lose_stake: f64,
        pot_avg: f64,
        duration: f64,
    ) -> Self {
        let (names, stakes, side) = if winner < loser {
            (
                [loser.to_string(), winner.to_string()],
                [lose_stake, win_stake],
                Side::B,
            )
        } else {
            (
                [winner.to_string(), loser.to_string()],
                [win_stake, lose_stake],
                Side::A,
            )
        };
        Self {
            id: NEXT_RECORD_ID.fetch_add(1, Ordering::Relaxed),
            tier,
            names,
            stakes,
            duration,
            pot_avg,
            winner: Some(side),
        }
    }

    /// Build an unsettled record for a contest seen on the live feed
    pub fn live(tier: Tier, a: &str, b: &str, pot_avg: f64) -> Self {
        let names = if a < b {
            [b.to_string(), a.to_string()]
        } else {
            [a.to_string(), b.to_string()]
        };
        Self {
            id: NEXT_RECORD_ID.fetch_add(1, Ordering::Relaxed),
            tier,
            names,
            stakes: [0.0, 0.0],
            duration: 0.0,
            pot_avg,
            winner: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn names(&self) -> (&str, &str) {
        (&self.names[0], &self.names[1])
    }

    pub fn name(&self, side: Side) -> &str {
        &self.names[side.index()]
    }

    pub fn stake(&self, side: Side) -> f64 {
        self.stakes[side.index()]
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn pot_avg(&self) -> f64 {
        self.pot_avg
    }

    pub fn winner(&self) -> Option<Side> {
        self.winner
    }

    pub fn winner_name(&self) -> Option<&str> {
        self.winner.map(|side| self.name(side))
    }

    /// Pari-mutuel winnings for a correct wager of `wager`
    pub fn payoff(&self, wager: f64) -> f64 {
        let Some(winner) = self.winner else {
            return 0.0;
        };
        let win_pot = self.stake(winner);
        let lose_pot = self.stake(winner.opposite());
        if wager + win_pot <= 0.0 {
            return 0.0;
        }
        wager * lose_pot / (wager + win_pot)
    }
}

/// Raw historical row as delivered by a record source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    pub ts: DateTime<Utc>,
    pub tier: String,
    pub winner: String,
    pub loser: String,
    #[serde(alias = "winpot")]
    pub win_pot: i64,
    #[serde(alias = "losepot")]
    pub lose_pot: i64,
    pub duration: i64,
    #[serde(default = "default_mode")]
    pub mode: String,
}

fn default_mode() -> String {
    "matchmaking".to_string()
}

impl RawRecord {
    /// Rows with an empty pot or zero duration carry no signal
    pub fn is_valid(&self) -> bool {
        self.win_pot > 0 && self.lose_pot > 0 && self.duration > 0
    }

    pub fn mode(&self) -> Mode {
        Mode::parse(&self.mode)
    }

    pub fn into_record(self, pot_avg: f64) -> Result<ContestRecord> {
        if !self.is_valid() {
            return Err(DuelbetError::InvalidRecord(format!(
                "{} vs {}: zero stake or duration",
                self.winner, self.loser
            )));
        }
        let tier: Tier = self.tier.parse()?;
        Ok(ContestRecord::new(
            tier,
            &self.winner,
            &self.loser,
            self.win_pot as f64,
            self.lose_pot as f64,
            pot_avg,
            self.duration as f64,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_order_is_independent_of_argument_order() {
        let r1 = ContestRecord::new(Tier::A, "Zangief", "Akuma", 300.0, 100.0, 0.0, 60.0);
        let r2 = ContestRecord::new(Tier::A, "Akuma", "Zangief", 300.0, 100.0, 0.0, 60.0);

        assert_eq!(r1.names(), ("Zangief", "Akuma"));
        assert_eq!(r2.names(), ("Zangief", "Akuma"));
        assert_eq!(r1.winner(), Some(Side::A));
        assert_eq!(r2.winner(), Some(Side::B));
        assert_eq!(r1.winner_name(), Some("Zangief"));
        assert_eq!(r2.winner_name(), Some("Akuma"));
    }

    #[test]
    fn stakes_follow_their_competitor() {
        let rec = ContestRecord::new(Tier::B, "Akuma", "Zangief", 300.0, 100.0, 0.0, 60.0);
        assert_eq!(rec.stake(Side::B), 300.0);
        assert_eq!(rec.stake(Side::A), 100.0);
    }

    #[test]
    fn live_record_uses_same_ordering() {
        let rec = ContestRecord::live(Tier::S, "Akuma", "Zangief", 1000.0);
        assert_eq!(rec.names(), ("Zangief", "Akuma"));
        assert_eq!(rec.winner(), None);
        assert_eq!(rec.payoff(100.0), 0.0);
    }

    #[test]
    fn payoff_is_pari_mutuel() {
        // winner pot 200, loser pot 100
        let rec = ContestRecord::new(Tier::A, "B", "A", 200.0, 100.0, 0.0, 60.0);
        let got = rec.payoff(50.0);
        assert!((got - 50.0 * 100.0 / 250.0).abs() < 1e-12);
    }

    #[test]
    fn ids_are_unique() {
        let a = ContestRecord::live(Tier::P, "x", "y", 0.0);
        let b = ContestRecord::live(Tier::P, "x", "y", 0.0);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn raw_record_validation() {
        let raw = RawRecord {
            ts: Utc::now(),
            tier: "A".to_string(),
            winner: "Ryu".to_string(),
            loser: "Ken".to_string(),
            win_pot: 0,
            lose_pot: 10,
            duration: 30,
            mode: default_mode(),
        };
        assert!(!raw.is_valid());
        assert!(raw.into_record(0.0).is_err());
    }
}
