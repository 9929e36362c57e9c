//! Decoding policy outputs into wagers, and ensemble consensus.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::Side;
use crate::engine::features::FeatureLayout;
use crate::error::{DuelbetError, Result};
use crate::ml::DenseNetwork;

/// Scalar outputs closer to zero than this are "too close to call"
pub const MIN_SIGNAL: f64 = 0.002;

/// Signed wager from raw policy output.
///
/// Positive backs side B, negative backs side A, zero passes.
pub fn signed_wager(output: &[f64]) -> f64 {
    match output {
        [] => 0.0,
        [s] => {
            if s.abs() < MIN_SIGNAL {
                0.0
            } else {
                *s
            }
        }
        [a, b, ..] => {
            if *a < 0.0 && *b < 0.0 {
                0.0
            } else if b >= a {
                *b
            } else {
                -*a
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WagerDecision {
    /// Fraction of the bankroll, in [0, 1]
    pub magnitude: f64,
    pub side: Side,
}

impl WagerDecision {
    pub fn from_signed(wager: f64) -> Self {
        let magnitude = if wager.is_finite() {
            wager.abs().min(1.0)
        } else {
            0.0
        };
        Self {
            magnitude,
            side: if wager > 0.0 { Side::B } else { Side::A },
        }
    }

    pub fn from_output(output: &[f64]) -> Self {
        Self::from_signed(signed_wager(output))
    }

    pub fn pass() -> Self {
        Self {
            magnitude: 0.0,
            side: Side::A,
        }
    }

    pub fn is_pass(&self) -> bool {
        self.magnitude == 0.0
    }

    pub fn signed(&self) -> f64 {
        match self.side {
            Side::A => -self.magnitude,
            Side::B => self.magnitude,
        }
    }
}

/// Odd-sized committee of betting policies voting by median
#[derive(Debug, Clone)]
pub struct Ensemble {
    members: Vec<DenseNetwork>,
}

impl Ensemble {
    pub fn new(members: Vec<DenseNetwork>, layout: FeatureLayout) -> Result<Self> {
        if members.is_empty() || members.len() % 2 == 0 {
            return Err(DuelbetError::EvenEnsemble(members.len()));
        }
        for member in &members {
            layout.check_betting(member)?;
        }
        Ok(Self { members })
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Median signed wager across members
    pub fn consensus_value(&self, vector: &[f64]) -> f64 {
        let mut votes: Vec<f64> = self
            .members
            .par_iter()
            .map(|member| signed_wager(&member.evaluate(vector)))
            .collect();
        median_vote(&mut votes)
    }

    pub fn consensus(&self, vector: &[f64]) -> WagerDecision {
        WagerDecision::from_signed(self.consensus_value(vector))
    }
}

/// Sort, log and pick the middle vote of an odd-sized list
pub fn median_vote(votes: &mut [f64]) -> f64 {
    if votes.is_empty() {
        return 0.0;
    }
    votes.sort_by(|a, b| a.total_cmp(b));
    let mid = votes.len() / 2;
    info!("consensus: {}", format_votes(votes, mid));
    votes[mid]
}

fn format_votes(votes: &[f64], selected: usize) -> String {
    votes
        .iter()
        .enumerate()
        .map(|(i, v)| {
            let pct = (v * 100.0).round() as i64;
            if i == selected {
                format!("[{pct}]")
            } else {
                pct.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
