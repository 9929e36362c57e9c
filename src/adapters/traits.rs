use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, trace};

use crate::domain::{ContestRecord, Mode, RawRecord, Tier};
use crate::error::Result;

/// Weight of the newest pot in the rolling pot average
pub const POT_AVG_DECAY: f64 = 0.2;

/// Exponentially weighted pot size, seeded by the first pot seen
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PotAverage(f64);

impl PotAverage {
    pub fn new(initial: f64) -> Self {
        Self(initial)
    }

    pub fn update(&mut self, pot: f64) -> f64 {
        if self.0 == 0.0 {
            self.0 = pot;
        } else {
            self.0 = POT_AVG_DECAY * pot + (1.0 - POT_AVG_DECAY) * self.0;
        }
        self.0
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

/// Settled contests grouped by tier, in chronological order
#[derive(Debug, Clone, Default)]
pub struct RecordBatch {
    pub by_tier: BTreeMap<Tier, Vec<ContestRecord>>,
    /// Newest timestamp in the batch
    pub latest: Option<DateTime<Utc>>,
    /// Rolling pot average after the last row
    pub pot_avg: f64,
}

impl RecordBatch {
    /// Filter and convert raw rows, carrying the pot average forward.
    ///
    /// Rows must already be in timestamp order.
    pub fn from_rows<I>(rows: I, pot_avg: f64) -> Self
    where
        I: IntoIterator<Item = RawRecord>,
    {
        let mut avg = PotAverage::new(pot_avg);
        let mut batch = RecordBatch::default();
        let mut skipped = 0usize;

        for raw in rows {
            if !raw.is_valid() {
                skipped += 1;
                continue;
            }
            let tier: Tier = match raw.tier.parse() {
                Ok(tier) => tier,
                Err(_) => {
                    trace!("Skipping contest in unknown tier {:?}", raw.tier);
                    skipped += 1;
                    continue;
                }
            };
            let ts = raw.ts;
            let pot = (raw.win_pot + raw.lose_pot) as f64;
            let current = avg.update(pot);
            let rec = ContestRecord::new(
                tier,
                &raw.winner,
                &raw.loser,
                raw.win_pot as f64,
                raw.lose_pot as f64,
                current,
                raw.duration as f64,
            );
            batch.by_tier.entry(tier).or_default().push(rec);
            if batch.latest.map_or(true, |latest| ts > latest) {
                batch.latest = Some(ts);
            }
        }

        batch.pot_avg = avg.value();
        if skipped > 0 {
            debug!("Skipped {} unusable rows", skipped);
        }
        batch
    }

    pub fn len(&self) -> usize {
        self.by_tier.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Modes a record query should include
pub fn query_modes(include_tournament: bool) -> Vec<Mode> {
    let mut modes = vec![Mode::Matchmaking];
    if include_tournament {
        modes.push(Mode::Tournament);
    }
    modes
}

/// Historical contest source
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Contests settled strictly after `since`, with the pot average
    /// continued from `pot_avg` (0 starts fresh)
    async fn fetch(
        &self,
        since: DateTime<Utc>,
        include_tournament: bool,
        pot_avg: f64,
    ) -> Result<RecordBatch>;
}

/// Current contest as shown by the live feed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchMeta {
    #[serde(rename = "p1", alias = "Name1", default)]
    pub name_a: String,
    #[serde(rename = "p2", alias = "Name2", default)]
    pub name_b: String,
    #[serde(alias = "Tier", default)]
    pub tier: String,
    #[serde(alias = "Mode", default)]
    pub mode: String,
}

impl MatchMeta {
    /// Any blank field means "nothing new"
    pub fn is_empty(&self) -> bool {
        self.name_a.is_empty() || self.name_b.is_empty() || self.tier.is_empty() || self.mode.is_empty()
    }

    pub fn mode(&self) -> Mode {
        Mode::parse(&self.mode)
    }
}

#[async_trait]
pub trait LiveFeed: Send + Sync {
    /// Poll for the contest following `last`
    async fn next_match(&self, last: &MatchMeta) -> Result<MatchMeta>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BankrollSource: Send + Sync {
    async fn bankroll(&self) -> Result<f64>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WagerSubmitter: Send + Sync {
    /// `slot` is 1 or 2, in the feed's display order
    async fn place(&self, slot: u8, amount: u64) -> Result<()>;
}
