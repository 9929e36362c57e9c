//! Feature vectors fed to predictors and wager policies.
//!
//! Two flavors:
//! - predictive: pure stats deltas between the pair, input to tier predictors
//! - betting: predictor output plus market context, input to wager policies
//!
//! The bankroll-independent prefix of a betting vector is memoized per record
//! id. Stats are frozen before a builder is created, so a cached prefix never
//! goes stale; racing first writers compute the same value.

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::FeatureConfig;
use crate::domain::{CompetitorStats, ContestRecord, StatsBook, Tier};
use crate::error::{DuelbetError, Result};
use crate::ml::DenseNetwork;

/// Stats and optional predictor for one tier
#[derive(Debug, Clone, Default)]
pub struct TierModel {
    pub stats: StatsBook,
    pub predictor: Option<DenseNetwork>,
}

impl TierModel {
    pub fn new(stats: StatsBook) -> Self {
        Self {
            stats,
            predictor: None,
        }
    }
}

pub type TierModels = BTreeMap<Tier, TierModel>;

/// Widths implied by the feature switches
#[derive(Debug, Clone, Copy)]
pub struct FeatureLayout {
    pub relational: bool,
    pub include_bankroll: bool,
}

impl From<FeatureConfig> for FeatureLayout {
    fn from(cfg: FeatureConfig) -> Self {
        Self {
            relational: cfg.relational,
            include_bankroll: cfg.include_bankroll,
        }
    }
}

impl FeatureLayout {
    pub fn predictive_width(&self) -> usize {
        if self.relational {
            5
        } else {
            4
        }
    }

    pub fn betting_width(&self) -> usize {
        if self.include_bankroll {
            6
        } else {
            5
        }
    }

    pub fn check_predictor(&self, policy: &DenseNetwork) -> Result<()> {
        check_width("predictive", self.predictive_width(), policy)
    }

    pub fn check_betting(&self, policy: &DenseNetwork) -> Result<()> {
        check_width("betting", self.betting_width(), policy)
    }
}

fn check_width(layout: &'static str, width: usize, policy: &DenseNetwork) -> Result<()> {
    if policy.input_dim != width {
        return Err(DuelbetError::DimensionMismatch {
            layout,
            vector_width: width,
            policy_width: policy.input_dim,
        });
    }
    Ok(())
}

/// `[winrate Δ, avg win time Δ, avg lose time Δ (b - a), min games, abxy?]`
pub fn predictive_vector(stats: &StatsBook, a: &str, b: &str, relational: bool) -> Vec<f64> {
    let unseen = CompetitorStats::new("");
    let sa = stats.get(a).unwrap_or(&unseen);
    let sb = stats.get(b).unwrap_or(&unseen);

    let mut v = Vec::with_capacity(5);
    v.push(sa.win_rate() - sb.win_rate());
    v.push(sa.avg_win_time() - sb.avg_win_time());
    v.push(sb.avg_lose_time() - sa.avg_lose_time());
    v.push(sa.games().min(sb.games()));
    if relational {
        v.push(stats.abxy(a, b));
    }
    v
}

/// Builds betting vectors against frozen tier models
#[derive(Debug)]
pub struct FeatureBuilder {
    layout: FeatureLayout,
    models: Arc<TierModels>,
    memo: DashMap<u64, Arc<Vec<f64>>>,
}

impl FeatureBuilder {
    /// Fails if any predictor does not accept predictive vectors
    pub fn new(layout: FeatureLayout, models: Arc<TierModels>) -> Result<Self> {
        for model in models.values() {
            if let Some(predictor) = &model.predictor {
                layout.check_predictor(predictor)?;
            }
        }
        Ok(Self {
            layout,
            models,
            memo: DashMap::new(),
        })
    }

    pub fn layout(&self) -> FeatureLayout {
        self.layout
    }

    pub fn models(&self) -> &Arc<TierModels> {
        &self.models
    }

    pub fn model(&self, tier: Tier) -> Option<&TierModel> {
        self.models.get(&tier)
    }

    /// Both competitors have at least one settled contest in the tier
    pub fn has_stats(&self, rec: &ContestRecord) -> bool {
        let (a, b) = rec.names();
        self.models
            .get(&rec.tier())
            .is_some_and(|m| m.stats.contains(a) && m.stats.contains(b))
    }

    /// Memoized betting vector with the bankroll ratio appended
    pub fn betting_vector(&self, rec: &ContestRecord, bankroll: f64) -> Vec<f64> {
        let prefix = match self.memo.get(&rec.id()) {
            Some(hit) => Arc::clone(hit.value()),
            None => {
                let computed = Arc::new(self.betting_prefix(rec));
                self.memo.insert(rec.id(), Arc::clone(&computed));
                computed
            }
        };
        self.finish(&prefix, rec, bankroll)
    }

    /// Betting vector computed fresh, bypassing the memo
    pub fn betting_vector_uncached(&self, rec: &ContestRecord, bankroll: f64) -> Vec<f64> {
        let prefix = self.betting_prefix(rec);
        self.finish(&prefix, rec, bankroll)
    }

    pub fn memo_len(&self) -> usize {
        self.memo.len()
    }

    fn finish(&self, prefix: &[f64], rec: &ContestRecord, bankroll: f64) -> Vec<f64> {
        let mut v = Vec::with_capacity(self.layout.betting_width());
        v.extend_from_slice(prefix);
        if self.layout.include_bankroll {
            v.push(bankroll_ratio(rec, bankroll));
        }
        v
    }

    fn betting_prefix(&self, rec: &ContestRecord) -> Vec<f64> {
        betting_prefix(&self.models, self.layout, rec)
    }
}

/// Betting vector against live, still-growing models
pub fn betting_vector(
    models: &TierModels,
    layout: FeatureLayout,
    rec: &ContestRecord,
    bankroll: f64,
) -> Vec<f64> {
    let mut v = betting_prefix(models, layout, rec);
    if layout.include_bankroll {
        v.push(bankroll_ratio(rec, bankroll));
    }
    v
}

fn bankroll_ratio(rec: &ContestRecord, bankroll: f64) -> f64 {
    if rec.pot_avg() > 0.0 {
        bankroll / rec.pot_avg()
    } else {
        0.0
    }
}

/// `[pred a, pred b, winrate Δ, crowd favor Δ, tier index]`
fn betting_prefix(models: &TierModels, layout: FeatureLayout, rec: &ContestRecord) -> Vec<f64> {
    let (a, b) = rec.names();
    let unseen = CompetitorStats::new("");
    let empty = StatsBook::new();
    let model = models.get(&rec.tier());
    let stats = model.map(|m| &m.stats).unwrap_or(&empty);

    let (pred_a, pred_b) = match model.and_then(|m| m.predictor.as_ref()) {
        Some(predictor) => {
            let input = predictive_vector(stats, a, b, layout.relational);
            let out = predictor.evaluate(&input);
            (
                out.first().copied().unwrap_or(0.5),
                out.get(1).copied().unwrap_or(0.5),
            )
        }
        None => (0.5, 0.5),
    };

    let sa = stats.get(a).unwrap_or(&unseen);
    let sb = stats.get(b).unwrap_or(&unseen);

    vec![
        pred_a,
        pred_b,
        sa.win_rate() - sb.win_rate(),
        sa.crowd_favor() - sb.crowd_favor(),
        rec.tier().index() as f64,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::{Activation, DenseLayer};

    fn book() -> StatsBook {
        let mut book = StatsBook::new();
        book.update(&[
            ContestRecord::new(Tier::A, "Ryu", "Ken", 300.0, 100.0, 0.0, 60.0),
            ContestRecord::new(Tier::A, "Ryu", "Ken", 100.0, 100.0, 0.0, 80.0),
            ContestRecord::new(Tier::A, "Ken", "Ryu", 100.0, 100.0, 0.0, 40.0),
        ]);
        book
    }

    fn models(predictor: Option<DenseNetwork>) -> Arc<TierModels> {
        let mut models = TierModels::new();
        models.insert(
            Tier::A,
            TierModel {
                stats: book(),
                predictor,
            },
        );
        Arc::new(models)
    }

    fn layout(relational: bool, include_bankroll: bool) -> FeatureLayout {
        FeatureLayout {
            relational,
            include_bankroll,
        }
    }

    #[test]
    fn predictive_vector_deltas() {
        // canonical order: "Ryu" > "Ken"
        let v = predictive_vector(&book(), "Ryu", "Ken", false);
        assert_eq!(v.len(), 4);
        assert!((v[0] - (2.0 / 3.0 - 1.0 / 3.0)).abs() < 1e-12);
        assert!((v[1] - (70.0 - 40.0)).abs() < 1e-12);
        assert!((v[2] - (70.0 - 40.0)).abs() < 1e-12);
        assert_eq!(v[3], 3.0);

        let v = predictive_vector(&book(), "Ryu", "Ken", true);
        assert_eq!(v.len(), 5);
    }

    #[test]
    fn betting_vector_without_predictor_is_even() {
        let builder = FeatureBuilder::new(layout(false, true), models(None)).unwrap();
        let rec = ContestRecord::new(Tier::A, "Ryu", "Ken", 10.0, 10.0, 2000.0, 30.0);

        let v = builder.betting_vector(&rec, 1000.0);
        assert_eq!(v.len(), 6);
        assert_eq!(&v[..2], &[0.5, 0.5]);
        assert_eq!(v[4], Tier::A.index() as f64);
        assert!((v[5] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn memo_keeps_prefix_and_refreshes_bankroll() {
        let builder = FeatureBuilder::new(layout(false, true), models(None)).unwrap();
        let rec = ContestRecord::new(Tier::A, "Ryu", "Ken", 10.0, 10.0, 100.0, 30.0);

        let first = builder.betting_vector(&rec, 100.0);
        let second = builder.betting_vector(&rec, 300.0);
        assert_eq!(builder.memo_len(), 1);
        assert_eq!(&first[..5], &second[..5]);
        assert_eq!(first[5], 1.0);
        assert_eq!(second[5], 3.0);
        assert_eq!(builder.betting_vector_uncached(&rec, 300.0), second);
    }

    #[test]
    fn zero_pot_average_yields_zero_ratio() {
        let builder = FeatureBuilder::new(layout(false, true), models(None)).unwrap();
        let rec = ContestRecord::live(Tier::A, "Ryu", "Ken", 0.0);
        assert_eq!(builder.betting_vector(&rec, 5000.0)[5], 0.0);
    }

    #[test]
    fn betting_width_without_bankroll() {
        let builder = FeatureBuilder::new(layout(false, false), models(None)).unwrap();
        let rec = ContestRecord::live(Tier::X, "a", "b", 10.0);
        assert_eq!(builder.betting_vector(&rec, 5000.0).len(), 5);
    }

    #[test]
    fn predictor_output_feeds_betting_vector() {
        let predictor = DenseNetwork {
            input_dim: 4,
            layers: vec![DenseLayer {
                weights: vec![vec![0.0; 4], vec![0.0; 4]],
                bias: vec![0.0, 100.0],
                activation: Activation::Sigmoid,
            }],
            metadata: serde_json::Value::Null,
        };
        let builder = FeatureBuilder::new(layout(false, true), models(Some(predictor))).unwrap();
        let rec = ContestRecord::live(Tier::A, "Ryu", "Ken", 10.0);
        let v = builder.betting_vector(&rec, 0.0);
        assert!((v[0] - 0.5).abs() < 1e-12);
        assert!(v[1] > 0.99);
    }

    #[test]
    fn mismatched_predictor_is_rejected() {
        let predictor = DenseNetwork {
            input_dim: 5,
            layers: vec![DenseLayer {
                weights: vec![vec![0.0; 5], vec![0.0; 5]],
                bias: vec![0.0, 0.0],
                activation: Activation::Sigmoid,
            }],
            metadata: serde_json::Value::Null,
        };
        let err = FeatureBuilder::new(layout(false, true), models(Some(predictor))).unwrap_err();
        assert!(matches!(
            err,
            DuelbetError::DimensionMismatch {
                layout: "predictive",
                vector_width: 4,
                policy_width: 5
            }
        ));
    }

    #[test]
    fn has_stats_requires_both_names() {
        let builder = FeatureBuilder::new(layout(false, true), models(None)).unwrap();
        assert!(builder.has_stats(&ContestRecord::live(Tier::A, "Ryu", "Ken", 0.0)));
        assert!(!builder.has_stats(&ContestRecord::live(Tier::A, "Ryu", "Guile", 0.0)));
        assert!(!builder.has_stats(&ContestRecord::live(Tier::S, "Ryu", "Ken", 0.0)));
    }
}
