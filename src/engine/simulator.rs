//! Bankroll replay used as the fitness function for wager policies.
//!
//! A policy is run over historical contests with a simulated bankroll. Fitness
//! is a low percentile of the resulting trajectory rather than the final
//! value, so a policy that nearly goes broke early is penalized even if it
//! recovers.

use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::Arc;

use crate::config::TrainingConfig;
use crate::domain::ContestRecord;
use crate::engine::features::FeatureBuilder;
use crate::engine::wager::WagerDecision;
use crate::error::Result;
use crate::ml::DenseNetwork;

/// Bound a requested wager by the bankroll and the bailout floor.
///
/// Any wager that would leave less than `floor` behind, or exceed the bank,
/// becomes all-in: the floor is refilled after a loss anyway.
pub fn clamp_wager(bank: f64, requested: f64, floor: f64) -> f64 {
    if requested <= 0.0 {
        return 0.0;
    }
    if requested > bank || bank - requested < floor {
        return bank;
    }
    requested
}

/// Value at percentile `p` of `values`, sorting them in place
pub fn percentile(values: &mut [f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let idx = (p.clamp(0.0, 1.0) * (values.len() - 1) as f64).floor() as usize;
    values[idx]
}

/// Median of `values`; mean of the middle pair for even counts
pub fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        values[mid]
    } else {
        (values[mid - 1] + values[mid]) / 2.0
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SimulatorConfig {
    pub start_bankroll: f64,
    pub bailout: f64,
    pub percentile: f64,
}

impl From<&TrainingConfig> for SimulatorConfig {
    fn from(cfg: &TrainingConfig) -> Self {
        Self {
            start_bankroll: cfg.start_bankroll,
            bailout: cfg.bailout,
            percentile: cfg.percentile,
        }
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self::from(&TrainingConfig::default())
    }
}

/// Disjoint, chronologically ordered slices of a training pool
#[derive(Debug, Clone)]
pub struct EvaluationSets {
    pool: Arc<Vec<ContestRecord>>,
    slices: Vec<Vec<usize>>,
}

impl EvaluationSets {
    pub fn new<R: Rng + ?Sized>(pool: Arc<Vec<ContestRecord>>, count: usize, rng: &mut R) -> Self {
        let mut sets = Self {
            pool,
            slices: Vec::new(),
        };
        sets.reshuffle(count.max(1), rng);
        sets
    }

    /// Deal the pool round-robin into `count` fresh slices
    pub fn reshuffle<R: Rng + ?Sized>(&mut self, count: usize, rng: &mut R) {
        let mut order: Vec<usize> = (0..self.pool.len()).collect();
        order.shuffle(rng);

        let mut slices = vec![Vec::with_capacity(order.len() / count + 1); count];
        for (i, idx) in order.into_iter().enumerate() {
            slices[i % count].push(idx);
        }
        for slice in &mut slices {
            slice.sort_by_key(|&idx| self.pool[idx].id());
        }
        self.slices = slices;
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    pub fn pool(&self) -> &Arc<Vec<ContestRecord>> {
        &self.pool
    }

    pub fn slice(&self, i: usize) -> impl Iterator<Item = &ContestRecord> + '_ {
        self.slices[i].iter().map(move |&idx| &self.pool[idx])
    }
}

/// Replays contests for a wager policy
#[derive(Debug, Clone)]
pub struct FitnessSimulator {
    features: Arc<FeatureBuilder>,
    config: SimulatorConfig,
}

impl FitnessSimulator {
    pub fn new(features: Arc<FeatureBuilder>, config: SimulatorConfig) -> Self {
        Self { features, config }
    }

    pub fn features(&self) -> &Arc<FeatureBuilder> {
        &self.features
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    /// Fails if `policy` cannot consume this simulator's betting vectors
    pub fn check(&self, policy: &DenseNetwork) -> Result<()> {
        self.features.layout().check_betting(policy)
    }

    /// Bankroll after every contest, starting with the initial bankroll
    pub fn trajectory<'a, I>(&self, policy: &DenseNetwork, records: I) -> Vec<f64>
    where
        I: IntoIterator<Item = &'a ContestRecord>,
    {
        let mut bank = self.config.start_bankroll;
        let mut trajectory = vec![bank];

        for rec in records {
            let Some(winner) = rec.winner() else {
                continue;
            };
            let vector = self.features.betting_vector(rec, bank);
            let decision = WagerDecision::from_output(&policy.evaluate(&vector));
            let wager = clamp_wager(bank, bank * decision.magnitude, self.config.bailout);

            if wager > 0.0 {
                if decision.side == winner {
                    bank += rec.payoff(wager);
                } else {
                    bank -= wager;
                    if bank < self.config.bailout {
                        bank = self.config.bailout;
                    }
                }
            }
            trajectory.push(bank);
        }
        trajectory
    }

    /// Percentile fitness of a single replay
    pub fn simulate<'a, I>(&self, policy: &DenseNetwork, records: I) -> f64
    where
        I: IntoIterator<Item = &'a ContestRecord>,
    {
        let mut trajectory = self.trajectory(policy, records);
        percentile(&mut trajectory, self.config.percentile)
    }

    /// Median fitness across every evaluation slice
    pub fn evaluate(&self, policy: &DenseNetwork, sets: &EvaluationSets) -> f64 {
        let mut scores: Vec<f64> = (0..sets.len())
            .map(|i| self.simulate(policy, sets.slice(i)))
            .collect();
        median(&mut scores)
    }
}
