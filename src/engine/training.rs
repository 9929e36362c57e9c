//! Training preparation and the fitness functions handed to the optimizer.
//!
//! History is split per tier into a stats half (folded into the tier's
//! [`StatsBook`]) and a training half (replayed by the simulator), so a
//! policy is never scored on contests its features already saw.

use chrono::Utc;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{FeatureConfig, TrainingConfig};
use crate::coordination::ShutdownFlag;
use crate::domain::{ContestRecord, Side, StatsBook, Tier};
use crate::engine::features::{predictive_vector, FeatureBuilder, FeatureLayout, TierModel, TierModels};
use crate::engine::optimizer::{Fitness, Optimizer, RunMode, RunOutcome};
use crate::engine::simulator::{EvaluationSets, FitnessSimulator, SimulatorConfig};
use crate::error::{DuelbetError, Result};
use crate::ml::{Activation, DenseNetwork, NetworkShape};
use crate::persistence::{CheckpointStore, FileCheckpointStore};

/// Shape of wager policies: sigmoid hidden layers, one tanh output
pub fn betting_shape(cfg: &TrainingConfig, layout: FeatureLayout) -> NetworkShape {
    let mut widths = cfg.hidden_layers.clone();
    widths.push(1);
    NetworkShape {
        input_dim: layout.betting_width(),
        layout: widths,
        hidden_activation: Activation::Sigmoid,
        output_activation: Activation::Tanh,
    }
}

/// Shape of tier predictors: two sigmoid class scores
pub fn predictor_shape(cfg: &TrainingConfig, layout: FeatureLayout) -> NetworkShape {
    let mut widths = cfg.predictor_hidden_layers.clone();
    widths.push(2);
    NetworkShape {
        input_dim: layout.predictive_width(),
        layout: widths,
        hidden_activation: Activation::Sigmoid,
        output_activation: Activation::Sigmoid,
    }
}

/// Random half for stats, the rest for training; both stay chronological
pub fn split_half<R: Rng + ?Sized>(
    records: Vec<ContestRecord>,
    rng: &mut R,
) -> (Vec<ContestRecord>, Vec<ContestRecord>) {
    let mut picks = vec![false; records.len()];
    let mut order: Vec<usize> = (0..records.len()).collect();
    order.shuffle(rng);
    for &idx in order.iter().take(records.len() / 2) {
        picks[idx] = true;
    }

    let mut stats = Vec::with_capacity(records.len() / 2);
    let mut train = Vec::with_capacity(records.len() - records.len() / 2);
    for (rec, for_stats) in records.into_iter().zip(picks) {
        if for_stats {
            stats.push(rec);
        } else {
            train.push(rec);
        }
    }
    (stats, train)
}

/// Tier models plus the pooled training half
#[derive(Debug, Clone, Default)]
pub struct TrainingData {
    pub models: TierModels,
    /// Training contests of every tier, chronological
    pub train: Vec<ContestRecord>,
    pub train_by_tier: BTreeMap<Tier, Vec<ContestRecord>>,
}

impl TrainingData {
    pub fn prepare<R: Rng + ?Sized>(by_tier: BTreeMap<Tier, Vec<ContestRecord>>, rng: &mut R) -> Self {
        let mut data = Self::default();
        for (tier, records) in by_tier {
            let (stats_half, train_half) = split_half(records, rng);
            let mut stats = StatsBook::new();
            stats.update(&stats_half);
            info!(
                "Tier {}: {} competitors from {} contests, {} held out for training",
                tier,
                stats.len(),
                stats_half.len(),
                train_half.len()
            );
            data.models.insert(tier, TierModel::new(stats));
            data.train.extend(train_half.iter().cloned());
            data.train_by_tier.insert(tier, train_half);
        }
        data.train.sort_by_key(|r| r.id());
        data
    }

    /// Attach predictors saved under `predictors/`
    pub fn load_predictors(&mut self, store: &FileCheckpointStore) -> Result<usize> {
        let mut loaded = 0;
        for (tier, model) in self.models.iter_mut() {
            if let Some(predictor) = store.read_predictor(*tier)? {
                model.predictor = Some(predictor);
                loaded += 1;
            }
        }
        Ok(loaded)
    }

    pub fn freeze(&self, features: FeatureConfig) -> Result<Arc<FeatureBuilder>> {
        let builder = FeatureBuilder::new(FeatureLayout::from(features), Arc::new(self.models.clone()))?;
        Ok(Arc::new(builder))
    }
}

/// Mean margin of the winner's class score over the loser's
pub struct PredictorFitness {
    samples: Vec<(Vec<f64>, Side)>,
}

impl PredictorFitness {
    pub fn new(stats: &StatsBook, records: &[ContestRecord], relational: bool) -> Self {
        let samples = records
            .iter()
            .filter_map(|rec| {
                let winner = rec.winner()?;
                let (a, b) = rec.names();
                Some((predictive_vector(stats, a, b, relational), winner))
            })
            .collect();
        Self { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl Fitness for PredictorFitness {
    fn score(&self, policy: &DenseNetwork) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let total: f64 = self
            .samples
            .iter()
            .map(|(input, winner)| {
                let out = policy.evaluate(input);
                out[winner.index()] - out[winner.opposite().index()]
            })
            .sum();
        total / self.samples.len() as f64
    }
}

/// Bankroll-replay fitness over evaluation slices
pub struct SimulatorFitness {
    simulator: FitnessSimulator,
    sets: EvaluationSets,
    subsequences: usize,
}

impl SimulatorFitness {
    pub fn new(simulator: FitnessSimulator, sets: EvaluationSets) -> Self {
        let subsequences = sets.len();
        Self {
            simulator,
            sets,
            subsequences,
        }
    }

    pub fn simulator(&self) -> &FitnessSimulator {
        &self.simulator
    }

    pub fn sets(&self) -> &EvaluationSets {
        &self.sets
    }
}

impl Fitness for SimulatorFitness {
    fn score(&self, policy: &DenseNetwork) -> f64 {
        self.simulator.evaluate(policy, &self.sets)
    }

    fn next_generation(&mut self, rng: &mut StdRng) {
        self.sets.reshuffle(self.subsequences, rng);
    }
}

/// Evolve a two-score predictor for every tier with enough training data
pub fn evolve_predictors(
    data: &mut TrainingData,
    cfg: &TrainingConfig,
    features: FeatureConfig,
    store: &FileCheckpointStore,
    shutdown: &ShutdownFlag,
) -> Result<BTreeMap<Tier, f64>> {
    let layout = FeatureLayout::from(features);
    let optimizer = Optimizer::new(cfg.clone(), predictor_shape(cfg, layout));
    let mut scores = BTreeMap::new();

    for (tier, model) in data.models.iter_mut() {
        if shutdown.is_requested() {
            break;
        }
        let records = data.train_by_tier.get(tier).map(Vec::as_slice).unwrap_or(&[]);
        let mut fitness = PredictorFitness::new(&model.stats, records, layout.relational);
        if fitness.is_empty() {
            warn!("Tier {}: no training contests, skipping predictor", tier);
            continue;
        }

        info!("Tier {}: evolving predictor on {} contests", tier, fitness.len());
        let outcome = optimizer.run(
            Vec::new(),
            &mut fitness,
            RunMode::Standalone,
            None,
            shutdown,
        )?;
        store.write_predictor(*tier, &outcome.best)?;
        model.predictor = Some(outcome.best);
        scores.insert(*tier, outcome.best_score);
    }
    Ok(scores)
}

/// Everything one wager-policy run needs
pub struct PolicyTrainer {
    cfg: TrainingConfig,
    features: Arc<FeatureBuilder>,
    pool: Arc<Vec<ContestRecord>>,
}

impl PolicyTrainer {
    pub fn new(cfg: TrainingConfig, features: Arc<FeatureBuilder>, pool: Vec<ContestRecord>) -> Result<Self> {
        if pool.is_empty() {
            return Err(DuelbetError::InvalidConfig(
                "no training contests available".to_string(),
            ));
        }
        Ok(Self {
            cfg,
            features,
            pool: Arc::new(pool),
        })
    }

    pub fn shape(&self) -> NetworkShape {
        betting_shape(&self.cfg, self.features.layout())
    }

    pub fn simulator(&self) -> FitnessSimulator {
        FitnessSimulator::new(Arc::clone(&self.features), SimulatorConfig::from(&self.cfg))
    }

    pub fn fitness<R: Rng + ?Sized>(&self, rng: &mut R) -> SimulatorFitness {
        let sets = EvaluationSets::new(Arc::clone(&self.pool), self.cfg.subsequences, rng);
        SimulatorFitness::new(self.simulator(), sets)
    }

    /// One standalone run from a random population; only its final best
    /// is ranked in `store`
    pub fn run_standalone<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        store: Option<&dyn CheckpointStore>,
        shutdown: &ShutdownFlag,
    ) -> Result<RunOutcome> {
        let mut fitness = self.fitness(rng);
        let optimizer = Optimizer::new(self.cfg.clone(), self.shape());
        let outcome = optimizer.run(Vec::new(), &mut fitness, RunMode::Standalone, store, shutdown)?;
        if let Some(store) = store {
            let entry = store.write(&outcome.best, outcome.best_score, Utc::now())?;
            info!("Run result saved to {}", entry.path.display());
        }
        Ok(outcome)
    }

    /// Refine existing policies against reshuffled evaluation sets
    pub fn run_meta<R: Rng + ?Sized>(
        &self,
        seeds: Vec<DenseNetwork>,
        rng: &mut R,
        store: Option<&dyn CheckpointStore>,
        shutdown: &ShutdownFlag,
    ) -> Result<RunOutcome> {
        let simulator = self.simulator();
        for seed in &seeds {
            simulator.check(seed)?;
        }
        let mut fitness = self.fitness(rng);
        let optimizer = Optimizer::new(self.cfg.clone(), self.shape());
        let outcome = optimizer.run(seeds, &mut fitness, RunMode::Meta, store, shutdown)?;
        if let Some(store) = store {
            // ranked alongside standalone results, so score on fixed sets
            let score = self.fitness(rng).score(&outcome.best);
            let entry = store.write(&outcome.best, score, Utc::now())?;
            info!("Meta result saved to {} (fixed-set score {:.2})", entry.path.display(), score);
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn records(n: usize) -> Vec<ContestRecord> {
        (0..n)
            .map(|i| {
                let (w, l) = if i % 3 == 0 { ("Ryu", "Ken") } else { ("Ken", "Ryu") };
                ContestRecord::new(Tier::B, w, l, 100.0, 50.0, 100.0, 30.0)
            })
            .collect()
    }

    #[test]
    fn split_half_is_disjoint_and_chronological() {
        let recs = records(11);
        let ids: Vec<u64> = recs.iter().map(|r| r.id()).collect();
        let (stats, train) = split_half(recs, &mut StdRng::seed_from_u64(4));

        assert_eq!(stats.len(), 5);
        assert_eq!(train.len(), 6);
        assert!(stats.windows(2).all(|w| w[0].id() < w[1].id()));
        assert!(train.windows(2).all(|w| w[0].id() < w[1].id()));

        let mut seen: Vec<u64> = stats.iter().chain(&train).map(|r| r.id()).collect();
        seen.sort_unstable();
        assert_eq!(seen, ids);
    }

    #[test]
    fn split_is_reproducible_for_a_seed() {
        let recs = records(20);
        let (a, _) = split_half(recs.clone(), &mut StdRng::seed_from_u64(8));
        let (b, _) = split_half(recs, &mut StdRng::seed_from_u64(8));
        assert_eq!(a, b);
    }

    #[test]
    fn prepare_builds_one_model_per_tier() {
        let mut by_tier = BTreeMap::new();
        by_tier.insert(Tier::B, records(10));
        by_tier.insert(
            Tier::S,
            vec![ContestRecord::new(Tier::S, "Guile", "Blanka", 10.0, 10.0, 0.0, 10.0); 2],
        );
        let data = TrainingData::prepare(by_tier, &mut StdRng::seed_from_u64(1));

        assert_eq!(data.models.len(), 2);
        assert_eq!(data.train.len(), 5 + 1);
        assert_eq!(data.models[&Tier::S].stats.len(), 2);
        assert!(data.train.windows(2).all(|w| w[0].id() <= w[1].id()));
    }

    #[test]
    fn predictor_fitness_rewards_winner_margin() {
        let mut stats = StatsBook::new();
        stats.update(&records(6));
        let fitness = PredictorFitness::new(&stats, &records(3), false);
        assert_eq!(fitness.len(), 3);

        // constant [1, 0] output always favors side A ("Ryu")
        let favors_a = DenseNetwork {
            input_dim: 4,
            layers: vec![crate::ml::DenseLayer {
                weights: vec![vec![0.0; 4], vec![0.0; 4]],
                bias: vec![1.0, 0.0],
                activation: Activation::Linear,
            }],
            metadata: serde_json::Value::Null,
        };
        // Ryu wins 1 of 3: (1 - 1 - 1) / 3
        assert!((fitness.score(&favors_a) + 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn shapes_follow_layout() {
        let cfg = TrainingConfig::default();
        let layout = FeatureLayout {
            relational: true,
            include_bankroll: false,
        };
        let bet = betting_shape(&cfg, layout);
        assert_eq!(bet.input_dim, 5);
        assert_eq!(bet.output_dim(), 1);
        assert_eq!(bet.output_activation, Activation::Tanh);

        let pred = predictor_shape(&cfg, layout);
        assert_eq!(pred.input_dim, 5);
        assert_eq!(pred.output_dim(), 2);
    }

    #[test]
    fn one_run_ranks_exactly_one_policy() {
        let mut by_tier = BTreeMap::new();
        by_tier.insert(Tier::B, records(30));
        let data = TrainingData::prepare(by_tier, &mut StdRng::seed_from_u64(2));
        let features = data.freeze(FeatureConfig::default()).unwrap();
        let cfg = TrainingConfig {
            population: 12,
            elite: 2,
            subsequences: 3,
            start_bankroll: 1000.0,
            bailout: 0.0,
            max_generations: 12,
            seed: Some(6),
            ..TrainingConfig::default()
        };
        let trainer = PolicyTrainer::new(cfg, features, data.train).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path()).unwrap();
        let outcome = trainer
            .run_standalone(&mut StdRng::seed_from_u64(1), Some(&store), &ShutdownFlag::new())
            .unwrap();

        let ranked = store.top(10).unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].score, (outcome.best_score as i64) as f64);
        assert!(store.progress_path().exists());
    }

    #[test]
    fn default_config_rejects_score_regression() {
        let cfg = TrainingConfig::default();
        let layout = FeatureLayout::from(FeatureConfig::default());
        let population = cfg.population;
        let optimizer = Optimizer::new(cfg.clone(), predictor_shape(&cfg, layout));
        // first generation scores 10, every later one 5
        let calls = std::sync::atomic::AtomicUsize::new(0);
        let mut fitness = |_: &DenseNetwork| {
            if calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) < population {
                10.0
            } else {
                5.0
            }
        };
        let err = optimizer
            .run(Vec::new(), &mut fitness, RunMode::Standalone, None, &ShutdownFlag::new())
            .unwrap_err();
        assert!(matches!(
            err,
            DuelbetError::ScoreRegression { generation: 1, previous, current }
                if previous == 10.0 && current == 5.0
        ));
    }

    #[test]
    fn trainer_rejects_empty_pool() {
        let data = TrainingData::default();
        let features = data.freeze(FeatureConfig::default()).unwrap();
        assert!(PolicyTrainer::new(TrainingConfig::default(), features, Vec::new()).is_err());
    }
}
