//! Generational policy search.
//!
//! Each generation:
//! 1. every policy is scored in parallel (rayon tasks reporting over a
//!    bounded crossbeam channel, fully drained before ranking)
//! 2. the top `elite` policies survive unchanged
//! 3. the rest of the generation is bred from rank-biased parent pairs
//!
//! Mutation strength is carried in [`OptimizerState`] and grows whenever the
//! search stalls. Standalone runs stop when the best score flattens out; meta
//! runs refine an existing population for a fixed number of generations.

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, error, info, warn};

use crate::config::TrainingConfig;
use crate::coordination::ShutdownFlag;
use crate::error::{DuelbetError, Result};
use crate::ml::{DenseNetwork, NetworkShape};
use crate::persistence::CheckpointStore;

/// Score assigned to policies whose fitness is not a finite number
pub const FITNESS_SENTINEL: f64 = -1e9;

/// Something that can score a policy; shared across evaluation threads
pub trait Fitness: Sync {
    fn score(&self, policy: &DenseNetwork) -> f64;

    /// Hook run before every meta generation
    fn next_generation(&mut self, _rng: &mut StdRng) {}
}

impl<F> Fitness for F
where
    F: Fn(&DenseNetwork) -> f64 + Sync,
{
    fn score(&self, policy: &DenseNetwork) -> f64 {
        self(policy)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Evolve against fixed evaluation sets until the best score stops
    /// improving; a best score below the previous generation's is fatal
    Standalone,
    /// Fixed-length refinement against reshuffled evaluation sets
    Meta,
}

/// Mutable search state threaded through generations
#[derive(Debug)]
pub struct OptimizerState {
    pub generation: usize,
    /// Best score of every completed generation
    pub history: Vec<f64>,
    /// Current mutation ceiling
    pub ceiling: f64,
    pub rng: StdRng,
}

impl OptimizerState {
    pub fn new(ceiling: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            generation: 0,
            history: Vec::new(),
            ceiling,
            rng,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub best: DenseNetwork,
    pub best_score: f64,
    pub generations: usize,
    pub history: Vec<f64>,
    /// Mean of the final termination window (meta runs only)
    pub meta_fitness: Option<f64>,
    /// Last evaluated population, best first
    pub population: Vec<DenseNetwork>,
}

pub struct Optimizer {
    config: TrainingConfig,
    shape: NetworkShape,
}

impl Optimizer {
    pub fn new(config: TrainingConfig, shape: NetworkShape) -> Self {
        Self { config, shape }
    }

    pub fn shape(&self) -> &NetworkShape {
        &self.shape
    }

    pub fn population_size(&self, mode: RunMode) -> usize {
        match mode {
            RunMode::Standalone => self.config.population,
            RunMode::Meta => self.config.meta_population,
        }
    }

    /// Build the first generation: seeds first, then random policies
    /// (standalone) or crossovers among seeds (meta).
    pub fn seed_population(
        &self,
        seeds: Vec<DenseNetwork>,
        mode: RunMode,
        rng: &mut StdRng,
    ) -> Result<Vec<DenseNetwork>> {
        let n = self.population_size(mode);
        let mut population = seeds;
        population.truncate(n);

        let breed_from_seeds = matches!(mode, RunMode::Meta) && population.len() >= 2;
        let seeded = population.len();
        while population.len() < n {
            if breed_from_seeds {
                let i = rng.gen_range(0..seeded);
                let mut j = rng.gen_range(0..seeded);
                if j == i {
                    j = (i + 1) % seeded;
                }
                let child =
                    population[i].crossover(&population[j], self.config.mutate_min, rng)?;
                population.push(child);
            } else {
                population.push(DenseNetwork::random(&self.shape, rng));
            }
        }
        Ok(population)
    }

    pub fn run<F: Fitness>(
        &self,
        seeds: Vec<DenseNetwork>,
        fitness: &mut F,
        mode: RunMode,
        store: Option<&dyn CheckpointStore>,
        shutdown: &ShutdownFlag,
    ) -> Result<RunOutcome> {
        let mut state = OptimizerState::new(self.config.mutate_max, self.config.seed);
        self.run_with_state(seeds, fitness, mode, store, shutdown, &mut state)
    }

    pub fn run_with_state<F: Fitness>(
        &self,
        seeds: Vec<DenseNetwork>,
        fitness: &mut F,
        mode: RunMode,
        store: Option<&dyn CheckpointStore>,
        shutdown: &ShutdownFlag,
        state: &mut OptimizerState,
    ) -> Result<RunOutcome> {
        let mut population = self.seed_population(seeds, mode, &mut state.rng)?;
        if population.len() < 2 {
            return Err(DuelbetError::InvalidConfig(format!(
                "population must hold at least 2 policies (got {})",
                population.len()
            )));
        }

        let mut best: Option<(DenseNetwork, f64)> = None;

        loop {
            if state.generation > 0 && shutdown.is_requested() {
                info!("Shutdown requested, stopping at generation {}", state.generation);
                break;
            }

            if mode == RunMode::Meta {
                fitness.next_generation(&mut state.rng);
            }

            let scores = evaluate_population(&population, &*fitness);
            let order = rank(&scores);
            population = order.iter().map(|&i| population[i].clone()).collect();
            let gen_best = scores[order[0]];

            info!("generation={} best={:.2}", state.generation, gen_best);
            debug!("best params: {}", population[0].fmt_params());

            if mode == RunMode::Standalone {
                if let Some(&previous) = state.history.last() {
                    if gen_best < previous {
                        error!(
                            "Best score fell from {:.2} to {:.2} at generation {}",
                            previous, gen_best, state.generation
                        );
                        return Err(DuelbetError::ScoreRegression {
                            generation: state.generation,
                            previous,
                            current: gen_best,
                        });
                    }
                }
            }

            let improved = best.as_ref().map_or(true, |(_, s)| gen_best > *s);
            if improved {
                let mut champion = population[0].clone();
                champion.metadata = serde_json::json!({ "generation": state.generation });
                if let Some(store) = store {
                    if let Err(e) = store.write_progress(&champion, gen_best, Utc::now()) {
                        warn!("Failed to save progress at generation {}: {}", state.generation, e);
                    }
                }
                best = Some((champion, gen_best));
            }

            state.history.push(gen_best);
            self.adapt_ceiling(state);
            state.generation += 1;

            if self.should_stop(state, mode) {
                break;
            }

            population = self.breed(&population, state)?;
        }

        let (best, best_score) = best.ok_or_else(|| {
            DuelbetError::Internal("optimizer finished without evaluating".to_string())
        })?;
        let meta_fitness = match mode {
            RunMode::Meta => Some(self.final_window_mean(&state.history)),
            RunMode::Standalone => None,
        };

        info!(
            "Optimizer finished after {} generations, best={:.2}",
            state.generation, best_score
        );

        Ok(RunOutcome {
            best,
            best_score,
            generations: state.generation,
            history: state.history.clone(),
            meta_fitness,
            population,
        })
    }

    /// Grow the ceiling when the best score matches the one
    /// `stagnation_window` generations back
    fn adapt_ceiling(&self, state: &mut OptimizerState) {
        let window = self.config.stagnation_window;
        let len = state.history.len();
        if window == 0 || len <= window {
            return;
        }
        if state.history[len - 1] == state.history[len - 1 - window] {
            state.ceiling += 1.0;
            debug!("Search stalled, mutation ceiling now {:.1}", state.ceiling);
        }
    }

    fn should_stop(&self, state: &OptimizerState, mode: RunMode) -> bool {
        match mode {
            RunMode::Meta => state.generation >= self.config.meta_generations,
            RunMode::Standalone => {
                if self.config.max_generations > 0
                    && state.generation >= self.config.max_generations
                {
                    return true;
                }
                if state.generation < self.config.term_min_gen {
                    return false;
                }
                let stride = self.config.term_stride;
                let len = state.history.len();
                if len < stride + 1 {
                    return false;
                }
                let oldest = state.history[len - 1 - stride];
                let newest = state.history[len - 1];
                let slope = relative_gain(oldest, newest);
                debug!("termination slope {:.4} over {} generations", slope, stride);
                slope < self.config.term_slope
            }
        }
    }

    fn final_window_mean(&self, history: &[f64]) -> f64 {
        let window = (self.config.term_stride + 1).min(history.len());
        if window == 0 {
            return 0.0;
        }
        let tail = &history[history.len() - window..];
        tail.iter().sum::<f64>() / window as f64
    }

    /// Next generation from a population sorted best first
    fn breed(&self, ranked: &[DenseNetwork], state: &mut OptimizerState) -> Result<Vec<DenseNetwork>> {
        let n = ranked.len();
        let elite = self.config.elite.min(n);
        let mut next: Vec<DenseNetwork> = ranked[..elite].to_vec();

        let bulk_end = n * 3 / 4;
        while next.len() < n {
            let pos = next.len();
            let sigma = if pos == n - 1 {
                state.ceiling * self.config.super_mutant
            } else if pos >= bulk_end {
                state.ceiling
            } else {
                self.config.mutate_min
            };
            let (i, j) = pick_parents(n, &mut state.rng);
            next.push(ranked[i].crossover(&ranked[j], sigma, &mut state.rng)?);
        }
        Ok(next)
    }
}

/// Relative change from `oldest` to `newest`; a flat zero counts as no gain
fn relative_gain(oldest: f64, newest: f64) -> f64 {
    if oldest == 0.0 {
        return if newest > 0.0 { f64::INFINITY } else { 0.0 };
    }
    (newest - oldest) / oldest.abs()
}

/// Score every policy in parallel and wait for all of them
pub fn evaluate_population<F: Fitness + ?Sized>(population: &[DenseNetwork], fitness: &F) -> Vec<f64> {
    let n = population.len();
    let (tx, rx) = crossbeam_channel::bounded::<(usize, f64)>(n);

    rayon::scope(|s| {
        for (idx, policy) in population.iter().enumerate() {
            let tx = tx.clone();
            s.spawn(move |_| {
                let score = fitness.score(policy);
                let _ = tx.send((idx, score));
            });
        }
    });
    drop(tx);

    let mut scores = vec![FITNESS_SENTINEL; n];
    for (idx, score) in rx.iter().take(n) {
        scores[idx] = if score.is_finite() {
            score
        } else {
            FITNESS_SENTINEL
        };
    }
    scores
}

/// Population indices sorted by descending score, ties by index
pub fn rank(scores: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));
    order
}

/// Two distinct ranks biased toward the top: `floor((n - 1) * u^3)`
pub fn pick_parents<R: Rng + ?Sized>(n: usize, rng: &mut R) -> (usize, usize) {
    let mut pick = || {
        let u: f64 = rng.gen();
        (((n - 1) as f64) * u.powi(3)).floor().min((n - 1) as f64) as usize
    };
    let first = pick();
    let mut second = pick();
    if second == first {
        second = if first + 1 < n { first + 1 } else { first.saturating_sub(1) };
    }
    (first, second)
}
