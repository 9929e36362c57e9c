//! Policy search and decision engine.

pub mod features;
pub mod optimizer;
pub mod simulator;
pub mod training;
pub mod wager;

pub use features::{predictive_vector, FeatureBuilder, FeatureLayout, TierModel, TierModels};
pub use optimizer::{Fitness, Optimizer, OptimizerState, RunMode, RunOutcome, FITNESS_SENTINEL};
pub use simulator::{clamp_wager, EvaluationSets, FitnessSimulator, SimulatorConfig};
pub use training::{
    betting_shape, evolve_predictors, predictor_shape, PolicyTrainer, PredictorFitness,
    SimulatorFitness, TrainingData,
};
pub use wager::{signed_wager, Ensemble, WagerDecision};
