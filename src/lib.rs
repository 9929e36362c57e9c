pub mod adapters;
pub mod cli;
pub mod config;
pub mod coordination;
pub mod domain;
pub mod engine;
pub mod error;
pub mod ml;
pub mod persistence;
pub mod services;

pub use config::AppConfig;
pub use coordination::{CircuitState, FailureBreaker, ShutdownFlag};
pub use domain::{ContestRecord, Mode, Side, StatsBook, Tier};
pub use engine::{Ensemble, FeatureBuilder, FitnessSimulator, Optimizer, WagerDecision};
pub use error::{DuelbetError, Result};
pub use ml::DenseNetwork;
pub use persistence::{CheckpointStore, FileCheckpointStore};
pub use services::{LiveSession, StepOutcome};
