//! Persistence for evolved policies and tier predictors.

pub mod checkpoint;

pub use checkpoint::{load_top, CheckpointEntry, CheckpointMeta, CheckpointStore, FileCheckpointStore};
