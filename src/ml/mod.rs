//! Small feed-forward networks used as predictors and wager policies.

pub mod dense;

pub use dense::{Activation, DenseLayer, DenseNetwork, NetworkShape};
