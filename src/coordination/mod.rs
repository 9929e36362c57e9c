//! Coordination primitives for long-running commands
//!
//! - Consecutive-failure breaker for the live session
//! - Shutdown flag shared by training and serving

pub mod circuit_breaker;
pub mod shutdown;

pub use circuit_breaker::{CircuitState, FailureBreaker, FailureBreakerConfig};
pub use shutdown::ShutdownFlag;
