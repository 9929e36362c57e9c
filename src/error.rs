use thiserror::Error;

/// Main error type for the wagering engine
#[derive(Error, Debug)]
pub enum DuelbetError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected HTTP response: {status} {url}: {body}")]
    HttpStatus {
        status: u16,
        url: String,
        body: String,
    },

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Data errors
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Unknown tier: {0}")]
    UnknownTier(String),

    // Model errors
    #[error("Feature width mismatch: {layout} vector has {vector_width} inputs, policy expects {policy_width}")]
    DimensionMismatch {
        layout: &'static str,
        vector_width: usize,
        policy_width: usize,
    },

    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    #[error("Consensus requires an odd, non-empty ensemble (got {0} members)")]
    EvenEnsemble(usize),

    // Optimizer invariants
    #[error("Best score regressed at generation {generation}: {previous} -> {current}")]
    ScoreRegression {
        generation: usize,
        previous: f64,
        current: f64,
    },

    // Checkpoint errors
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    // Live session errors
    #[error("Live session error: {0}")]
    Live(String),

    #[error("Wager rejected: {0}")]
    WagerRejected(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for DuelbetError
pub type Result<T> = std::result::Result<T, DuelbetError>;

/// Specific error types for the live session
#[derive(Error, Debug, Clone)]
pub enum LiveError {
    #[error("Consecutive failures: {count} > {threshold}")]
    ConsecutiveFailures { count: u32, threshold: u32 },

    #[error("Missing uid for bankroll lookup")]
    MissingUid,

    #[error("Empty response from {0}")]
    EmptyResponse(String),
}

impl From<LiveError> for DuelbetError {
    fn from(err: LiveError) -> Self {
        DuelbetError::Live(err.to_string())
    }
}
