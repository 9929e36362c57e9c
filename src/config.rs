use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub features: FeatureConfig,
    #[serde(default)]
    pub betting: BettingConfig,
    #[serde(default)]
    pub live: LiveConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    #[serde(default)]
    pub dry_run: DryRunConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Table holding settled contests
    #[serde(default = "default_history_table")]
    pub history_table: String,
    /// Table the live session polls for contests settled since it started
    #[serde(default = "default_live_table")]
    pub live_table: String,
}

fn default_max_connections() -> u32 {
    5
}

fn default_history_table() -> String {
    "fights".to_string()
}

fn default_live_table() -> String {
    "fights".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/duelbet".to_string(),
            max_connections: default_max_connections(),
            history_table: default_history_table(),
            live_table: default_live_table(),
        }
    }
}

/// Evolutionary search parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Population size N
    pub population: usize,
    /// Policies copied unchanged into the next generation
    pub elite: usize,
    /// Crossover noise for the bulk of each generation
    pub mutate_min: f64,
    /// Starting value of the adaptive mutation ceiling
    pub mutate_max: f64,
    /// Multiplier applied to the ceiling for the last slot
    pub super_mutant: f64,
    /// Generations between stagnation checks
    pub stagnation_window: usize,
    pub term_min_gen: usize,
    pub term_stride: usize,
    pub term_slope: f64,
    /// Hard cap on generations in standalone mode (0 = none)
    pub max_generations: usize,
    pub meta_generations: usize,
    pub meta_population: usize,
    /// Number of evaluation subsequences; odd keeps the median exact
    pub subsequences: usize,
    /// Trajectory percentile used as fitness
    pub percentile: f64,
    pub start_bankroll: f64,
    /// Bankroll floor during simulation
    pub bailout: f64,
    /// Hidden layer widths of betting policies
    pub hidden_layers: Vec<usize>,
    /// Hidden layer widths of tier predictors
    pub predictor_hidden_layers: Vec<usize>,
    /// Seed for splits and evaluation sets; random when unset
    pub seed: Option<u64>,
    /// Standalone runs before `train` exits (0 = until shutdown)
    pub runs: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            population: 128,
            elite: 4,
            mutate_min: 0.5,
            mutate_max: 5.0,
            super_mutant: 20.0,
            stagnation_window: 3,
            term_min_gen: 10,
            term_stride: 3,
            term_slope: 0.01,
            max_generations: 0,
            meta_generations: 30,
            meta_population: 32,
            subsequences: 7,
            percentile: 0.25,
            start_bankroll: 1_000_000.0,
            bailout: 425.0,
            hidden_layers: vec![6],
            predictor_hidden_layers: vec![8],
            seed: None,
            runs: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Append the two-hop matchup signal to predictive vectors
    pub relational: bool,
    /// Append bankroll / pot average to betting vectors
    pub include_bankroll: bool,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            relational: false,
            include_bankroll: true,
        }
    }
}

/// Live wager sizing
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BettingConfig {
    pub matchmaking_scale: f64,
    pub tournament_scale: f64,
    /// Bankroll under which every wager is all-in
    pub always_all_in: f64,
    pub max_bet: f64,
    pub bailout: f64,
    pub tournament_bailout: f64,
    /// Checkpoints combined into the consensus ensemble (odd)
    pub ensemble_size: usize,
    pub max_consecutive_failures: u32,
    pub poll_interval_ms: u64,
    /// Delay between a new contest appearing and the wager being placed
    pub settle_delay_ms: u64,
}

impl Default for BettingConfig {
    fn default() -> Self {
        Self {
            matchmaking_scale: 1.0 / 20.0,
            tournament_scale: 1.0 / 60.0,
            always_all_in: 5000.0,
            max_bet: 256_000.0,
            bailout: 425.0,
            tournament_bailout: 1425.0,
            ensemble_size: 5,
            max_consecutive_failures: 5,
            poll_interval_ms: 2000,
            settle_delay_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// Endpoint returning the current contest (`p1`, `p2`, `tier`, `mode`)
    pub meta_url: String,
    /// Endpoint returning per-user state keyed by uid
    pub state_url: String,
    /// Form endpoint accepting wagers
    pub wager_url: String,
    pub uid: Option<String>,
    /// Session cookie value sent with state and wager requests
    pub session_id: Option<String>,
    pub timeout_secs: u64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            meta_url: "http://localhost:8000/meta".to_string(),
            state_url: "http://localhost:8000/state".to_string(),
            wager_url: "http://localhost:8000/bet".to_string(),
            uid: None,
            session_id: None,
            timeout_secs: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Directory holding `<score>.<unix_ts>.json` policies and `predictors/`
    pub dir: PathBuf,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("checkpoints"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DryRunConfig {
    /// Enable dry run mode (no real wagers)
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("database.url", "postgres://localhost/duelbet")?
            .set_default("database.max_connections", 5)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("DUELBET_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (DUELBET__TRAINING__POPULATION, etc.)
            .add_source(
                Environment::with_prefix("DUELBET")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Configuration with every section at its default
    pub fn default_config(dry_run: bool) -> Self {
        Self {
            database: DatabaseConfig::default(),
            training: TrainingConfig::default(),
            features: FeatureConfig::default(),
            betting: BettingConfig::default(),
            live: LiveConfig::default(),
            checkpoint: CheckpointConfig::default(),
            dry_run: DryRunConfig { enabled: dry_run },
            logging: LoggingConfig::default(),
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        let t = &self.training;

        if t.population < 2 {
            errors.push("training.population must be at least 2".to_string());
        }
        if t.elite == 0 || t.elite >= t.population {
            errors.push(format!(
                "training.elite must be in 1..{} (got {})",
                t.population, t.elite
            ));
        }
        if t.subsequences == 0 {
            errors.push("training.subsequences must be positive".to_string());
        }
        if !(0.0..=1.0).contains(&t.percentile) {
            errors.push("training.percentile must be between 0 and 1".to_string());
        }
        if t.start_bankroll <= t.bailout {
            errors.push("training.start_bankroll must exceed training.bailout".to_string());
        }
        if t.term_stride == 0 {
            errors.push("training.term_stride must be positive".to_string());
        }
        if t.meta_population < 2 {
            errors.push("training.meta_population must be at least 2".to_string());
        }

        let b = &self.betting;
        if b.ensemble_size == 0 || b.ensemble_size % 2 == 0 {
            errors.push(format!(
                "betting.ensemble_size must be odd (got {})",
                b.ensemble_size
            ));
        }
        if b.matchmaking_scale <= 0.0 || b.tournament_scale <= 0.0 {
            errors.push("betting scales must be positive".to_string());
        }
        if b.max_bet <= 0.0 {
            errors.push("betting.max_bet must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
