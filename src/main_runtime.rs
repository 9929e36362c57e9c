use duelbet::adapters::{JsonlRecordSource, PostgresRecordSource, RecordSource};
use duelbet::config::{AppConfig, LoggingConfig};
use duelbet::error::{DuelbetError, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Load config, apply command-line overrides and validate
pub fn load_config(config_dir: &Path, dry_run: bool) -> Result<AppConfig> {
    let mut config = AppConfig::load_from(config_dir)?;
    if dry_run {
        config.dry_run.enabled = true;
    }
    config
        .validate()
        .map_err(|errors| DuelbetError::InvalidConfig(errors.join("; ")))?;
    Ok(config)
}

/// History plus a source of contests settled later (the same source for files)
pub async fn open_sources(
    config: &AppConfig,
    data: Option<&Path>,
) -> Result<(Arc<dyn RecordSource>, Arc<dyn RecordSource>)> {
    if let Some(path) = data {
        info!("Reading contests from {}", path.display());
        let source: Arc<dyn RecordSource> = Arc::new(JsonlRecordSource::new(path));
        return Ok((Arc::clone(&source), source));
    }

    let db = &config.database;
    let history = PostgresRecordSource::new(&db.url, db.max_connections, &db.history_table).await?;
    let live = PostgresRecordSource::from_pool(history.pool().clone(), &db.live_table)?;
    Ok((Arc::new(history), Arc::new(live)))
}

pub fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => {
            info!("Using seed {}", seed);
            StdRng::seed_from_u64(seed)
        }
        None => StdRng::from_entropy(),
    }
}

pub fn init_logging(cfg: &LoggingConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},duelbet=debug,sqlx=warn", cfg.level))
    });

    // Prefer DUELBET_LOG_DIR, fall back to LOG_DIR; file logging is off when neither is set.
    let log_dir = std::env::var("DUELBET_LOG_DIR")
        .or_else(|_| std::env::var("LOG_DIR"))
        .ok();

    // `rolling::daily` panics if it can't create the initial file, so check writability first.
    let file_layer = log_dir.as_deref().and_then(|log_dir| {
        if std::fs::create_dir_all(log_dir).is_err() {
            eprintln!(
                "Warning: Could not create log directory {}, file logging disabled",
                log_dir
            );
            return None;
        }
        let test_path = Path::new(log_dir).join(".duelbet_write_test");
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&test_path)
        {
            Ok(_) => {
                let _ = std::fs::remove_file(&test_path);

                let file_appender = tracing_appender::rolling::daily(log_dir, "duelbet.log");
                let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

                // Flushes on drop; the process keeps it for its whole lifetime
                Box::leak(Box::new(guard));

                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(true),
                )
            }
            Err(e) => {
                eprintln!(
                    "Warning: Could not write to log directory {} ({}), file logging disabled",
                    log_dir, e
                );
                None
            }
        }
    });

    let (console_text, console_json) = if cfg.json {
        (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(false),
            ),
        )
    } else {
        (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            ),
            None,
        )
    };

    let file_logging_enabled = file_layer.is_some();
    tracing_subscriber::registry()
        .with(filter)
        .with(console_text)
        .with(console_json)
        .with(file_layer)
        .init();

    if let (true, Some(dir)) = (file_logging_enabled, log_dir) {
        eprintln!("Logging to: {}/duelbet.log", dir);
    }
}

/// Minimal logging for commands run before a config is available
pub fn init_logging_simple() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}
