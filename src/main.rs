use clap::Parser;
use duelbet::adapters::ArenaClient;
use duelbet::cli::{Cli, Commands};
use duelbet::config::AppConfig;
use duelbet::coordination::ShutdownFlag;
use duelbet::domain::Tier;
use duelbet::engine::{
    evolve_predictors, Ensemble, FeatureLayout, PolicyTrainer, TrainingData,
};
use duelbet::error::{DuelbetError, Result};
use duelbet::persistence::{load_top, CheckpointStore, FileCheckpointStore};
use duelbet::services::{LiveSession, LiveSources};
use rand::rngs::StdRng;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

mod main_runtime;

use main_runtime::{init_logging, init_logging_simple, load_config, open_sources, seeded_rng};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli.config_dir, cli.dry_run) {
        Ok(config) => config,
        Err(e) => {
            init_logging_simple();
            error!("{}", e);
            eprintln!("\x1b[31m✗ {}\x1b[0m", e);
            std::process::exit(2);
        }
    };
    init_logging(&config.logging);

    let shutdown = ShutdownFlag::new();
    shutdown.install_signal_handlers();

    let data = cli.data.as_deref();
    let result = match cli.command {
        Commands::Train { runs, seed } => run_train(config, data, runs, seed, shutdown).await,
        Commands::Meta { top, seed } => run_meta(config, data, top, seed, shutdown).await,
        Commands::Predictors { seed } => run_predictors(config, data, seed, shutdown).await,
        Commands::Simulate { top, seed } => run_simulate(config, data, top, seed).await,
        Commands::Bet => run_bet(config, data, shutdown).await,
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

/// Load history and split it into stats and training halves
async fn prepare(
    config: &AppConfig,
    data: Option<&Path>,
    seed: Option<u64>,
) -> Result<(TrainingData, FileCheckpointStore, StdRng)> {
    let (history, _) = open_sources(config, data).await?;
    let batch = history.fetch(Default::default(), false, 0.0).await?;
    info!("Loaded {} contests", batch.len());

    let mut rng = seeded_rng(seed.or(config.training.seed));
    let mut training = TrainingData::prepare(batch.by_tier, &mut rng);
    let store = FileCheckpointStore::new(&config.checkpoint.dir)?;
    let loaded = training.load_predictors(&store)?;
    info!("Loaded {} tier predictor(s)", loaded);
    Ok((training, store, rng))
}

/// Run CPU-bound search off the async runtime
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| DuelbetError::Internal(format!("training task failed: {}", e)))?
}

async fn run_train(
    mut config: AppConfig,
    data: Option<&Path>,
    runs: Option<usize>,
    seed: Option<u64>,
    shutdown: ShutdownFlag,
) -> Result<()> {
    if let Some(runs) = runs {
        config.training.runs = runs;
    }
    let (training, store, mut rng) = prepare(&config, data, seed).await?;
    let features = training.freeze(config.features)?;
    let trainer = PolicyTrainer::new(config.training.clone(), features, training.train)?;
    let max_runs = config.training.runs;

    blocking(move || {
        let mut run = 0;
        while !shutdown.is_requested() && (max_runs == 0 || run < max_runs) {
            run += 1;
            let outcome = trainer.run_standalone(&mut rng, Some(&store), &shutdown)?;
            info!(
                "Run {} finished: best={:.2} after {} generations",
                run, outcome.best_score, outcome.generations
            );
        }
        Ok(())
    })
    .await
}

async fn run_meta(
    config: AppConfig,
    data: Option<&Path>,
    top: Option<usize>,
    seed: Option<u64>,
    shutdown: ShutdownFlag,
) -> Result<()> {
    let (training, store, mut rng) = prepare(&config, data, seed).await?;
    let seeds = load_top(&store, top.unwrap_or(config.training.meta_population))?;
    if seeds.is_empty() {
        return Err(DuelbetError::Checkpoint(format!(
            "no checkpoints in {} to refine",
            store.dir().display()
        )));
    }
    info!("Seeding meta population with {} checkpoint(s)", seeds.len());

    let features = training.freeze(config.features)?;
    let trainer = PolicyTrainer::new(config.training.clone(), features, training.train)?;
    let outcome = blocking(move || trainer.run_meta(seeds, &mut rng, Some(&store), &shutdown)).await?;
    info!(
        "Meta run finished: best={:.2} meta_fitness={:.2}",
        outcome.best_score,
        outcome.meta_fitness.unwrap_or(outcome.best_score)
    );
    Ok(())
}

async fn run_predictors(
    config: AppConfig,
    data: Option<&Path>,
    seed: Option<u64>,
    shutdown: ShutdownFlag,
) -> Result<()> {
    let (mut training, store, _) = prepare(&config, data, seed).await?;
    let scores = blocking(move || {
        evolve_predictors(
            &mut training,
            &config.training,
            config.features,
            &store,
            &shutdown,
        )
    })
    .await?;

    for (tier, score) in &scores {
        println!("  {}  {:>10.4}", tier, score);
    }
    Ok(())
}

async fn run_simulate(
    config: AppConfig,
    data: Option<&Path>,
    top: usize,
    seed: Option<u64>,
) -> Result<()> {
    let (training, store, mut rng) = prepare(&config, data, seed).await?;
    let entries = store.top(top)?;
    if entries.is_empty() {
        warn!("No checkpoints in {}", store.dir().display());
        return Ok(());
    }

    let features = training.freeze(config.features)?;
    let trainer = PolicyTrainer::new(config.training.clone(), features, training.train)?;
    let fitness = trainer.fitness(&mut rng);

    println!("{:<40} {:>14} {:>14}", "checkpoint", "saved", "held-out");
    for entry in &entries {
        let policy = store.read(entry)?;
        fitness.simulator().check(&policy)?;
        let score = fitness.simulator().evaluate(&policy, fitness.sets());
        println!(
            "{:<40} {:>14.0} {:>14.0}",
            entry.path.display(),
            entry.score,
            score
        );
    }
    Ok(())
}

async fn run_bet(config: AppConfig, data: Option<&Path>, shutdown: ShutdownFlag) -> Result<()> {
    let store = FileCheckpointStore::new(&config.checkpoint.dir)?;
    let mut members = load_top(&store, config.betting.ensemble_size)?;
    if !members.is_empty() && members.len() % 2 == 0 {
        warn!(
            "Only {} checkpoint(s) available, dropping the weakest for an odd ensemble",
            members.len()
        );
        members.pop();
    }
    let layout = FeatureLayout::from(config.features);
    let ensemble = Ensemble::new(members, layout)?;

    let mut predictors = BTreeMap::new();
    for tier in Tier::ALL {
        if let Some(predictor) = store.read_predictor(tier)? {
            predictors.insert(tier, predictor);
        }
    }
    info!(
        "Ensemble of {} policies, predictors for {} tier(s)",
        ensemble.len(),
        predictors.len()
    );

    let arena = Arc::new(ArenaClient::new(&config.live)?);
    let (history, updates) = open_sources(&config, data).await?;
    let mut session = LiveSession::new(
        LiveSources {
            feed: arena.clone(),
            bank_source: arena.clone(),
            submitter: arena,
            history,
            updates,
        },
        ensemble,
        predictors,
        layout,
        config.betting.clone(),
        config.dry_run.enabled,
        shutdown,
    )?;
    session.run().await
}
