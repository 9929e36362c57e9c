use duelbet::adapters::{JsonlRecordSource, RecordSource};
use duelbet::config::{FeatureConfig, TrainingConfig};
use duelbet::coordination::ShutdownFlag;
use duelbet::domain::{Side, StatsBook, Tier};
use duelbet::engine::{FeatureBuilder, FeatureLayout, PolicyTrainer, TierModel, TierModels};
use duelbet::ml::DenseNetwork;
use duelbet::persistence::{CheckpointStore, FileCheckpointStore};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::io::Write;
use std::sync::Arc;

/// Alpha beats Bravo ten times and Charlie ten times, with twice as much
/// staked on Alpha every time
fn history_file() -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    for i in 0..20 {
        let loser = if i % 2 == 0 { "Bravo" } else { "Charlie" };
        writeln!(
            file,
            r#"{{"ts":"2024-03-01T00:{:02}:00Z","tier":"A","winner":"Alpha","loser":"{}","winpot":2000,"losepot":1000,"duration":60}}"#,
            i, loser
        )
        .unwrap();
    }
    file
}

fn training_config() -> TrainingConfig {
    TrainingConfig {
        population: 32,
        elite: 2,
        subsequences: 1,
        start_bankroll: 1000.0,
        // no floor: fitness keeps rising with the wager fraction up to all-in
        bailout: 0.0,
        max_generations: 15,
        seed: Some(11),
        ..TrainingConfig::default()
    }
}

#[test]
fn evolved_policy_beats_random_policy() {
    let file = history_file();
    let source = JsonlRecordSource::new(file.path());
    let batch = tokio_test::block_on(source.fetch(Default::default(), false, 0.0)).unwrap();
    let records = batch.by_tier[&Tier::A].clone();
    assert_eq!(records.len(), 20);
    // both opponents sort after "Alpha", so Alpha always lands on side B
    assert!(records.iter().all(|r| r.winner() == Some(Side::B)));

    let mut stats = StatsBook::new();
    stats.update(&records);
    assert_eq!(stats.len(), 3);
    let mut models = TierModels::new();
    models.insert(Tier::A, TierModel::new(stats));

    let layout = FeatureLayout::from(FeatureConfig {
        relational: false,
        include_bankroll: false,
    });
    let features = Arc::new(FeatureBuilder::new(layout, Arc::new(models)).unwrap());
    let trainer = PolicyTrainer::new(training_config(), features, records).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let store = FileCheckpointStore::new(dir.path()).unwrap();
    let mut rng = StdRng::seed_from_u64(3);
    let outcome = trainer
        .run_standalone(&mut rng, Some(&store), &ShutdownFlag::new())
        .unwrap();

    let random = DenseNetwork::random(&trainer.shape(), &mut StdRng::seed_from_u64(99));
    let fitness = trainer.fitness(&mut rng);
    let evolved_score = fitness.simulator().evaluate(&outcome.best, fitness.sets());
    let random_score = fitness.simulator().evaluate(&random, fitness.sets());

    assert!(evolved_score > training_config().start_bankroll);
    assert!(
        evolved_score > random_score,
        "evolved {} < random {}",
        evolved_score,
        random_score
    );
    assert!((evolved_score - outcome.best_score).abs() < 1e-6);

    // the best policy was checkpointed along the way
    let top = store.top(1).unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].score as i64, outcome.best_score as i64);
}

#[test]
fn history_window_never_falls() {
    let file = history_file();
    let source = JsonlRecordSource::new(file.path());
    let batch = tokio_test::block_on(source.fetch(Default::default(), false, 0.0)).unwrap();
    let records = batch.by_tier[&Tier::A].clone();

    let mut stats = StatsBook::new();
    stats.update(&records);
    let mut models = TierModels::new();
    models.insert(Tier::A, TierModel::new(stats));
    let features = Arc::new(
        FeatureBuilder::new(FeatureLayout::from(FeatureConfig::default()), Arc::new(models))
            .unwrap(),
    );
    let trainer = PolicyTrainer::new(training_config(), features, records).unwrap();
    let outcome = trainer
        .run_standalone(&mut StdRng::seed_from_u64(5), None, &ShutdownFlag::new())
        .unwrap();

    // elitism on a fixed evaluation set
    assert!(outcome.history.windows(2).all(|w| w[1] >= w[0]));
    assert!(outcome.generations <= 15);
}
