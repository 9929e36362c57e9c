use duelbet::domain::Side;
use duelbet::engine::{Ensemble, FeatureLayout};
use duelbet::error::DuelbetError;
use duelbet::ml::{Activation, DenseLayer, DenseNetwork};
use duelbet::persistence::{load_top, CheckpointStore, FileCheckpointStore};
use chrono::{TimeZone, Utc};

const LAYOUT: FeatureLayout = FeatureLayout {
    relational: false,
    include_bankroll: true,
};

/// Policy ignoring its input and emitting `out`
fn constant(out: f64) -> DenseNetwork {
    DenseNetwork {
        input_dim: 6,
        layers: vec![DenseLayer {
            weights: vec![vec![0.0; 6]],
            bias: vec![out],
            activation: Activation::Linear,
        }],
        metadata: serde_json::Value::Null,
    }
}

fn ensemble(outputs: &[f64]) -> Result<Ensemble, DuelbetError> {
    Ensemble::new(outputs.iter().map(|&o| constant(o)).collect(), LAYOUT)
}

#[test]
fn consensus_picks_the_median_vote() {
    let input = [0.5, 0.5, 0.0, 0.0, 2.0, 10.0];

    let split = ensemble(&[0.6, -0.4, 0.0]).unwrap();
    assert_eq!(split.consensus_value(&input), 0.0);
    assert!(split.consensus(&input).is_pass());

    let agree = ensemble(&[0.9, 0.1, 0.3]).unwrap();
    let decision = agree.consensus(&input);
    assert!((decision.magnitude - 0.3).abs() < 1e-12);
    assert_eq!(decision.side, Side::B);

    let against = ensemble(&[-0.7, -0.2, 0.5]).unwrap();
    assert_eq!(against.consensus(&input).side, Side::A);
}

#[test]
fn even_or_empty_ensembles_are_rejected() {
    assert!(matches!(ensemble(&[0.1, 0.2]), Err(DuelbetError::EvenEnsemble(2))));
    assert!(matches!(ensemble(&[]), Err(DuelbetError::EvenEnsemble(0))));
}

#[test]
fn ensemble_from_best_checkpoints() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileCheckpointStore::new(dir.path()).unwrap();
    let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    for (score, out) in [(1500.0, 0.2), (900.0, -0.9), (3000.0, 0.4), (2000.0, 0.6)] {
        store.write(&constant(out), score, ts).unwrap();
    }

    let best = load_top(&store, 3).unwrap();
    assert_eq!(best.len(), 3);
    let ens = Ensemble::new(best, LAYOUT).unwrap();
    // 0.4, 0.6 and 0.2 survive; the 900 checkpoint does not
    let decision = ens.consensus(&[0.0; 6]);
    assert!((decision.magnitude - 0.4).abs() < 1e-12);
    assert_eq!(decision.side, Side::B);
}
