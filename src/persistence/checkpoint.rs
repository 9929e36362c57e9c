//! Policy checkpoints
//!
//! Evolved policies are written as JSON files named `<score>.<unix_ts>.json`
//! so that a directory listing alone is enough to rank them. The integer
//! score prefix is only a hint; the exact score lives in the file metadata.
//! Only finished runs are ranked. The running best of a run in progress goes
//! to `progress/latest.json`, which `top` never lists.

use chrono::{DateTime, Utc};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::domain::Tier;
use crate::error::{DuelbetError, Result};
use crate::ml::DenseNetwork;

/// Metadata embedded in every checkpoint file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub score: f64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub generation: Option<usize>,
}

/// Handle to a stored policy
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointEntry {
    pub path: PathBuf,
    pub score: f64,
    pub ts: i64,
}

/// Storage for evolved policies
pub trait CheckpointStore: Send + Sync {
    /// Persist `policy` with its fitness score
    fn write(&self, policy: &DenseNetwork, score: f64, ts: DateTime<Utc>) -> Result<CheckpointEntry>;

    /// Overwrite the in-progress best of the current run
    fn write_progress(&self, policy: &DenseNetwork, score: f64, ts: DateTime<Utc>) -> Result<PathBuf>;

    /// Best `k` checkpoints, best first
    fn top(&self, k: usize) -> Result<Vec<CheckpointEntry>>;

    fn read(&self, entry: &CheckpointEntry) -> Result<DenseNetwork>;
}

/// Directory-backed checkpoint store
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn predictor_path(&self, tier: Tier) -> PathBuf {
        self.dir.join("predictors").join(format!("{}.json", tier))
    }

    /// Persist a tier predictor as `predictors/<tier>.json`
    pub fn write_predictor(&self, tier: Tier, predictor: &DenseNetwork) -> Result<PathBuf> {
        let path = self.predictor_path(tier);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, serde_json::to_vec_pretty(predictor)?)?;
        info!("Saved {} predictor to {}", tier, path.display());
        Ok(path)
    }

    /// Load the predictor for `tier`, if one was trained
    pub fn read_predictor(&self, tier: Tier) -> Result<Option<DenseNetwork>> {
        let path = self.predictor_path(tier);
        if !path.exists() {
            return Ok(None);
        }
        DenseNetwork::from_file(&path).map(Some)
    }

    pub fn progress_path(&self) -> PathBuf {
        self.dir.join("progress").join("latest.json")
    }

    /// Copy of `policy` carrying its score as metadata
    fn stamp(policy: &DenseNetwork, score: f64, ts: DateTime<Utc>) -> Result<DenseNetwork> {
        let mut policy = policy.clone();
        let meta = CheckpointMeta {
            score,
            created_at: ts,
            generation: policy
                .metadata
                .get("generation")
                .and_then(|g| g.as_u64())
                .map(|g| g as usize),
        };
        policy.metadata = serde_json::to_value(&meta)?;
        Ok(policy)
    }

    fn parse_name(path: &Path) -> Option<(f64, i64)> {
        let name = path.file_name()?.to_str()?;
        let stem = name.strip_suffix(".json")?;
        let (score, ts) = stem.split_once('.')?;
        Some((score.parse::<i64>().ok()? as f64, ts.parse().ok()?))
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn write(&self, policy: &DenseNetwork, score: f64, ts: DateTime<Utc>) -> Result<CheckpointEntry> {
        let policy = Self::stamp(policy, score, ts)?;
        let unix_ts = ts.timestamp();
        let path = self.dir.join(format!("{}.{}.json", score as i64, unix_ts));
        std::fs::write(&path, serde_json::to_vec(&policy)?)?;
        debug!("Checkpoint written: {}", path.display());

        Ok(CheckpointEntry {
            path,
            score,
            ts: unix_ts,
        })
    }

    fn write_progress(&self, policy: &DenseNetwork, score: f64, ts: DateTime<Utc>) -> Result<PathBuf> {
        let path = self.progress_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, serde_json::to_vec(&Self::stamp(policy, score, ts)?)?)?;
        debug!("Progress written: {} ({:.2})", path.display(), score);
        Ok(path)
    }

    fn top(&self, k: usize) -> Result<Vec<CheckpointEntry>> {
        // score desc, then newest first
        let mut ranked: BTreeMap<(Reverse<OrderedFloat<f64>>, Reverse<i64>), PathBuf> =
            BTreeMap::new();

        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            match Self::parse_name(&path) {
                Some((score, ts)) => {
                    ranked.insert((Reverse(OrderedFloat(score)), Reverse(ts)), path);
                }
                None => {
                    if path.extension().is_some_and(|ext| ext == "json") {
                        warn!("Ignoring unrecognised checkpoint file {}", path.display());
                    }
                }
            }
        }

        Ok(ranked
            .into_iter()
            .take(k)
            .map(|((Reverse(score), Reverse(ts)), path)| CheckpointEntry {
                path,
                score: score.into_inner(),
                ts,
            })
            .collect())
    }

    fn read(&self, entry: &CheckpointEntry) -> Result<DenseNetwork> {
        DenseNetwork::from_file(&entry.path).map_err(|e| {
            DuelbetError::Checkpoint(format!("{}: {}", entry.path.display(), e))
        })
    }
}

/// Load the best `k` policies from `store`
pub fn load_top(store: &dyn CheckpointStore, k: usize) -> Result<Vec<DenseNetwork>> {
    store
        .top(k)?
        .iter()
        .map(|entry| store.read(entry))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::{Activation, NetworkShape};
    use chrono::TimeZone;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn policy(seed: u64) -> DenseNetwork {
        let shape = NetworkShape {
            input_dim: 6,
            layout: vec![3, 1],
            hidden_activation: Activation::Sigmoid,
            output_activation: Activation::Tanh,
        };
        DenseNetwork::random(&shape, &mut StdRng::seed_from_u64(seed))
    }

    #[test]
    fn write_names_file_by_score_and_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path()).unwrap();
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();

        let entry = store.write(&policy(1), 1234.9, ts).unwrap();
        assert_eq!(
            entry.path.file_name().unwrap().to_str().unwrap(),
            "1234.1700000000.json"
        );

        let loaded = store.read(&entry).unwrap();
        assert_eq!(loaded.layers, policy(1).layers);
        assert_eq!(loaded.metadata["score"], 1234.9);
    }

    #[test]
    fn top_ranks_best_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path()).unwrap();
        let ts = |s| Utc.timestamp_opt(s, 0).unwrap();

        store.write(&policy(1), 500.0, ts(1)).unwrap();
        store.write(&policy(2), 900.0, ts(2)).unwrap();
        store.write(&policy(3), -20.0, ts(3)).unwrap();
        store.write(&policy(4), 900.0, ts(4)).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let top = store.top(3).unwrap();
        let scores: Vec<f64> = top.iter().map(|e| e.score).collect();
        assert_eq!(scores, vec![900.0, 900.0, 500.0]);
        assert_eq!(top[0].ts, 4);

        let loaded = load_top(&store, 2).unwrap();
        assert_eq!(loaded.len(), 2);
    }

    #[test]
    fn predictors_round_trip_by_tier() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path()).unwrap();

        assert!(store.read_predictor(Tier::S).unwrap().is_none());
        store.write_predictor(Tier::S, &policy(9)).unwrap();
        let loaded = store.read_predictor(Tier::S).unwrap().unwrap();
        assert_eq!(loaded.layers, policy(9).layers);
        // predictor files never show up as ranked policies
        assert!(store.top(10).unwrap().is_empty());
    }

    #[test]
    fn progress_slot_is_overwritten_and_never_ranked() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path()).unwrap();
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();

        store.write_progress(&policy(1), 100.0, ts).unwrap();
        let path = store.write_progress(&policy(2), 250.0, ts).unwrap();
        assert_eq!(path, store.progress_path());

        let latest = DenseNetwork::from_file(&path).unwrap();
        assert_eq!(latest.layers, policy(2).layers);
        assert_eq!(latest.metadata["score"], 250.0);
        assert!(store.top(10).unwrap().is_empty());
    }
}
