//! JSON-lines record source for offline training and tests.
//!
//! One [`RawRecord`] per line; blank lines and `#` comments are ignored.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::warn;

use super::traits::{RecordBatch, RecordSource};
use crate::domain::{Mode, RawRecord};
use crate::error::{DuelbetError, Result};

#[derive(Debug, Clone)]
pub struct JsonlRecordSource {
    path: PathBuf,
}

impl JsonlRecordSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse every line, failing on the first malformed one
    pub fn read_all(&self) -> Result<Vec<RawRecord>> {
        let content = std::fs::read_to_string(&self.path)?;
        parse_lines(&content)
    }
}

pub fn parse_lines(content: &str) -> Result<Vec<RawRecord>> {
    let mut rows = Vec::new();
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let row: RawRecord = serde_json::from_str(line).map_err(|e| {
            DuelbetError::InvalidRecord(format!("line {}: {}", lineno + 1, e))
        })?;
        rows.push(row);
    }
    Ok(rows)
}

#[async_trait]
impl RecordSource for JsonlRecordSource {
    async fn fetch(
        &self,
        since: DateTime<Utc>,
        include_tournament: bool,
        pot_avg: f64,
    ) -> Result<RecordBatch> {
        let path = self.path.clone();
        let mut rows = tokio::task::spawn_blocking(move || JsonlRecordSource::new(path).read_all())
            .await
            .map_err(|e| DuelbetError::Internal(format!("jsonl reader panicked: {}", e)))??;

        rows.retain(|row| {
            row.ts > since
                && match row.mode() {
                    Mode::Matchmaking => true,
                    Mode::Tournament => include_tournament,
                    Mode::Exhibition => false,
                    Mode::Unknown(label) => {
                        warn!("Skipping row with unknown mode {:?}", label);
                        false
                    }
                }
        });
        rows.sort_by_key(|row| row.ts);
        Ok(RecordBatch::from_rows(rows, pot_avg))
    }
}
