use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info, instrument};

use super::traits::{query_modes, RecordBatch, RecordSource};
use crate::domain::RawRecord;
use crate::error::{DuelbetError, Result};

/// Settled contests stored in PostgreSQL
#[derive(Clone)]
pub struct PostgresRecordSource {
    pool: PgPool,
    table: String,
}

impl PostgresRecordSource {
    pub async fn new(database_url: &str, max_connections: u32, table: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Self::from_pool(pool, table)
    }

    /// Reuse an existing pool against another table
    pub fn from_pool(pool: PgPool, table: &str) -> Result<Self> {
        if table.is_empty() || !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(DuelbetError::InvalidConfig(format!(
                "invalid table name {:?}",
                table
            )));
        }
        Ok(Self {
            pool,
            table: table.to_string(),
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn query_sql(&self, include_tournament: bool) -> String {
        let modes = query_modes(include_tournament)
            .iter()
            .map(|m| format!("'{}'", m.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "SELECT ts, tier, winner, loser, winpot, losepot, duration FROM {} \
             WHERE mode IN ({}) AND ts > $1 ORDER BY ts",
            self.table, modes
        )
    }

    fn map_row(row: &PgRow) -> Result<RawRecord> {
        Ok(RawRecord {
            ts: row.try_get("ts")?,
            tier: row.try_get("tier")?,
            winner: row.try_get("winner")?,
            loser: row.try_get("loser")?,
            win_pot: row.try_get("winpot")?,
            lose_pot: row.try_get("losepot")?,
            duration: row.try_get::<i32, _>("duration")? as i64,
            mode: String::new(),
        })
    }
}

#[async_trait]
impl RecordSource for PostgresRecordSource {
    #[instrument(skip(self))]
    async fn fetch(
        &self,
        since: DateTime<Utc>,
        include_tournament: bool,
        pot_avg: f64,
    ) -> Result<RecordBatch> {
        let sql = self.query_sql(include_tournament);
        let rows = sqlx::query(&sql).bind(since).fetch_all(&self.pool).await?;

        let raws = rows.iter().map(Self::map_row).collect::<Result<Vec<_>>>()?;
        let batch = RecordBatch::from_rows(raws, pot_avg);
        debug!(
            "Fetched {} rows from {}, kept {}",
            rows.len(),
            self.table,
            batch.len()
        );
        Ok(batch)
    }
}
