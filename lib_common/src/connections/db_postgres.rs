//! # PostgreSQL History Store
//!
//! Durable [`HistoryStore`] backed by a `deadpool-postgres` pool. Each batch is
//! written inside a single transaction, so a failed cycle leaves no partial
//! batch behind. The schema is created with `IF NOT EXISTS` and is safe to run
//! on every start.

use crate::connections::history_store::{HistoryStore, PersistenceError};
use crate::markets::gold::{HistoryRow, PriceRecord, PriceStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config as DeadpoolConfig, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use tokio_postgres::{NoTls, Row};

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS gold_prices (
  id BIGSERIAL PRIMARY KEY,
  name TEXT NOT NULL,
  buying TEXT NOT NULL,
  selling TEXT NOT NULL,
  status TEXT NOT NULL CHECK (status IN ('up', 'down', 'neutral')),
  change_rate TEXT NOT NULL DEFAULT '',
  change_amount TEXT NOT NULL DEFAULT '',
  time TEXT NOT NULL DEFAULT '',
  scraped_at TIMESTAMPTZ NOT NULL DEFAULT clock_timestamp()
);
CREATE INDEX IF NOT EXISTS gold_prices_scraped_at_idx ON gold_prices (scraped_at DESC);
";

const INSERT_SQL: &str = "INSERT INTO gold_prices \
    (name, buying, selling, status, change_rate, change_amount, time) \
    VALUES ($1, $2, $3, $4, $5, $6, $7)";

const RECENT_SQL: &str = "SELECT id, name, buying, selling, status, change_rate, change_amount, time, scraped_at \
    FROM gold_prices ORDER BY scraped_at DESC, id DESC LIMIT $1";

/// A wrapper around the PostgreSQL connection pool.
pub struct PostgresHistoryStore {
    /// The underlying deadpool connection pool.
    pool: Pool,
}

impl PostgresHistoryStore {
    /// Creates a connection pool for `database_url` holding at most `max_size` connections.
    ///
    /// No connection is opened until first use.
    pub fn connect(database_url: &str, max_size: usize) -> Result<Self, PersistenceError> {
        let mut pg_pool_config = DeadpoolConfig::new();
        pg_pool_config.url = Some(database_url.to_string());
        pg_pool_config.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        pg_pool_config.pool = Some(PoolConfig::new(max_size));

        let pool = pg_pool_config
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| PersistenceError::Unavailable(format!("Failed to create database pool: {}", e)))?;
        Ok(Self { pool })
    }

    /// Creates the `gold_prices` table and its index if they do not exist.
    pub async fn init_schema(&self) -> Result<(), PersistenceError> {
        let client = self.client().await?;
        client
            .batch_execute(SCHEMA_SQL)
            .await
            .map_err(|e| PersistenceError::QueryError(e.to_string()))?;
        log::info!("History table 'gold_prices' is ready.");
        Ok(())
    }

    /// Checks the health of the database connection by running a simple query.
    pub async fn ping(&self) -> Result<(), PersistenceError> {
        let client = self.client().await?;
        client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| PersistenceError::QueryError(e.to_string()))?;
        Ok(())
    }

    async fn client(&self) -> Result<deadpool_postgres::Object, PersistenceError> {
        self.pool
            .get()
            .await
            .map_err(|e| PersistenceError::Unavailable(e.to_string()))
    }
}

#[async_trait]
impl HistoryStore for PostgresHistoryStore {
    async fn persist_batch(&self, records: &[PriceRecord]) -> Result<usize, PersistenceError> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut client = self.client().await?;
        let tx = client
            .transaction()
            .await
            .map_err(|e| PersistenceError::QueryError(e.to_string()))?;
        let stmt = tx
            .prepare_cached(INSERT_SQL)
            .await
            .map_err(|e| PersistenceError::QueryError(e.to_string()))?;

        for record in records {
            tx.execute(
                &stmt,
                &[
                    &record.name,
                    &record.buying,
                    &record.selling,
                    &record.status.as_str(),
                    &record.change_rate,
                    &record.change_amount,
                    &record.time,
                ],
            )
            .await
            .map_err(|e| PersistenceError::QueryError(e.to_string()))?;
        }

        // Dropping an uncommitted transaction rolls it back.
        tx.commit()
            .await
            .map_err(|e| PersistenceError::QueryError(e.to_string()))?;
        log::debug!("Persisted {} gold price rows", records.len());
        Ok(records.len())
    }

    async fn query_recent(&self, limit: usize) -> Result<Vec<HistoryRow>, PersistenceError> {
        if limit == 0 {
            return Err(PersistenceError::InvalidLimit);
        }
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let client = self.client().await?;
        let rows = client
            .query(RECENT_SQL, &[&limit])
            .await
            .map_err(|e| PersistenceError::QueryError(e.to_string()))?;

        rows.iter().map(history_row).collect()
    }
}

fn history_row(row: &Row) -> Result<HistoryRow, PersistenceError> {
    let invalid = |e: tokio_postgres::Error| PersistenceError::InvalidRow(e.to_string());

    let status: String = row.try_get("status").map_err(invalid)?;
    let status: PriceStatus = status
        .parse()
        .map_err(|e: crate::markets::gold::UnknownStatus| PersistenceError::InvalidRow(e.to_string()))?;
    let scraped_at: DateTime<Utc> = row.try_get("scraped_at").map_err(invalid)?;

    Ok(HistoryRow {
        id: row.try_get("id").map_err(invalid)?,
        record: PriceRecord {
            name: row.try_get("name").map_err(invalid)?,
            buying: row.try_get("buying").map_err(invalid)?,
            selling: row.try_get("selling").map_err(invalid)?,
            status,
            change_rate: row.try_get("change_rate").map_err(invalid)?,
            change_amount: row.try_get("change_amount").map_err(invalid)?,
            time: row.try_get("time").map_err(invalid)?,
        },
        scraped_at,
    })
}
