//! # History Store
//!
//! Append-only log of captured [`PriceRecord`]s with a recent-window read-back.
//! Implementations never update or delete rows, and a failed batch must not
//! leave a partial batch visible.

use crate::markets::gold::{HistoryRow, PriceRecord};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

/// Custom error types for history storage operations.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// The pool could not be built or gave out no connection.
    #[error("History store unavailable: {0}")]
    Unavailable(String),
    /// A statement or transaction was rejected by the database.
    #[error("History query failed: {0}")]
    QueryError(String),
    /// A row read back could not be turned into a [`HistoryRow`].
    #[error("Stored row is invalid: {0}")]
    InvalidRow(String),
    /// `query_recent` was asked for zero rows.
    #[error("Recent-window limit must be positive")]
    InvalidLimit,
}

/// Durable, append-only storage for price records.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Appends `records` as one batch and returns how many rows were written.
    async fn persist_batch(&self, records: &[PriceRecord]) -> Result<usize, PersistenceError>;

    /// Returns at most `limit` rows, newest capture first.
    async fn query_recent(&self, limit: usize) -> Result<Vec<HistoryRow>, PersistenceError>;
}

/// A process-local history store.
///
/// Used when no database is configured and as the reference implementation
/// in tests. Contents are lost at exit.
///
/// Rows are never evicted, so memory grows with every cycle for as long as
/// the process runs. At the default cadence that is on the order of 100k
/// rows a day.
#[derive(Default)]
pub struct MemoryHistoryStore {
    rows: Mutex<Vec<HistoryRow>>,
}

impl MemoryHistoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows stored so far.
    pub fn len(&self) -> usize {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether nothing has been stored yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn persist_batch(&self, records: &[PriceRecord]) -> Result<usize, PersistenceError> {
        let mut rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        let scraped_at = Utc::now();
        let mut next_id = rows.last().map_or(1, |row| row.id + 1);
        for record in records {
            rows.push(HistoryRow {
                id: next_id,
                record: record.clone(),
                scraped_at,
            });
            next_id += 1;
        }
        Ok(records.len())
    }

    async fn query_recent(&self, limit: usize) -> Result<Vec<HistoryRow>, PersistenceError> {
        if limit == 0 {
            return Err(PersistenceError::InvalidLimit);
        }
        let rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        // Rows are appended in id order and capture times never go backwards,
        // so the newest rows are at the tail.
        Ok(rows.iter().rev().take(limit).cloned().collect())
    }
}
