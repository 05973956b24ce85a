//! # Connections Module
//!
//! Persistent storage for captured price rows. The history store is an
//! append-only log: the feed writes one batch per cycle and the HTTP layer
//! reads back the most recent window.

/// The history store contract and its in-memory implementation.
pub mod history_store;

/// PostgreSQL-backed history store with connection pooling.
pub mod db_postgres;

pub use db_postgres::PostgresHistoryStore;
pub use history_store::{HistoryStore, MemoryHistoryStore, PersistenceError};
