//! # lib_common
//!
//! Shared library behind the live gold price feed. Each top-level folder is
//! gated by a cargo feature of the same name:
//!
//! - **`markets`**: price records and the markup-to-record parser.
//! - **`retrieve`**: the raw markup acquisition capability.
//! - **`connections`**: the append-only history store and its backends.
//! - **`core`**: fan-out dispatcher, subscription registry and the
//!   subscriber-gated feed scheduler that ties everything together.

#![forbid(unsafe_code)]

#[cfg(feature = "markets")]
pub mod markets;
#[cfg(feature = "retrieve")]
pub mod retrieve;
#[cfg(feature = "connections")]
pub mod connections;
#[cfg(feature = "core")]
pub mod core;

// Re-export the types most callers need.
#[cfg(feature = "markets")]
pub use markets::gold::{FeedUpdate, HistoryRow, PriceRecord, PriceStatus};
#[cfg(feature = "retrieve")]
pub use retrieve::page_fetch::{FetchError, HttpPageFetcher, MarkupFetcher};
#[cfg(feature = "connections")]
pub use connections::history_store::{HistoryStore, MemoryHistoryStore, PersistenceError};
#[cfg(feature = "core")]
pub use crate::core::{Dispatcher, FeedPhase, FeedScheduler, JitterBounds, Registry};
