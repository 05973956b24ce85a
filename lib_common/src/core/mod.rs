//! # Core Engine Module
//!
//! The live gold feed engine: subscription bookkeeping, the fan-out broadcast
//! channel and the scheduler that ties fetch, parse, persist and broadcast into
//! one demand-driven loop.
//!
//! ## Core Components:
//!
//! - **`dispatcher`**: Zero-copy broadcaster. Every update is handed to the
//!   consumers subscribed at the moment of publishing, with no replay.
//!
//! - **`registry`**: Counts active subscribers and records whether the feed
//!   loop is alive. The 0→1 edge starts the loop; the loop stops itself after
//!   a cycle or a wait once the count is back to zero.
//!
//! - **`feed_scheduler`**: The loop itself. Exposes its phase
//!   (`Idle`, `Fetching`, `Waiting`) through a watch channel.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// The central, zero-copy broadcaster for feed updates.
pub mod dispatcher;
/// The demand-driven fetch loop.
pub mod feed_scheduler;
/// Subscriber counting and the loop's start/stop edges.
pub mod registry;

// --- Public API Re-exports ---
pub use dispatcher::{ClientId, Dispatcher};
pub use feed_scheduler::{
    jitter_delay, CycleReport, FeedPhase, FeedScheduler, FeedSettings, InvalidJitterBounds, JitterBounds,
};
pub use registry::{FeedState, Registry};
