//! # Data Retrieval Module
//!
//! Home of the raw markup acquisition capability. The scheduler only ever
//! sees the [`page_fetch::MarkupFetcher`] trait, so the page can be fetched
//! with plain HTTP, a headless browser sidecar, or a test double without the
//! rest of the pipeline noticing.
//!
//! ## Contained Modules:
//!
//! - **`page_fetch`**: the `MarkupFetcher` trait, its `FetchError` taxonomy and
//!   `HttpPageFetcher`, a `reqwest` client that presents itself as a desktop
//!   browser.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Raw markup acquisition over HTTP.
pub mod page_fetch;
