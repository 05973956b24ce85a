//! # Financial Market Sources Module
//!
//! Groups the data models and normalisation logic for each market page the
//! feed scrapes. Every source turns raw upstream content into plain records so
//! the rest of the system never has to know what the page looked like.
//!
//! ## Contained Modules:
//!
//! - **`gold`**: bullion prices from the Grand Bazaar (Kapalıçarşı) price table,
//!   including the record model and the markup parser.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Gold price records and the table parser.
pub mod gold;
