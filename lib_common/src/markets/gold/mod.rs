//! # Gold Price Source
//!
//! The price table exposes one row per instrument (gram gold, quarter coin,
//! ounce, ...). `model` holds the normalised record types shared by the
//! scheduler, the store and the push channel; `parser` turns the page markup
//! into those records.

pub mod model;
pub mod parser;

pub use model::{FeedUpdate, HistoryRow, PriceRecord, PriceStatus, UnknownStatus, GOLD_UPDATE};
pub use parser::{parse, MarkupParser, ParserSetupError, SourceProfile};
