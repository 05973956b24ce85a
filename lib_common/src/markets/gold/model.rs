//! # Gold Price Records
//!
//! Value types produced by the parser and consumed by the history store and
//! the push channel. Records are built once per acquisition cycle and never
//! mutated afterwards; they are shared behind `Arc`s where fan-out needs it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Message type tag carried by every push-channel update.
pub const GOLD_UPDATE: &str = "gold-update";

/// Direction of the last price move for an instrument.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceStatus {
    /// The source marked the row with its increase class.
    Up,
    /// The source marked the row with its decrease class.
    Down,
    /// No direction marker was present.
    #[default]
    Neutral,
}

impl PriceStatus {
    /// The storage and wire representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceStatus::Up => "up",
            PriceStatus::Down => "down",
            PriceStatus::Neutral => "neutral",
        }
    }
}

impl fmt::Display for PriceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a stored status is outside `up | down | neutral`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown price status: {0:?}")]
pub struct UnknownStatus(pub String);

impl FromStr for PriceStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(PriceStatus::Up),
            "down" => Ok(PriceStatus::Down),
            "neutral" => Ok(PriceStatus::Neutral),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// One parsed row of the price table.
///
/// Numeric columns stay as the display-formatted text the page shows
/// (e.g. `"3.012,45"`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceRecord {
    /// Instrument name, trimmed and never empty.
    pub name: String,
    /// Buying price as displayed.
    pub buying: String,
    /// Selling price as displayed.
    pub selling: String,
    /// Direction of the last move.
    pub status: PriceStatus,
    /// Percent change, `""` or `"%"` followed by the source text.
    pub change_rate: String,
    /// Absolute change as displayed, possibly empty.
    pub change_amount: String,
    /// Source-provided timestamp text.
    pub time: String,
}

/// A persisted [`PriceRecord`] with its server-assigned identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRow {
    /// Server-assigned identifier, increasing with insertion order.
    pub id: i64,
    /// The captured record.
    #[serde(flatten)]
    pub record: PriceRecord,
    /// Capture timestamp assigned at insertion.
    pub scraped_at: DateTime<Utc>,
}

/// Outbound push-channel message, one per completed cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedUpdate {
    /// Always [`GOLD_UPDATE`].
    pub r#type: String,
    /// Records of the cycle in document order.
    pub data: Vec<PriceRecord>,
}

impl FeedUpdate {
    /// Wraps the records of one cycle.
    pub fn gold(data: Vec<PriceRecord>) -> Self {
        Self {
            r#type: GOLD_UPDATE.to_string(),
            data,
        }
    }
}
