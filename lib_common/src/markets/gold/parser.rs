//! # Gold Table Parser
//!
//! Turns the raw page markup into an ordered list of [`PriceRecord`]s.
//!
//! ## Row contract
//! The source page renders a table (`#kapalicarsi_h` by default) whose first
//! row is a header. Every other row is read as:
//!
//! | cell | content |
//! |------|---------|
//! | 0 | instrument name, a `.time` fragment and optional `<span>` badges |
//! | 1 | buying price |
//! | 2 | a `<div>` with the selling price and a `.fark` change indicator holding `span[data-percent]` and `span[data-change]` |
//!
//! Rows with fewer than three cells, or whose name is empty once the time and
//! badge fragments are stripped, are dropped without an error. The page is an
//! external contract we do not control, so tolerance is the policy here.

use crate::markets::gold::model::{PriceRecord, PriceStatus};
use scraper::{ElementRef, Html, Node, Selector};
use static_init::dynamic;
use thiserror::Error;

/// Raised when a [`SourceProfile`] contains a selector the engine rejects.
#[derive(Debug, Clone, Error)]
pub enum ParserSetupError {
    /// The selector text could not be compiled.
    #[error("invalid selector `{selector}`: {reason}")]
    Selector {
        /// Offending selector text.
        selector: String,
        /// Engine diagnostic.
        reason: String,
    },
}

/// Where the price table lives and how its change markers are spelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceProfile {
    /// Selector of the data table.
    pub table_selector: String,
    /// Class carried by the change indicator when the price went up.
    pub increase_class: String,
    /// Class carried by the change indicator when the price went down.
    pub decrease_class: String,
}

impl Default for SourceProfile {
    fn default() -> Self {
        Self {
            table_selector: "#kapalicarsi_h".to_string(),
            increase_class: "yukari".to_string(),
            decrease_class: "asagi".to_string(),
        }
    }
}

/// A compiled parser for one [`SourceProfile`].
#[derive(Debug, Clone)]
pub struct MarkupParser {
    profile: SourceProfile,
    rows: Selector,
    cells: Selector,
    time: Selector,
    first_div: Selector,
    change: Selector,
    percent: Selector,
    delta: Selector,
}

// Compiled once for the default page layout.
#[dynamic]
static DEFAULT_PARSER: Result<MarkupParser, ParserSetupError> =
    MarkupParser::new(SourceProfile::default());

/// Parses `raw_markup` with the default source profile.
pub fn parse(raw_markup: &str) -> Vec<PriceRecord> {
    match &*DEFAULT_PARSER {
        Ok(parser) => parser.parse(raw_markup),
        Err(e) => {
            log::error!("Default gold table parser unavailable: {}", e);
            Vec::new()
        }
    }
}

fn compile(selector: &str) -> Result<Selector, ParserSetupError> {
    Selector::parse(selector).map_err(|e| ParserSetupError::Selector {
        selector: selector.to_string(),
        reason: format!("{:?}", e),
    })
}

impl MarkupParser {
    /// Compiles the selectors for `profile`.
    pub fn new(profile: SourceProfile) -> Result<Self, ParserSetupError> {
        let rows = compile(&format!("{} tr:not(:first-child)", profile.table_selector))?;
        Ok(Self {
            rows,
            cells: compile("td")?,
            time: compile(".time")?,
            first_div: compile("div")?,
            change: compile(".fark")?,
            percent: compile("span[data-percent]")?,
            delta: compile("span[data-change]")?,
            profile,
        })
    }

    /// The profile this parser was compiled for.
    pub fn profile(&self) -> &SourceProfile {
        &self.profile
    }

    /// Parses every data row of the table in document order.
    ///
    /// Never fails: a missing table yields an empty list and malformed rows
    /// are skipped.
    pub fn parse(&self, raw_markup: &str) -> Vec<PriceRecord> {
        let document = Html::parse_document(raw_markup);
        let records: Vec<PriceRecord> = document
            .select(&self.rows)
            .filter_map(|row| self.parse_row(row))
            .collect();
        log::debug!("Parsed {} gold price rows", records.len());
        records
    }

    fn parse_row(&self, row: ElementRef<'_>) -> Option<PriceRecord> {
        let cells: Vec<ElementRef<'_>> = row.select(&self.cells).collect();
        if cells.len() < 3 {
            return None;
        }
        let (name_cell, buying_cell, selling_cell) = (cells[0], cells[1], cells[2]);

        let name = self.bare_name(name_cell);
        if name.is_empty() {
            return None;
        }

        let selling = selling_cell
            .select(&self.first_div)
            .next()
            .map(|div| joined_text(div.text()))
            .unwrap_or_default();

        let indicators: Vec<ElementRef<'_>> = selling_cell.select(&self.change).collect();
        let status = self.status_of(&indicators);

        let change_rate_raw = self.nested_text(&indicators, &self.percent);
        let change_rate = if change_rate_raw.is_empty() {
            String::new()
        } else {
            format!("%{}", change_rate_raw)
        };

        Some(PriceRecord {
            name,
            buying: joined_text(buying_cell.text()),
            selling,
            status,
            change_rate,
            change_amount: self.nested_text(&indicators, &self.delta),
            time: joined_text(name_cell.select(&self.time).flat_map(|el| el.text())),
        })
    }

    /// Name cell text without the `.time` fragment and inline `<span>` badges.
    fn bare_name(&self, cell: ElementRef<'_>) -> String {
        let mut out = String::new();
        self.collect_name_text(cell, &mut out);
        out.trim().to_string()
    }

    fn collect_name_text(&self, element: ElementRef<'_>, out: &mut String) {
        for child in element.children() {
            match child.value() {
                Node::Text(text) => out.push_str(text),
                Node::Element(_) => {
                    if let Some(child_el) = ElementRef::wrap(child) {
                        let el = child_el.value();
                        let is_time = el.classes().any(|c| c == "time");
                        if el.name() != "span" && !is_time {
                            self.collect_name_text(child_el, out);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn status_of(&self, indicators: &[ElementRef<'_>]) -> PriceStatus {
        let has = |class: &str| {
            indicators
                .iter()
                .any(|el| el.value().classes().any(|c| c == class))
        };
        if has(&self.profile.increase_class) {
            PriceStatus::Up
        } else if has(&self.profile.decrease_class) {
            PriceStatus::Down
        } else {
            PriceStatus::Neutral
        }
    }

    fn nested_text(&self, indicators: &[ElementRef<'_>], selector: &Selector) -> String {
        joined_text(
            indicators
                .iter()
                .flat_map(|el| el.select(selector))
                .flat_map(|el| el.text()),
        )
    }
}

fn joined_text<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    parts.collect::<String>().trim().to_string()
}
