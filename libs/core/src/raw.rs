//! Raw extraction output: what processors hand to the offer ingestion
//! service before any entity resolution has happened.

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::timefmt;

/// One price observation as extracted from a source artefact. Strings are
/// noisy vendor text; resolution into canonical entities happens later.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawOffer {
    pub description: String,
    pub price: Decimal,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub quantity: Option<i64>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub upc: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub min_order_quantity: Option<i64>,
    #[serde(default)]
    pub notes: Option<String>,
    /// Sender or column-level vendor attribution, if the artefact carried one.
    #[serde(default)]
    pub vendor_hint: Option<String>,
    /// Observation time when the artefact encodes one (e.g. chat messages).
    #[serde(default, with = "timefmt::utc_opt")]
    pub captured_at: Option<NaiveDateTime>,
    /// The untouched source row, kept for traceability.
    pub raw_row: Value,
}

impl RawOffer {
    pub fn new(description: impl Into<String>, price: Decimal, raw_row: Value) -> Self {
        Self {
            description: description.into(),
            price,
            currency: None,
            quantity: None,
            condition: None,
            brand: None,
            model: None,
            upc: None,
            location: None,
            min_order_quantity: None,
            notes: None,
            vendor_hint: None,
            captured_at: None,
            raw_row,
        }
    }
}

/// Row-level warning codes used across processors and ingestion.
pub mod warning {
    pub const MISSING_VENDOR: &str = "missing_vendor";
    pub const UNMAPPED_VENDOR: &str = "unmapped_vendor";
    pub const UNPARSED_ROW: &str = "unparsed_row";
    pub const INVALID_PRICE: &str = "invalid_price";
    pub const DEPENDENCY_UNAVAILABLE: &str = "dependency_unavailable";
    pub const EMPTY_DOCUMENT: &str = "empty_document";
}

/// A non-fatal problem observed while extracting or ingesting one row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RowWarning {
    /// Zero-based row (or line) index in the source, when known.
    #[serde(default)]
    pub row: Option<usize>,
    pub code: String,
    pub message: String,
}

impl RowWarning {
    pub fn new(row: Option<usize>, code: &str, message: impl Into<String>) -> Self {
        Self {
            row,
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Document-level facts a processor extracted alongside the rows.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentMeta {
    #[serde(default)]
    pub declared_vendor: Option<String>,
    #[serde(default)]
    pub currency_hint: Option<String>,
    /// Data rows seen, including ones that failed to parse.
    #[serde(default)]
    pub total_rows: usize,
    #[serde(default)]
    pub parsed_rows: usize,
}

/// Everything a processor produced for one artefact.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessorResult {
    pub rows: Vec<RawOffer>,
    pub meta: DocumentMeta,
    pub warnings: Vec<RowWarning>,
}

impl ProcessorResult {
    pub fn warn(&mut self, row: Option<usize>, code: &str, message: impl Into<String>) {
        self.warnings.push(RowWarning::new(row, code, message));
    }
}
