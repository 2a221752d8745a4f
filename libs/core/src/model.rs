//! Canonical catalog entities. Identifiers are opaque UUIDs; timestamps are
//! timezone-naive UTC and serialize on the wire with a trailing `Z`.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::timefmt;

/// Lifecycle of an ingested artefact. Terminal states are never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Processed,
    ProcessedWithWarnings,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Processed => "processed",
            Self::ProcessedWithWarnings => "processed_with_warnings",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Processed | Self::ProcessedWithWarnings | Self::Failed
        )
    }
}

impl FromStr for DocumentStatus {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "processed" => Ok(Self::Processed),
            "processed_with_warnings" => Ok(Self::ProcessedWithWarnings),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown document status: {other}")),
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChatType {
    Group,
    Direct,
    #[default]
    Unknown,
}

impl ChatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Group => "group",
            Self::Direct => "direct",
            Self::Unknown => "unknown",
        }
    }
}

impl FromStr for ChatType {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "group" => Ok(Self::Group),
            "direct" => Ok(Self::Direct),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("unknown chat type: {other}")),
        }
    }
}

/// A supplier of offers. Unique by case-insensitive name, created lazily on
/// first reference, never deleted automatically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vendor {
    pub id: Uuid,
    pub name: String,
    pub contact_info: Value,
    pub metadata: Value,
    #[serde(with = "timefmt::utc")]
    pub created_at: NaiveDateTime,
    #[serde(with = "timefmt::utc")]
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub canonical_name: String,
    pub brand: Option<String>,
    pub model_number: Option<String>,
    pub upc: Option<String>,
    pub category: Option<String>,
    pub specs: Value,
    #[serde(with = "timefmt::utc")]
    pub created_at: NaiveDateTime,
    #[serde(with = "timefmt::utc")]
    pub updated_at: NaiveDateTime,
}

/// A raw string observed for a product, optionally scoped to the vendor that
/// used it. The embedding is a weak reference to the external embedding
/// service's vector space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductAlias {
    pub id: Uuid,
    pub product_id: Uuid,
    pub alias_text: String,
    pub source_vendor_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(with = "timefmt::utc")]
    pub created_at: NaiveDateTime,
    #[serde(with = "timefmt::utc")]
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDocument {
    pub id: Uuid,
    pub vendor_id: Option<Uuid>,
    pub original_filename: String,
    pub file_type: String,
    pub storage_uri: String,
    #[serde(with = "timefmt::utc_opt")]
    pub ingest_started_at: Option<NaiveDateTime>,
    #[serde(with = "timefmt::utc_opt")]
    pub ingest_completed_at: Option<NaiveDateTime>,
    pub status: DocumentStatus,
    pub metadata: Value,
    #[serde(with = "timefmt::utc")]
    pub created_at: NaiveDateTime,
}

/// A single observed price. `price > 0` and a non-empty currency are enforced
/// at ingestion time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offer {
    pub id: Uuid,
    pub product_id: Uuid,
    pub vendor_id: Uuid,
    pub source_document_id: Option<Uuid>,
    #[serde(with = "timefmt::utc")]
    pub captured_at: NaiveDateTime,
    pub price: Decimal,
    pub currency: String,
    pub quantity: Option<i64>,
    pub condition: Option<String>,
    pub min_order_quantity: Option<i64>,
    pub location: Option<String>,
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_row: Option<Value>,
    #[serde(with = "timefmt::utc")]
    pub created_at: NaiveDateTime,
}

/// Closed-open interval during which a `(product, vendor)` held one price.
/// `valid_to = None` marks the currently active span.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceHistorySpan {
    pub id: Uuid,
    pub product_id: Uuid,
    pub vendor_id: Uuid,
    pub price: Decimal,
    pub currency: String,
    #[serde(with = "timefmt::utc")]
    pub valid_from: NaiveDateTime,
    #[serde(with = "timefmt::utc_opt")]
    pub valid_to: Option<NaiveDateTime>,
    pub source_offer_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobLogEntry {
    #[serde(with = "timefmt::utc")]
    pub at: NaiveDateTime,
    pub level: String,
    pub message: String,
}

impl JobLogEntry {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            at: timefmt::now(),
            level: "info".into(),
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            at: timefmt::now(),
            level: "error".into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionJob {
    pub id: Uuid,
    pub source_document_id: Uuid,
    pub processor: Option<String>,
    pub status: JobStatus,
    pub logs: Vec<JobLogEntry>,
    #[serde(with = "timefmt::utc")]
    pub created_at: NaiveDateTime,
    #[serde(with = "timefmt::utc")]
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppChat {
    pub id: Uuid,
    pub title: String,
    pub chat_type: ChatType,
    pub platform_id: Option<String>,
    pub vendor_id: Option<Uuid>,
    pub extra: Value,
    #[serde(with = "timefmt::utc_opt")]
    pub last_extracted_at: Option<NaiveDateTime>,
    #[serde(with = "timefmt::utc")]
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppMessage {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub client_id: String,
    #[serde(with = "timefmt::utc")]
    pub observed_at: NaiveDateTime,
    pub sender_name: Option<String>,
    pub sender_phone: Option<String>,
    pub is_outgoing: bool,
    pub text: String,
    pub message_id: Option<String>,
    pub content_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_payload: Option<Value>,
    pub media_document_id: Option<Uuid>,
    #[serde(with = "timefmt::utc")]
    pub created_at: NaiveDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_status_roundtrip() {
        for status in [
            DocumentStatus::Pending,
            DocumentStatus::Processing,
            DocumentStatus::Processed,
            DocumentStatus::ProcessedWithWarnings,
            DocumentStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<DocumentStatus>(), Ok(status));
        }
        assert!("bogus".parse::<DocumentStatus>().is_err());
    }

    #[test]
    fn terminal_statuses() {
        assert!(!DocumentStatus::Pending.is_terminal());
        assert!(!DocumentStatus::Processing.is_terminal());
        assert!(DocumentStatus::Failed.is_terminal());
        assert!(DocumentStatus::ProcessedWithWarnings.is_terminal());
    }

    #[test]
    fn timestamps_serialize_with_z() {
        let span = PriceHistorySpan {
            id: Uuid::nil(),
            product_id: Uuid::nil(),
            vendor_id: Uuid::nil(),
            price: Decimal::new(48500, 2),
            currency: "USD".into(),
            valid_from: timefmt::parse_wire("2025-01-10T00:00:00Z").unwrap(),
            valid_to: None,
            source_offer_id: None,
        };
        let json = serde_json::to_value(&span).unwrap();
        assert_eq!(json["valid_from"], "2025-01-10T00:00:00Z");
        assert!(json["valid_to"].is_null());
        assert_eq!(json["price"], "485.00");
    }
}
