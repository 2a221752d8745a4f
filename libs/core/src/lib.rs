//! Pricebot domain model: catalog entities, raw offer rows extracted by
//! processors, the runtime configuration value, and the shared error
//! taxonomy. Everything here is plain data; persistence and transport live
//! in the sibling crates.

pub mod config;
pub mod error;
pub mod hash;
pub mod model;
pub mod raw;
pub mod textutil;
pub mod timefmt;

pub use config::Config;
pub use error::{Error, Result};
pub use hash::content_hash;
pub use model::{
    ChatType, DocumentStatus, IngestionJob, JobLogEntry, JobStatus, Offer, PriceHistorySpan,
    Product, ProductAlias, SourceDocument, Vendor, WhatsAppChat, WhatsAppMessage,
};
pub use raw::{DocumentMeta, ProcessorResult, RawOffer, RowWarning, warning};
pub use textutil::{clean_description, normalize_upc, sanitize_filename, storage_key};
