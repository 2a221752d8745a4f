//! The write path behind every processor: resolve noisy strings into
//! canonical vendors and products, persist offers, and materialize
//! price-history spans, all inside one transaction per document.

pub mod history;
pub mod resolver;
pub mod service;

pub use resolver::ResolverConfig;
pub use service::{IngestSummary, IngestTarget, OfferIngestion};
