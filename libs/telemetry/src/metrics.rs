//! In-process counters and the recent-failure ring buffer behind `/metrics`.
//! Counters are monotonic and cheap to bump from any thread; the ring keeps
//! the last failures for diagnostics without a log query.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::NaiveDateTime;
use serde::Serialize;
use serde_json::{Value, json};
use uuid::Uuid;

use pricebot_core::timefmt;

const FAILURE_RING_CAPACITY: usize = 50;

/// Well-known counter names. Free-form names are accepted too; these exist
/// so call sites and tests agree on spelling.
pub mod counter {
    pub const DOCUMENTS_UPLOADED: &str = "documents_uploaded";
    pub const JOBS_SUCCEEDED: &str = "jobs_succeeded";
    pub const JOBS_FAILED: &str = "jobs_failed";
    pub const JOBS_RECONCILED: &str = "jobs_reconciled";
    pub const OFFERS_INGESTED: &str = "offers_ingested";
    pub const ROWS_SKIPPED: &str = "rows_skipped";
    pub const PRODUCTS_CREATED: &str = "products_created";
    pub const VENDORS_CREATED: &str = "vendors_created";
    pub const WHATSAPP_BATCHES: &str = "whatsapp_batches";
    pub const WHATSAPP_CREATED: &str = "whatsapp_messages_created";
    pub const WHATSAPP_DEDUPED: &str = "whatsapp_messages_deduped";
    pub const WHATSAPP_SKIPPED: &str = "whatsapp_messages_skipped";
    pub const WHATSAPP_RATE_LIMITED: &str = "whatsapp_rate_limited";
    pub const WHATSAPP_UNMAPPED: &str = "whatsapp_unmapped_vendor";
    pub const EXTRACTIONS_RUN: &str = "whatsapp_extractions_run";
}

#[derive(Debug, Clone, Serialize)]
pub struct FailureRecord {
    #[serde(with = "timefmt::utc")]
    pub at: NaiveDateTime,
    /// Pipeline stage that failed (`processor`, `ingestion`, `job`, ...).
    pub stage: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<Uuid>,
    pub message: String,
}

#[derive(Default)]
struct Inner {
    counters: BTreeMap<String, u64>,
    failures: VecDeque<FailureRecord>,
}

/// Shared metrics registry. Constructed once at startup and cloned into every
/// service that reports; there is no hidden global.
#[derive(Clone, Default)]
pub struct Metrics {
    inner: Arc<Mutex<Inner>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(&self, name: &str) {
        self.incr_by(name, 1);
    }

    pub fn incr_by(&self, name: &str, delta: u64) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        *inner.counters.entry(name.to_string()).or_insert(0) += delta;
    }

    pub fn get(&self, name: &str) -> u64 {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.counters.get(name).copied().unwrap_or(0)
    }

    pub fn record_failure(&self, stage: &str, document_id: Option<Uuid>, message: impl Into<String>) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.failures.len() == FAILURE_RING_CAPACITY {
            inner.failures.pop_front();
        }
        inner.failures.push_back(FailureRecord {
            at: timefmt::now(),
            stage: stage.to_string(),
            document_id,
            message: message.into(),
        });
    }

    pub fn recent_failures(&self) -> Vec<FailureRecord> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.failures.iter().cloned().collect()
    }

    /// JSON snapshot served by `/metrics`.
    pub fn snapshot(&self) -> Value {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        json!({
            "counters": inner.counters,
            "recent_failures": inner.failures.iter().collect::<Vec<_>>(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = Metrics::new();
        metrics.incr(counter::OFFERS_INGESTED);
        metrics.incr_by(counter::OFFERS_INGESTED, 2);
        assert_eq!(metrics.get(counter::OFFERS_INGESTED), 3);
        assert_eq!(metrics.get("never_bumped"), 0);
    }

    #[test]
    fn failure_ring_is_bounded() {
        let metrics = Metrics::new();
        for i in 0..(FAILURE_RING_CAPACITY + 10) {
            metrics.record_failure("job", None, format!("boom {i}"));
        }
        let failures = metrics.recent_failures();
        assert_eq!(failures.len(), FAILURE_RING_CAPACITY);
        assert_eq!(failures.last().unwrap().message, "boom 59");
        assert_eq!(failures.first().unwrap().message, "boom 10");
    }

    #[test]
    fn snapshot_shape() {
        let metrics = Metrics::new();
        metrics.incr(counter::WHATSAPP_BATCHES);
        metrics.record_failure("processor", Some(Uuid::nil()), "bad sheet");
        let snap = metrics.snapshot();
        assert_eq!(snap["counters"]["whatsapp_batches"], 1);
        assert_eq!(snap["recent_failures"][0]["stage"], "processor");
    }
}
