//! Offer ingestion: the transactional tail shared by upload jobs and the
//! WhatsApp extractor. Embeddings are computed in batch before the
//! transaction opens so the transactional section stays synchronous; a
//! failure on any row rolls back the whole batch.

use std::sync::Arc;

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use uuid::Uuid;

use pricebot_core::{Error, Offer, RawOffer, Result, RowWarning, clean_description, timefmt, warning};
use pricebot_enrich::EmbeddingService;
use pricebot_store::{Store, offers};

use crate::history;
use crate::resolver::{self, ResolverConfig};

/// Where a batch of rows attaches: the owning document (uploads) or a mapped
/// vendor (WhatsApp extraction), plus the fallbacks resolution needs.
#[derive(Debug, Clone, Default)]
pub struct IngestTarget {
    pub document_id: Option<Uuid>,
    /// Vendor named by the uploader; wins over row hints.
    pub declared_vendor: Option<String>,
    /// Pre-resolved vendor (WhatsApp chat mapping); wins over everything.
    pub declared_vendor_id: Option<Uuid>,
    /// Vendor the processor saw in document metadata.
    pub document_vendor_hint: Option<String>,
    pub currency_hint: Option<String>,
    pub default_currency: String,
    /// `captured_at` for rows that do not carry their own.
    pub default_captured_at: Option<NaiveDateTime>,
}

#[derive(Debug, Default, Clone)]
pub struct IngestSummary {
    pub offers_created: usize,
    pub vendors_created: usize,
    pub products_created: usize,
    pub aliases_created: usize,
    pub rows_skipped: usize,
    pub warnings: Vec<RowWarning>,
}

#[derive(Clone)]
pub struct OfferIngestion {
    store: Store,
    embeddings: Arc<dyn EmbeddingService>,
    resolver: ResolverConfig,
}

impl OfferIngestion {
    pub fn new(
        store: Store,
        embeddings: Arc<dyn EmbeddingService>,
        resolver: ResolverConfig,
    ) -> Self {
        Self {
            store,
            embeddings,
            resolver,
        }
    }

    /// Ingests a batch of raw rows. Per row: vendor resolution, product
    /// resolution, offer insert, price-history update, with one transaction for
    /// the whole batch.
    pub async fn ingest(&self, rows: Vec<RawOffer>, target: IngestTarget) -> Result<IngestSummary> {
        if rows.is_empty() {
            return Ok(IngestSummary::default());
        }

        let mut summary = IngestSummary::default();
        let embeddings = self.embed_descriptions(&rows, &mut summary).await;

        let resolver_cfg = self.resolver;
        let applied = self
            .store
            .with_conn(move |conn| {
                let tx = conn.transaction().map_err(Error::storage)?;
                let mut summary = IngestSummary::default();
                for (idx, row) in rows.iter().enumerate() {
                    let embedding = embeddings.get(idx).and_then(|e| e.as_deref());
                    ingest_row(&tx, idx, row, embedding, &target, &resolver_cfg, &mut summary)?;
                }
                tx.commit().map_err(Error::storage)?;
                Ok(summary)
            })
            .await?;

        summary.offers_created = applied.offers_created;
        summary.vendors_created = applied.vendors_created;
        summary.products_created = applied.products_created;
        summary.aliases_created = applied.aliases_created;
        summary.rows_skipped = applied.rows_skipped;
        summary.warnings.extend(applied.warnings);
        Ok(summary)
    }

    /// Batch-embeds row descriptions; an unavailable service degrades to
    /// exact-only matching with a single warning.
    async fn embed_descriptions(
        &self,
        rows: &[RawOffer],
        summary: &mut IngestSummary,
    ) -> Vec<Option<Vec<f32>>> {
        if !self.embeddings.enabled() {
            return vec![None; rows.len()];
        }
        let texts: Vec<String> = rows
            .iter()
            .map(|row| clean_description(&row.description))
            .collect();
        match self.embeddings.embed_batch(&texts).await {
            Ok(vectors) => vectors.into_iter().map(Some).collect(),
            Err(err) => {
                tracing::warn!(error = %err, "embedding service unavailable, falling back to exact matching");
                summary.warnings.push(RowWarning::new(
                    None,
                    warning::DEPENDENCY_UNAVAILABLE,
                    err.to_string(),
                ));
                vec![None; rows.len()]
            }
        }
    }
}

fn ingest_row(
    conn: &rusqlite::Connection,
    idx: usize,
    row: &RawOffer,
    embedding: Option<&[f32]>,
    target: &IngestTarget,
    resolver_cfg: &ResolverConfig,
    summary: &mut IngestSummary,
) -> Result<()> {
    if row.price <= Decimal::ZERO {
        summary.rows_skipped += 1;
        summary.warnings.push(RowWarning::new(
            Some(idx),
            warning::INVALID_PRICE,
            format!("non-positive price {} for {:?}", row.price, row.description),
        ));
        return Ok(());
    }

    let now = timefmt::now();
    let vendor = match target.declared_vendor_id {
        Some(vendor_id) => pricebot_store::vendors::get(conn, vendor_id)?
            .map(|vendor| (vendor, false)),
        None => resolver::resolve_vendor(
            conn,
            target.declared_vendor.as_deref(),
            row.vendor_hint.as_deref(),
            target.document_vendor_hint.as_deref(),
            now,
        )?,
    };
    let Some((vendor, vendor_created)) = vendor else {
        summary.rows_skipped += 1;
        summary.warnings.push(RowWarning::new(
            Some(idx),
            warning::MISSING_VENDOR,
            format!("no vendor for row {:?}", row.description),
        ));
        return Ok(());
    };
    if vendor_created {
        summary.vendors_created += 1;
    }

    let resolved = resolver::resolve_product(conn, row, vendor.id, embedding, resolver_cfg, now)?;
    if resolved.created {
        summary.products_created += 1;
    }
    if resolved.alias_added {
        summary.aliases_created += 1;
    }

    let currency = row
        .currency
        .clone()
        .or_else(|| target.currency_hint.clone())
        .unwrap_or_else(|| target.default_currency.clone())
        .to_ascii_uppercase();
    if currency.is_empty() {
        return Err(Error::invalid("offer currency resolved to empty"));
    }

    let captured_at = row
        .captured_at
        .or(target.default_captured_at)
        .unwrap_or(now);

    let offer = Offer {
        id: Uuid::new_v4(),
        product_id: resolved.product.id,
        vendor_id: vendor.id,
        source_document_id: target.document_id,
        captured_at,
        price: row.price,
        currency: currency.clone(),
        quantity: row.quantity,
        condition: row.condition.clone(),
        min_order_quantity: row.min_order_quantity,
        location: row.location.clone(),
        notes: row.notes.clone(),
        raw_row: Some(row.raw_row.clone()),
        created_at: now,
    };
    offers::insert(conn, &offer)?;
    summary.offers_created += 1;

    history::apply_observation(
        conn,
        resolved.product.id,
        vendor.id,
        captured_at,
        row.price,
        &currency,
        offer.id,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pricebot_core::DocumentStatus;
    use pricebot_enrich::Disabled;
    use pricebot_store::{documents, history as span_repo, products, vendors};
    use serde_json::json;

    fn service() -> (OfferIngestion, Store) {
        let store = Store::open_in_memory().unwrap();
        let service = OfferIngestion::new(
            store.clone(),
            Arc::new(Disabled),
            ResolverConfig::default(),
        );
        (service, store)
    }

    fn row(description: &str, price: i64, scale: u32) -> RawOffer {
        RawOffer::new(description, Decimal::new(price, scale), json!({"d": description}))
    }

    fn target_with_vendor(name: &str) -> IngestTarget {
        IngestTarget {
            declared_vendor: Some(name.to_string()),
            default_currency: "USD".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn happy_path_creates_everything() {
        let (service, store) = service();
        let rows = vec![
            row("iPhone 11 64GB Black", 48500, 2),
            row("iPhone 12 128GB", 600, 0),
        ];
        let summary = service.ingest(rows, target_with_vendor("Acme")).await.unwrap();
        assert_eq!(summary.offers_created, 2);
        assert_eq!(summary.products_created, 2);
        assert_eq!(summary.vendors_created, 1);
        assert!(summary.warnings.is_empty());

        store
            .with_conn_sync(|conn| {
                let vendor = vendors::find_by_name(conn, "Acme")?.unwrap();
                let (all_products, total) = products::list(conn, 10, 0)?;
                assert_eq!(total, 2);
                for product in &all_products {
                    let spans = span_repo::for_pair(conn, product.id, vendor.id)?;
                    assert_eq!(spans.len(), 1);
                    assert!(spans[0].valid_to.is_none());
                }
                Ok(())
            })
            .unwrap();
    }

    #[tokio::test]
    async fn repeat_rows_attach_to_the_same_product() {
        let (service, store) = service();
        let summary = service
            .ingest(vec![row("Pixel 9 128GB", 700, 0)], target_with_vendor("Acme"))
            .await
            .unwrap();
        assert_eq!(summary.products_created, 1);

        let summary = service
            .ingest(vec![row("Pixel 9 128GB", 680, 0)], target_with_vendor("Acme"))
            .await
            .unwrap();
        assert_eq!(summary.products_created, 0);
        assert_eq!(summary.vendors_created, 0);

        store
            .with_conn_sync(|conn| {
                let (all_products, total) = products::list(conn, 10, 0)?;
                assert_eq!(total, 1);
                let all = offers::for_product(conn, all_products[0].id)?;
                assert_eq!(all.len(), 2);
                Ok(())
            })
            .unwrap();
    }

    #[tokio::test]
    async fn missing_vendor_skips_row() {
        let (service, _) = service();
        let target = IngestTarget {
            default_currency: "USD".into(),
            ..Default::default()
        };
        let summary = service.ingest(vec![row("iPhone 11", 485, 0)], target).await.unwrap();
        assert_eq!(summary.offers_created, 0);
        assert_eq!(summary.rows_skipped, 1);
        assert_eq!(summary.warnings.len(), 1);
        assert_eq!(summary.warnings[0].code, warning::MISSING_VENDOR);
    }

    #[tokio::test]
    async fn row_vendor_hint_is_used_when_nothing_declared() {
        let (service, store) = service();
        let mut hinted = row("Galaxy S24", 650, 0);
        hinted.vendor_hint = Some("Beto Mayorista".into());
        let target = IngestTarget {
            default_currency: "USD".into(),
            ..Default::default()
        };
        let summary = service.ingest(vec![hinted], target).await.unwrap();
        assert_eq!(summary.offers_created, 1);
        store
            .with_conn_sync(|conn| {
                assert!(vendors::find_by_name(conn, "Beto Mayorista")?.is_some());
                Ok(())
            })
            .unwrap();
    }

    #[tokio::test]
    async fn offers_link_to_their_document_and_default_capture_time() {
        let (service, store) = service();
        let captured = timefmt::parse_wire("2025-01-10T00:00:00Z").unwrap();
        let document_id = store
            .with_conn_sync(|conn| {
                let doc = pricebot_core::SourceDocument {
                    id: Uuid::new_v4(),
                    vendor_id: None,
                    original_filename: "list.csv".into(),
                    file_type: "csv".into(),
                    storage_uri: "k".into(),
                    ingest_started_at: Some(captured),
                    ingest_completed_at: None,
                    status: DocumentStatus::Processing,
                    metadata: json!({}),
                    created_at: captured,
                };
                documents::insert(conn, &doc)?;
                Ok(doc.id)
            })
            .unwrap();

        let target = IngestTarget {
            document_id: Some(document_id),
            declared_vendor: Some("Acme".into()),
            default_currency: "USD".into(),
            default_captured_at: Some(captured),
            ..Default::default()
        };
        service.ingest(vec![row("iPad Air", 250, 0)], target).await.unwrap();

        store
            .with_conn_sync(|conn| {
                assert_eq!(offers::count_for_document(conn, document_id)?, 1);
                let listed = offers::list(
                    conn,
                    &offers::OfferFilter {
                        document_id: Some(document_id),
                        ..Default::default()
                    },
                )?;
                assert_eq!(listed[0].captured_at, captured);
                Ok(())
            })
            .unwrap();
    }

    #[tokio::test]
    async fn currency_fallback_chain() {
        let (service, store) = service();
        let mut with_currency = row("ThinkPad X1", 900, 0);
        with_currency.currency = Some("eur".into());
        let no_currency = row("ThinkPad X2", 950, 0);
        let target = IngestTarget {
            declared_vendor: Some("Acme".into()),
            currency_hint: None,
            default_currency: "USD".into(),
            ..Default::default()
        };
        service.ingest(vec![with_currency, no_currency], target).await.unwrap();
        store
            .with_conn_sync(|conn| {
                let all = offers::list(conn, &offers::OfferFilter::default())?;
                let currencies: Vec<&str> = all.iter().map(|o| o.currency.as_str()).collect();
                assert!(currencies.contains(&"EUR"));
                assert!(currencies.contains(&"USD"));
                Ok(())
            })
            .unwrap();
    }

    #[tokio::test]
    async fn non_positive_price_is_skipped_not_fatal() {
        let (service, _) = service();
        let bad = RawOffer::new("freebie", Decimal::ZERO, json!({}));
        let summary = service
            .ingest(vec![bad, row("iPhone 11", 485, 0)], target_with_vendor("Acme"))
            .await
            .unwrap();
        assert_eq!(summary.offers_created, 1);
        assert_eq!(summary.rows_skipped, 1);
        assert_eq!(summary.warnings[0].code, warning::INVALID_PRICE);
    }
}
