//! Debounced WhatsApp extraction: parse a chat's recent inbound messages
//! into raw offers and run them through the shared ingestion tail,
//! attributed to the chat's mapped vendor.

use chrono::Duration;
use uuid::Uuid;

use pricebot_core::{RawOffer, timefmt};
use pricebot_ingest::{IngestTarget, OfferIngestion};
use pricebot_processors::whatsapp_text;
use pricebot_store::{Store, whatsapp};
use pricebot_telemetry::{Metrics, counter};

#[derive(Clone)]
pub struct Extractor {
    pub store: Store,
    pub ingestion: OfferIngestion,
    pub metrics: Metrics,
    pub default_currency: String,
    pub window_hours: i64,
}

impl Extractor {
    /// One extraction pass over a chat. Messages since the last pass (or
    /// within the rolling window on the first one) are parsed line by line;
    /// each row's `captured_at` is its message's `observed_at`.
    pub async fn run(&self, chat_id: Uuid) {
        if let Err(err) = self.try_run(chat_id).await {
            self.metrics
                .record_failure("whatsapp_extraction", None, err.to_string());
            tracing::error!(chat_id = %chat_id, error = %err, "whatsapp extraction failed");
        }
    }

    async fn try_run(&self, chat_id: Uuid) -> pricebot_core::Result<()> {
        let window_hours = self.window_hours;
        let loaded = self
            .store
            .with_conn(move |conn| {
                let Some(chat) = whatsapp::get_chat(conn, chat_id)? else {
                    return Ok(None);
                };
                let floor = chat
                    .last_extracted_at
                    .unwrap_or_else(|| timefmt::now() - Duration::hours(window_hours));
                let messages = whatsapp::inbound_messages_since(conn, chat_id, Some(floor))?;
                Ok(Some((chat, messages)))
            })
            .await?;
        let Some((chat, messages)) = loaded else {
            tracing::warn!(chat_id = %chat_id, "extraction scheduled for unknown chat");
            return Ok(());
        };
        if messages.is_empty() {
            return Ok(());
        }

        let Some(vendor_id) = chat.vendor_id else {
            // No vendor mapping: rows would be unattributable, so the whole
            // window is skipped until an operator maps the chat.
            self.metrics.incr(counter::WHATSAPP_UNMAPPED);
            tracing::warn!(
                chat_id = %chat_id,
                chat_title = %chat.title,
                "unmapped_vendor: skipping extraction for chat without vendor mapping"
            );
            return Ok(());
        };

        let mut rows: Vec<RawOffer> = Vec::new();
        let mut watermark = chat.last_extracted_at;
        for message in &messages {
            let parsed = whatsapp_text::parse_lines(&message.text, &self.default_currency);
            for mut row in parsed.rows {
                row.captured_at = Some(message.observed_at);
                rows.push(row);
            }
            watermark = Some(watermark.map_or(message.observed_at, |w| w.max(message.observed_at)));
        }

        let offers = if rows.is_empty() {
            0
        } else {
            let summary = self
                .ingestion
                .ingest(
                    rows,
                    IngestTarget {
                        declared_vendor_id: Some(vendor_id),
                        default_currency: self.default_currency.clone(),
                        ..Default::default()
                    },
                )
                .await?;
            summary.offers_created
        };

        if let Some(watermark) = watermark {
            self.store
                .with_conn(move |conn| whatsapp::set_last_extracted(conn, chat_id, watermark))
                .await?;
        }

        self.metrics.incr(counter::EXTRACTIONS_RUN);
        self.metrics.incr_by(counter::OFFERS_INGESTED, offers as u64);
        tracing::info!(
            chat_id = %chat_id,
            messages = messages.len(),
            offers,
            "whatsapp extraction complete"
        );
        Ok(())
    }
}
