//! Price-history materialization. Spans per `(product, vendor)` are
//! non-overlapping, totally ordered by `valid_from`, carry at most one open
//! interval, and no two adjacent spans share `(price, currency)`. The
//! algorithm runs inside the caller's transaction; re-applying the same
//! observation is a no-op.

use chrono::NaiveDateTime;
use rusqlite::Connection;
use rust_decimal::Decimal;
use uuid::Uuid;

use pricebot_core::{Error, PriceHistorySpan, Result};
use pricebot_store::history as spans;

/// Folds one price observation into the span set for `(product, vendor)`.
pub fn apply_observation(
    conn: &Connection,
    product_id: Uuid,
    vendor_id: Uuid,
    observed_at: NaiveDateTime,
    price: Decimal,
    currency: &str,
    offer_id: Uuid,
) -> Result<()> {
    let existing = spans::for_pair(conn, product_id, vendor_id)?;

    if existing.is_empty() {
        return spans::insert(
            conn,
            &open_span(product_id, vendor_id, observed_at, price, currency, offer_id),
        );
    }

    let covering = existing.iter().find(|span| {
        span.valid_from <= observed_at && span.valid_to.is_none_or(|to| observed_at < to)
    });

    match covering {
        Some(span) if span.price == price && span.currency == currency => {
            // The same price continues; nothing to record.
            return Ok(());
        }
        Some(span) if span.valid_from == observed_at => {
            // An observation exactly at the span start replaces its price
            // rather than creating a zero-width interval.
            spans::set_price(conn, span.id, price, currency, Some(offer_id))?;
        }
        Some(span) => {
            let original_to = span.valid_to;
            spans::set_valid_to(conn, span.id, Some(observed_at))?;
            spans::insert(
                conn,
                &PriceHistorySpan {
                    id: Uuid::new_v4(),
                    product_id,
                    vendor_id,
                    price,
                    currency: currency.to_string(),
                    valid_from: observed_at,
                    valid_to: original_to,
                    source_offer_id: Some(offer_id),
                },
            )?;
        }
        None => {
            // Out-of-order arrival earlier than recorded history: prepend a
            // closed span up to the first known observation.
            let Some(first) = existing.first() else {
                return Err(Error::HistoryConflict(
                    "span set vanished mid-update".into(),
                ));
            };
            if observed_at >= first.valid_from {
                return Err(Error::HistoryConflict(format!(
                    "no span covers {observed_at} for pair ({product_id}, {vendor_id})"
                )));
            }
            spans::insert(
                conn,
                &PriceHistorySpan {
                    id: Uuid::new_v4(),
                    product_id,
                    vendor_id,
                    price,
                    currency: currency.to_string(),
                    valid_from: observed_at,
                    valid_to: Some(first.valid_from),
                    source_offer_id: Some(offer_id),
                },
            )?;
        }
    }

    merge_adjacent(conn, product_id, vendor_id)
}

fn open_span(
    product_id: Uuid,
    vendor_id: Uuid,
    valid_from: NaiveDateTime,
    price: Decimal,
    currency: &str,
    offer_id: Uuid,
) -> PriceHistorySpan {
    PriceHistorySpan {
        id: Uuid::new_v4(),
        product_id,
        vendor_id,
        price,
        currency: currency.to_string(),
        valid_from,
        valid_to: None,
        source_offer_id: Some(offer_id),
    }
}

/// Collapses adjacent spans with identical `(price, currency)`. Splits and
/// start-replacements can leave such pairs behind.
fn merge_adjacent(conn: &Connection, product_id: Uuid, vendor_id: Uuid) -> Result<()> {
    loop {
        let ordered = spans::for_pair(conn, product_id, vendor_id)?;
        let mut merged = false;
        for pair in ordered.windows(2) {
            let (left, right) = (&pair[0], &pair[1]);
            if left.valid_to == Some(right.valid_from)
                && left.price == right.price
                && left.currency == right.currency
            {
                spans::set_valid_to(conn, left.id, right.valid_to)?;
                spans::delete(conn, right.id)?;
                merged = true;
                break;
            }
        }
        if !merged {
            return Ok(());
        }
    }
}

/// Asserts the span-set invariants over an ordered list: no overlap, no
/// empty intervals, one open span at most, no equal-price adjacency.
pub fn check_invariants(ordered: &[PriceHistorySpan]) -> Result<()> {
    let mut open_count = 0;
    for (idx, span) in ordered.iter().enumerate() {
        match span.valid_to {
            None => open_count += 1,
            Some(to) if span.valid_from >= to => {
                return Err(Error::HistoryConflict(format!(
                    "span {} is empty or inverted: [{}, {})",
                    span.id, span.valid_from, to
                )));
            }
            Some(_) => {}
        }
        if let Some(next) = ordered.get(idx + 1) {
            let Some(to) = span.valid_to else {
                return Err(Error::HistoryConflict(format!(
                    "open span {} is not last",
                    span.id
                )));
            };
            if to > next.valid_from {
                return Err(Error::HistoryConflict(format!(
                    "spans {} and {} overlap",
                    span.id, next.id
                )));
            }
            if to == next.valid_from && span.price == next.price && span.currency == next.currency
            {
                return Err(Error::HistoryConflict(format!(
                    "adjacent spans {} and {} share price",
                    span.id, next.id
                )));
            }
        }
    }
    if open_count > 1 {
        return Err(Error::HistoryConflict(format!(
            "{open_count} open spans for one pair"
        )));
    }
    Ok(())
}
