//! Query tools backing the chat retrieval surface.

use std::collections::HashSet;

use axum::Json;
use axum::extract::State;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use pricebot_core::{Error, Offer, Product, timefmt};
use pricebot_enrich::cosine_similarity;
use pricebot_store::{offers, products};

use crate::error::ApiResult;
use crate::state::SharedState;

/// Below this many substring hits the resolver reaches for embeddings.
const EMBEDDING_AUGMENT_THRESHOLD: usize = 3;

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub query: String,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

pub async fn resolve_products(
    State(state): State<SharedState>,
    Json(request): Json<ResolveRequest>,
) -> ApiResult<Json<Value>> {
    let query = request.query.trim().to_string();
    if query.is_empty() {
        return Err(Error::invalid("query must not be empty").into());
    }
    let limit = request.limit.unwrap_or(10).clamp(1, 100);
    let offset = request.offset.unwrap_or(0);

    let search_query = query.clone();
    let (mut matched, mut total) = state
        .store
        .with_conn(move |conn| products::search(conn, &search_query, limit, offset))
        .await?;

    // Thin substring results get augmented with alias-embedding neighbors.
    if matched.len() < EMBEDDING_AUGMENT_THRESHOLD && state.capabilities.embeddings.enabled() {
        if let Ok(query_vector) = state.capabilities.embeddings.embed(&query).await {
            let threshold = state.config.embedding_similarity_threshold;
            let candidate_limit = state.config.embedding_candidate_limit;
            let seen: HashSet<Uuid> = matched.iter().map(|p| p.id).collect();
            let extra = state
                .store
                .with_conn(move |conn| {
                    let candidates = products::aliases_with_embeddings(conn, candidate_limit)?;
                    let mut scored: Vec<(Uuid, f32)> = candidates
                        .iter()
                        .filter_map(|alias| {
                            alias
                                .embedding
                                .as_deref()
                                .map(|v| (alias.product_id, cosine_similarity(&query_vector, v)))
                        })
                        .filter(|(product_id, score)| {
                            *score >= threshold && !seen.contains(product_id)
                        })
                        .collect();
                    scored.sort_by(|(_, a), (_, b)| b.total_cmp(a));
                    let mut extra: Vec<Product> = Vec::new();
                    let mut added: HashSet<Uuid> = HashSet::new();
                    for (product_id, _) in scored {
                        if added.insert(product_id) {
                            if let Some(product) = products::get(conn, product_id)? {
                                extra.push(product);
                            }
                        }
                    }
                    Ok(extra)
                })
                .await?;
            total += extra.len() as u64;
            matched.extend(extra);
            matched.truncate(limit as usize);
        }
    }

    let next_offset = {
        let consumed = u64::from(offset) + matched.len() as u64;
        (consumed < total).then_some(consumed)
    };
    Ok(Json(json!({
        "products": matched,
        "total": total,
        "next_offset": next_offset,
    })))
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct BestPriceFilters {
    pub vendor_id: Option<Uuid>,
    pub condition: Option<String>,
    pub location: Option<String>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    pub captured_since: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BestPriceRequest {
    pub query: String,
    #[serde(default)]
    pub filters: BestPriceFilters,
    pub limit: Option<u32>,
}

pub async fn search_best_price(
    State(state): State<SharedState>,
    Json(request): Json<BestPriceRequest>,
) -> ApiResult<Json<Value>> {
    let query = request.query.trim().to_string();
    if query.is_empty() {
        return Err(Error::invalid("query must not be empty").into());
    }
    if let (Some(min), Some(max)) = (request.filters.min_price, request.filters.max_price) {
        if min > max {
            return Err(Error::invalid("min_price must not exceed max_price").into());
        }
    }
    let captured_since = match request.filters.captured_since.as_deref() {
        Some(raw) => Some(
            timefmt::parse_wire(raw)
                .ok_or_else(|| Error::invalid(format!("invalid captured_since: {raw}")))?,
        ),
        None => None,
    };
    let limit = request.limit.unwrap_or(5).clamp(1, 50) as usize;

    let filters = request.filters.clone();
    let results = state
        .store
        .with_conn(move |conn| {
            let (matched, _) = products::search(conn, &query, 10, 0)?;
            let mut results = Vec::new();
            for product in matched {
                // Only offers still covered by their pair's open history span
                // compete; superseded observations are stale quotes.
                let mut candidates: Vec<Offer> = offers::active_for_product(conn, product.id)?
                    .into_iter()
                    .filter(|offer| offer_matches(offer, &filters, captured_since))
                    .collect();
                if candidates.is_empty() {
                    continue;
                }
                // Cheapest first; ties go to the freshest capture.
                candidates.sort_by(|a, b| {
                    a.price
                        .cmp(&b.price)
                        .then(b.captured_at.cmp(&a.captured_at))
                });
                let best = candidates.remove(0);
                candidates.truncate(limit.saturating_sub(1));
                results.push(json!({
                    "product": product,
                    "best_offer": best,
                    "alternate_offers": candidates,
                }));
            }
            Ok(results)
        })
        .await?;

    Ok(Json(json!({ "results": results })))
}

fn offer_matches(
    offer: &Offer,
    filters: &BestPriceFilters,
    captured_since: Option<chrono::NaiveDateTime>,
) -> bool {
    if let Some(vendor_id) = filters.vendor_id {
        if offer.vendor_id != vendor_id {
            return false;
        }
    }
    if let Some(condition) = filters.condition.as_deref() {
        match offer.condition.as_deref() {
            Some(actual) if actual.eq_ignore_ascii_case(condition) => {}
            _ => return false,
        }
    }
    if let Some(location) = filters.location.as_deref() {
        match offer.location.as_deref() {
            Some(actual) if actual.to_lowercase().contains(&location.to_lowercase()) => {}
            _ => return false,
        }
    }
    if let Some(min) = filters.min_price {
        if offer.price < min {
            return false;
        }
    }
    if let Some(max) = filters.max_price {
        if offer.price > max {
            return false;
        }
    }
    if let Some(since) = captured_since {
        if offer.captured_at < since {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json as j;

    fn offer(price: i64, condition: Option<&str>, location: Option<&str>) -> Offer {
        Offer {
            id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            vendor_id: Uuid::new_v4(),
            source_document_id: None,
            captured_at: timefmt::parse_wire("2025-06-01T00:00:00Z").unwrap(),
            price: Decimal::new(price, 0),
            currency: "USD".into(),
            quantity: None,
            condition: condition.map(str::to_string),
            min_order_quantity: None,
            location: location.map(str::to_string),
            notes: None,
            raw_row: None,
            created_at: timefmt::now(),
        }
    }

    #[test]
    fn filters_apply_case_insensitively() {
        let filters = BestPriceFilters {
            condition: Some("NEW".into()),
            location: Some("miami".into()),
            ..Default::default()
        };
        assert!(offer_matches(
            &offer(100, Some("new"), Some("Miami FL")),
            &filters,
            None
        ));
        assert!(!offer_matches(
            &offer(100, Some("used"), Some("Miami FL")),
            &filters,
            None
        ));
        assert!(!offer_matches(&offer(100, Some("new"), None), &filters, None));
    }

    #[test]
    fn price_bounds_are_inclusive() {
        let filters = BestPriceFilters {
            min_price: Some(Decimal::new(100, 0)),
            max_price: Some(Decimal::new(200, 0)),
            ..Default::default()
        };
        assert!(offer_matches(&offer(100, None, None), &filters, None));
        assert!(offer_matches(&offer(200, None, None), &filters, None));
        assert!(!offer_matches(&offer(99, None, None), &filters, None));
        assert!(!offer_matches(&offer(201, None, None), &filters, None));
    }

    #[test]
    fn captured_since_excludes_older() {
        let since = timefmt::parse_wire("2025-07-01T00:00:00Z").unwrap();
        assert!(!offer_matches(
            &offer(100, None, None),
            &BestPriceFilters::default(),
            Some(since)
        ));
    }

    #[test]
    fn best_price_filters_deserialize_from_numbers_and_strings() {
        let filters: BestPriceFilters =
            serde_json::from_value(j!({ "min_price": 100, "max_price": "250.50" })).unwrap();
        assert_eq!(filters.min_price, Some(Decimal::new(100, 0)));
        assert_eq!(filters.max_price, Some(Decimal::new(25050, 2)));
    }
}
