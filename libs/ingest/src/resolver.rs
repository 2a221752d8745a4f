//! Entity resolution: noisy raw strings to canonical vendors and products.
//! Deterministic keys first (UPC, brand+model), then the alias table, then
//! optional embedding similarity, and only then a new product.

use chrono::NaiveDateTime;
use rusqlite::Connection;
use uuid::Uuid;

use pricebot_core::{Product, ProductAlias, RawOffer, Result, Vendor, clean_description, normalize_upc};
use pricebot_enrich::cosine_similarity;
use pricebot_store::{products, vendors};

#[derive(Debug, Clone, Copy)]
pub struct ResolverConfig {
    /// Cosine similarity floor for alias fuzzy matching.
    pub similarity_threshold: f32,
    /// How many recent embedded aliases compete per lookup.
    pub candidate_limit: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.86,
            candidate_limit: 50,
        }
    }
}

/// Outcome of one product resolution, including whether rows created
/// catalog entries (fed into ingest metrics).
pub struct ResolvedProduct {
    pub product: Product,
    pub created: bool,
    pub alias_added: bool,
}

/// Picks the vendor for a row: declared vendor first, then the row's own
/// hint, then the document-level hint. Returns `None` when every source is
/// empty, in which case the caller skips the row with a `missing_vendor` warning.
pub fn resolve_vendor(
    conn: &Connection,
    declared: Option<&str>,
    row_hint: Option<&str>,
    document_hint: Option<&str>,
    now: NaiveDateTime,
) -> Result<Option<(Vendor, bool)>> {
    let name = [declared, row_hint, document_hint]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|name| !name.is_empty());
    match name {
        Some(name) => vendors::get_or_create(conn, name, now).map(Some),
        None => Ok(None),
    }
}

/// Resolution chain, stopping at the first hit: UPC, brand+model, canonical
/// name, exact alias, embedding similarity. On a hit whose canonical name
/// differs from the row description, the raw string is recorded as a
/// vendor-scoped alias (with its embedding when one was computed).
pub fn resolve_product(
    conn: &Connection,
    row: &RawOffer,
    vendor_id: Uuid,
    embedding: Option<&[f32]>,
    cfg: &ResolverConfig,
    now: NaiveDateTime,
) -> Result<ResolvedProduct> {
    let description = clean_description(&row.description);

    let mut hit = find_by_upc(conn, row)?;
    if hit.is_none() {
        hit = find_by_brand_model(conn, row)?;
    }
    if hit.is_none() {
        // Canonical names behave like implicit aliases; without this a
        // vendor re-listing the same item would mint a duplicate product.
        hit = products::find_by_canonical_name(conn, &description)?;
    }
    if hit.is_none() {
        hit = find_by_alias(conn, &description, vendor_id)?;
    }
    if hit.is_none() {
        hit = find_by_embedding(conn, embedding, cfg)?;
    }

    if let Some(product) = hit {
        let alias_added = if !description.eq_ignore_ascii_case(&product.canonical_name) {
            record_alias(conn, product.id, &description, vendor_id, embedding, now)?
        } else {
            false
        };
        return Ok(ResolvedProduct {
            product,
            created: false,
            alias_added,
        });
    }

    let mut product = products::new_product(&description, now);
    product.brand = row.brand.as_deref().map(str::trim).map(str::to_string);
    product.model_number = row.model.as_deref().map(str::trim).map(str::to_string);
    product.upc = row.upc.as_deref().and_then(normalize_upc);
    products::insert(conn, &product)?;
    Ok(ResolvedProduct {
        product,
        created: true,
        alias_added: false,
    })
}

fn find_by_upc(conn: &Connection, row: &RawOffer) -> Result<Option<Product>> {
    match row.upc.as_deref().and_then(normalize_upc) {
        Some(upc) => products::find_by_upc(conn, &upc),
        None => Ok(None),
    }
}

fn find_by_brand_model(conn: &Connection, row: &RawOffer) -> Result<Option<Product>> {
    match (row.brand.as_deref(), row.model.as_deref()) {
        (Some(brand), Some(model)) if !brand.trim().is_empty() && !model.trim().is_empty() => {
            products::find_by_brand_model(conn, brand, model)
        }
        _ => Ok(None),
    }
}

fn find_by_alias(conn: &Connection, description: &str, vendor_id: Uuid) -> Result<Option<Product>> {
    let matches = products::find_alias_exact(conn, description, Some(vendor_id))?;
    // Ordering already prefers the vendor-scoped alias, then recency.
    match matches.first() {
        Some(alias) => products::get(conn, alias.product_id),
        None => Ok(None),
    }
}

fn find_by_embedding(
    conn: &Connection,
    embedding: Option<&[f32]>,
    cfg: &ResolverConfig,
) -> Result<Option<Product>> {
    let Some(query) = embedding else {
        return Ok(None);
    };
    let candidates = products::aliases_with_embeddings(conn, cfg.candidate_limit)?;
    let best = candidates
        .iter()
        .filter_map(|alias| {
            alias
                .embedding
                .as_deref()
                .map(|vector| (alias, cosine_similarity(query, vector)))
        })
        .filter(|(_, score)| *score >= cfg.similarity_threshold)
        .max_by(|(_, a), (_, b)| a.total_cmp(b));
    match best {
        Some((alias, _)) => products::get(conn, alias.product_id),
        None => Ok(None),
    }
}

fn record_alias(
    conn: &Connection,
    product_id: Uuid,
    description: &str,
    vendor_id: Uuid,
    embedding: Option<&[f32]>,
    now: NaiveDateTime,
) -> Result<bool> {
    products::insert_alias(
        conn,
        &ProductAlias {
            id: Uuid::new_v4(),
            product_id,
            alias_text: description.to_string(),
            source_vendor_id: Some(vendor_id),
            embedding: embedding.map(<[f32]>::to_vec),
            created_at: now,
            updated_at: now,
        },
    )
}
