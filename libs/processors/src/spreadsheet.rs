//! Spreadsheet processor: XLSX/XLS via calamine, CSV via the csv crate.
//!
//! Each sheet is scanned for a header row against a fixed token dictionary;
//! headerless sheets fall back to positional columns when a numeric column
//! sits next to a text column. Row-level failures become warnings, and when
//! the LLM fallback is enabled those raw rows get one batched second chance.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use calamine::{Data, Reader, open_workbook_auto};
use serde_json::{Map, Value, json};

use pricebot_core::{Error, ProcessorResult, RawOffer, Result, clean_description, warning};

use crate::ProcessContext;
use crate::numeric::{parse_price, parse_quantity};

/// Column roles a header token can map to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    Model,
    Brand,
    Description,
    Price,
    Quantity,
    Condition,
    Upc,
    Location,
    Vendor,
    Notes,
    MinOrder,
}

/// The recognized header vocabulary, matched case-insensitively after
/// trimming. This table is the single source of truth; the
/// `header_vocabulary_is_stable` test pins it.
pub const HEADER_TOKENS: &[(&str, Column)] = &[
    ("model", Column::Model),
    ("model/sku", Column::Model),
    ("sku", Column::Model),
    ("mpn", Column::Model),
    ("part number", Column::Model),
    ("part#", Column::Model),
    ("brand", Column::Brand),
    ("make", Column::Brand),
    ("manufacturer", Column::Brand),
    ("description", Column::Description),
    ("item", Column::Description),
    ("item description", Column::Description),
    ("product", Column::Description),
    ("product name", Column::Description),
    ("desc", Column::Description),
    ("price", Column::Price),
    ("unit price", Column::Price),
    ("unit cost", Column::Price),
    ("cost", Column::Price),
    ("asking price", Column::Price),
    ("qty", Column::Quantity),
    ("quantity", Column::Quantity),
    ("stock", Column::Quantity),
    ("qty available", Column::Quantity),
    ("available", Column::Quantity),
    ("units", Column::Quantity),
    ("condition", Column::Condition),
    ("grade", Column::Condition),
    ("cond", Column::Condition),
    ("upc", Column::Upc),
    ("ean", Column::Upc),
    ("upc/ean", Column::Upc),
    ("barcode", Column::Upc),
    ("warehouse", Column::Location),
    ("location", Column::Location),
    ("loc", Column::Location),
    ("vendor", Column::Vendor),
    ("supplier", Column::Vendor),
    ("seller", Column::Vendor),
    ("notes", Column::Notes),
    ("comments", Column::Notes),
    ("remarks", Column::Notes),
    ("moq", Column::MinOrder),
    ("min order", Column::MinOrder),
    ("minimum order", Column::MinOrder),
];

fn classify_header(cell: &str) -> Option<Column> {
    let normalized = cell.trim().to_ascii_lowercase();
    if normalized.is_empty() {
        return None;
    }
    HEADER_TOKENS
        .iter()
        .find(|(token, _)| *token == normalized)
        .map(|(_, column)| *column)
}

/// First row whose non-empty cells match at least two recognized tokens.
/// Compound headers like `MODEL/SKU` also count via their slash halves.
fn find_header_row(rows: &[Vec<String>]) -> Option<(usize, HashMap<Column, usize>)> {
    for (idx, row) in rows.iter().enumerate() {
        let mut mapping: HashMap<Column, usize> = HashMap::new();
        let mut hits = 0usize;
        for (col, cell) in row.iter().enumerate() {
            let matched = classify_header(cell).or_else(|| {
                cell.split('/').find_map(classify_header)
            });
            if let Some(role) = matched {
                mapping.entry(role).or_insert(col);
                hits += 1;
            }
        }
        if hits >= 2 {
            return Some((idx, mapping));
        }
    }
    None
}

struct FailedRow {
    raw: Value,
    warning_message: String,
}

#[derive(Default)]
struct SheetOutcome {
    rows: Vec<RawOffer>,
    failed: Vec<FailedRow>,
    total_rows: usize,
    currency_hint: Option<String>,
}

pub async fn process(path: &Path, ctx: &ProcessContext) -> Result<ProcessorResult> {
    let owned: PathBuf = path.to_path_buf();
    let sheets = tokio::task::spawn_blocking(move || load_sheets(&owned))
        .await
        .map_err(Error::storage)??;

    let mut outcome = SheetOutcome::default();
    for grid in &sheets {
        extract_sheet(grid, &mut outcome);
    }

    let mut result = ProcessorResult::default();
    result.meta.total_rows = outcome.total_rows;
    result.meta.currency_hint = outcome.currency_hint;
    result.rows = outcome.rows;

    if outcome.failed.is_empty() {
        if result.meta.total_rows == 0 {
            result.warn(None, warning::EMPTY_DOCUMENT, "no data rows found");
        }
        result.meta.parsed_rows = result.rows.len();
        return Ok(result);
    }

    let mut failed = outcome.failed;
    if ctx.prefer_llm && ctx.capabilities.llm.enabled() {
        let payloads: Vec<Value> = failed.iter().map(|f| f.raw.clone()).collect();
        match ctx.capabilities.llm.extract_rows(&payloads).await {
            Ok(recovered) => {
                let mut still_failed = Vec::new();
                for (fail, extracted) in failed.into_iter().zip(recovered) {
                    match extracted {
                        Some(mut row) => {
                            row.raw_row = fail.raw;
                            result.rows.push(row);
                        }
                        None => still_failed.push(fail),
                    }
                }
                failed = still_failed;
            }
            Err(err) => {
                result.warn(None, warning::DEPENDENCY_UNAVAILABLE, err.to_string());
            }
        }
    }

    for fail in failed {
        result.warn(None, warning::UNPARSED_ROW, fail.warning_message);
    }
    result.meta.parsed_rows = result.rows.len();
    Ok(result)
}

fn load_sheets(path: &Path) -> Result<Vec<Vec<Vec<String>>>> {
    let is_csv = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("csv"))
        .unwrap_or(false);
    if is_csv {
        return Ok(vec![load_csv(path)?]);
    }

    let mut workbook = open_workbook_auto(path)
        .map_err(|err| Error::ProcessorFailure(format!("cannot open workbook: {err}")))?;
    let names: Vec<String> = workbook.sheet_names().to_vec();
    let mut sheets = Vec::with_capacity(names.len());
    for name in names {
        let range = workbook
            .worksheet_range(&name)
            .map_err(|err| Error::ProcessorFailure(format!("cannot read sheet {name}: {err}")))?;
        let grid: Vec<Vec<String>> = range
            .rows()
            .map(|row| row.iter().map(cell_to_string).collect())
            .collect();
        sheets.push(grid);
    }
    Ok(sheets)
}

fn load_csv(path: &Path) -> Result<Vec<Vec<String>>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|err| Error::ProcessorFailure(format!("cannot open csv: {err}")))?;
    let mut grid = Vec::new();
    for record in reader.records() {
        let record =
            record.map_err(|err| Error::ProcessorFailure(format!("csv read failed: {err}")))?;
        grid.push(record.iter().map(|cell| cell.to_string()).collect());
    }
    Ok(grid)
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < 1e15 {
                format!("{}", *f as i64)
            } else {
                f.to_string()
            }
        }
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => dt.to_string(),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Error(e) => format!("#ERR {e:?}"),
    }
}

fn extract_sheet(grid: &[Vec<String>], outcome: &mut SheetOutcome) {
    match find_header_row(grid) {
        Some((header_idx, mapping)) => {
            let headers = &grid[header_idx];
            for row in grid.iter().skip(header_idx + 1) {
                if row.iter().all(|cell| cell.trim().is_empty()) {
                    continue;
                }
                outcome.total_rows += 1;
                extract_mapped_row(row, headers, &mapping, outcome);
            }
        }
        None => extract_headerless(grid, outcome),
    }
}

fn raw_row_object(row: &[String], headers: &[String]) -> Value {
    let mut map = Map::new();
    for (idx, cell) in row.iter().enumerate() {
        let key = headers
            .get(idx)
            .map(|h| h.trim())
            .filter(|h| !h.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("col_{idx}"));
        map.insert(key, Value::String(cell.clone()));
    }
    Value::Object(map)
}

fn cell<'a>(row: &'a [String], mapping: &HashMap<Column, usize>, column: Column) -> Option<&'a str> {
    mapping
        .get(&column)
        .and_then(|idx| row.get(*idx))
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
}

fn extract_mapped_row(
    row: &[String],
    headers: &[String],
    mapping: &HashMap<Column, usize>,
    outcome: &mut SheetOutcome,
) {
    let raw = raw_row_object(row, headers);
    let description = cell(row, mapping, Column::Description)
        .map(clean_description)
        .or_else(|| cell(row, mapping, Column::Model).map(clean_description));
    let price = cell(row, mapping, Column::Price).and_then(parse_price);

    let (Some(description), Some((price, currency))) = (description, price) else {
        outcome.failed.push(FailedRow {
            warning_message: format!("row missing description or valid price: {raw}"),
            raw,
        });
        return;
    };

    if let Some(currency) = &currency {
        outcome
            .currency_hint
            .get_or_insert_with(|| currency.clone());
    }

    let mut offer = RawOffer::new(description, price, raw);
    offer.currency = currency;
    offer.brand = cell(row, mapping, Column::Brand).map(str::to_string);
    offer.model = cell(row, mapping, Column::Model).map(str::to_string);
    offer.upc = cell(row, mapping, Column::Upc).map(str::to_string);
    offer.quantity = cell(row, mapping, Column::Quantity).and_then(parse_quantity);
    offer.condition = cell(row, mapping, Column::Condition).map(str::to_string);
    offer.location = cell(row, mapping, Column::Location).map(str::to_string);
    offer.vendor_hint = cell(row, mapping, Column::Vendor).map(str::to_string);
    offer.notes = cell(row, mapping, Column::Notes).map(str::to_string);
    offer.min_order_quantity = cell(row, mapping, Column::MinOrder).and_then(parse_quantity);
    outcome.rows.push(offer);
}

/// Positional fallback: the first row holding a text cell immediately left
/// of a price-parsable cell fixes (description, price, quantity) columns for
/// the whole sheet.
fn extract_headerless(grid: &[Vec<String>], outcome: &mut SheetOutcome) {
    let mut layout: Option<(usize, usize)> = None;
    for row in grid {
        for idx in 0..row.len().saturating_sub(1) {
            let left = row[idx].trim();
            let right = row[idx + 1].trim();
            if !left.is_empty() && parse_price(left).is_none() && parse_price(right).is_some() {
                layout = Some((idx, idx + 1));
                break;
            }
        }
        if layout.is_some() {
            break;
        }
    }
    let Some((desc_idx, price_idx)) = layout else {
        return;
    };

    for row in grid {
        if row.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }
        outcome.total_rows += 1;
        let raw = json!(row);
        let description = row
            .get(desc_idx)
            .map(|s| clean_description(s))
            .filter(|s| !s.is_empty());
        let price = row.get(price_idx).map(String::as_str).and_then(parse_price);
        let (Some(description), Some((price, currency))) = (description, price) else {
            outcome.failed.push(FailedRow {
                warning_message: format!("headerless row not parseable: {raw}"),
                raw,
            });
            continue;
        };
        if let Some(currency) = &currency {
            outcome
                .currency_hint
                .get_or_insert_with(|| currency.clone());
        }
        let mut offer = RawOffer::new(description, price, raw);
        offer.currency = currency;
        offer.quantity = row.get(price_idx + 1).and_then(|q| parse_quantity(q));
        outcome.rows.push(offer);
    }
}
