//! Free-form price-line parser, used for WhatsApp transcripts, live chat
//! messages, and text recovered from documents.
//!
//! A price token is a number carrying a currency marker (symbol prefix or
//! code suffix); when a line has no marked token, a decimal-pointed number
//! is accepted as a fallback. Bare integers are never prices; `iPhone 15`
//! must not become a 15-dollar offer. Each price token in a candidate line
//! yields one `RawOffer` whose description is the line minus price tokens.

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_segmentation::UnicodeSegmentation;

use pricebot_core::{Error, ProcessorResult, RawOffer, Result, clean_description, warning};

use crate::ProcessContext;
use crate::numeric::parse_price;

static PRICE_MARKED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?ix)
        (?: [$€£¥] \s* \d[\d,]* (?:\.\d+)?        # symbol prefix
          | \d[\d,]* (?:\.\d+)? \s* (?:usd|eur|gbp|cad|aed|mxn|jpy|cny) \b  # code suffix
        )",
    )
    .expect("price regex")
});

static PRICE_DECIMAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d[\d,]*\.\d{1,2}\b").expect("decimal regex"));

static QUANTITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?ix)\b(?: x\s*(\d+) | (\d+)\s*(?:pcs|pc|units|unit)\b | qty[:\s]*(\d+) )")
        .expect("quantity regex")
});

static CONDITION_WORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(like\s+new|refurbished|refurb|used|new)\b").expect("condition regex")
});

// Grade tokens are only conditions when they stand alone, uppercase.
static CONDITION_GRADE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(^|[\s,/(])(A-|A|B)($|[\s,/)])").expect("grade regex"));

static TRANSCRIPT_PREFIX: Lazy<Regex> = Lazy::new(|| {
    // Both common WhatsApp export shapes:
    //   [12/01/2025, 10:31:22] Ana Phones: iPhone 15 $900
    //   12/01/2025, 10:31 - Ana Phones: iPhone 15 $900
    Regex::new(
        r"(?x)^\s*
        \[? \d{1,4}[./-]\d{1,2}[./-]\d{2,4} ,? \s+ \d{1,2}:\d{2}(?::\d{2})? (?:\s*[APap][Mm])? \]?
        \s* (?:-\s*)?
        (?P<sender>[^:]{1,64}) : \s (?P<rest>.*)$",
    )
    .expect("transcript regex")
});

/// WhatsApp system notices and media placeholders that carry no offer data.
const SYSTEM_NOTICES: &[&str] = &[
    "image omitted",
    "video omitted",
    "audio omitted",
    "sticker omitted",
    "document omitted",
    "<media omitted>",
    "media omitted",
    "this message was deleted",
    "you deleted this message",
    "messages and calls are end-to-end encrypted",
    "created group",
    "added you",
    "joined using this group's invite link",
    "changed the subject",
    "changed this group's icon",
    "missed voice call",
    "missed video call",
];

pub async fn process(path: &Path, ctx: &ProcessContext) -> Result<ProcessorResult> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|err| Error::ProcessorFailure(format!("cannot read text file: {err}")))?;
    Ok(parse_transcript(&text, &ctx.default_currency))
}

/// Parses a WhatsApp transcript export: consecutive lines group under the
/// last `[timestamp] Sender:` prefix and the sender becomes the offers'
/// `vendor_hint`.
pub fn parse_transcript(text: &str, default_currency: &str) -> ProcessorResult {
    let mut result = ProcessorResult::default();
    let mut current_sender: Option<String> = None;

    for (line_idx, raw_line) in text.lines().enumerate() {
        let (sender, line) = match TRANSCRIPT_PREFIX.captures(raw_line) {
            Some(caps) => {
                let sender = caps.name("sender").map(|m| m.as_str().trim().to_string());
                current_sender = sender.clone();
                (sender, caps.name("rest").map(|m| m.as_str()).unwrap_or(""))
            }
            None => (current_sender.clone(), raw_line),
        };
        parse_into(line, line_idx, sender.as_deref(), default_currency, &mut result);
    }
    result.meta.parsed_rows = result.rows.len();
    result
}

/// Parses free-form lines with no transcript structure (document text, live
/// message bodies).
pub fn parse_lines(text: &str, default_currency: &str) -> ProcessorResult {
    let mut result = ProcessorResult::default();
    for (line_idx, line) in text.lines().enumerate() {
        parse_into(line, line_idx, None, default_currency, &mut result);
    }
    result.meta.parsed_rows = result.rows.len();
    result
}

fn parse_into(
    line: &str,
    line_idx: usize,
    sender: Option<&str>,
    default_currency: &str,
    result: &mut ProcessorResult,
) {
    let trimmed = line.trim();
    if trimmed.is_empty() || is_reaction(trimmed) || is_system_notice(trimmed) {
        return;
    }

    let mut spans: Vec<(usize, usize)> = PRICE_MARKED
        .find_iter(trimmed)
        .map(|m| (m.start(), m.end()))
        .collect();
    if spans.is_empty() {
        spans = PRICE_DECIMAL
            .find_iter(trimmed)
            .map(|m| (m.start(), m.end()))
            .collect();
    }
    if spans.is_empty() {
        return;
    }
    result.meta.total_rows += 1;

    // Description = the line minus every price token.
    let mut description = String::with_capacity(trimmed.len());
    let mut cursor = 0;
    for (start, end) in &spans {
        description.push_str(&trimmed[cursor..*start]);
        cursor = *end;
    }
    description.push_str(&trimmed[cursor..]);

    let quantity = QUANTITY.captures(&description).and_then(|caps| {
        caps.iter()
            .skip(1)
            .flatten()
            .next()
            .and_then(|m| m.as_str().parse::<i64>().ok())
    });
    let description = QUANTITY.replace_all(&description, " ");

    let condition = CONDITION_WORD
        .find(&description)
        .map(|m| m.as_str().to_ascii_lowercase())
        .or_else(|| {
            CONDITION_GRADE
                .captures(&description)
                .and_then(|caps| caps.get(2))
                .map(|m| m.as_str().to_string())
        });
    let description = CONDITION_WORD.replace_all(&description, " ");
    let description = CONDITION_GRADE.replace(&description, "$1$3");

    let description = clean_description(
        description
            .trim_matches(|c: char| c.is_whitespace() || matches!(c, '-' | '@' | ':' | ',' | '|'))
            .trim(),
    );
    if !description.chars().any(|c| c.is_alphabetic()) {
        result.warn(
            Some(line_idx),
            warning::UNPARSED_ROW,
            format!("price with no item text: {trimmed}"),
        );
        return;
    }

    for (start, end) in spans {
        let token = &trimmed[start..end];
        let Some((price, currency)) = parse_price(token) else {
            continue;
        };
        let mut offer = RawOffer::new(
            description.clone(),
            price,
            serde_json::json!({ "line": trimmed, "line_number": line_idx }),
        );
        offer.currency = Some(currency.unwrap_or_else(|| default_currency.to_string()));
        offer.quantity = quantity;
        offer.condition = condition.clone();
        offer.vendor_hint = sender.map(str::to_string);
        result.rows.push(offer);
    }
}

/// True for message bodies that are platform noise rather than content:
/// reactions and WhatsApp system notices. The live ingest endpoint uses this
/// as its filtered-event rule.
pub fn is_filtered_event(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty() || is_reaction(trimmed) || is_system_notice(trimmed)
}

/// Single-grapheme lines with no alphanumeric content are reactions.
fn is_reaction(line: &str) -> bool {
    let graphemes: Vec<&str> = line.graphemes(true).collect();
    graphemes.len() == 1 && !line.chars().any(|c| c.is_alphanumeric())
}

fn is_system_notice(line: &str) -> bool {
    let lowered = line.to_lowercase();
    // "X left" is only a notice as a full suffix; "2 left in stock" is data.
    if lowered.ends_with(" left") {
        return true;
    }
    SYSTEM_NOTICES.iter().any(|notice| lowered.contains(notice))
}
