//! Cell and token coercion shared by the spreadsheet and line parsers.

use rust_decimal::Decimal;

/// Currency symbols and codes the parsers recognize. Codes are matched as
/// standalone tokens, case-insensitively.
pub const CURRENCY_CODES: &[&str] = &["usd", "eur", "gbp", "cad", "aed", "mxn", "jpy", "cny"];

pub fn currency_for_symbol(symbol: char) -> Option<&'static str> {
    match symbol {
        '$' => Some("USD"),
        '€' => Some("EUR"),
        '£' => Some("GBP"),
        '¥' => Some("JPY"),
        _ => None,
    }
}

/// Parses a price cell: strips currency symbols, thousands separators and
/// whitespace, and returns the decimal plus a currency hint when the cell
/// carried one. Returns `None` for empty, non-numeric, or non-positive
/// values.
pub fn parse_price(raw: &str) -> Option<(Decimal, Option<String>)> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let mut currency: Option<String> = None;
    let mut cleaned = String::with_capacity(trimmed.len());
    for c in trimmed.chars() {
        if let Some(code) = currency_for_symbol(c) {
            currency.get_or_insert_with(|| code.to_string());
        } else if c.is_ascii_digit() || c == '.' || c == '-' {
            cleaned.push(c);
        } else if c == ',' || c.is_whitespace() {
            // thousands separator / padding
        } else if c.is_ascii_alphabetic() {
            cleaned.push(c);
        } else {
            return None;
        }
    }

    // A trailing or leading currency code like "485.00 USD".
    let lowered = cleaned.to_ascii_lowercase();
    for code in CURRENCY_CODES {
        if let Some(stripped) = lowered.strip_suffix(code).or_else(|| lowered.strip_prefix(code)) {
            currency.get_or_insert_with(|| code.to_ascii_uppercase());
            cleaned = stripped.to_string();
            break;
        }
    }
    if cleaned.chars().any(|c| c.is_ascii_alphabetic()) {
        return None;
    }

    let value = cleaned.parse::<Decimal>().ok()?;
    if value <= Decimal::ZERO {
        return None;
    }
    Some((value, currency))
}

/// Quantity cells: plain integers, optionally suffixed (`150 pcs`, `10+`).
pub fn parse_quantity(raw: &str) -> Option<i64> {
    let digits: String = raw
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == ',')
        .filter(|c| c.is_ascii_digit())
        .collect();
    let value = digits.parse::<i64>().ok()?;
    (value > 0).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_parsing_strips_noise() {
        assert_eq!(
            parse_price("$1,485.00"),
            Some((Decimal::new(148500, 2), Some("USD".into())))
        );
        assert_eq!(parse_price(" 600 "), Some((Decimal::new(600, 0), None)));
        assert_eq!(
            parse_price("485.00 USD"),
            Some((Decimal::new(48500, 2), Some("USD".into())))
        );
        assert_eq!(
            parse_price("€72,50"),
            Some((Decimal::new(7250, 0), Some("EUR".into())))
        );
    }

    #[test]
    fn price_parsing_rejects_junk() {
        assert_eq!(parse_price(""), None);
        assert_eq!(parse_price("call for price"), None);
        assert_eq!(parse_price("-12.00"), None);
        assert_eq!(parse_price("0"), None);
        assert_eq!(parse_price("N/A"), None);
    }

    #[test]
    fn quantity_parsing() {
        assert_eq!(parse_quantity("150"), Some(150));
        assert_eq!(parse_quantity("1,200 pcs"), Some(1200));
        assert_eq!(parse_quantity("10+"), Some(10));
        assert_eq!(parse_quantity("none"), None);
        assert_eq!(parse_quantity("0"), None);
    }
}
