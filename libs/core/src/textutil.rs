//! Small text normalization helpers shared by processors, resolution, and
//! the artefact store.

use chrono::{Datelike, NaiveDateTime};
use uuid::Uuid;

const MAX_FILENAME_BYTES: usize = 120;

/// Replaces every character outside `[A-Za-z0-9._-]` with `_` and caps the
/// result at 120 bytes. The output is pure ASCII, so the byte cap never
/// splits a character.
pub fn sanitize_filename(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    out.truncate(MAX_FILENAME_BYTES);
    if out.is_empty() {
        out.push_str("upload");
    }
    out
}

/// Relative storage key for an uploaded artefact:
/// `<yyyy>/<mm>/<uuid>-<sanitized_filename>`.
pub fn storage_key(now: NaiveDateTime, id: Uuid, original_filename: &str) -> String {
    format!(
        "{:04}/{:02}/{}-{}",
        now.year(),
        now.month(),
        id,
        sanitize_filename(original_filename)
    )
}

/// Collapses internal whitespace runs and trims. Used for canonical product
/// names and alias comparisons.
pub fn clean_description(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Digits-only UPC/EAN normalization. Returns `None` unless the digit count
/// is plausible for UPC-A/EAN-13 family codes (11 to 14 digits).
pub fn normalize_upc(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if (11..=14).contains(&digits.len()) {
        Some(digits)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_and_truncates() {
        assert_eq!(sanitize_filename("price list (jan).xlsx"), "price_list__jan_.xlsx");
        let long = "a".repeat(400);
        assert_eq!(sanitize_filename(&long).len(), 120);
        assert_eq!(sanitize_filename("äöü"), "___");
        assert_eq!(sanitize_filename(""), "upload");
    }

    #[test]
    fn storage_key_layout() {
        let ts = crate::timefmt::parse_wire("2025-03-07T10:00:00Z").unwrap();
        let id = Uuid::nil();
        assert_eq!(
            storage_key(ts, id, "list.csv"),
            "2025/03/00000000-0000-0000-0000-000000000000-list.csv"
        );
    }

    #[test]
    fn clean_description_collapses_whitespace() {
        assert_eq!(clean_description("  iPhone   11\t64GB "), "iPhone 11 64GB");
    }

    #[test]
    fn upc_normalization_checks_length() {
        assert_eq!(normalize_upc("0 12345 67890 5"), Some("012345678905".into()));
        assert_eq!(normalize_upc("123"), None);
        assert_eq!(normalize_upc("not-a-upc"), None);
    }
}
