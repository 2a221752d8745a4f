//! Timestamp formatting shared by the wire and the store.
//!
//! Stored timestamps are timezone-naive UTC (`NaiveDateTime`); on the wire
//! they are ISO-8601 with a trailing `Z`. These serde helpers bridge the two
//! so entity structs can be serialized directly in API responses.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

const WIRE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.fZ";

/// Renders a naive UTC timestamp in wire form.
pub fn to_wire(ts: &NaiveDateTime) -> String {
    ts.format(WIRE_FORMAT).to_string()
}

/// Accepts `2025-01-10T00:00:00Z`, the same without `Z`, full RFC 3339 with
/// an offset, or a bare `2025-01-10` date.
pub fn parse_wire(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc).naive_utc());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(dt);
    }
    if let Ok(date) = chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0);
    }
    None
}

/// Current instant, truncated to naive UTC.
pub fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

pub mod utc {
    use super::*;

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&to_wire(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(de)?;
        parse_wire(&raw).ok_or_else(|| D::Error::custom(format!("invalid timestamp: {raw}")))
    }
}

pub mod utc_opt {
    use super::*;

    pub fn serialize<S: Serializer>(
        ts: &Option<NaiveDateTime>,
        ser: S,
    ) -> Result<S::Ok, S::Error> {
        match ts {
            Some(ts) => ser.serialize_some(&to_wire(ts)),
            None => ser.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        de: D,
    ) -> Result<Option<NaiveDateTime>, D::Error> {
        let raw: Option<String> = Option::deserialize(de)?;
        match raw {
            None => Ok(None),
            Some(raw) if raw.trim().is_empty() => Ok(None),
            Some(raw) => parse_wire(&raw)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("invalid timestamp: {raw}"))),
        }
    }
}
