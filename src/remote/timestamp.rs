//! Timestamp normalization at the remote boundary.
//!
//! The cache stores dates as RFC 3339 strings (sortable, pure JSON); the
//! remote wire format may deliver either the same strings or epoch
//! milliseconds. Both shapes normalize to `DateTime<Utc>` here, so nothing
//! downstream inspects the representation.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum WireTimestamp {
  Text(String),
  Millis(i64),
}

/// Fixed-width UTC form: lexicographic order matches chronological order,
/// so string comparison on the wire behaves like date comparison.
pub fn format(date: &DateTime<Utc>) -> String {
  date.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn serialize<S: Serializer>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
  serializer.serialize_str(&format(date))
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
  match WireTimestamp::deserialize(deserializer)? {
    WireTimestamp::Text(s) => DateTime::parse_from_rfc3339(&s)
      .map(|dt| dt.with_timezone(&Utc))
      .map_err(|e| D::Error::custom(format!("invalid timestamp '{}': {}", s, e))),
    WireTimestamp::Millis(ms) => Utc
      .timestamp_millis_opt(ms)
      .single()
      .ok_or_else(|| D::Error::custom(format!("timestamp out of range: {}", ms))),
  }
}
