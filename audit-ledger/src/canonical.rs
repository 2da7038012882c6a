//! Canonical encoding for cryptographic hashing
//!
//! Ensures a byte-for-byte deterministic representation of structured
//! payloads, independent of how they were built or where they were stored:
//!
//! - Object keys sorted bytewise, recursively
//! - Numbers in one textual form (`22500`, `22500.0` and `2.25e4` are equal)
//! - RFC 3339 date-times rewritten as UTC with millisecond precision
//! - Storage wrappers (`{"$oid": ..}`, `{"$date": ..}`, `{"$numberLong": ..}`)
//!   unwrapped to the plain value they carry
//!
//! All digest computation flows through [`CanonicalBytes`].

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::crypto::sha256_hex;
use crate::Result;

/// Normalized value tree, ready to be written out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Canonical {
    /// JSON null
    Null,
    /// JSON boolean
    Bool(bool),
    /// Number in its normalized textual form
    Number(String),
    /// String (dates already normalized)
    String(String),
    /// Array, order preserved
    Array(Vec<Canonical>),
    /// Object, keys sorted
    Object(BTreeMap<String, Canonical>),
}

/// Canonical bytes of a value. The only input the ledger ever digests.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalBytes(String);

impl CanonicalBytes {
    /// Canonicalize any serializable value
    pub fn new<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        let value = serde_json::to_value(value)?;
        Ok(Self::from_value(&value))
    }

    /// Canonicalize a JSON value
    pub fn from_value(value: &Value) -> Self {
        let mut out = String::new();
        write_canonical(&canonicalize(value), &mut out);
        Self(out)
    }

    /// Canonical text
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Canonical bytes
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Take the canonical text
    pub fn into_string(self) -> String {
        self.0
    }

    /// Lowercase hex SHA-256 of the canonical bytes
    pub fn digest(&self) -> String {
        sha256_hex(self.as_bytes())
    }
}

impl fmt::Display for CanonicalBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hash any serializable value through its canonical encoding
pub fn hash_value<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(CanonicalBytes::new(value)?.digest())
}

/// Normalize a JSON value
pub fn canonicalize(value: &Value) -> Canonical {
    match value {
        Value::Null => Canonical::Null,
        Value::Bool(b) => Canonical::Bool(*b),
        Value::Number(n) => Canonical::Number(normalize_number(&n.to_string())),
        Value::String(s) => Canonical::String(normalize_string(s)),
        Value::Array(items) => Canonical::Array(items.iter().map(canonicalize).collect()),
        Value::Object(map) => {
            if map.len() == 1 {
                if let Some((key, inner)) = map.iter().next() {
                    if let Some(unwrapped) = unwrap_storage_wrapper(key, inner) {
                        return unwrapped;
                    }
                }
            }
            Canonical::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), canonicalize(v)))
                    .collect(),
            )
        }
    }
}

/// Rewrite a number as the shortest exact decimal.
///
/// Values outside the `Decimal` range keep the textual form they arrived in.
pub fn normalize_number(text: &str) -> String {
    let cleaned = text.trim().to_ascii_lowercase().replace("e+", "e");
    let parsed = if cleaned.contains('e') {
        Decimal::from_scientific(&cleaned)
    } else {
        Decimal::from_str(&cleaned)
    };

    match parsed {
        Ok(d) if d.is_zero() => "0".to_string(),
        Ok(d) => d.normalize().to_string(),
        Err(_) => cleaned,
    }
}

/// Rewrite RFC 3339 date-times in one form; leave other strings untouched
pub fn normalize_string(s: &str) -> String {
    match DateTime::parse_from_rfc3339(s) {
        Ok(dt) => format_timestamp(&dt.with_timezone(&Utc)),
        Err(_) => s.to_string(),
    }
}

/// Canonical textual form of an instant
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn unwrap_storage_wrapper(key: &str, inner: &Value) -> Option<Canonical> {
    match (key, inner) {
        ("$oid", Value::String(s)) => Some(Canonical::String(s.clone())),
        ("$date", Value::String(s)) => Some(Canonical::String(normalize_string(s))),
        ("$date", Value::Number(n)) => n.as_i64().and_then(date_from_millis),
        ("$date", Value::Object(obj)) => obj
            .get("$numberLong")
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<i64>().ok())
            .and_then(date_from_millis),
        ("$numberLong" | "$numberInt" | "$numberDouble" | "$numberDecimal", Value::String(s)) => {
            let normalized = normalize_number(s);
            if Decimal::from_str(&normalized).is_ok() {
                Some(Canonical::Number(normalized))
            } else {
                // NaN, Infinity and friends
                Some(Canonical::String(s.clone()))
            }
        }
        _ => None,
    }
}

fn date_from_millis(millis: i64) -> Option<Canonical> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .map(|dt| Canonical::String(format_timestamp(&dt)))
}

fn write_canonical(value: &Canonical, out: &mut String) {
    match value {
        Canonical::Null => out.push_str("null"),
        Canonical::Bool(true) => out.push_str("true"),
        Canonical::Bool(false) => out.push_str("false"),
        Canonical::Number(n) => out.push_str(n),
        Canonical::String(s) => write_string(s, out),
        Canonical::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Canonical::Object(map) => {
            out.push('{');
            for (i, (key, item)) in map.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
    }
}

fn write_string(s: &str, out: &mut String) {
    // serde_json's escaping is the reference JSON string encoding
    out.push_str(&Value::String(s.to_string()).to_string());
}
