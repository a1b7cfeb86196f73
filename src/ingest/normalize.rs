// src/ingest/normalize.rs
//! Field normalization and validation for raw feed records.
//!
//! `normalize` is forgiving: missing or malformed metadata falls back to
//! hard defaults. `validate` is strict: it reports, it never corrects.

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;
use serde_json::Value;

use crate::ingest::types::{IndicatorType, NormalizedIndicator, RawRecord};

const DEFAULT_CONFIDENCE: i64 = 50;
const DEFAULT_SCORE: f64 = 5.0;
const DEFAULT_SEVERITY: &str = "medium";

/// Field names checked, in priority order, for the indicator value.
const VALUE_FIELDS: &[&str] = &["ioc_value", "value", "indicator", "ioc"];
/// Field names checked, in priority order, for the indicator type.
const TYPE_FIELDS: &[&str] = &["indicator_type", "type", "ioc_type"];

fn re_hash() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"^[0-9a-fA-F]{32}$|^[0-9a-fA-F]{40}$|^[0-9a-fA-F]{64}$|^[0-9a-fA-F]{128}$").unwrap())
}

fn re_email() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap())
}

fn re_domain() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?\.)+[A-Za-z]{2,}$").unwrap()
    })
}

/// Dotted-quad shape check, each octet 0-255.
pub fn looks_like_ipv4(s: &str) -> bool {
    let parts: Vec<&str> = s.split('.').collect();
    parts.len() == 4
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.len() <= 3 && p.parse::<u8>().is_ok())
}

/// Infer the indicator type from the value shape. Ordered: URL, hash,
/// email, IPv4, domain, then `Unknown`. IPv4 runs before the domain
/// check because a dotted quad also matches the domain pattern.
pub fn infer_type(value: &str) -> IndicatorType {
    let v = value.trim();
    if v.starts_with("http://") || v.starts_with("https://") || v.starts_with("ftp://") {
        IndicatorType::Url
    } else if re_hash().is_match(v) {
        IndicatorType::Hash
    } else if re_email().is_match(v) {
        IndicatorType::Email
    } else if looks_like_ipv4(v) {
        IndicatorType::Ip
    } else if re_domain().is_match(v) {
        IndicatorType::Domain
    } else {
        IndicatorType::Unknown
    }
}

fn first_string(record: &RawRecord, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| record.get_str(k))
        .map(|s| s.trim().to_string())
        .find(|s| !s.is_empty())
}

/// Tags: a comma-separated string splits into trimmed entries; a JSON array
/// coerces element-wise; any other shape becomes the empty list. Order kept.
pub fn coerce_tags(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) => s
            .split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .filter(|t| !t.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

fn coerce_i64(value: Option<&Value>, default: i64, min: i64, max: i64) -> i64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    parsed.unwrap_or(default).clamp(min, max)
}

fn coerce_f64(value: Option<&Value>, default: f64, min: f64, max: f64) -> f64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.unwrap_or(default).clamp(min, max)
}

fn coerce_timestamp(value: Option<&Value>, fallback: DateTime<Utc>) -> DateTime<Utc> {
    match value {
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(s.trim())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(fallback),
        Some(Value::Number(n)) => n
            .as_i64()
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
            .unwrap_or(fallback),
        _ => fallback,
    }
}

/// Map a raw record onto the canonical indicator shape. Never fails: a
/// record with no usable value still yields an indicator (empty value),
/// which `validate` then rejects.
pub fn normalize(record: &RawRecord, source_feed: &str) -> NormalizedIndicator {
    let now = Utc::now();
    let value = first_string(record, VALUE_FIELDS).unwrap_or_default();

    let explicit = first_string(record, TYPE_FIELDS);
    let indicator_type = match explicit.as_deref() {
        Some(raw) => IndicatorType::parse(raw).unwrap_or(IndicatorType::Unknown),
        None => infer_type(&value),
    };

    NormalizedIndicator {
        indicator_type,
        indicator_value: value,
        source_feed: source_feed.to_string(),
        severity: first_string(record, &["severity", "threat_level"])
            .map(|s| s.to_ascii_lowercase())
            .unwrap_or_else(|| DEFAULT_SEVERITY.to_string()),
        confidence: coerce_i64(record.get("confidence"), DEFAULT_CONFIDENCE, 0, 100),
        score: coerce_f64(record.get("score"), DEFAULT_SCORE, 0.0, 10.0),
        tags: coerce_tags(record.get("tags")),
        first_seen: coerce_timestamp(record.get("first_seen"), now),
        last_seen: coerce_timestamp(record.get("last_seen"), now),
        created_at: now,
        updated_at: now,
        is_active: true,
    }
}

/// Pure validation pass. Returns the list of problems; empty means valid.
/// No silent correction happens here, unlike normalization.
pub fn validate(indicator: &NormalizedIndicator, explicit_type: Option<&str>) -> Vec<String> {
    let mut errors = Vec::new();

    if indicator.indicator_value.is_empty() {
        errors.push("missing indicator value".to_string());
    }

    // An explicit type outside the vocabulary must error, not degrade.
    if let Some(raw) = explicit_type {
        if IndicatorType::parse(raw).is_none() {
            errors.push(format!("unrecognized indicator type '{raw}'"));
        }
    }

    if !(0.0..=10.0).contains(&indicator.score) {
        errors.push(format!("score {} outside [0,10]", indicator.score));
    }
    if !(0..=100).contains(&indicator.confidence) {
        errors.push(format!("confidence {} outside [0,100]", indicator.confidence));
    }

    errors
}

/// The explicit type string carried by a record, if any, used so that
/// `validate` can reject vocabulary violations the normalizer papered over.
pub fn explicit_type(record: &RawRecord) -> Option<String> {
    first_string(record, TYPE_FIELDS)
}
