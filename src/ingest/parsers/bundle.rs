// src/ingest/parsers/bundle.rs
//! Simplified structured-indicator bundles: a top-level `objects` array
//! whose `indicator` entries carry a match pattern like
//! `[ipv4-addr:value = '1.2.3.4']`. Entries with an unrecognized pattern
//! shape are dropped, not errored.

use anyhow::{Context, Result};
use serde_json::{json, Value};

use crate::ingest::types::RawRecord;

pub fn parse(content: &str) -> Result<Vec<RawRecord>> {
    let doc: Value = serde_json::from_str(content).context("parsing indicator bundle")?;
    let objects = doc
        .get("objects")
        .and_then(|o| o.as_array())
        .context("bundle has no 'objects' array")?;

    let mut out = Vec::new();
    for (idx, obj) in objects.iter().enumerate() {
        if obj.get("type").and_then(|t| t.as_str()) != Some("indicator") {
            continue;
        }
        let Some(pattern) = obj.get("pattern").and_then(|p| p.as_str()) else {
            continue;
        };
        let Some((value, ioc_type)) = extract_from_pattern(pattern) else {
            continue;
        };

        let mut record = RawRecord::new().with_row(idx + 1);
        record.set("value", json!(value));
        record.set("type", json!(ioc_type));
        if let Some(name) = obj.get("name").and_then(|n| n.as_str()) {
            record.set("description", json!(name));
        }
        if let Some(labels) = obj.get("labels").and_then(|l| l.as_array()) {
            record.set("tags", Value::Array(labels.to_vec()));
        }
        if let Some(created) = obj.get("created").and_then(|c| c.as_str()) {
            record.set("first_seen", json!(created));
        }
        out.push(record);
    }
    Ok(out)
}

/// Pattern dialects recognized, by substring: file hashes, domain names,
/// IPv4 addresses and URLs. Returns (value, canonical type tag).
fn extract_from_pattern(pattern: &str) -> Option<(String, &'static str)> {
    let ioc_type = if pattern.contains("file:hashes") {
        "hash"
    } else if pattern.contains("domain-name") {
        "domain"
    } else if pattern.contains("ipv4-addr") {
        "ip"
    } else if pattern.contains("url") {
        "url"
    } else {
        return None;
    };

    let value = quoted_value(pattern)?;
    Some((value, ioc_type))
}

/// The compared value is the first single-quoted token after `=`.
fn quoted_value(pattern: &str) -> Option<String> {
    let after_eq = pattern.split_once('=')?.1;
    let start = after_eq.find('\'')? + 1;
    let rest = &after_eq[start..];
    let end = rest.find('\'')?;
    let value = rest[..end].trim();
    (!value.is_empty()).then(|| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUNDLE: &str = r#"{
        "type": "bundle",
        "objects": [
            {"type": "indicator", "pattern": "[ipv4-addr:value = '1.2.3.4']",
             "labels": ["malicious-activity"], "created": "2024-03-01T00:00:00Z"},
            {"type": "indicator", "pattern": "[domain-name:value = 'evil.com']"},
            {"type": "indicator", "pattern": "[file:hashes.'SHA-256' = 'aabbcc']"},
            {"type": "indicator", "pattern": "[url:value = 'http://evil.com/x']"},
            {"type": "indicator", "pattern": "[windows-registry-key:key = 'HKLM\\x']"},
            {"type": "malware", "name": "not an indicator"}
        ]
    }"#;

    #[test]
    fn extracts_known_pattern_shapes() {
        let records = parse(BUNDLE).unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(records[0].get_str("value").unwrap(), "1.2.3.4");
        assert_eq!(records[0].get_str("type").unwrap(), "ip");
        assert_eq!(records[1].get_str("type").unwrap(), "domain");
        assert_eq!(records[2].get_str("type").unwrap(), "hash");
        assert_eq!(records[3].get_str("type").unwrap(), "url");
    }

    #[test]
    fn unknown_patterns_and_non_indicators_are_dropped() {
        let records = parse(BUNDLE).unwrap();
        assert!(records
            .iter()
            .all(|r| r.get_str("value").unwrap() != "HKLM\\x"));
    }

    #[test]
    fn labels_become_tags() {
        let records = parse(BUNDLE).unwrap();
        assert!(records[0].get("tags").unwrap().is_array());
    }

    #[test]
    fn missing_objects_array_is_a_batch_error() {
        assert!(parse(r#"{"type":"bundle"}"#).is_err());
        assert!(parse("not json").is_err());
    }
}
