// src/ingest/parsers/structured.rs
//! JSON feeds: a top-level array, an object wrapping one of a few known
//! array keys, or a single-record document.

use anyhow::{Context, Result};
use serde_json::{json, Map, Value};

use crate::ingest::types::RawRecord;

/// Array keys probed, in order, on a top-level object.
const ARRAY_KEYS: &[&str] = &["iocs", "indicators", "data", "items"];

pub fn parse(content: &str) -> Result<Vec<RawRecord>> {
    let doc: Value = serde_json::from_str(content).context("parsing structured feed document")?;

    let items: Vec<Value> = match doc {
        Value::Array(items) => items,
        Value::Object(ref map) => match find_array(map) {
            Some(items) => items.to_vec(),
            // No known array key: the document itself is one record.
            None => vec![doc],
        },
        other => vec![other],
    };

    Ok(items
        .into_iter()
        .enumerate()
        .filter_map(|(idx, item)| to_record(item, idx + 1))
        .collect())
}

fn find_array<'a>(map: &'a Map<String, Value>) -> Option<&'a Vec<Value>> {
    ARRAY_KEYS.iter().find_map(|k| map.get(*k)?.as_array())
}

/// Objects map field-for-field; a bare string becomes the value; other
/// shapes are dropped, not errored.
fn to_record(item: Value, row: usize) -> Option<RawRecord> {
    let mut record = RawRecord::new().with_row(row);
    match item {
        Value::Object(map) => {
            for (k, v) in map {
                record.fields.insert(k, v);
            }
        }
        Value::String(s) => record.set("value", json!(s)),
        _ => return None,
    }
    Some(record)
}
