// src/ingest/parsers/delimited.rs
//! Line-delimited text feeds: one indicator per line, `#` comments, plus a
//! pipe-style `value#score#confidence#description` variant some blocklists
//! publish.

use serde_json::json;

use crate::ingest::normalize::looks_like_ipv4;
use crate::ingest::types::RawRecord;

const FIELD_SEP: char = '#';

pub fn parse(content: &str) -> Vec<RawRecord> {
    let mut out = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(FIELD_SEP) {
            continue;
        }
        let row = idx + 1;
        if let Some(record) = parse_hash_delimited(line, row) {
            out.push(record);
        } else {
            let mut record = RawRecord::new().with_row(row);
            record.set("value", json!(line));
            out.push(record);
        }
    }
    out
}

/// `value#score#confidence#description#...`: only treated that way when the
/// line carries at least three separators and the first field is an IPv4
/// dotted quad; anything else is a plain single-value line.
fn parse_hash_delimited(line: &str, row: usize) -> Option<RawRecord> {
    if line.matches(FIELD_SEP).count() < 3 {
        return None;
    }
    let fields: Vec<&str> = line.split(FIELD_SEP).map(str::trim).collect();
    if !looks_like_ipv4(fields[0]) {
        return None;
    }

    let mut record = RawRecord::new().with_row(row);
    record.set("value", json!(fields[0]));
    if let Some(score) = fields.get(1).filter(|s| !s.is_empty()) {
        record.set("score", json!(score));
    }
    if let Some(confidence) = fields.get(2).filter(|s| !s.is_empty()) {
        record.set("confidence", json!(confidence));
    }
    if let Some(description) = fields.get(3).filter(|s| !s.is_empty()) {
        record.set("description", json!(description));
    }
    Some(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_blanks_and_comments() {
        let content = "# blocklist v2\n\n1.2.3.4\n  \nevil.com\n";
        let records = parse(content);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get_str("value").unwrap(), "1.2.3.4");
        assert_eq!(records[0].source_row, Some(3));
        assert_eq!(records[1].get_str("value").unwrap(), "evil.com");
    }

    #[test]
    fn hash_delimited_variant_needs_ipv4_first_field() {
        let records = parse("5.6.7.8#8.5#90#botnet c2#extra\n");
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.get_str("value").unwrap(), "5.6.7.8");
        assert_eq!(r.get_str("score").unwrap(), "8.5");
        assert_eq!(r.get_str("confidence").unwrap(), "90");
        assert_eq!(r.get_str("description").unwrap(), "botnet c2");
    }

    #[test]
    fn non_ipv4_first_field_stays_a_single_value() {
        let records = parse("evil.com#a#b#c\n");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get_str("value").unwrap(), "evil.com#a#b#c");
        assert!(records[0].get("score").is_none());
    }

    #[test]
    fn too_few_separators_is_a_plain_line() {
        let records = parse("1.2.3.4#5\n");
        assert_eq!(records[0].get_str("value").unwrap(), "1.2.3.4#5");
    }
}
