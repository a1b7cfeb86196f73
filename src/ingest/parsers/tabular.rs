// src/ingest/parsers/tabular.rs
//! Tabular feeds with a header row. Knows one alternate column layout
//! (url/url_status/threat/tags, as published by URL blocklists) and falls
//! back to generic header-name mapping otherwise.

use serde_json::json;

use crate::ingest::types::RawRecord;

pub fn parse(content: &str) -> Vec<RawRecord> {
    let mut lines = content
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty());

    // Leading comment block precedes the header in several public feeds.
    let header = loop {
        match lines.next() {
            Some((_, l)) if l.starts_with('#') => continue,
            Some((_, l)) => break l,
            None => return Vec::new(),
        }
    };

    let columns: Vec<String> = header
        .split(',')
        .map(|c| c.trim().to_ascii_lowercase())
        .collect();
    // The url-blocklist layout needs its distinctive column set; a generic
    // header that merely carries a `url` reference column keeps its own
    // `value` field.
    let url_layout = columns.iter().any(|c| c == "url")
        && columns.iter().any(|c| c == "threat" || c == "url_status")
        && !columns.iter().any(|c| c == "value");

    let mut out = Vec::new();
    for (row, line) in lines {
        if line.starts_with('#') {
            continue;
        }
        let cells: Vec<&str> = line.split(',').map(str::trim).collect();
        if cells.iter().all(|c| c.is_empty()) {
            continue;
        }
        let record = if url_layout {
            map_url_layout(&columns, &cells, row)
        } else {
            map_generic(&columns, &cells, row)
        };
        if !record.is_empty() {
            out.push(record);
        }
    }
    out
}

/// url/url_status/threat/tags → canonical value/type/severity/tags.
fn map_url_layout(columns: &[String], cells: &[&str], row: usize) -> RawRecord {
    let mut record = RawRecord::new().with_row(row);
    for (col, cell) in columns.iter().zip(cells) {
        if cell.is_empty() {
            continue;
        }
        match col.as_str() {
            "url" => {
                record.set("value", json!(*cell));
                record.set("type", json!("url"));
            }
            "threat" => record.set("severity", json!(*cell)),
            "tags" => record.set("tags", json!(*cell)),
            "url_status" => record.set("status", json!(*cell)),
            other => record.set(other, json!(*cell)),
        }
    }
    record
}

fn map_generic(columns: &[String], cells: &[&str], row: usize) -> RawRecord {
    let mut record = RawRecord::new().with_row(row);
    for (col, cell) in columns.iter().zip(cells) {
        if !cell.is_empty() {
            record.set(col, json!(*cell));
        }
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_layout_maps_to_canonical_fields() {
        let content = "url,url_status,threat,tags\nhttp://evil.com,online,malware,exe|zip\n";
        let records = parse(content);
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.get_str("value").unwrap(), "http://evil.com");
        assert_eq!(r.get_str("type").unwrap(), "url");
        assert_eq!(r.get_str("severity").unwrap(), "malware");
        assert_eq!(r.source_row, Some(2));
    }

    #[test]
    fn generic_header_with_url_column_keeps_the_explicit_value() {
        let content = "value,type,url\n1.2.3.4,ip,http://report.example/ref\n";
        let records = parse(content);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get_str("value").unwrap(), "1.2.3.4");
        assert_eq!(records[0].get_str("type").unwrap(), "ip");
        assert_eq!(
            records[0].get_str("url").unwrap(),
            "http://report.example/ref"
        );
    }

    #[test]
    fn bare_url_column_without_blocklist_columns_is_generic() {
        let records = parse("url,notes\nhttp://evil.com,seen twice\n");
        assert_eq!(records.len(), 1);
        assert!(records[0].get_str("value").is_none());
        assert_eq!(records[0].get_str("url").unwrap(), "http://evil.com");
    }

    #[test]
    fn generic_headers_pass_through() {
        let content = "value,type,confidence\n1.2.3.4,ip,80\n";
        let records = parse(content);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get_str("value").unwrap(), "1.2.3.4");
        assert_eq!(records[0].get_str("confidence").unwrap(), "80");
    }

    #[test]
    fn leading_comments_and_empty_rows_are_skipped() {
        let content = "# feed dump\n# generated daily\nvalue,type\n,,\n5.6.7.8,ip\n";
        let records = parse(content);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get_str("value").unwrap(), "5.6.7.8");
        assert_eq!(records[0].source_row, Some(5));
    }

    #[test]
    fn empty_document_yields_nothing() {
        assert!(parse("").is_empty());
        assert!(parse("# only comments\n").is_empty());
    }
}
