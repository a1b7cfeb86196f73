// src/ingest/parsers/mod.rs
//! Format detection and dispatch. Parsers are pure: bytes in, raw
//! records out. A malformed document fails the whole batch; a malformed
//! row is dropped or row-tagged, never fatal.

pub mod bundle;
pub mod delimited;
pub mod structured;
pub mod tabular;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::ingest::types::RawRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedFormat {
    Delimited,
    Tabular,
    Structured,
    Bundle,
}

impl FeedFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedFormat::Delimited => "delimited",
            FeedFormat::Tabular => "tabular",
            FeedFormat::Structured => "structured",
            FeedFormat::Bundle => "bundle",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "delimited" | "txt" | "text" => Some(FeedFormat::Delimited),
            "tabular" | "csv" => Some(FeedFormat::Tabular),
            "structured" | "json" => Some(FeedFormat::Structured),
            "bundle" | "stix" => Some(FeedFormat::Bundle),
            _ => None,
        }
    }
}

impl std::fmt::Display for FeedFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detect the format from the filename suffix when available, else sniff
/// the content shape.
pub fn detect_format(filename: Option<&str>, content: &str) -> FeedFormat {
    if let Some(name) = filename {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".csv") {
            return FeedFormat::Tabular;
        }
        if lower.ends_with(".json") {
            return sniff_structured(content);
        }
        if lower.ends_with(".txt") {
            return FeedFormat::Delimited;
        }
    }
    let trimmed = content.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        sniff_structured(content)
    } else if content.contains(',') && content.contains('\n') {
        FeedFormat::Tabular
    } else {
        FeedFormat::Delimited
    }
}

/// A structured payload with a top-level `objects` array is an indicator
/// bundle; everything else stays plain structured.
fn sniff_structured(content: &str) -> FeedFormat {
    match serde_json::from_str::<serde_json::Value>(content) {
        Ok(doc) if doc.get("objects").map(|o| o.is_array()).unwrap_or(false) => FeedFormat::Bundle,
        _ => FeedFormat::Structured,
    }
}

/// Parse `content` according to `format`.
pub fn parse(format: FeedFormat, content: &str) -> Result<Vec<RawRecord>> {
    match format {
        FeedFormat::Delimited => Ok(delimited::parse(content)),
        FeedFormat::Tabular => Ok(tabular::parse(content)),
        FeedFormat::Structured => structured::parse(content),
        FeedFormat::Bundle => bundle::parse(content),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_suffix_wins_over_content() {
        assert_eq!(
            detect_format(Some("feed.csv"), "whatever"),
            FeedFormat::Tabular
        );
        assert_eq!(
            detect_format(Some("feed.txt"), "a,b\nc,d"),
            FeedFormat::Delimited
        );
    }

    #[test]
    fn sniffs_structured_vs_bundle() {
        assert_eq!(detect_format(None, r#"[{"value":"x"}]"#), FeedFormat::Structured);
        assert_eq!(
            detect_format(None, r#"{"objects":[{"type":"indicator"}]}"#),
            FeedFormat::Bundle
        );
    }

    #[test]
    fn sniffs_tabular_and_delimited() {
        assert_eq!(detect_format(None, "a,b\n1,2\n"), FeedFormat::Tabular);
        assert_eq!(detect_format(None, "1.2.3.4\n5.6.7.8\n"), FeedFormat::Delimited);
    }
}
