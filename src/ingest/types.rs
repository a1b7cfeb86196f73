// src/ingest/types.rs
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fixed indicator-type vocabulary. `Unknown` is a legal stored type;
/// an explicit type string outside this set is a validation error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorType {
    Ip,
    Domain,
    Url,
    Hash,
    Email,
    Unknown,
}

impl IndicatorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndicatorType::Ip => "ip",
            IndicatorType::Domain => "domain",
            IndicatorType::Url => "url",
            IndicatorType::Hash => "hash",
            IndicatorType::Email => "email",
            IndicatorType::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ip" | "ipv4" | "ip-addr" | "ipv4-addr" => Some(IndicatorType::Ip),
            "domain" | "domain-name" | "hostname" => Some(IndicatorType::Domain),
            "url" | "uri" => Some(IndicatorType::Url),
            "hash" | "md5" | "sha1" | "sha256" | "sha512" | "file-hash" => {
                Some(IndicatorType::Hash)
            }
            "email" | "email-addr" => Some(IndicatorType::Email),
            "unknown" => Some(IndicatorType::Unknown),
            _ => None,
        }
    }
}

impl std::fmt::Display for IndicatorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Untyped key/value bag produced by a parser. Ephemeral: lives only
/// within one import call.
#[derive(Debug, Clone, Default)]
pub struct RawRecord {
    pub fields: HashMap<String, Value>,
    /// 1-based row number in the source document, when the format has rows.
    pub source_row: Option<usize>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_row(mut self, row: usize) -> Self {
        self.source_row = Some(row);
        self
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.fields.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// String view of a field; numbers are rendered, other shapes are None.
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.fields.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Canonical indicator shape. `(indicator_type, indicator_value)` is the
/// natural identity used for duplicate detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedIndicator {
    pub indicator_type: IndicatorType,
    pub indicator_value: String,
    pub source_feed: String,
    pub severity: String,
    pub confidence: i64,
    pub score: f64,
    pub tags: Vec<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_active: bool,
}

/// Overall outcome of one ingestion attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportStatus {
    Success,
    Partial,
    Failed,
}

impl ImportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStatus::Success => "success",
            ImportStatus::Partial => "partial",
            ImportStatus::Failed => "failed",
        }
    }
}

/// Summary returned by `IngestService::import_from_content`. Expected
/// business failures (parse error, all-invalid batch) live here, not in Err.
#[derive(Debug, Clone, Serialize)]
pub struct ImportResult {
    pub status: ImportStatus,
    pub total_records: usize,
    pub imported_count: usize,
    pub skipped_count: usize,
    pub error_count: usize,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

impl ImportResult {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: ImportStatus::Failed,
            total_records: 0,
            imported_count: 0,
            skipped_count: 0,
            error_count: 1,
            errors: vec![error.into()],
            duration_ms: 0,
        }
    }
}

/// Everything the ingestion service needs for one batch.
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub content: String,
    pub filename: Option<String>,
    pub source_feed: String,
    pub actor: String,
    pub justification: Option<String>,
    pub feed_id: Option<i64>,
}
