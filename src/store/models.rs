// src/store/models.rs
//! Row types for the feed registry and the two append-only audit tables.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ingest::parsers::FeedFormat;
use crate::ingest::types::ImportStatus;

/// Authentication mechanism a feed uses, resolved once at registration
/// time and carried on the feed row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthProfile {
    #[default]
    None,
    ApiKey,
    Bearer,
    Basic,
}

impl AuthProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthProfile::None => "none",
            AuthProfile::ApiKey => "api_key",
            AuthProfile::Bearer => "bearer",
            AuthProfile::Basic => "basic",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "api_key" => AuthProfile::ApiKey,
            "bearer" => AuthProfile::Bearer,
            "basic" => AuthProfile::Basic,
            _ => AuthProfile::None,
        }
    }

    /// Fields the profile requires in the feed's auth config.
    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            AuthProfile::None => &[],
            AuthProfile::ApiKey => &["api_key"],
            AuthProfile::Bearer => &["bearer_token"],
            AuthProfile::Basic => &["username", "password"],
        }
    }
}

/// A registered external source. `last_import` is kept as raw text so a
/// malformed timestamp degrades to "never imported" instead of a load error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feed {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub format: Option<FeedFormat>,
    pub requires_auth: bool,
    pub auth_profile: AuthProfile,
    pub auth_config: HashMap<String, String>,
    pub enabled: bool,
    pub import_interval_hours: i64,
    pub last_import: Option<String>,
}

impl Feed {
    pub fn last_import_time(&self) -> Option<DateTime<Utc>> {
        let raw = self.last_import.as_deref()?;
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    }
}

/// Insert shape for a new feed row.
#[derive(Debug, Clone, Default)]
pub struct NewFeed {
    pub name: String,
    pub url: String,
    pub format: Option<FeedFormat>,
    pub requires_auth: bool,
    pub auth_profile: AuthProfile,
    pub auth_config: HashMap<String, String>,
    pub enabled: bool,
    pub import_interval_hours: i64,
}

/// One row per ingestion attempt. Written once, never mutated.
#[derive(Debug, Clone, Serialize)]
pub struct ImportLogEntry {
    pub feed_id: Option<i64>,
    pub total_records: usize,
    pub imported_count: usize,
    pub skipped_count: usize,
    pub error_count: usize,
    pub errors: Vec<String>,
    pub status: ImportStatus,
    pub duration_ms: u64,
    pub actor: String,
    pub justification: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One row per health probe. Append-only.
#[derive(Debug, Clone, Serialize)]
pub struct HealthLogEntry {
    pub feed_id: i64,
    pub url: String,
    pub status: String,
    pub http_status: Option<u16>,
    pub response_time_ms: u64,
    pub error_message: Option<String>,
    pub checked_at: DateTime<Utc>,
    /// 0 = system scheduler, otherwise a user id.
    pub checked_by: i64,
}
