// src/config.rs
//! Environment-driven settings plus the static feed-profile table.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::store::AuthProfile;

const ENV_PROFILES_PATH: &str = "FEED_PROFILES_PATH";
const DEFAULT_PROFILES_PATH: &str = "config/feed_profiles.toml";

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_path: String,
    pub import_cron: String,
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub base_retry_delay: Duration,
    pub max_retry_delay: Duration,
    pub default_import_interval_hours: i64,
    pub health_check_interval: Duration,
    pub health_probe_timeout: Duration,
    /// Upper bound for concurrently imported feeds. The import pass runs
    /// feeds sequentially today (per-provider rate limits and batch
    /// ordering depend on it), so this caps any future parallel path.
    pub max_concurrent_imports: usize,
    pub user_agent: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: "data/threat_intel.db".to_string(),
            import_cron: "0 */6 * * *".to_string(),
            request_timeout: Duration::from_secs(30),
            max_retries: 3,
            base_retry_delay: Duration::from_secs_f64(1.0),
            max_retry_delay: Duration::from_secs_f64(60.0),
            default_import_interval_hours: 24,
            health_check_interval: Duration::from_secs(300),
            health_probe_timeout: Duration::from_secs(10),
            max_concurrent_imports: 4,
            user_agent: concat!("threat-intel-ingest/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let d = Settings::default();
        Self {
            database_path: env_or("DATABASE_PATH", d.database_path),
            import_cron: env_or("IMPORT_CRON", d.import_cron),
            request_timeout: Duration::from_secs(env_parse("REQUEST_TIMEOUT_SECS", 30)),
            max_retries: env_parse("MAX_RETRIES", 3),
            base_retry_delay: Duration::from_secs_f64(env_parse("BASE_RETRY_DELAY_SECS", 1.0)),
            max_retry_delay: Duration::from_secs_f64(env_parse("MAX_RETRY_DELAY_SECS", 60.0)),
            default_import_interval_hours: env_parse("DEFAULT_IMPORT_INTERVAL_HOURS", 24),
            health_check_interval: Duration::from_secs(env_parse(
                "HEALTH_CHECK_INTERVAL_SECS",
                300,
            )),
            health_probe_timeout: Duration::from_secs(env_parse("HEALTH_PROBE_TIMEOUT_SECS", 10)),
            max_concurrent_imports: env_parse("MAX_CONCURRENT_IMPORTS", 4),
            user_agent: env_or("USER_AGENT", d.user_agent),
        }
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Per-feed override matched by a feed-name substring. The first match
/// wins; feeds with no match get `FeedProfile::generic()`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct FeedProfile {
    pub name_contains: String,
    #[serde(default)]
    pub requires_api_key: bool,
    #[serde(default)]
    pub rate_limit_secs: u64,
    #[serde(default)]
    pub format_hint: Option<String>,
}

impl FeedProfile {
    pub fn generic() -> Self {
        Self {
            name_contains: String::new(),
            requires_api_key: false,
            rate_limit_secs: 0,
            format_hint: None,
        }
    }

    /// Auth profile a newly registered feed gets, combining the profile
    /// table with the operator-supplied auth config.
    pub fn resolve_auth(&self, auth_config: &HashMap<String, String>) -> AuthProfile {
        if auth_config.contains_key("username") && auth_config.contains_key("password") {
            AuthProfile::Basic
        } else if auth_config.contains_key("bearer_token") {
            AuthProfile::Bearer
        } else if self.requires_api_key || auth_config.contains_key("api_key") {
            AuthProfile::ApiKey
        } else {
            AuthProfile::None
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedProfileTable {
    #[serde(default)]
    pub profiles: Vec<FeedProfile>,
}

impl FeedProfileTable {
    /// Load from `$FEED_PROFILES_PATH`, else `config/feed_profiles.toml`,
    /// else an empty table (every feed resolves to generic).
    pub fn load_default() -> Result<Self> {
        let path = std::env::var(ENV_PROFILES_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_PROFILES_PATH));
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading feed profiles from {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn profile_for(&self, feed_name: &str) -> FeedProfile {
        let lower = feed_name.to_ascii_lowercase();
        self.profiles
            .iter()
            .find(|p| !p.name_contains.is_empty() && lower.contains(&p.name_contains.to_ascii_lowercase()))
            .cloned()
            .unwrap_or_else(FeedProfile::generic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_substring_match_wins() {
        let table: FeedProfileTable = toml::from_str(
            r#"
            [[profiles]]
            name_contains = "abuse"
            requires_api_key = true
            rate_limit_secs = 2

            [[profiles]]
            name_contains = "list"
            "#,
        )
        .unwrap();
        let p = table.profile_for("AbuseIPDB blocklist");
        assert!(p.requires_api_key);
        assert_eq!(p.rate_limit_secs, 2);
        assert_eq!(table.profile_for("unmatched"), FeedProfile::generic());
    }

    #[test]
    fn auth_resolution_prefers_credential_shape() {
        let p = FeedProfile::generic();
        let mut cfg = HashMap::new();
        cfg.insert("username".to_string(), "u".to_string());
        cfg.insert("password".to_string(), "p".to_string());
        assert_eq!(p.resolve_auth(&cfg), AuthProfile::Basic);

        let mut cfg = HashMap::new();
        cfg.insert("bearer_token".to_string(), "t".to_string());
        assert_eq!(p.resolve_auth(&cfg), AuthProfile::Bearer);

        let mut key_profile = FeedProfile::generic();
        key_profile.requires_api_key = true;
        assert_eq!(key_profile.resolve_auth(&HashMap::new()), AuthProfile::ApiKey);
        assert_eq!(p.resolve_auth(&HashMap::new()), AuthProfile::None);
    }

    #[serial_test::serial]
    #[test]
    fn defaults_apply_without_env() {
        std::env::remove_var("MAX_RETRIES");
        std::env::remove_var("IMPORT_CRON");
        std::env::remove_var("MAX_CONCURRENT_IMPORTS");
        let s = Settings::from_env();
        assert_eq!(s.max_retries, 3);
        assert_eq!(s.import_cron, "0 */6 * * *");
        assert_eq!(s.request_timeout, Duration::from_secs(30));
        assert_eq!(s.max_concurrent_imports, 4);
    }

    #[serial_test::serial]
    #[test]
    fn concurrency_bound_reads_from_env() {
        std::env::set_var("MAX_CONCURRENT_IMPORTS", "8");
        let s = Settings::from_env();
        assert_eq!(s.max_concurrent_imports, 8);
        std::env::remove_var("MAX_CONCURRENT_IMPORTS");
    }
}
