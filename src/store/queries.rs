// src/store/queries.rs
//! SQL statements used by the store.

pub const INSERT_FEED: &str = "
INSERT INTO feeds (name, url, format, requires_auth, auth_profile, auth_config,
                   enabled, import_interval_hours)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)";

pub const SELECT_FEEDS: &str = "
SELECT id, name, url, format, requires_auth, auth_profile, auth_config,
       enabled, import_interval_hours, last_import
FROM feeds ORDER BY id";

pub const SELECT_FEED_BY_NAME: &str = "
SELECT id, name, url, format, requires_auth, auth_profile, auth_config,
       enabled, import_interval_hours, last_import
FROM feeds WHERE name = ?1";

pub const UPDATE_LAST_IMPORT: &str = "UPDATE feeds SET last_import = ?2 WHERE id = ?1";

pub const INDICATOR_EXISTS: &str = "
SELECT 1 FROM indicators WHERE indicator_type = ?1 AND indicator_value = ?2 LIMIT 1";

pub const INSERT_INDICATOR: &str = "
INSERT INTO indicators (indicator_type, indicator_value, source_feed, severity,
                        confidence, score, tags, first_seen, last_seen,
                        created_at, updated_at, is_active)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)";

pub const COUNT_INDICATORS: &str = "SELECT COUNT(*) FROM indicators";

pub const INSERT_IMPORT_LOG: &str = "
INSERT INTO import_logs (feed_id, total_records, imported_count, skipped_count,
                         error_count, errors, status, duration_ms, actor,
                         justification, created_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)";

pub const COUNT_IMPORT_LOGS: &str = "SELECT COUNT(*) FROM import_logs";

pub const SELECT_LAST_IMPORT_LOG: &str = "
SELECT feed_id, total_records, imported_count, skipped_count, error_count,
       errors, status, duration_ms, actor, justification, created_at
FROM import_logs ORDER BY id DESC LIMIT 1";

pub const INSERT_HEALTH_LOG: &str = "
INSERT INTO health_logs (feed_id, url, status, http_status, response_time_ms,
                         error_message, checked_at, checked_by)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)";

pub const COUNT_HEALTH_LOGS: &str = "SELECT COUNT(*) FROM health_logs WHERE feed_id = ?1";
