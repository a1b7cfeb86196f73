// src/store/schema.rs
//! Table definitions. The unique index on (indicator_type, indicator_value)
//! backs the duplicate-suppression invariant.

pub const CREATE_TABLES: &str = "
CREATE TABLE IF NOT EXISTS feeds (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    url TEXT NOT NULL DEFAULT '',
    format TEXT,
    requires_auth INTEGER NOT NULL DEFAULT 0,
    auth_profile TEXT NOT NULL DEFAULT 'none',
    auth_config TEXT NOT NULL DEFAULT '{}',
    enabled INTEGER NOT NULL DEFAULT 1,
    import_interval_hours INTEGER NOT NULL DEFAULT 24,
    last_import TEXT
);

CREATE TABLE IF NOT EXISTS indicators (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    indicator_type TEXT NOT NULL,
    indicator_value TEXT NOT NULL,
    source_feed TEXT NOT NULL DEFAULT '',
    severity TEXT NOT NULL DEFAULT 'medium',
    confidence INTEGER NOT NULL DEFAULT 50,
    score REAL NOT NULL DEFAULT 5.0,
    tags TEXT NOT NULL DEFAULT '[]',
    first_seen TEXT NOT NULL,
    last_seen TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_indicators_identity
    ON indicators(indicator_type, indicator_value);

CREATE TABLE IF NOT EXISTS import_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    feed_id INTEGER,
    total_records INTEGER NOT NULL,
    imported_count INTEGER NOT NULL,
    skipped_count INTEGER NOT NULL,
    error_count INTEGER NOT NULL,
    errors TEXT NOT NULL DEFAULT '[]',
    status TEXT NOT NULL,
    duration_ms INTEGER NOT NULL,
    actor TEXT NOT NULL,
    justification TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS health_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    feed_id INTEGER NOT NULL,
    url TEXT NOT NULL,
    status TEXT NOT NULL,
    http_status INTEGER,
    response_time_ms INTEGER NOT NULL,
    error_message TEXT,
    checked_at TEXT NOT NULL,
    checked_by INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_import_logs_feed ON import_logs(feed_id);
CREATE INDEX IF NOT EXISTS idx_health_logs_feed ON health_logs(feed_id);
";
