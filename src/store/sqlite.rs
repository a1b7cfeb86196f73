// src/store/sqlite.rs
//! SQLite store wrapper. One connection behind a mutex, WAL mode, explicit
//! transactions on the bulk-import path.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};

use super::models::{AuthProfile, Feed, HealthLogEntry, ImportLogEntry, NewFeed};
use super::{queries, schema};
use crate::ingest::parsers::FeedFormat;
use crate::ingest::types::{ImportStatus, NormalizedIndicator};

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open or create the database at `path`; `:memory:` is accepted.
    pub fn open(path: &str) -> Result<Self> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = std::path::Path::new(path).parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            Connection::open(path).with_context(|| format!("opening database {path}"))?
        };

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.execute_batch(schema::CREATE_TABLES)
            .context("creating tables")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    /// Run `f` inside one write transaction. Any error rolls everything back.
    pub fn with_transaction<T>(&self, f: impl FnOnce(&Transaction) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock().expect("store mutex poisoned");
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit().context("committing import transaction")?;
        Ok(out)
    }

    // --- feed registry ---

    pub fn add_feed(&self, feed: &NewFeed) -> Result<i64> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            queries::INSERT_FEED,
            params![
                feed.name,
                feed.url,
                feed.format.map(|f| f.as_str()),
                feed.requires_auth,
                feed.auth_profile.as_str(),
                serde_json::to_string(&feed.auth_config)?,
                feed.enabled,
                feed.import_interval_hours,
            ],
        )
        .with_context(|| format!("inserting feed '{}'", feed.name))?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_feeds(&self) -> Result<Vec<Feed>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(queries::SELECT_FEEDS)?;
        let feeds = stmt
            .query_map([], feed_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(feeds)
    }

    pub fn feed_by_name(&self, name: &str) -> Result<Option<Feed>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let feed = conn
            .query_row(queries::SELECT_FEED_BY_NAME, params![name], feed_from_row)
            .optional()?;
        Ok(feed)
    }

    pub fn set_last_import(&self, feed_id: i64, when: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(queries::UPDATE_LAST_IMPORT, params![feed_id, when.to_rfc3339()])?;
        Ok(())
    }

    // --- indicators / audit (read side) ---

    pub fn indicator_count(&self) -> Result<i64> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        Ok(conn.query_row(queries::COUNT_INDICATORS, [], |r| r.get(0))?)
    }

    pub fn import_log_count(&self) -> Result<i64> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        Ok(conn.query_row(queries::COUNT_IMPORT_LOGS, [], |r| r.get(0))?)
    }

    pub fn last_import_log(&self) -> Result<Option<ImportLogEntry>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let entry = conn
            .query_row(queries::SELECT_LAST_IMPORT_LOG, [], import_log_from_row)
            .optional()?;
        Ok(entry)
    }

    // --- health log ---

    pub fn insert_health_log(&self, entry: &HealthLogEntry) -> Result<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            queries::INSERT_HEALTH_LOG,
            params![
                entry.feed_id,
                entry.url,
                entry.status,
                entry.http_status,
                entry.response_time_ms as i64,
                entry.error_message,
                entry.checked_at.to_rfc3339(),
                entry.checked_by,
            ],
        )?;
        Ok(())
    }

    pub fn health_log_count(&self, feed_id: i64) -> Result<i64> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        Ok(conn.query_row(queries::COUNT_HEALTH_LOGS, params![feed_id], |r| r.get(0))?)
    }
}

// --- transaction-scoped helpers used by the ingest service ---

pub fn indicator_exists(tx: &Transaction, ioc_type: &str, value: &str) -> Result<bool> {
    let found = tx
        .query_row(queries::INDICATOR_EXISTS, params![ioc_type, value], |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
}

pub fn insert_indicator(tx: &Transaction, ind: &NormalizedIndicator) -> Result<()> {
    tx.execute(
        queries::INSERT_INDICATOR,
        params![
            ind.indicator_type.as_str(),
            ind.indicator_value,
            ind.source_feed,
            ind.severity,
            ind.confidence,
            ind.score,
            serde_json::to_string(&ind.tags)?,
            ind.first_seen.to_rfc3339(),
            ind.last_seen.to_rfc3339(),
            ind.created_at.to_rfc3339(),
            ind.updated_at.to_rfc3339(),
            ind.is_active,
        ],
    )?;
    Ok(())
}

pub fn insert_import_log(tx: &Transaction, entry: &ImportLogEntry) -> Result<()> {
    tx.execute(
        queries::INSERT_IMPORT_LOG,
        params![
            entry.feed_id,
            entry.total_records as i64,
            entry.imported_count as i64,
            entry.skipped_count as i64,
            entry.error_count as i64,
            serde_json::to_string(&entry.errors)?,
            entry.status.as_str(),
            entry.duration_ms as i64,
            entry.actor,
            entry.justification,
            entry.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

// --- row mappers ---

fn feed_from_row(row: &Row<'_>) -> rusqlite::Result<Feed> {
    let format: Option<String> = row.get(3)?;
    let auth_profile: String = row.get(5)?;
    let auth_config: String = row.get(6)?;
    Ok(Feed {
        id: row.get(0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        format: format.as_deref().and_then(FeedFormat::parse),
        requires_auth: row.get(4)?,
        auth_profile: AuthProfile::parse(&auth_profile),
        auth_config: serde_json::from_str::<HashMap<String, String>>(&auth_config)
            .unwrap_or_default(),
        enabled: row.get(7)?,
        import_interval_hours: row.get(8)?,
        last_import: row.get(9)?,
    })
}

fn import_log_from_row(row: &Row<'_>) -> rusqlite::Result<ImportLogEntry> {
    let errors: String = row.get(5)?;
    let status: String = row.get(6)?;
    let created_at: String = row.get(10)?;
    Ok(ImportLogEntry {
        feed_id: row.get(0)?,
        total_records: row.get::<_, i64>(1)? as usize,
        imported_count: row.get::<_, i64>(2)? as usize,
        skipped_count: row.get::<_, i64>(3)? as usize,
        error_count: row.get::<_, i64>(4)? as usize,
        errors: serde_json::from_str(&errors).unwrap_or_default(),
        status: match status.as_str() {
            "success" => ImportStatus::Success,
            "partial" => ImportStatus::Partial,
            _ => ImportStatus::Failed,
        },
        duration_ms: row.get::<_, i64>(7)? as u64,
        actor: row.get(8)?,
        justification: row.get(9)?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_round_trips_through_the_registry() {
        let store = Store::open_in_memory().unwrap();
        let mut auth = HashMap::new();
        auth.insert("api_key".to_string(), "secret".to_string());
        let id = store
            .add_feed(&NewFeed {
                name: "abuse-list".into(),
                url: "https://feeds.example/v1".into(),
                format: Some(FeedFormat::Tabular),
                requires_auth: true,
                auth_profile: AuthProfile::ApiKey,
                auth_config: auth,
                enabled: true,
                import_interval_hours: 12,
            })
            .unwrap();

        let feed = store.feed_by_name("abuse-list").unwrap().unwrap();
        assert_eq!(feed.id, id);
        assert_eq!(feed.format, Some(FeedFormat::Tabular));
        assert_eq!(feed.auth_profile, AuthProfile::ApiKey);
        assert_eq!(feed.auth_config.get("api_key").unwrap(), "secret");
        assert!(feed.last_import.is_none());
    }

    #[test]
    fn last_import_is_parseable_after_update() {
        let store = Store::open_in_memory().unwrap();
        let id = store
            .add_feed(&NewFeed {
                name: "f".into(),
                enabled: true,
                import_interval_hours: 24,
                ..Default::default()
            })
            .unwrap();
        let now = Utc::now();
        store.set_last_import(id, now).unwrap();
        let feed = store.feed_by_name("f").unwrap().unwrap();
        let parsed = feed.last_import_time().unwrap();
        assert!((parsed - now).num_seconds().abs() <= 1);
    }

    #[test]
    fn transaction_rolls_back_on_error() {
        let store = Store::open_in_memory().unwrap();
        let res: Result<()> = store.with_transaction(|tx| {
            tx.execute(
                "INSERT INTO indicators (indicator_type, indicator_value, first_seen,
                 last_seen, created_at, updated_at) VALUES ('ip','1.2.3.4','a','a','a','a')",
                [],
            )?;
            anyhow::bail!("boom")
        });
        assert!(res.is_err());
        assert_eq!(store.indicator_count().unwrap(), 0);
    }
}
