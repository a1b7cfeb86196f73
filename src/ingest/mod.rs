// src/ingest/mod.rs
pub mod normalize;
pub mod parsers;
pub mod types;

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;

use crate::ingest::types::{ImportRequest, ImportResult, ImportStatus, RawRecord};
use crate::store::models::ImportLogEntry;
use crate::store::{sqlite, Store};

/// Import-log rows keep at most this many error strings; the counts still
/// reflect every failure.
const MAX_LOGGED_ERRORS: usize = 50;

/// One-time metrics registration.
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_records_total", "Raw records parsed from feed content.");
        describe_counter!("ingest_imported_total", "Indicators written to the store.");
        describe_counter!("ingest_skipped_total", "Records skipped as duplicates.");
        describe_counter!("ingest_errors_total", "Records rejected by validation or insert.");
        describe_gauge!("ingest_last_run_ts", "Unix ts of the last ingestion attempt.");
    });
}

/// Orchestrates detect → parse → normalize → validate → dedup → insert,
/// with one audit row per batch. Expected failures come back inside
/// `ImportResult`; only the store itself going away uses the error channel,
/// and that still resolves to a failed result here.
pub struct IngestService {
    store: Arc<Store>,
}

impl IngestService {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn import_from_content(&self, req: &ImportRequest) -> ImportResult {
        ensure_metrics_described();
        let started = Instant::now();

        let format = parsers::detect_format(req.filename.as_deref(), &req.content);
        let records = match parsers::parse(format, &req.content) {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(
                    source = %req.source_feed,
                    format = %format,
                    error = %e,
                    "feed content unparsable, batch aborted"
                );
                return ImportResult::failed(format!("parse error ({format}): {e:#}"));
            }
        };

        let outcome = self.store.with_transaction(|tx| {
            let mut result = process_batch(tx, &records, &req.source_feed);
            result.duration_ms = started.elapsed().as_millis() as u64;

            let mut errors = result.errors.clone();
            errors.truncate(MAX_LOGGED_ERRORS);
            sqlite::insert_import_log(
                tx,
                &ImportLogEntry {
                    feed_id: req.feed_id,
                    total_records: result.total_records,
                    imported_count: result.imported_count,
                    skipped_count: result.skipped_count,
                    error_count: result.error_count,
                    errors,
                    status: result.status,
                    duration_ms: result.duration_ms,
                    actor: req.actor.clone(),
                    justification: req.justification.clone(),
                    created_at: Utc::now(),
                },
            )?;
            Ok(result)
        });

        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(source = %req.source_feed, error = %e, "import transaction failed");
                let mut failed = ImportResult::failed(format!("store error: {e:#}"));
                failed.duration_ms = started.elapsed().as_millis() as u64;
                failed
            }
        };

        counter!("ingest_records_total").increment(result.total_records as u64);
        counter!("ingest_imported_total").increment(result.imported_count as u64);
        counter!("ingest_skipped_total").increment(result.skipped_count as u64);
        counter!("ingest_errors_total").increment(result.error_count as u64);
        gauge!("ingest_last_run_ts").set(Utc::now().timestamp().max(0) as f64);

        tracing::info!(
            source = %req.source_feed,
            status = result.status.as_str(),
            total = result.total_records,
            imported = result.imported_count,
            skipped = result.skipped_count,
            errors = result.error_count,
            "import finished"
        );
        result
    }
}

/// Per-record loop. Records are processed in parse order; duplicates within
/// one batch resolve first-wins because the existence check sees the
/// transaction's own inserts.
fn process_batch(
    tx: &rusqlite::Transaction,
    records: &[RawRecord],
    source_feed: &str,
) -> ImportResult {
    let mut imported = 0usize;
    let mut skipped = 0usize;
    let mut errors: Vec<String> = Vec::new();

    for record in records {
        let indicator = normalize::normalize(record, source_feed);
        let explicit = normalize::explicit_type(record);
        let problems = normalize::validate(&indicator, explicit.as_deref());
        if !problems.is_empty() {
            errors.push(tag_row(record, &problems.join("; ")));
            continue;
        }

        match sqlite::indicator_exists(
            tx,
            indicator.indicator_type.as_str(),
            &indicator.indicator_value,
        ) {
            Ok(true) => {
                skipped += 1;
                continue;
            }
            Ok(false) => {}
            Err(e) => {
                errors.push(tag_row(record, &format!("existence check failed: {e:#}")));
                continue;
            }
        }

        match sqlite::insert_indicator(tx, &indicator) {
            Ok(()) => imported += 1,
            Err(e) => errors.push(tag_row(record, &format!("insert failed: {e:#}"))),
        }
    }

    let error_count = errors.len();
    let status = if error_count == 0 {
        ImportStatus::Success
    } else if imported > 0 {
        ImportStatus::Partial
    } else {
        ImportStatus::Failed
    };

    ImportResult {
        status,
        total_records: records.len(),
        imported_count: imported,
        skipped_count: skipped,
        error_count,
        errors,
        duration_ms: 0,
    }
}

fn tag_row(record: &RawRecord, message: &str) -> String {
    match record.source_row {
        Some(row) => format!("row {row}: {message}"),
        None => message.to_string(),
    }
}
