// tests/store_persistence.rs
//! The store survives process restarts: feeds, indicators and audit rows
//! are all durable.

use std::sync::Arc;

use chrono::Utc;
use threat_intel_ingest::ingest::IngestService;
use threat_intel_ingest::{ImportRequest, NewFeed, Store};

#[test]
fn reopening_the_database_preserves_all_tables() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("intel.db");
    let path = path.to_str().unwrap();

    let feed_id = {
        let store = Arc::new(Store::open(path).unwrap());
        let feed_id = store
            .add_feed(&NewFeed {
                name: "durable".to_string(),
                url: "https://durable.example/feed".to_string(),
                enabled: true,
                import_interval_hours: 6,
                ..Default::default()
            })
            .unwrap();
        store.set_last_import(feed_id, Utc::now()).unwrap();

        let svc = IngestService::new(store.clone());
        let result = svc.import_from_content(&ImportRequest {
            content: "4.4.4.4\n8.8.8.8\n".to_string(),
            filename: None,
            source_feed: "durable".to_string(),
            actor: "tester".to_string(),
            justification: None,
            feed_id: Some(feed_id),
        });
        assert_eq!(result.imported_count, 2);
        feed_id
    };

    let store = Store::open(path).unwrap();
    let feed = store.feed_by_name("durable").unwrap().unwrap();
    assert_eq!(feed.id, feed_id);
    assert!(feed.last_import_time().is_some());
    assert_eq!(store.indicator_count().unwrap(), 2);
    assert_eq!(store.import_log_count().unwrap(), 1);
    assert_eq!(store.last_import_log().unwrap().unwrap().feed_id, Some(feed_id));
}
