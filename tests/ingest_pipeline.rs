// tests/ingest_pipeline.rs
//! End-to-end ingestion over all four feed formats, against an in-memory
//! store.

use std::sync::Arc;

use threat_intel_ingest::ingest::IngestService;
use threat_intel_ingest::{ImportRequest, ImportStatus, Store};

fn service() -> (IngestService, Arc<Store>) {
    let store = Arc::new(Store::open_in_memory().unwrap());
    (IngestService::new(store.clone()), store)
}

fn request(content: &str, filename: Option<&str>) -> ImportRequest {
    ImportRequest {
        content: content.to_string(),
        filename: filename.map(str::to_string),
        source_feed: "test-feed".to_string(),
        actor: "tester".to_string(),
        justification: Some("unit test".to_string()),
        feed_id: None,
    }
}

#[test]
fn tabular_url_feed_imports_one_url_record() {
    let (svc, store) = service();
    let result = svc.import_from_content(&request("url,threat,tags\nhttp://evil.com,malware,exe\n", None));

    assert_eq!(result.status, ImportStatus::Success);
    assert_eq!(result.imported_count, 1);
    assert_eq!(result.error_count, 0);
    assert_eq!(store.indicator_count().unwrap(), 1);

    // re-importing the same value as a different shape still dedups on (type, value)
    let again = svc.import_from_content(&request(
        r#"[{"value":"http://evil.com","type":"url"}]"#,
        None,
    ));
    assert_eq!(again.imported_count, 0);
    assert_eq!(again.skipped_count, 1);
}

#[test]
fn delimited_feed_with_comments_and_pipe_variant() {
    let (svc, store) = service();
    let content = "# morning dump\n1.2.3.4\n5.6.7.8#9.1#95#c2 node#src\nevil.com\n";
    let result = svc.import_from_content(&request(content, Some("feed.txt")));

    assert_eq!(result.status, ImportStatus::Success);
    assert_eq!(result.imported_count, 3);
    assert_eq!(store.indicator_count().unwrap(), 3);
}

#[test]
fn structured_feed_with_wrapped_array() {
    let (svc, _store) = service();
    let content = r#"{"indicators":[
        {"value":"d41d8cd98f00b204e9800998ecf8427e"},
        {"ioc_value":"bad@actor.net","confidence":90,"tags":"phish,smtp"}
    ]}"#;
    let result = svc.import_from_content(&request(content, Some("feed.json")));
    assert_eq!(result.imported_count, 2);
    assert_eq!(result.status, ImportStatus::Success);
}

#[test]
fn bundle_feed_keeps_only_indicator_objects() {
    let (svc, _store) = service();
    let content = r#"{"objects":[
        {"type":"indicator","pattern":"[ipv4-addr:value = '9.9.9.9']"},
        {"type":"indicator","pattern":"[unknown-thing:x = 'y']"},
        {"type":"malware","name":"nope"}
    ]}"#;
    let result = svc.import_from_content(&request(content, None));
    assert_eq!(result.imported_count, 1);
}

#[test]
fn unparsable_document_fails_whole_batch_without_writes() {
    let (svc, store) = service();
    let result = svc.import_from_content(&request("{broken json", Some("feed.json")));

    assert_eq!(result.status, ImportStatus::Failed);
    assert_eq!(result.error_count, 1);
    assert!(result.errors[0].contains("parse error"));
    assert_eq!(store.indicator_count().unwrap(), 0);
    assert_eq!(store.import_log_count().unwrap(), 0);
}

#[test]
fn every_parsed_batch_writes_exactly_one_audit_row() {
    let (svc, store) = service();
    svc.import_from_content(&request("1.2.3.4\n", None));
    svc.import_from_content(&request("1.2.3.4\n", None));
    assert_eq!(store.import_log_count().unwrap(), 2);

    let log = store.last_import_log().unwrap().unwrap();
    assert_eq!(log.total_records, 1);
    assert_eq!(log.imported_count, 0);
    assert_eq!(log.skipped_count, 1);
    assert_eq!(log.actor, "tester");
    assert_eq!(log.justification.as_deref(), Some("unit test"));
}
