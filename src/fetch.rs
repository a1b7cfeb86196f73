// src/fetch.rs
//! Scheduled importer: decides whether a feed is due, fetches its content
//! with timeout/retry/backoff and the feed's auth mechanism, hands the body
//! to the ingestion service and advances `last_import`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;

use crate::config::{FeedProfileTable, Settings};
use crate::ingest::types::{ImportRequest, ImportResult, ImportStatus};
use crate::ingest::IngestService;
use crate::store::{AuthProfile, Feed, Store};

/// System identity stamped on scheduled imports.
pub const SYSTEM_ACTOR: &str = "system";

// --- transport seam ---

#[derive(Debug, Clone, Default)]
pub struct FetchRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub basic_auth: Option<(String, String)>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
}

/// Transport-level failures, kept coarse: every variant is retryable for
/// content fetches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    Timeout,
    Connect(String),
    Other(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Timeout => write!(f, "request timed out"),
            TransportError::Connect(e) => write!(f, "connection error: {e}"),
            TransportError::Other(e) => write!(f, "transport error: {e}"),
        }
    }
}

#[async_trait]
pub trait FeedTransport: Send + Sync {
    async fn get(&self, req: &FetchRequest) -> Result<FetchResponse, TransportError>;
}

/// reqwest-backed transport used outside tests.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(user_agent: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl FeedTransport for HttpTransport {
    async fn get(&self, req: &FetchRequest) -> Result<FetchResponse, TransportError> {
        let mut builder = self
            .client
            .get(&req.url)
            .timeout(req.timeout)
            .query(&req.query);
        for (name, value) in &req.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some((user, pass)) = &req.basic_auth {
            builder = builder.basic_auth(user, Some(pass));
        }

        let resp = builder.send().await.map_err(map_reqwest_error)?;
        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(map_reqwest_error)?;
        Ok(FetchResponse { status, body })
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else {
        TransportError::Other(e.to_string())
    }
}

// --- gating ---

/// Whether an import is due for `feed` at `now`, with a human reason.
/// A malformed `last_import` counts as "never imported".
pub fn should_import(feed: &Feed, now: DateTime<Utc>) -> (bool, String) {
    if !feed.enabled {
        return (false, "Feed is disabled".to_string());
    }
    if feed.url.trim().is_empty() {
        return (false, "Feed has no URL (manual feed)".to_string());
    }
    if feed.requires_auth {
        if feed.auth_profile == AuthProfile::None {
            return (false, "Feed requires auth but no auth profile is configured".to_string());
        }
        for field in feed.auth_profile.required_fields() {
            let present = feed
                .auth_config
                .get(*field)
                .map(|v| !v.trim().is_empty())
                .unwrap_or(false);
            if !present {
                return (
                    false,
                    format!("Feed requires auth; auth config is missing '{field}'"),
                );
            }
        }
    }

    let Some(raw) = feed.last_import.as_deref() else {
        return (true, "Never imported".to_string());
    };
    let Some(last) = feed.last_import_time() else {
        tracing::warn!(feed = %feed.name, last_import = raw, "unparsable last_import, treating as never imported");
        return (true, "Last import timestamp unparsable".to_string());
    };

    let interval = chrono::Duration::hours(feed.import_interval_hours.max(0));
    let elapsed = now - last;
    if elapsed < interval {
        let remaining = interval - elapsed;
        (
            false,
            format!("Imported recently; due in {} minutes", remaining.num_minutes().max(0)),
        )
    } else {
        (true, "Import interval elapsed".to_string())
    }
}

// --- retry policy ---

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_settings(s: &Settings) -> Self {
        Self {
            max_retries: s.max_retries,
            base_delay: s.base_retry_delay,
            max_delay: s.max_retry_delay,
        }
    }

    /// `base * 2^attempt`, capped at `max_delay`. Monotone in `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt.min(16)).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

// --- fetcher ---

#[derive(Debug, Clone, Serialize)]
pub struct FeedRunDetail {
    pub feed_id: i64,
    pub feed_name: String,
    pub skipped_reason: Option<String>,
    pub result: Option<ImportResult>,
}

/// Accumulated outcome of one `run_all` pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub processed_feeds: usize,
    pub successful_feeds: usize,
    pub failed_feeds: usize,
    pub skipped_feeds: usize,
    pub imported_indicators: usize,
    pub skipped_indicators: usize,
    pub error_indicators: usize,
    pub details: Vec<FeedRunDetail>,
}

pub struct FeedFetcher {
    store: Arc<Store>,
    ingest: IngestService,
    transport: Arc<dyn FeedTransport>,
    retry: RetryPolicy,
    request_timeout: Duration,
    profiles: FeedProfileTable,
}

impl FeedFetcher {
    pub fn new(
        store: Arc<Store>,
        transport: Arc<dyn FeedTransport>,
        settings: &Settings,
        profiles: FeedProfileTable,
    ) -> Self {
        Self {
            ingest: IngestService::new(store.clone()),
            store,
            transport,
            retry: RetryPolicy::from_settings(settings),
            request_timeout: settings.request_timeout,
            profiles,
        }
    }

    /// Exactly one auth mechanism per feed, picked from the populated
    /// config fields.
    fn build_request(&self, feed: &Feed) -> FetchRequest {
        let mut req = FetchRequest {
            url: feed.url.clone(),
            timeout: self.request_timeout,
            ..Default::default()
        };
        match feed.auth_profile {
            AuthProfile::Bearer => {
                if let Some(token) = feed.auth_config.get("bearer_token") {
                    req.headers
                        .push(("Authorization".to_string(), format!("Bearer {token}")));
                }
            }
            AuthProfile::ApiKey => {
                if let Some(key) = feed.auth_config.get("api_key") {
                    req.query.push(("api_key".to_string(), key.clone()));
                }
            }
            AuthProfile::Basic => {
                if let (Some(user), Some(pass)) = (
                    feed.auth_config.get("username"),
                    feed.auth_config.get("password"),
                ) {
                    req.basic_auth = Some((user.clone(), pass.clone()));
                }
            }
            AuthProfile::None => {}
        }
        req
    }

    /// Fetch with bounded retries. 401/403 and unexpected statuses fail
    /// immediately; 429 and transport errors back off and retry.
    pub async fn fetch(&self, feed: &Feed) -> Result<String, String> {
        let req = self.build_request(feed);
        let mut attempt = 0u32;
        loop {
            let retryable_error = match self.transport.get(&req).await {
                Ok(resp) if (200..300).contains(&resp.status) => return Ok(resp.body),
                Ok(resp) if resp.status == 401 || resp.status == 403 => {
                    return Err(format!("authentication failed (HTTP {})", resp.status));
                }
                Ok(resp) if resp.status == 429 => "rate limited (HTTP 429)".to_string(),
                Ok(resp) => return Err(format!("unexpected HTTP status {}", resp.status)),
                Err(e) => e.to_string(),
            };

            if attempt >= self.retry.max_retries {
                return Err(format!(
                    "{retryable_error} after {} retries",
                    self.retry.max_retries
                ));
            }
            let delay = self.retry.delay(attempt);
            tracing::debug!(
                feed = %feed.name,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %retryable_error,
                "fetch failed, backing off"
            );
            counter!("fetch_retries_total").increment(1);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Fetch + ingest one feed. A fetch that produced content counts as an
    /// attempt and advances `last_import` even if every record fails; a
    /// fetch that failed outright does not.
    pub async fn import_feed(&self, feed: &Feed) -> ImportResult {
        let content = match self.fetch(feed).await {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(feed = %feed.name, error = %e, "fetch failed");
                return ImportResult::failed(format!("fetch failed: {e}"));
            }
        };

        let result = self.ingest.import_from_content(&ImportRequest {
            content,
            filename: feed.format.map(|f| format!("feed.{}", format_extension(f))),
            source_feed: feed.name.clone(),
            actor: SYSTEM_ACTOR.to_string(),
            justification: Some(format!("scheduled import from {}", feed.url)),
            feed_id: Some(feed.id),
        });

        if let Err(e) = self.store.set_last_import(feed.id, Utc::now()) {
            tracing::error!(feed = %feed.name, error = %e, "failed to update last_import");
        }
        result
    }

    /// Gate every feed through `should_import` and import the due ones,
    /// sequentially; record order within one feed's batch is load-bearing.
    pub async fn run_all(&self) -> RunSummary {
        let feeds = match self.store.list_feeds() {
            Ok(feeds) => feeds,
            Err(e) => {
                tracing::error!(error = %e, "cannot list feeds");
                return RunSummary::default();
            }
        };

        let mut summary = RunSummary::default();
        let now = Utc::now();
        for feed in feeds {
            summary.processed_feeds += 1;
            let (due, reason) = should_import(&feed, now);
            if !due {
                tracing::debug!(feed = %feed.name, reason = %reason, "skipping feed");
                summary.skipped_feeds += 1;
                summary.details.push(FeedRunDetail {
                    feed_id: feed.id,
                    feed_name: feed.name.clone(),
                    skipped_reason: Some(reason),
                    result: None,
                });
                continue;
            }

            let profile = self.profiles.profile_for(&feed.name);
            let result = self.import_feed(&feed).await;
            match result.status {
                ImportStatus::Failed => summary.failed_feeds += 1,
                _ => summary.successful_feeds += 1,
            }
            summary.imported_indicators += result.imported_count;
            summary.skipped_indicators += result.skipped_count;
            summary.error_indicators += result.error_count;
            summary.details.push(FeedRunDetail {
                feed_id: feed.id,
                feed_name: feed.name.clone(),
                skipped_reason: None,
                result: Some(result),
            });

            // Courtesy delay for rate-limited providers.
            if profile.rate_limit_secs > 0 {
                tokio::time::sleep(Duration::from_secs(profile.rate_limit_secs)).await;
            }
        }

        tracing::info!(
            processed = summary.processed_feeds,
            successful = summary.successful_feeds,
            failed = summary.failed_feeds,
            skipped = summary.skipped_feeds,
            imported = summary.imported_indicators,
            "import pass finished"
        );
        summary
    }

    /// One-shot import of a single named feed, bypassing the interval gate
    /// (but not the auth/enabled checks).
    pub async fn run_one(&self, name: &str) -> Result<ImportResult, String> {
        let feed = self
            .store
            .feed_by_name(name)
            .map_err(|e| format!("feed lookup failed: {e:#}"))?
            .ok_or_else(|| format!("no feed named '{name}'"))?;
        if !feed.enabled {
            return Err("Feed is disabled".to_string());
        }
        if feed.url.trim().is_empty() {
            return Err("Feed has no URL (manual feed)".to_string());
        }
        Ok(self.import_feed(&feed).await)
    }
}

fn format_extension(format: crate::ingest::parsers::FeedFormat) -> &'static str {
    use crate::ingest::parsers::FeedFormat;
    match format {
        FeedFormat::Delimited => "txt",
        FeedFormat::Tabular => "csv",
        FeedFormat::Structured | FeedFormat::Bundle => "json",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn feed() -> Feed {
        Feed {
            id: 1,
            name: "test-feed".to_string(),
            url: "https://feeds.example/v1".to_string(),
            format: None,
            requires_auth: false,
            auth_profile: AuthProfile::None,
            auth_config: HashMap::new(),
            enabled: true,
            import_interval_hours: 24,
            last_import: None,
        }
    }

    #[test]
    fn disabled_feed_is_not_due() {
        let mut f = feed();
        f.enabled = false;
        let (due, reason) = should_import(&f, Utc::now());
        assert!(!due);
        assert_eq!(reason, "Feed is disabled");
    }

    #[test]
    fn manual_feed_without_url_is_not_due() {
        let mut f = feed();
        f.url = String::new();
        assert!(!should_import(&f, Utc::now()).0);
    }

    #[test]
    fn missing_auth_fields_block_import() {
        let mut f = feed();
        f.requires_auth = true;
        f.auth_profile = AuthProfile::ApiKey;
        let (due, reason) = should_import(&f, Utc::now());
        assert!(!due);
        assert!(reason.contains("api_key"));

        f.auth_config.insert("api_key".to_string(), "k".to_string());
        assert!(should_import(&f, Utc::now()).0);

        f.auth_profile = AuthProfile::Basic;
        f.auth_config.clear();
        f.auth_config.insert("username".to_string(), "u".to_string());
        let (due, reason) = should_import(&f, Utc::now());
        assert!(!due);
        assert!(reason.contains("password"));
    }

    #[test]
    fn interval_boundary_is_inclusive() {
        let now = Utc::now();
        let mut f = feed();

        f.last_import = Some((now - chrono::Duration::hours(23)).to_rfc3339());
        assert!(!should_import(&f, now).0);

        f.last_import = Some((now - chrono::Duration::hours(24)).to_rfc3339());
        assert!(should_import(&f, now).0);

        f.last_import = Some((now - chrono::Duration::hours(25)).to_rfc3339());
        assert!(should_import(&f, now).0);
    }

    #[test]
    fn malformed_last_import_means_never_imported() {
        let mut f = feed();
        f.last_import = Some("not-a-timestamp".to_string());
        let (due, reason) = should_import(&f, Utc::now());
        assert!(due);
        assert!(reason.contains("unparsable"));
    }

    #[test]
    fn backoff_is_monotone_and_capped() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        };
        let mut last = Duration::ZERO;
        for attempt in 0..10 {
            let d = policy.delay(attempt);
            assert!(d >= last);
            assert!(d <= Duration::from_secs(60));
            last = d;
        }
        assert_eq!(policy.delay(0), Duration::from_secs(1));
        assert_eq!(policy.delay(1), Duration::from_secs(2));
        assert_eq!(policy.delay(6), Duration::from_secs(60));
    }

    // --- scripted transport standing in for the network ---

    struct ScriptedTransport {
        responses: std::sync::Mutex<Vec<Result<FetchResponse, TransportError>>>,
        calls: std::sync::atomic::AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(mut responses: Vec<Result<FetchResponse, TransportError>>) -> Self {
            responses.reverse();
            Self {
                responses: std::sync::Mutex::new(responses),
                calls: std::sync::atomic::AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl FeedTransport for ScriptedTransport {
        async fn get(&self, _req: &FetchRequest) -> Result<FetchResponse, TransportError> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Err(TransportError::Connect("script exhausted".to_string())))
        }
    }

    fn fetcher(transport: Arc<ScriptedTransport>) -> FeedFetcher {
        let mut settings = Settings::default();
        settings.base_retry_delay = Duration::ZERO;
        settings.max_retry_delay = Duration::ZERO;
        let store = Arc::new(Store::open_in_memory().unwrap());
        FeedFetcher::new(store, transport, &settings, FeedProfileTable::default())
    }

    fn ok(body: &str) -> Result<FetchResponse, TransportError> {
        Ok(FetchResponse {
            status: 200,
            body: body.to_string(),
        })
    }

    fn status(code: u16) -> Result<FetchResponse, TransportError> {
        Ok(FetchResponse {
            status: code,
            body: String::new(),
        })
    }

    #[tokio::test]
    async fn rate_limit_retries_then_succeeds() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            status(429),
            status(429),
            ok("1.2.3.4\n"),
        ]));
        let f = fetcher(transport.clone());
        let body = f.fetch(&feed()).await.unwrap();
        assert_eq!(body, "1.2.3.4\n");
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn auth_failures_are_not_retried() {
        for code in [401u16, 403] {
            let transport = Arc::new(ScriptedTransport::new(vec![status(code)]));
            let f = fetcher(transport.clone());
            let err = f.fetch(&feed()).await.unwrap_err();
            assert!(err.contains(&code.to_string()));
            assert_eq!(transport.calls(), 1);
        }
    }

    #[tokio::test]
    async fn transport_errors_retry_up_to_the_cap() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Err(TransportError::Timeout),
            Err(TransportError::Timeout),
            Err(TransportError::Timeout),
            Err(TransportError::Timeout),
            Err(TransportError::Timeout),
        ]));
        let f = fetcher(transport.clone());
        let err = f.fetch(&feed()).await.unwrap_err();
        assert!(err.contains("timed out"));
        // one initial attempt + max_retries retries
        assert_eq!(transport.calls(), 4);
    }

    #[tokio::test]
    async fn unexpected_status_fails_immediately() {
        let transport = Arc::new(ScriptedTransport::new(vec![status(500)]));
        let f = fetcher(transport.clone());
        let err = f.fetch(&feed()).await.unwrap_err();
        assert!(err.contains("500"));
        assert_eq!(transport.calls(), 1);
    }
}
