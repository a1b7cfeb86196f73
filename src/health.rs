// src/health.rs
//! Feed reachability monitoring, independent of the import write path.
//! Probes are cheap (HEAD or a 1 KiB ranged GET), every outcome maps to a
//! fixed status vocabulary, and each probe appends one health-log row.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use uuid::Uuid;

use crate::ingest::parsers::FeedFormat;
use crate::store::{AuthProfile, Feed, HealthLogEntry, Store};

/// Prober identity for scheduler-driven checks.
pub const SYSTEM_CHECKER: i64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Ok,
    Unauthorized,
    Forbidden,
    NotFound,
    RateLimited,
    ServerError,
    Timeout,
    Unreachable,
    SslError,
    Error,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Ok => "ok",
            HealthStatus::Unauthorized => "unauthorized",
            HealthStatus::Forbidden => "forbidden",
            HealthStatus::NotFound => "not_found",
            HealthStatus::RateLimited => "rate_limited",
            HealthStatus::ServerError => "server_error",
            HealthStatus::Timeout => "timeout",
            HealthStatus::Unreachable => "unreachable",
            HealthStatus::SslError => "ssl_error",
            HealthStatus::Error => "error",
        }
    }
}

/// Status-code classification; a pure function of the code.
pub fn classify_status(code: u16) -> HealthStatus {
    match code {
        200..=299 => HealthStatus::Ok,
        401 => HealthStatus::Unauthorized,
        403 => HealthStatus::Forbidden,
        404 => HealthStatus::NotFound,
        429 => HealthStatus::RateLimited,
        500..=599 => HealthStatus::ServerError,
        _ => HealthStatus::Error,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    Timeout,
    Connect(String),
    Tls(String),
    Other(String),
}

/// Exception-class classification; also pure, and total.
pub fn classify_probe_error(e: &ProbeError) -> (HealthStatus, String) {
    match e {
        ProbeError::Timeout => (HealthStatus::Timeout, "probe timed out".to_string()),
        ProbeError::Connect(msg) => (HealthStatus::Unreachable, msg.clone()),
        ProbeError::Tls(msg) => (HealthStatus::SslError, msg.clone()),
        ProbeError::Other(msg) => (HealthStatus::Error, msg.clone()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMethod {
    Head,
    /// GET with `Range: bytes=0-1023`, so large payloads are not downloaded.
    RangedGet,
}

/// Header-borne credentials only; query-string API keys are never
/// replayed on probe URLs.
#[derive(Debug, Clone)]
pub struct ProbeRequest {
    pub url: String,
    pub method: ProbeMethod,
    pub bearer_token: Option<String>,
    pub basic_auth: Option<(String, String)>,
    pub timeout: Duration,
}

#[async_trait]
pub trait ProbeTransport: Send + Sync {
    /// Returns the HTTP status code of the probe.
    async fn probe(&self, req: &ProbeRequest) -> Result<u16, ProbeError>;
}

pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(user_agent: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().user_agent(user_agent).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ProbeTransport for HttpProbe {
    async fn probe(&self, req: &ProbeRequest) -> Result<u16, ProbeError> {
        let mut builder = match req.method {
            ProbeMethod::Head => self.client.head(&req.url),
            ProbeMethod::RangedGet => self.client.get(&req.url).header("Range", "bytes=0-1023"),
        };
        builder = builder.timeout(req.timeout);
        if let Some(token) = &req.bearer_token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        if let Some((user, pass)) = &req.basic_auth {
            builder = builder.basic_auth(user, Some(pass));
        }
        let resp = builder.send().await.map_err(map_probe_error)?;
        Ok(resp.status().as_u16())
    }
}

fn map_probe_error(e: reqwest::Error) -> ProbeError {
    let text = format!("{e:#?}").to_ascii_lowercase();
    if e.is_timeout() {
        ProbeError::Timeout
    } else if text.contains("certificate") || text.contains("tls") || text.contains("ssl") {
        ProbeError::Tls(e.to_string())
    } else if e.is_connect() {
        ProbeError::Connect(e.to_string())
    } else {
        ProbeError::Other(e.to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResult {
    pub feed_id: i64,
    pub feed_name: String,
    pub url: String,
    pub status: HealthStatus,
    pub http_status: Option<u16>,
    pub response_time_ms: u64,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CachedStatus {
    pub status: HealthStatus,
    pub http_status: Option<u16>,
    pub response_time_ms: u64,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthSummary {
    pub checked: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    pub health_pct: f64,
    pub cancelled: bool,
    pub results: Vec<HealthResult>,
}

/// Poll/cancel state for one health pass.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
    pub cancelled: bool,
    pub finished: bool,
}

#[derive(Default)]
struct CacheState {
    statuses: HashMap<i64, CachedStatus>,
    last_updated: Option<DateTime<Utc>>,
}

/// Owned by the monitor instance, no process-wide state. One mutex guards
/// the status cache, another the progress sessions.
pub struct HealthMonitor {
    store: Arc<Store>,
    transport: Arc<dyn ProbeTransport>,
    probe_timeout: Duration,
    cache: Mutex<CacheState>,
    sessions: Mutex<HashMap<Uuid, Progress>>,
}

impl HealthMonitor {
    pub fn new(store: Arc<Store>, transport: Arc<dyn ProbeTransport>, probe_timeout: Duration) -> Self {
        Self {
            store,
            transport,
            probe_timeout,
            cache: Mutex::new(CacheState::default()),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Probe one feed. Never fails: every branch, including the catch-all,
    /// produces a `HealthResult`.
    pub async fn check_one(&self, feed: &Feed) -> HealthResult {
        let method = match feed.format {
            Some(FeedFormat::Delimited) | Some(FeedFormat::Tabular) => ProbeMethod::Head,
            _ => ProbeMethod::RangedGet,
        };
        let basic_auth = match feed.auth_profile {
            AuthProfile::Basic => feed
                .auth_config
                .get("username")
                .zip(feed.auth_config.get("password"))
                .map(|(u, p)| (u.clone(), p.clone())),
            _ => None,
        };
        let req = ProbeRequest {
            url: feed.url.clone(),
            method,
            bearer_token: feed.auth_config.get("bearer_token").cloned(),
            basic_auth,
            timeout: self.probe_timeout,
        };

        let started = Instant::now();
        let (status, http_status, error_message) = match self.transport.probe(&req).await {
            Ok(code) => (classify_status(code), Some(code), None),
            Err(e) => {
                let (status, message) = classify_probe_error(&e);
                (status, None, Some(message))
            }
        };

        counter!("health_probes_total").increment(1);
        HealthResult {
            feed_id: feed.id,
            feed_name: feed.name.clone(),
            url: feed.url.clone(),
            status,
            http_status,
            response_time_ms: started.elapsed().as_millis() as u64,
            error_message,
        }
    }

    /// Probe the targeted feeds (one id, or all), appending one log row per
    /// probe and refreshing the in-memory cache. Cancellation is checked
    /// once per feed, before its probe.
    pub async fn run_health_check(
        &self,
        feed_id: Option<i64>,
        checked_by: i64,
        session: Option<Uuid>,
    ) -> HealthSummary {
        let feeds: Vec<Feed> = match self.store.list_feeds() {
            Ok(feeds) => feeds
                .into_iter()
                .filter(|f| feed_id.map(|id| f.id == id).unwrap_or(true))
                .filter(|f| !f.url.trim().is_empty())
                .collect(),
            Err(e) => {
                tracing::error!(error = %e, "cannot list feeds for health check");
                return HealthSummary::default();
            }
        };

        if let Some(id) = session {
            self.update_session(id, |p| p.total = feeds.len());
        }

        let mut summary = HealthSummary::default();
        for feed in &feeds {
            if let Some(id) = session {
                if self.session(id).map(|p| p.cancelled).unwrap_or(false) {
                    summary.cancelled = true;
                    break;
                }
            }

            let result = self.check_one(feed).await;
            if let Err(e) = self.store.insert_health_log(&HealthLogEntry {
                feed_id: result.feed_id,
                url: result.url.clone(),
                status: result.status.as_str().to_string(),
                http_status: result.http_status,
                response_time_ms: result.response_time_ms,
                error_message: result.error_message.clone(),
                checked_at: Utc::now(),
                checked_by,
            }) {
                tracing::error!(feed = %feed.name, error = %e, "failed to write health log");
            }

            self.update_cache(&result);
            if result.status == HealthStatus::Ok {
                summary.healthy += 1;
            } else {
                summary.unhealthy += 1;
            }
            summary.checked += 1;
            summary.results.push(result);

            if let Some(id) = session {
                self.update_session(id, |p| p.completed += 1);
            }
        }

        if let Some(id) = session {
            self.update_session(id, |p| p.finished = true);
        }
        summary.health_pct = if summary.checked == 0 {
            0.0
        } else {
            summary.healthy as f64 * 100.0 / summary.checked as f64
        };

        tracing::info!(
            checked = summary.checked,
            healthy = summary.healthy,
            unhealthy = summary.unhealthy,
            cancelled = summary.cancelled,
            "health check pass finished"
        );
        summary
    }

    // --- status cache ---

    fn update_cache(&self, result: &HealthResult) {
        let mut cache = self.cache.lock().expect("health cache mutex poisoned");
        cache.statuses.insert(
            result.feed_id,
            CachedStatus {
                status: result.status,
                http_status: result.http_status,
                response_time_ms: result.response_time_ms,
                checked_at: Utc::now(),
            },
        );
        cache.last_updated = Some(Utc::now());
    }

    pub fn cached_status(&self, feed_id: i64) -> Option<CachedStatus> {
        self.cache
            .lock()
            .expect("health cache mutex poisoned")
            .statuses
            .get(&feed_id)
            .copied()
    }

    pub fn cache_last_updated(&self) -> Option<DateTime<Utc>> {
        self.cache.lock().expect("health cache mutex poisoned").last_updated
    }

    // --- progress sessions ---

    pub fn create_session(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.sessions
            .lock()
            .expect("sessions mutex poisoned")
            .insert(id, Progress::default());
        id
    }

    pub fn session(&self, id: Uuid) -> Option<Progress> {
        self.sessions
            .lock()
            .expect("sessions mutex poisoned")
            .get(&id)
            .copied()
    }

    pub fn cancel_session(&self, id: Uuid) {
        self.update_session(id, |p| p.cancelled = true);
    }

    /// Drop finished sessions that nobody will poll again.
    pub fn cleanup_sessions(&self) {
        self.sessions
            .lock()
            .expect("sessions mutex poisoned")
            .retain(|_, p| !p.finished);
    }

    fn update_session(&self, id: Uuid, f: impl FnOnce(&mut Progress)) {
        if let Some(p) = self
            .sessions
            .lock()
            .expect("sessions mutex poisoned")
            .get_mut(&id)
        {
            f(p);
        }
    }
}
