// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod config;
pub mod fetch;
pub mod health;
pub mod ingest;
pub mod scheduler;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::config::{FeedProfileTable, Settings};
pub use crate::fetch::{should_import, FeedFetcher, RunSummary};
pub use crate::health::{HealthMonitor, HealthStatus, HealthSummary};
pub use crate::ingest::types::{ImportRequest, ImportResult, ImportStatus, IndicatorType};
pub use crate::ingest::IngestService;
pub use crate::scheduler::{HealthScheduler, ImportScheduler};
pub use crate::store::{AuthProfile, Feed, NewFeed, Store};
