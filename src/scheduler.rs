// src/scheduler.rs
//! Recurring drivers for the two subsystems: a cron-expression job for
//! imports and a short-period interval task for health checks. The two are
//! independent and may run concurrently with each other, but neither
//! overlaps with itself.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::fetch::{FeedFetcher, RunSummary};
use crate::health::{HealthMonitor, SYSTEM_CHECKER};

/// Accepts the operator-facing five-field cron form by prefixing a seconds
/// field; six/seven-field expressions pass through.
fn normalize_cron(expr: &str) -> String {
    if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    }
}

pub struct ImportScheduler {
    fetcher: Arc<FeedFetcher>,
    cron: String,
    inner: tokio::sync::Mutex<Option<JobScheduler>>,
    /// Held for the duration of one pass so timer fires never overlap.
    run_gate: Arc<tokio::sync::Mutex<()>>,
}

impl ImportScheduler {
    pub fn new(fetcher: Arc<FeedFetcher>, cron_expr: &str) -> Self {
        Self {
            fetcher,
            cron: normalize_cron(cron_expr),
            inner: tokio::sync::Mutex::new(None),
            run_gate: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub async fn start(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.is_some() {
            tracing::warn!("import scheduler already running, start ignored");
            return Ok(());
        }

        let sched = JobScheduler::new().await.context("creating import scheduler")?;
        let fetcher = self.fetcher.clone();
        let gate = self.run_gate.clone();
        let job = Job::new_async(self.cron.as_str(), move |_uuid, _l| {
            let fetcher = fetcher.clone();
            let gate = gate.clone();
            Box::pin(async move {
                match gate.try_lock() {
                    Ok(_guard) => {
                        fetcher.run_all().await;
                    }
                    Err(_) => {
                        tracing::warn!("previous import pass still running, tick skipped");
                    }
                }
            })
        })
        .with_context(|| format!("creating import job for cron '{}'", self.cron))?;
        sched.add(job).await.context("adding import job")?;
        sched.start().await.context("starting import scheduler")?;

        tracing::info!(cron = %self.cron, "import scheduler started");
        *inner = Some(sched);
        Ok(())
    }

    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        match inner.take() {
            Some(mut sched) => {
                if let Err(e) = sched.shutdown().await {
                    tracing::warn!(error = %e, "import scheduler shutdown failed");
                } else {
                    tracing::info!("import scheduler stopped");
                }
            }
            None => {
                tracing::debug!("import scheduler not running, stop ignored");
            }
        }
    }

    /// One-shot pass that bypasses the timer, for manual triggering. Shares
    /// the gate, so it also cannot overlap a scheduled pass.
    pub async fn run_now(&self) -> RunSummary {
        let _guard = self.run_gate.lock().await;
        self.fetcher.run_all().await
    }
}

pub struct HealthScheduler {
    monitor: Arc<HealthMonitor>,
    period: Duration,
    handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl HealthScheduler {
    pub fn new(monitor: Arc<HealthMonitor>, period: Duration) -> Self {
        Self {
            monitor,
            period,
            handle: std::sync::Mutex::new(None),
        }
    }

    pub fn start(&self) {
        let mut handle = self.handle.lock().expect("health scheduler mutex poisoned");
        if handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
            tracing::warn!("health scheduler already running, start ignored");
            return;
        }

        let monitor = self.monitor.clone();
        let period = self.period;
        *handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                monitor.run_health_check(None, SYSTEM_CHECKER, None).await;
            }
        }));
        tracing::info!(period_secs = self.period.as_secs(), "health scheduler started");
    }

    pub fn stop(&self) {
        let mut handle = self.handle.lock().expect("health scheduler mutex poisoned");
        match handle.take() {
            Some(h) => {
                h.abort();
                tracing::info!("health scheduler stopped");
            }
            None => {
                tracing::debug!("health scheduler not running, stop ignored");
            }
        }
    }

    /// One health pass outside the timer.
    pub async fn run_now(&self) -> crate::health::HealthSummary {
        self.monitor.run_health_check(None, SYSTEM_CHECKER, None).await
    }
}
