// src/main.rs
//! Threat-intel feed pipeline binary entrypoint.
//! Wires the store, fetcher, health monitor and the two schedulers behind a
//! small CLI.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use threat_intel_ingest::config::{FeedProfileTable, Settings};
use threat_intel_ingest::fetch::{FeedFetcher, HttpTransport};
use threat_intel_ingest::health::{HealthMonitor, HttpProbe, SYSTEM_CHECKER};
use threat_intel_ingest::ingest::parsers::FeedFormat;
use threat_intel_ingest::scheduler::{HealthScheduler, ImportScheduler};
use threat_intel_ingest::store::{NewFeed, Store};

#[derive(Parser)]
#[command(name = "threat-intel-ingest", about = "Threat-intelligence feed ingestion pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one import pass over all eligible feeds, or one named feed.
    RunOnce {
        #[arg(long)]
        feed: Option<String>,
    },
    /// Run one health-check pass, optionally for one named feed.
    Health {
        #[arg(long)]
        feed: Option<String>,
    },
    /// Start the recurring import and health schedules.
    Serve,
    /// Register a feed in the registry.
    AddFeed {
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        url: String,
        /// delimited | tabular | structured | bundle
        #[arg(long)]
        format: Option<String>,
        #[arg(long)]
        interval_hours: Option<i64>,
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long)]
        bearer_token: Option<String>,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        password: Option<String>,
    },
}

fn init_tracing() {
    // RUST_LOG wins, then LOG_LEVEL, then the built-in default.
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| std::env::var("LOG_LEVEL").map(EnvFilter::new))
        .unwrap_or_else(|_| EnvFilter::new("threat_intel_ingest=info,warn"));
    let registry = tracing_subscriber::registry().with(filter);

    // LOG_FILE redirects output to an append-only file; stderr otherwise.
    let log_file = std::env::var("LOG_FILE").ok().and_then(|path| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| eprintln!("cannot open log file {path}: {e}"))
            .ok()
    });
    match log_file {
        Some(file) => registry
            .with(fmt::layer().compact().with_ansi(false).with_writer(Arc::new(file)))
            .init(),
        None => registry.with(fmt::layer().compact()).init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let settings = Settings::from_env();
    let profiles = FeedProfileTable::load_default()?;
    let store = Arc::new(Store::open(&settings.database_path)?);

    let fetcher = Arc::new(FeedFetcher::new(
        store.clone(),
        Arc::new(HttpTransport::new(&settings.user_agent)?),
        &settings,
        profiles.clone(),
    ));
    let monitor = Arc::new(HealthMonitor::new(
        store.clone(),
        Arc::new(HttpProbe::new(&settings.user_agent)?),
        settings.health_probe_timeout,
    ));

    match cli.command {
        Command::RunOnce { feed: Some(name) } => match fetcher.run_one(&name).await {
            Ok(result) => println!("{}", serde_json::to_string_pretty(&result)?),
            Err(e) => anyhow::bail!("import of '{name}' failed: {e}"),
        },
        Command::RunOnce { feed: None } => {
            let summary = fetcher.run_all().await;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Health { feed } => {
            let feed_id = match feed {
                Some(name) => Some(
                    store
                        .feed_by_name(&name)?
                        .ok_or_else(|| anyhow::anyhow!("no feed named '{name}'"))?
                        .id,
                ),
                None => None,
            };
            let summary = monitor.run_health_check(feed_id, SYSTEM_CHECKER, None).await;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Serve => {
            let import_sched = ImportScheduler::new(fetcher, &settings.import_cron);
            import_sched.start().await?;
            let health_sched = HealthScheduler::new(monitor, settings.health_check_interval);
            health_sched.start();

            tracing::info!("schedulers running, press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
            import_sched.stop().await;
            health_sched.stop();
        }
        Command::AddFeed {
            name,
            url,
            format,
            interval_hours,
            api_key,
            bearer_token,
            username,
            password,
        } => {
            let mut auth_config = HashMap::new();
            if let Some(k) = api_key {
                auth_config.insert("api_key".to_string(), k);
            }
            if let Some(t) = bearer_token {
                auth_config.insert("bearer_token".to_string(), t);
            }
            if let Some(u) = username {
                auth_config.insert("username".to_string(), u);
            }
            if let Some(p) = password {
                auth_config.insert("password".to_string(), p);
            }

            // Auth profile is resolved once, here, and carried on the row.
            let profile = profiles.profile_for(&name);
            let auth_profile = profile.resolve_auth(&auth_config);
            let requires_auth = !auth_config.is_empty() || profile.requires_api_key;
            let format = format
                .as_deref()
                .and_then(FeedFormat::parse)
                .or_else(|| profile.format_hint.as_deref().and_then(FeedFormat::parse));

            let id = store.add_feed(&NewFeed {
                name: name.clone(),
                url,
                format,
                requires_auth,
                auth_profile,
                auth_config,
                enabled: true,
                import_interval_hours: interval_hours
                    .unwrap_or(settings.default_import_interval_hours),
            })?;
            println!("registered feed '{name}' (id {id})");
        }
    }

    Ok(())
}
