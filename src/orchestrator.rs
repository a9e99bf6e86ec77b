//! Fans enabled source URLs out to isolated workers, aggregates their
//! results into the event store, and records one run-log entry per run.
//! Worker failures never abort the run; only setup errors are fatal.

use crate::adapters::AdapterRegistry;
use crate::ai::AiExtractor;
use crate::browser::BrowserDriver;
use crate::config::RuntimeConfig;
use crate::crawler::Crawler;
use crate::db::Database;
use crate::error::{Result, ScraperError};
use crate::store::{EventStore, RunLogStore, SelectorStore, Settings, SourceUrls};
use crate::types::{RunMode, RunStatus};
use chrono::Local;
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tracing::{error, info, warn};

#[derive(Debug)]
pub struct RunSummary {
    pub status: RunStatus,
    pub events_found: usize,
    pub failures: usize,
    pub warnings: Vec<String>,
}

pub struct Orchestrator {
    db: Database,
    config: RuntimeConfig,
    driver: Arc<dyn BrowserDriver>,
    ai: Arc<dyn AiExtractor>,
    adapters: Arc<AdapterRegistry>,
}

impl Orchestrator {
    pub fn new(
        db: Database,
        config: RuntimeConfig,
        driver: Arc<dyn BrowserDriver>,
        ai: Arc<dyn AiExtractor>,
    ) -> Self {
        Self::with_adapters(db, config, driver, ai, AdapterRegistry::with_defaults())
    }

    pub fn with_adapters(
        db: Database,
        config: RuntimeConfig,
        driver: Arc<dyn BrowserDriver>,
        ai: Arc<dyn AiExtractor>,
        adapters: AdapterRegistry,
    ) -> Self {
        Self {
            db,
            config,
            driver,
            ai,
            adapters: Arc::new(adapters),
        }
    }

    fn crawler(&self) -> Crawler {
        Crawler::new(
            self.driver.clone(),
            self.ai.clone(),
            SelectorStore::new(self.db.clone()),
            self.adapters.clone(),
            self.config.horizon_days,
            self.config.detail_fetch_cap_per_run,
        )
    }

    /// One full pass over all enabled source URLs. Always writes a run
    /// log entry, including on cancellation.
    pub async fn run(&self, mode: RunMode) -> Result<RunSummary> {
        // Snapshot at run start: URLs added mid-run are not observed.
        let sources = SourceUrls::new(self.db.clone()).enabled()?;
        let run_log = RunLogStore::new(self.db.clone());

        if sources.is_empty() {
            warn!("No enabled URLs to scrape");
            let warnings = vec!["No enabled URLs configured".to_string()];
            run_log.add(mode, RunStatus::Warn, 0, 0, &warnings)?;
            return Ok(RunSummary {
                status: RunStatus::Warn,
                events_found: 0,
                failures: 0,
                warnings,
            });
        }

        info!("Starting {} run over {} sources", mode.as_str(), sources.len());

        // A cancel signal stops new work immediately; in-flight workers
        // keep racing their own per-URL timeout as the grace window.
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let signal_listener = tokio::spawn(async move {
            if shutdown_signal().await {
                warn!("Cancel signal received, stopping new work");
                let _ = cancel_tx.send(true);
            }
        });

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let per_url_timeout = Duration::from_secs(self.config.per_url_timeout_s);

        let mut handles = Vec::with_capacity(sources.len());
        for source in sources {
            let semaphore = semaphore.clone();
            let cancel = cancel_rx.clone();
            let crawler = self.crawler();
            let url = source.url.clone();
            handles.push((source.name.clone(), tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| ScraperError::Config("worker pool closed".into()))?;
                if *cancel.borrow() {
                    return Err(ScraperError::TransientFetch("run cancelled".into()));
                }
                match tokio::time::timeout(per_url_timeout, crawler.crawl(&url)).await {
                    Ok(result) => result,
                    Err(_) => Err(ScraperError::WorkerTimeout(per_url_timeout.as_secs())),
                }
            })));
        }

        let event_store = EventStore::new(self.db.clone());
        let mut events_found = 0usize;
        let mut failures = 0usize;
        let mut warnings = Vec::new();

        for (name, handle) in handles {
            match handle.await {
                Ok(Ok(outcome)) => {
                    warnings.extend(outcome.warnings);
                    // Events are upserted in the order the crawler
                    // emitted them; the upsert itself is idempotent.
                    let mut stored = 0usize;
                    for event in &outcome.events {
                        match event_store.upsert(event) {
                            Ok(()) => stored += 1,
                            Err(e) => {
                                warn!("Upsert failed for '{}': {e}", event.event_name);
                                warnings.push(format!("{name}: upsert failed: {e}"));
                            }
                        }
                    }
                    info!("{name}: stored {stored} events");
                    events_found += outcome.events.len();
                }
                Ok(Err(e)) => {
                    error!("{name} failed: {e}");
                    counter!("scraper_url_failures_total").increment(1);
                    failures += 1;
                    warnings.push(format!("{name}: {e}"));
                }
                Err(join_error) => {
                    // Worker isolation: a panicking crawl surfaces here
                    // without touching the other workers.
                    error!("{name} worker crashed: {join_error}");
                    counter!("scraper_url_failures_total").increment(1);
                    failures += 1;
                    warnings.push(format!("{name}: worker crashed: {join_error}"));
                }
            }
        }
        signal_listener.abort();

        let status = if failures > 0 && events_found == 0 {
            RunStatus::Error
        } else if failures > 0 {
            RunStatus::Warn
        } else {
            RunStatus::Ok
        };

        run_log.add(mode, status, events_found as i64, failures as i64, &warnings)?;

        self.sweep_if_enabled(&event_store)?;

        info!(
            "Run finished: status={} events={} failures={}",
            status.as_str(),
            events_found,
            failures
        );
        Ok(RunSummary {
            status,
            events_found,
            failures,
            warnings,
        })
    }

    /// Post-run retention sweep, gated by the admin-controlled setting.
    fn sweep_if_enabled(&self, event_store: &EventStore) -> Result<()> {
        let settings = Settings::new(self.db.clone());
        if !settings.get_bool("auto_delete_enabled", false)? {
            return Ok(());
        }
        let days = settings.get_i64("auto_delete_days", self.config.retention_days)?;
        let deleted = event_store.delete_older_than(days, Local::now().date_naive())?;
        if deleted > 0 {
            info!("Retention sweep removed {deleted} events older than {days} days");
        }
        Ok(())
    }
}

/// Resolves when the process is told to stop: SIGINT (Ctrl-C) or, on
/// Unix, SIGTERM from a process manager or the cron trigger.
#[cfg(unix)]
async fn shutdown_signal() -> bool {
    use tokio::signal::unix::{signal, SignalKind};
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Could not register SIGTERM handler: {e}");
            return tokio::signal::ctrl_c().await.is_ok();
        }
    };
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.is_ok(),
        _ = terminate.recv() => true,
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> bool {
    tokio::signal::ctrl_c().await.is_ok()
}
