//! Single-URL extraction pipeline: open a rendered session, paginate,
//! extract via cached selectors (discovering them when missing),
//! normalize into events, optionally enrich descriptions from detail
//! pages, and consolidate in-run duplicates.

use crate::adapters::{AdapterContext, AdapterRegistry};
use crate::ai::{AiEventRecord, AiExtractor};
use crate::browser::{BrowserDriver, BrowserSession, ClickTarget, WaitOptions};
use crate::discover::{Discoverer, Discovery};
use crate::error::{Result, ScraperError};
use crate::extract::{collapse_whitespace, extract_with_bundle};
use crate::normalize::{
    classify_target_group, clean_event_name, detect_status, extract_booking, extract_time,
    parse_date, parse_date_range, split_datetime,
};
use crate::store::selector_store::split_domain_path;
use crate::store::SelectorStore;
use crate::types::{CrawlOutcome, Event, RawEventFields, SelectorBundle, NOT_AVAILABLE};
use chrono::{Duration, Local, NaiveDate, Utc};
use metrics::{counter, histogram};
use scraper::{Html, Selector};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{debug, info, instrument, warn};
use url::Url;

const COOKIE_BANNER_LABELS: &[&str] = &["Godkänn", "Acceptera", "Jag förstår"];
const DETAIL_FETCH_TIMEOUT: StdDuration = StdDuration::from_secs(10);
const MIN_DESCRIPTION_LEN: usize = 30;
const MAX_DESCRIPTION_LEN: usize = 500;
/// Per-adapter horizon overrides may not exceed this.
const MAX_HORIZON_DAYS: i64 = 45;

/// Pipeline states for one URL. Any state may fall to `Failed`, which
/// terminates the pipeline for that URL only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlPhase {
    Pending,
    Fetching,
    Paginating,
    Extracting,
    Normalizing,
    Done,
    Failed,
}

struct PhaseTracker<'a> {
    url: &'a str,
    phase: CrawlPhase,
}

impl<'a> PhaseTracker<'a> {
    fn new(url: &'a str) -> Self {
        Self {
            url,
            phase: CrawlPhase::Pending,
        }
    }

    fn advance(&mut self, next: CrawlPhase) {
        debug!("{}: {:?} -> {:?}", self.url, self.phase, next);
        self.phase = next;
    }
}

pub struct Crawler {
    driver: Arc<dyn BrowserDriver>,
    ai: Arc<dyn AiExtractor>,
    selector_store: SelectorStore,
    adapters: Arc<AdapterRegistry>,
    horizon_days: i64,
    detail_fetch_cap: usize,
    default_pagination_clicks: usize,
    http: reqwest::Client,
}

impl Crawler {
    pub fn new(
        driver: Arc<dyn BrowserDriver>,
        ai: Arc<dyn AiExtractor>,
        selector_store: SelectorStore,
        adapters: Arc<AdapterRegistry>,
        horizon_days: i64,
        detail_fetch_cap: usize,
    ) -> Self {
        Self {
            driver,
            ai,
            selector_store,
            adapters,
            horizon_days,
            detail_fetch_cap,
            default_pagination_clicks: crate::paginate::DEFAULT_MAX_CLICKS,
            http: reqwest::Client::builder()
                .timeout(DETAIL_FETCH_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    /// Runs the pipeline for one URL, retrying once on transient fetch
    /// errors before giving up.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn crawl(&self, url: &str) -> Result<CrawlOutcome> {
        let started = std::time::Instant::now();
        let result = match self.crawl_once(url).await {
            Err(e) if e.is_transient() => {
                warn!("Transient failure for {url}, retrying once: {e}");
                self.crawl_once(url).await
            }
            other => other,
        };
        histogram!("scraper_crawl_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn crawl_once(&self, url: &str) -> Result<CrawlOutcome> {
        let mut tracker = PhaseTracker::new(url);
        let today = Local::now().date_naive();
        let (host, path) = split_domain_path(url)?;
        let preschool_hint = path.contains("forskolor");

        let adapter = self.adapters.find(&host);
        let horizon_days = adapter
            .and_then(|a| a.horizon_days())
            .unwrap_or(self.horizon_days)
            .min(MAX_HORIZON_DAYS);
        let horizon_end = today + Duration::days(horizon_days);

        if let Some(adapter) = adapter {
            let ctx = AdapterContext {
                url,
                driver: self.driver.as_ref(),
                selector_store: &self.selector_store,
                today,
                horizon_days,
                detail_fetch_cap: self.detail_fetch_cap,
            };
            if let Some(result) = adapter.run(ctx).await {
                tracker.advance(CrawlPhase::Fetching);
                return match result {
                    Ok(mut outcome) => {
                        tracker.advance(CrawlPhase::Done);
                        outcome.events = consolidate(outcome.events);
                        self.record_counts(&host, &outcome);
                        Ok(outcome)
                    }
                    Err(e) => {
                        tracker.advance(CrawlPhase::Failed);
                        Err(e)
                    }
                };
            }
        }

        tracker.advance(CrawlPhase::Fetching);
        let session = self
            .driver
            .open(url, &WaitOptions::network_idle(3000))
            .await?;
        let paginated = self
            .render_listing(session.as_ref(), &mut tracker, adapter.and_then(|a| a.pagination_clicks()))
            .await;
        session.close().await;
        let html = match paginated {
            Ok(html) => html,
            Err(e) => {
                tracker.advance(CrawlPhase::Failed);
                return Err(e);
            }
        };

        tracker.advance(CrawlPhase::Extracting);
        let mut warnings = Vec::new();
        let extraction = self.extract_records(url, &html, &mut warnings).await;
        let records = match extraction {
            Ok(records) => records,
            Err(e) => {
                tracker.advance(CrawlPhase::Failed);
                return Err(e);
            }
        };

        tracker.advance(CrawlPhase::Normalizing);
        let base = Url::parse(url)?;
        let mut skipped = 0usize;
        let mut events = Vec::new();
        for record in &records {
            match self.normalize_record(record, &base, url, preschool_hint, today, horizon_end) {
                Some(event) => events.push(event),
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            debug!("{url}: skipped {skipped} records without usable dates");
        }

        let mut detail_budget = self.detail_fetch_cap;
        self.enrich_descriptions(&mut events, url, &mut detail_budget)
            .await;

        let outcome = CrawlOutcome {
            events: consolidate(events),
            warnings,
        };
        tracker.advance(CrawlPhase::Done);
        info!("{url}: extracted {} events", outcome.events.len());
        self.record_counts(&host, &outcome);
        Ok(outcome)
    }

    fn record_counts(&self, host: &str, outcome: &CrawlOutcome) {
        counter!("scraper_events_extracted_total", "host" => host.to_string())
            .increment(outcome.events.len() as u64);
    }

    /// Dismisses cookie banners and applies pagination, returning the
    /// fully loaded listing HTML.
    async fn render_listing(
        &self,
        session: &dyn BrowserSession,
        tracker: &mut PhaseTracker<'_>,
        click_override: Option<usize>,
    ) -> Result<String> {
        for label in COOKIE_BANNER_LABELS {
            if session
                .click(&ClickTarget::Text(label.to_string()), true, 1500)
                .await
                .unwrap_or(false)
            {
                debug!("Dismissed cookie banner via '{label}'");
                break;
            }
        }
        let _ = session
            .click(&ClickTarget::Css("[id*=\"cookie\"] button".into()), true, 1000)
            .await;

        tracker.advance(CrawlPhase::Paginating);
        let max_clicks = click_override.unwrap_or(self.default_pagination_clicks);
        let mut paginator = crate::paginate::Paginator::new(max_clicks);
        let actions = paginator.run(session).await?;
        if actions > 0 {
            debug!("Pagination performed {actions} actions");
        }

        session.content().await
    }

    /// Two-tier extraction: stored bundle first, discovery on miss or
    /// mismatch. Discovery results are cached only when trusted.
    async fn extract_records(
        &self,
        url: &str,
        html: &str,
        warnings: &mut Vec<String>,
    ) -> Result<Vec<RawEventFields>> {
        let mut had_stored_bundle = false;
        if let Some(bundle) = self.selector_store.get(url)? {
            had_stored_bundle = true;
            let records = extract_with_bundle(html, &bundle)?;
            if !records.is_empty() {
                debug!("{url}: stored bundle produced {} records", records.len());
                return Ok(records);
            }
            // Stale cache is the admin's call to fix; discover for this
            // run only and leave the stored bundle in place.
            warn!("{url}: stored selectors matched nothing, re-discovering for this run");
            warnings.push(format!("{url}: stored selectors matched no containers"));
        }

        let discoverer = Discoverer::new(self.ai.as_ref());
        let (discovery, mut discovery_warnings) = discoverer.discover(url, html).await?;
        warnings.append(&mut discovery_warnings);

        match discovery {
            Discovery::Trusted { bundle, confidence } => {
                if had_stored_bundle {
                    info!("{url}: trusted re-discovery used for this run only");
                } else {
                    info!("{url}: caching discovered bundle (confidence {confidence:.2})");
                    if let Err(e) = self.selector_store.put(url, &bundle) {
                        warnings.push(format!("{url}: failed to cache selectors: {e}"));
                    }
                }
                extract_with_bundle(html, &bundle)
            }
            Discovery::Untrusted { bundle, confidence } => {
                info!("{url}: using untrusted bundle for this run (confidence {confidence:.2})");
                extract_with_bundle(html, &bundle)
            }
            Discovery::EventList(records) => Ok(records
                .into_iter()
                .map(ai_record_to_fields)
                .collect()),
        }
    }

    /// Normalizes one raw field map into an Event; `None` drops it
    /// (unparseable date or outside the horizon).
    fn normalize_record(
        &self,
        record: &RawEventFields,
        base: &Url,
        listing_url: &str,
        preschool_hint: bool,
        today: NaiveDate,
        horizon_end: NaiveDate,
    ) -> Option<Event> {
        let name = clean_event_name(&record.event_name);
        if name.is_empty() {
            return None;
        }

        let date_text = record.date_text.as_deref().unwrap_or_default();
        let mut time_text = record.time_text.clone().unwrap_or_default();

        // A bundle can map date and time to the same element; split the
        // combined cell instead of parsing it twice.
        let mut start_end: Option<(NaiveDate, Option<NaiveDate>)> = None;
        if !date_text.is_empty() && record.time_text.as_deref() == Some(date_text) {
            let (date, time) = split_datetime(date_text, today);
            if let Some(date) = date {
                start_end = Some((date, None));
            }
            time_text = time.unwrap_or_default();
        }

        let (start, mut end) = match start_end {
            Some(pair) => pair,
            None => parse_date_range(date_text, today)?,
        };
        if let Some(end_text) = record.end_date_text.as_deref() {
            end = parse_date(end_text, today).or(end);
        }
        let end = end.filter(|e| *e > start);

        // Horizon filter with overlap: running multi-day events stay.
        if start > horizon_end || end.unwrap_or(start) < today {
            return None;
        }

        let mut booking_raw = record.booking_text.clone().unwrap_or_default();
        if let Some(idx) = booking_raw.find("Datum:") {
            booking_raw.truncate(idx);
        }

        let target_raw = record
            .target_group
            .as_deref()
            .map(extract_target_value)
            .unwrap_or_default();

        let event_url = record
            .event_url
            .as_deref()
            .and_then(|href| base.join(href.trim()).ok())
            .map(|u| u.to_string())
            .unwrap_or_else(|| listing_url.to_string());

        let description = record
            .description
            .clone()
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| NOT_AVAILABLE.to_string());

        Some(Event {
            status: detect_status(
                &record.event_name,
                &description,
                record.status_text.as_deref().unwrap_or_default(),
            ),
            target_group: classify_target_group(&target_raw, &name, preschool_hint),
            booking_info: extract_booking(&booking_raw).to_string(),
            time: extract_time(&time_text),
            location: record
                .location
                .clone()
                .filter(|l| !l.is_empty())
                .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            event_name: name,
            date_iso: start,
            end_date_iso: end,
            target_group_raw: target_raw,
            description,
            event_url,
            last_scraped: Utc::now(),
        })
    }

    /// Follows event links to replace missing or stub descriptions,
    /// bounded by the per-run cap.
    async fn enrich_descriptions(
        &self,
        events: &mut [Event],
        listing_url: &str,
        budget: &mut usize,
    ) {
        for event in events.iter_mut() {
            if *budget == 0 {
                debug!("Detail fetch budget exhausted");
                break;
            }
            let is_stub =
                event.description == NOT_AVAILABLE || event.description.len() < MIN_DESCRIPTION_LEN;
            if !is_stub || event.event_url == listing_url {
                continue;
            }
            *budget -= 1;
            if let Some(description) = self.fetch_description(&event.event_url).await {
                event.description = description;
            }
        }
    }

    async fn fetch_description(&self, url: &str) -> Option<String> {
        let response = self.http.get(url).send().await.ok()?;
        if !response.status().is_success() {
            return None;
        }
        let html = response.text().await.ok()?;
        extract_main_description(&html)
    }
}

/// Longest substantial paragraph from a detail page's main content.
pub fn extract_main_description(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector =
        Selector::parse(".event-description p, .event-content p, main p, article p, p").ok()?;
    let best = document
        .select(&selector)
        .map(|p| collapse_whitespace(&p.text().collect::<String>()))
        .filter(|t| t.len() > MIN_DESCRIPTION_LEN)
        .max_by_key(|t| t.len())?;
    let mut end = best.len().min(MAX_DESCRIPTION_LEN);
    while end > 0 && !best.is_char_boundary(end) {
        end -= 1;
    }
    Some(best[..end].to_string())
}

/// "Målgrupp: Barn 3-6 år" → "Barn 3-6 år"; plain values pass through.
fn extract_target_value(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.to_lowercase().contains("målgrupp") {
        match trimmed.split_once(':') {
            Some((_, value)) => value.trim().to_string(),
            None => trimmed.replace("Målgrupp", "").trim().to_string(),
        }
    } else {
        trimmed.to_string()
    }
}

fn ai_record_to_fields(record: AiEventRecord) -> RawEventFields {
    RawEventFields {
        event_name: record.event_name,
        date_text: record.date_iso,
        end_date_text: record.end_date_iso.filter(|e| e != NOT_AVAILABLE),
        time_text: record.time,
        location: record.location,
        description: record.description,
        target_group: record.target_group,
        status_text: record.status,
        booking_text: record.booking_info,
        event_url: record.event_url,
    }
}

/// In-run dedup by `(event_name, date_iso)`: distinct times merge into a
/// comma-joined list, the first-seen URL wins, the longer description
/// survives.
pub fn consolidate(events: Vec<Event>) -> Vec<Event> {
    let mut order: Vec<Event> = Vec::with_capacity(events.len());
    let mut index: HashMap<(String, NaiveDate), usize> = HashMap::new();

    for event in events {
        let key = (event.event_name.clone(), event.date_iso);
        match index.get(&key) {
            None => {
                index.insert(key, order.len());
                order.push(event);
            }
            Some(&i) => {
                let kept = &mut order[i];
                if event.time != NOT_AVAILABLE {
                    if kept.time == NOT_AVAILABLE {
                        kept.time = event.time;
                    } else if !kept.time.split(", ").any(|t| t == event.time) {
                        kept.time = format!("{}, {}", kept.time, event.time);
                    }
                }
                if event.description.len() > kept.description.len() {
                    kept.description = event.description;
                }
            }
        }
    }
    order
}
