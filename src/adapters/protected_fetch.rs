//! Adapter for sites that reject headless browsers: fetches the listing
//! with a browser-shaped HTTP client, parses it statically, and follows
//! event links for descriptions. Date-range "start - end" strings on the
//! cards populate both `date_iso` and `end_date_iso`.

use super::{AdapterContext, SiteAdapter};
use crate::error::{Result, ScraperError};
use crate::extract::{collapse_whitespace, extract_with_bundle};
use crate::normalize::{classify_target_group, clean_event_name, detect_status};
use crate::types::{
    CrawlOutcome, Event, ItemSelector, SelectorBundle, NOT_AVAILABLE,
};
use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use scraper::{Html, Selector};
use std::collections::BTreeMap;
use std::collections::HashSet;
use std::time::Duration as StdDuration;
use tracing::{debug, info, warn};

const BROWSER_UA: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

static CARD_DATE_RANGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4}-\d{2}-\d{2})(?:\s*[-–]\s*(\d{4}-\d{2}-\d{2}))?").unwrap());

pub struct ProtectedFetch {
    host: &'static str,
    venue: &'static str,
    client: reqwest::Client,
}

impl ProtectedFetch {
    pub fn tekniska() -> Self {
        Self::new("tekniskamuseet.se", "Tekniska museet")
    }

    pub fn new(host: &'static str, venue: &'static str) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_UA));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .gzip(true)
            .timeout(StdDuration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self { host, venue, client }
    }

    /// Fallback selectors when the admin has not stored a bundle yet.
    fn default_bundle(&self) -> SelectorBundle {
        let mut items = BTreeMap::new();
        items.insert("event_name".into(), ItemSelector::Css("h3, h2".into()));
        items.insert("event_url".into(), ItemSelector::Css("a".into()));
        items.insert(
            "target_group".into(),
            ItemSelector::Css("[class*=\"age\"], [class*=\"type\"]".into()),
        );
        items.insert("location".into(), ItemSelector::Css("[class*=\"location\"]".into()));
        SelectorBundle {
            container: ".event-archive-item-inner".into(),
            items,
        }
    }

    async fn fetch_html(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ScraperError::TransientFetch(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ScraperError::TransientFetch(format!(
                "protected fetch of {url} returned HTTP {status}"
            )));
        }
        response
            .text()
            .await
            .map_err(|e| ScraperError::TransientFetch(e.to_string()))
    }

    /// Longest substantial paragraph from the event's own page.
    async fn fetch_description(&self, url: &str) -> Option<String> {
        let html = self.fetch_html(url).await.ok()?;
        let document = Html::parse_document(&html);
        let selector = Selector::parse("main p, article p, .event-description p").ok()?;
        document
            .select(&selector)
            .map(|p| collapse_whitespace(&p.text().collect::<String>()))
            .filter(|t| t.len() > 30)
            .max_by_key(|t| t.len())
            .map(|t| truncate_chars(&t, 500))
    }

    async fn crawl(&self, ctx: AdapterContext<'_>) -> Result<CrawlOutcome> {
        let mut outcome = CrawlOutcome::default();

        let html = self.fetch_html(ctx.url).await?;
        let bundle = match ctx.selector_store.get(ctx.url)? {
            Some(stored) => stored,
            None => self.default_bundle(),
        };

        let records = extract_with_bundle(&html, &bundle)?;
        if records.is_empty() {
            outcome
                .warnings
                .push(format!("{}: protected fetch found no event cards", ctx.url));
            return Ok(outcome);
        }
        info!("Protected fetch found {} cards on {}", records.len(), ctx.url);

        // The card date lives in free text, not behind a stable selector;
        // re-scan each container's text for an ISO date or range. The
        // parsed document stays inside this block: it must not be held
        // across the detail-fetch awaits below.
        let card_texts: Vec<String> = {
            let container = Selector::parse(&bundle.container)
                .map_err(|e| ScraperError::Config(format!("invalid container: {e}")))?;
            let document = Html::parse_document(&html);
            document
                .select(&container)
                .map(|el| collapse_whitespace(&el.text().collect::<String>()))
                .collect()
        };

        let horizon_end = ctx.today + Duration::days(ctx.horizon_days);
        let mut seen: HashSet<(String, NaiveDate, String)> = HashSet::new();
        let mut detail_budget = ctx.detail_fetch_cap;

        for (record, card_text) in records.into_iter().zip(card_texts) {
            let name = clean_event_name(&record.event_name);
            if name.is_empty() {
                continue;
            }

            let Some((start, end)) = card_date_range(&card_text) else {
                debug!("Card '{name}' carries no parseable date, skipping");
                continue;
            };
            if !overlaps_window(start, end, ctx.today, horizon_end) {
                continue;
            }

            let event_url = record
                .event_url
                .as_deref()
                .and_then(|href| url::Url::parse(ctx.url).ok()?.join(href).ok())
                .map(|u| u.to_string())
                .unwrap_or_else(|| ctx.url.to_string());

            if !seen.insert((name.clone(), start, event_url.clone())) {
                continue;
            }

            let mut description = record
                .description
                .clone()
                .unwrap_or_else(|| NOT_AVAILABLE.to_string());
            if description.len() < 30 && event_url != ctx.url && detail_budget > 0 {
                detail_budget -= 1;
                if let Some(better) = self.fetch_description(&event_url).await {
                    description = better;
                }
            }

            let target_raw = record.target_group.clone().unwrap_or_default();
            outcome.events.push(Event {
                status: detect_status(&name, &description, ""),
                target_group: classify_target_group(&target_raw, &name, false),
                location: record
                    .location
                    .clone()
                    .filter(|l| !l.is_empty())
                    .unwrap_or_else(|| self.venue.to_string()),
                event_name: name,
                date_iso: start,
                end_date_iso: end.filter(|e| *e > start),
                time: NOT_AVAILABLE.to_string(),
                target_group_raw: target_raw,
                description,
                event_url,
                booking_info: NOT_AVAILABLE.to_string(),
                last_scraped: Utc::now(),
            });
        }

        Ok(outcome)
    }
}

fn truncate_chars(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

fn card_date_range(text: &str) -> Option<(NaiveDate, Option<NaiveDate>)> {
    let caps = CARD_DATE_RANGE_RE.captures(text)?;
    let start = NaiveDate::parse_from_str(&caps[1], "%Y-%m-%d").ok()?;
    let end = caps
        .get(2)
        .and_then(|m| NaiveDate::parse_from_str(m.as_str(), "%Y-%m-%d").ok());
    Some((start, end))
}

fn overlaps_window(
    start: NaiveDate,
    end: Option<NaiveDate>,
    today: NaiveDate,
    horizon_end: NaiveDate,
) -> bool {
    start <= horizon_end && end.unwrap_or(start) >= today
}

#[async_trait]
impl SiteAdapter for ProtectedFetch {
    fn name(&self) -> &'static str {
        "protected_fetch"
    }

    fn matches(&self, host: &str) -> bool {
        host.ends_with(self.host)
    }

    async fn run(&self, ctx: AdapterContext<'_>) -> Option<Result<CrawlOutcome>> {
        match self.crawl(ctx).await {
            Ok(outcome) => Some(Ok(outcome)),
            Err(e) => {
                warn!("Protected fetch failed: {e}");
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn parses_card_date_ranges() {
        let (start, end) = card_date_range("Utställning 2026-03-02 - 2026-06-21 entré").unwrap();
        assert_eq!(start, day(2026, 3, 2));
        assert_eq!(end, Some(day(2026, 6, 21)));

        let (start, end) = card_date_range("Visning 2026-03-02").unwrap();
        assert_eq!(start, day(2026, 3, 2));
        assert_eq!(end, None);

        assert!(card_date_range("ingen tid alls").is_none());
    }

    #[test]
    fn window_overlap_keeps_running_events() {
        let today = day(2025, 12, 1);
        let horizon = day(2025, 12, 31);
        // Started earlier, still running.
        assert!(overlaps_window(day(2025, 11, 1), Some(day(2025, 12, 10)), today, horizon));
        // Entirely in the past.
        assert!(!overlaps_window(day(2025, 11, 1), Some(day(2025, 11, 20)), today, horizon));
        // Starts after the horizon.
        assert!(!overlaps_window(day(2026, 2, 1), None, today, horizon));
    }
}
