#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use evenemang_scraper::ai::{AiEventRecord, AiExtractor, DiscoveredBundle, SampleBlock};
use evenemang_scraper::browser::{BrowserDriver, BrowserSession, ClickTarget, WaitOptions};
use evenemang_scraper::error::{Result, ScraperError};
use evenemang_scraper::types::{ItemSelector, SelectorBundle};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Scripted browser driver: serves canned HTML per URL, or hangs forever
/// to exercise worker timeouts.
#[derive(Default)]
pub struct MockDriver {
    pages: HashMap<String, String>,
    hanging: HashSet<String>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: &str, html: &str) -> Self {
        self.pages.insert(url.to_string(), html.to_string());
        self
    }

    pub fn with_hanging(mut self, url: &str) -> Self {
        self.hanging.insert(url.to_string());
        self
    }
}

#[async_trait]
impl BrowserDriver for MockDriver {
    async fn open(&self, url: &str, _waits: &WaitOptions) -> Result<Box<dyn BrowserSession>> {
        if self.hanging.contains(url) {
            // Simulates a page that never reaches networkidle.
            tokio::time::sleep(Duration::from_secs(100_000)).await;
            return Err(ScraperError::TransientFetch("page never settled".into()));
        }
        let html = self
            .pages
            .get(url)
            .cloned()
            .ok_or_else(|| ScraperError::TransientFetch(format!("no page for {url}")))?;
        Ok(Box::new(MockSession::new(url, html)))
    }
}

pub struct MockSession {
    url: Mutex<String>,
    html: String,
    pub clicks: Arc<Mutex<Vec<String>>>,
    clickable: Mutex<HashMap<String, usize>>,
}

impl MockSession {
    pub fn new(url: &str, html: String) -> Self {
        Self {
            url: Mutex::new(url.to_string()),
            html,
            clicks: Arc::new(Mutex::new(Vec::new())),
            clickable: Mutex::new(HashMap::new()),
        }
    }

    /// Makes a click target succeed the given number of times.
    pub fn with_clickable(self, label: &str, times: usize) -> Self {
        self.clickable.lock().unwrap().insert(label.to_string(), times);
        self
    }
}

#[async_trait]
impl BrowserSession for MockSession {
    async fn click(&self, target: &ClickTarget, _force: bool, _timeout_ms: u64) -> Result<bool> {
        let label = match target {
            ClickTarget::Css(selector) => selector.clone(),
            ClickTarget::Text(text) => text.clone(),
        };
        self.clicks.lock().unwrap().push(label.clone());
        let mut clickable = self.clickable.lock().unwrap();
        match clickable.get_mut(&label) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn scroll_to_bottom(&self) -> Result<()> {
        Ok(())
    }

    async fn inner_text(&self, _selector: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn inner_html(&self, _selector: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn get_attribute(&self, _selector: &str, _attribute: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn count(&self, _selector: &str) -> Result<usize> {
        Ok(0)
    }

    async fn texts(&self, _selector: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn content(&self) -> Result<String> {
        Ok(self.html.clone())
    }

    async fn navigate(&self, url: &str, _waits: &WaitOptions) -> Result<()> {
        *self.url.lock().unwrap() = url.to_string();
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.url.lock().unwrap().clone())
    }

    async fn close(&self) {}
}

/// Deterministic AI extractor with canned outputs and call counters.
pub struct MockAi {
    pub bundle: Option<SelectorBundle>,
    pub confidence: f64,
    pub events: Vec<AiEventRecord>,
    pub transport_failures: AtomicUsize,
    pub discover_calls: AtomicUsize,
    pub extract_calls: AtomicUsize,
}

impl MockAi {
    pub fn with_bundle(bundle: SelectorBundle, confidence: f64) -> Self {
        Self {
            bundle: Some(bundle),
            confidence,
            events: Vec::new(),
            transport_failures: AtomicUsize::new(0),
            discover_calls: AtomicUsize::new(0),
            extract_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_events(events: Vec<AiEventRecord>) -> Self {
        Self {
            bundle: None,
            confidence: 0.0,
            events,
            transport_failures: AtomicUsize::new(0),
            discover_calls: AtomicUsize::new(0),
            extract_calls: AtomicUsize::new(0),
        }
    }

    pub fn failing_transport(mut self, times: usize) -> Self {
        self.transport_failures = AtomicUsize::new(times);
        self
    }
}

#[async_trait]
impl AiExtractor for MockAi {
    async fn discover_bundle(
        &self,
        _url: &str,
        _html: &str,
        _samples: &[SampleBlock],
    ) -> Result<DiscoveredBundle> {
        self.discover_calls.fetch_add(1, Ordering::SeqCst);
        if self
            .transport_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ScraperError::AiTransport("connection reset".into()));
        }
        match &self.bundle {
            Some(bundle) => Ok(DiscoveredBundle {
                bundle: bundle.clone(),
                confidence: self.confidence,
            }),
            None => Err(ScraperError::AiMalformedResponse("no selectors".into())),
        }
    }

    async fn extract_events(&self, _url: &str, _html: &str) -> Result<Vec<AiEventRecord>> {
        self.extract_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.events.clone())
    }
}

const SWEDISH_MONTHS: [&str; 12] = [
    "januari",
    "februari",
    "mars",
    "april",
    "maj",
    "juni",
    "juli",
    "augusti",
    "september",
    "oktober",
    "november",
    "december",
];

/// "24 december 2025"-style rendering for test pages.
pub fn swedish_date(date: NaiveDate) -> String {
    format!(
        "{} {} {}",
        date.day(),
        SWEDISH_MONTHS[date.month0() as usize],
        date.year()
    )
}

pub struct Card {
    pub name: String,
    pub date_text: String,
    pub time_text: String,
    pub location: String,
    pub description: String,
    pub target: String,
    pub status: String,
    pub href: Option<String>,
}

impl Card {
    pub fn new(name: &str, date_text: &str, time_text: &str) -> Self {
        Self {
            name: name.to_string(),
            date_text: date_text.to_string(),
            time_text: time_text.to_string(),
            location: "Stora salen".to_string(),
            description: "En stund med sagor och sånger för stora och små.".to_string(),
            target: "Målgrupp: alla".to_string(),
            status: "Planerad".to_string(),
            href: None,
        }
    }

    pub fn with_href(mut self, href: &str) -> Self {
        self.href = Some(href.to_string());
        self
    }

    pub fn with_target(mut self, target: &str) -> Self {
        self.target = target.to_string();
        self
    }
}

/// Renders an event listing page matching `full_bundle()`.
pub fn listing_html(cards: &[Card]) -> String {
    let mut body = String::from("<html><body><div class=\"listing\">\n");
    for card in cards {
        let link = card
            .href
            .as_deref()
            .map(|href| format!("<a href=\"{href}\">Läs mer</a>"))
            .unwrap_or_default();
        body.push_str(&format!(
            "<article class=\"event-card\">\
                <h3>{name}</h3>\
                <span class=\"date\">{date}</span>\
                <span class=\"when\">{time}</span>\
                <span class=\"loc\">{loc}</span>\
                <p class=\"teaser\">{desc}</p>\
                <span class=\"audience\">{target}</span>\
                <span class=\"state\">{status}</span>\
                {link}\
            </article>\n",
            name = card.name,
            date = card.date_text,
            time = card.time_text,
            loc = card.location,
            desc = card.description,
            target = card.target,
            status = card.status,
            link = link,
        ));
    }
    body.push_str("</div></body></html>");
    body
}

/// Bundle whose selectors line up with `listing_html` output.
pub fn full_bundle() -> SelectorBundle {
    let mut items = BTreeMap::new();
    items.insert("event_name".into(), ItemSelector::Css("h3".into()));
    items.insert("date_iso".into(), ItemSelector::Css("span.date".into()));
    items.insert("time".into(), ItemSelector::Css("span.when".into()));
    items.insert("location".into(), ItemSelector::Css("span.loc".into()));
    items.insert("description".into(), ItemSelector::Css("p.teaser".into()));
    items.insert("target_group".into(), ItemSelector::Css("span.audience".into()));
    items.insert("status".into(), ItemSelector::Css("span.state".into()));
    items.insert("event_url".into(), ItemSelector::Css("a".into()));
    SelectorBundle {
        container: "article.event-card".into(),
        items,
    }
}
