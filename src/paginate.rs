//! Site-agnostic pagination: scrolls to trigger lazy loads, then tries
//! load-more buttons, numbered "next" links, and URL parameter stepping,
//! in that order. First strategy that makes progress wins.

use crate::browser::{BrowserSession, ClickTarget, WaitOptions};
use crate::error::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_MAX_CLICKS: usize = 10;
/// Hard ceiling even for deep listings.
pub const MAX_CLICKS_CEILING: usize = 40;

const SETTLE_AFTER_CLICK: Duration = Duration::from_millis(2000);
const SETTLE_AFTER_SCROLL: Duration = Duration::from_millis(1000);
const CLICK_PROBE_TIMEOUT_MS: u64 = 500;

struct ClickSpec {
    target: ClickTarget,
    description: &'static str,
}

fn load_more_specs() -> Vec<ClickSpec> {
    let text = |label: &str, description: &'static str| ClickSpec {
        target: ClickTarget::Text(label.to_string()),
        description,
    };
    let css = |selector: &str, description: &'static str| ClickSpec {
        target: ClickTarget::Css(selector.to_string()),
        description,
    };
    vec![
        css("a.show-more-text", "show-more text link"),
        text("Visa mer", "Visa mer"),
        text("Visa fler", "Visa fler"),
        text("Ladda fler", "Ladda fler"),
        text("Cargar más", "Cargar más"),
        text("Ver más", "Ver más"),
        text("Mostrar más", "Mostrar más"),
        text("Load more", "Load more"),
        text("Show more", "Show more"),
        css("a[class*=\"show-more\"]", "generic show-more link"),
        css("button[class*=\"show-more\"]", "generic show-more button"),
        css("a[class*=\"load-more\"]", "generic load-more link"),
        css("button[class*=\"load-more\"]", "generic load-more button"),
        css("div.show-more", "show-more div"),
    ]
}

const NEXT_LABELS: &[&str] = &["Next", "Siguiente", "Nästa"];
const NUMBERED_SELECTORS: &[&str] = &["a[data-page]", "a.pagination-link"];

static URL_PAGE_PARAM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([?&](?:page|p|offset|start)=)\d+").unwrap());

/// One paginator per session. Calling `run` a second time on the same
/// instance is a no-op, so the crawl pipeline stays idempotent.
pub struct Paginator {
    max_clicks: usize,
    applied: bool,
}

impl Paginator {
    pub fn new(max_clicks: usize) -> Self {
        Self {
            max_clicks: max_clicks.clamp(1, MAX_CLICKS_CEILING),
            applied: false,
        }
    }

    /// Returns the number of pagination actions performed.
    pub async fn run(&mut self, session: &dyn BrowserSession) -> Result<usize> {
        if self.applied {
            return Ok(0);
        }
        self.applied = true;

        // Lazy-loading listings often need a few scroll passes before any
        // pagination control appears.
        for _ in 0..4 {
            session.scroll_to_bottom().await?;
            tokio::time::sleep(SETTLE_AFTER_SCROLL).await;
        }

        let clicks = self.click_load_more(session).await?;
        if clicks > 0 {
            info!("Loaded more content {clicks} times with load-more buttons");
            return Ok(clicks);
        }

        let clicks = self.click_next_links(session).await?;
        if clicks > 0 {
            info!("Walked {clicks} pages with next/numbered pagination");
            return Ok(clicks);
        }

        let clicks = self.step_url_parameter(session).await?;
        if clicks > 0 {
            info!("Walked {clicks} pages by URL parameter");
            return Ok(clicks);
        }

        debug!("No pagination found on page");
        Ok(0)
    }

    async fn click_load_more(&self, session: &dyn BrowserSession) -> Result<usize> {
        for spec in load_more_specs() {
            let mut clicks = 0;
            while clicks < self.max_clicks {
                let clicked = session
                    .click(&spec.target, false, CLICK_PROBE_TIMEOUT_MS)
                    .await?;
                if !clicked {
                    break;
                }
                debug!("Clicked '{}'", spec.description);
                clicks += 1;
                tokio::time::sleep(SETTLE_AFTER_CLICK).await;
            }
            if clicks > 0 {
                return Ok(clicks);
            }
        }
        Ok(0)
    }

    async fn click_next_links(&self, session: &dyn BrowserSession) -> Result<usize> {
        for label in NEXT_LABELS {
            let mut clicks = 0;
            while clicks < self.max_clicks {
                let clicked = session
                    .click(
                        &ClickTarget::Text(label.to_string()),
                        false,
                        CLICK_PROBE_TIMEOUT_MS,
                    )
                    .await?;
                if !clicked {
                    break;
                }
                clicks += 1;
                tokio::time::sleep(SETTLE_AFTER_CLICK).await;
            }
            if clicks > 0 {
                return Ok(clicks);
            }
        }

        // Numbered pagination: walk link labels in order, never revisiting
        // the one we clicked last.
        for selector in NUMBERED_SELECTORS {
            let mut clicks = 0;
            let mut last_label: Option<String> = None;
            while clicks < self.max_clicks {
                let labels = session.texts(selector).await?;
                let next = labels.into_iter().map(|l| l.trim().to_string()).find(|l| {
                    !l.is_empty() && l != "..." && Some(l) != last_label.as_ref()
                });
                let Some(label) = next else { break };
                let clicked = session
                    .click(
                        &ClickTarget::Text(label.clone()),
                        false,
                        CLICK_PROBE_TIMEOUT_MS,
                    )
                    .await?;
                if !clicked {
                    break;
                }
                last_label = Some(label);
                clicks += 1;
                tokio::time::sleep(SETTLE_AFTER_CLICK).await;
            }
            if clicks > 0 {
                return Ok(clicks);
            }
        }
        Ok(0)
    }

    async fn step_url_parameter(&self, session: &dyn BrowserSession) -> Result<usize> {
        let base_url = session.current_url().await?;
        if !URL_PAGE_PARAM_RE.is_match(&base_url) {
            return Ok(0);
        }

        let mut loads = 0;
        let mut previous = session.content().await?;
        for page in 2..=(self.max_clicks + 1) {
            let next_url = URL_PAGE_PARAM_RE
                .replace(&base_url, format!("${{1}}{page}"))
                .to_string();
            debug!("Loading page {page}: {next_url}");
            if session
                .navigate(&next_url, &WaitOptions::network_idle(1000))
                .await
                .is_err()
            {
                break;
            }
            let content = session.content().await?;
            if content == previous || content.is_empty() {
                break;
            }
            previous = content;
            loads += 1;
        }
        Ok(loads)
    }
}
