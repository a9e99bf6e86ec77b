//! Headless-browser capability. The crawler only depends on the
//! `BrowserDriver`/`BrowserSession` traits; the default implementation
//! drives a Chromium tab, and tests substitute a scripted session.

use crate::error::{Result, ScraperError};
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Wait behavior for `open` and `navigate`.
#[derive(Debug, Clone)]
pub struct WaitOptions {
    pub until: WaitUntil,
    pub post_delay_ms: u64,
    pub extra_delay_after_load_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitUntil {
    NetworkIdle,
    DomContentLoaded,
}

impl WaitOptions {
    pub fn network_idle(post_delay_ms: u64) -> Self {
        Self {
            until: WaitUntil::NetworkIdle,
            post_delay_ms,
            extra_delay_after_load_ms: 0,
        }
    }

    pub fn dom_content_loaded() -> Self {
        Self {
            until: WaitUntil::DomContentLoaded,
            post_delay_ms: 0,
            extra_delay_after_load_ms: 0,
        }
    }
}

/// What to click: a CSS selector, or any button/link whose text contains
/// the given label.
#[derive(Debug, Clone)]
pub enum ClickTarget {
    Css(String),
    Text(String),
}

#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Returns true when something was actually clicked.
    async fn click(&self, target: &ClickTarget, force: bool, timeout_ms: u64) -> Result<bool>;
    async fn scroll_to_bottom(&self) -> Result<()>;
    async fn inner_text(&self, selector: &str) -> Result<Option<String>>;
    async fn inner_html(&self, selector: &str) -> Result<Option<String>>;
    async fn get_attribute(&self, selector: &str, attribute: &str) -> Result<Option<String>>;
    /// Number of elements matching the selector.
    async fn count(&self, selector: &str) -> Result<usize>;
    /// Inner text of every element matching the selector, in DOM order.
    async fn texts(&self, selector: &str) -> Result<Vec<String>>;
    /// Full rendered HTML of the page.
    async fn content(&self) -> Result<String>;
    async fn navigate(&self, url: &str, waits: &WaitOptions) -> Result<()>;
    async fn current_url(&self) -> Result<String>;
    /// Releases the session; safe to call on every exit path.
    async fn close(&self);
}

#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn open(&self, url: &str, waits: &WaitOptions) -> Result<Box<dyn BrowserSession>>;
}

/// Default navigation timeout, matching the per-suspension budget.
const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Chromium-backed driver. One driver per process; each crawl opens its
/// own tab and owns it exclusively until `close`.
pub struct ChromeDriver {
    browser: Arc<Browser>,
}

impl ChromeDriver {
    pub fn launch() -> Result<Self> {
        let browser = Browser::new(LaunchOptions {
            headless: true,
            ..Default::default()
        })
        .map_err(|e| ScraperError::Browser(format!("failed to launch browser: {e}")))?;
        Ok(Self {
            browser: Arc::new(browser),
        })
    }
}

#[async_trait]
impl BrowserDriver for ChromeDriver {
    async fn open(&self, url: &str, waits: &WaitOptions) -> Result<Box<dyn BrowserSession>> {
        let browser = self.browser.clone();
        let url_owned = url.to_string();
        let tab = tokio::task::spawn_blocking(move || -> Result<Arc<Tab>> {
            let tab = browser
                .new_tab()
                .map_err(|e| ScraperError::Browser(format!("failed to open tab: {e}")))?;
            tab.set_default_timeout(NAVIGATION_TIMEOUT);
            tab.navigate_to(&url_owned)
                .map_err(|e| ScraperError::TransientFetch(format!("navigation failed: {e}")))?;
            tab.wait_until_navigated()
                .map_err(|e| ScraperError::TransientFetch(format!("page never settled: {e}")))?;
            Ok(tab)
        })
        .await
        .map_err(|e| ScraperError::Browser(format!("browser task failed: {e}")))??;

        let session = ChromeSession { tab };
        session.settle(waits).await;
        debug!("Opened session for {url}");
        Ok(Box::new(session))
    }
}

struct ChromeSession {
    tab: Arc<Tab>,
}

impl ChromeSession {
    async fn settle(&self, waits: &WaitOptions) {
        let delay = match waits.until {
            // The CDP load event fires before late XHR content; the
            // post-delay stands in for a networkidle signal.
            WaitUntil::NetworkIdle => waits.post_delay_ms.max(500),
            WaitUntil::DomContentLoaded => waits.post_delay_ms,
        } + waits.extra_delay_after_load_ms;
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
    }

    /// Evaluates a JS expression on the tab and returns its JSON value.
    async fn eval(&self, expression: String) -> Result<Option<serde_json::Value>> {
        let tab = self.tab.clone();
        tokio::task::spawn_blocking(move || {
            tab.evaluate(&expression, false)
                .map(|obj| obj.value)
                .map_err(|e| ScraperError::Browser(format!("evaluate failed: {e}")))
        })
        .await
        .map_err(|e| ScraperError::Browser(format!("browser task failed: {e}")))?
    }
}

fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

#[async_trait]
impl BrowserSession for ChromeSession {
    async fn click(&self, target: &ClickTarget, force: bool, timeout_ms: u64) -> Result<bool> {
        let expression = match target {
            ClickTarget::Css(selector) => format!(
                "(() => {{
                    const el = document.querySelector({sel});
                    if (!el) return false;
                    if (!{force} && el.offsetParent === null) return false;
                    el.click();
                    return true;
                }})()",
                sel = js_string(selector),
                force = force,
            ),
            ClickTarget::Text(label) => format!(
                "(() => {{
                    const label = {label};
                    const nodes = document.querySelectorAll('button, a, [role=\"button\"]');
                    for (const el of nodes) {{
                        if (!el.innerText || !el.innerText.includes(label)) continue;
                        if (!{force} && el.offsetParent === null) continue;
                        el.click();
                        return true;
                    }}
                    return false;
                }})()",
                label = js_string(label),
                force = force,
            ),
        };

        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms.max(1));
        loop {
            match self.eval(expression.clone()).await {
                Ok(Some(serde_json::Value::Bool(true))) => return Ok(true),
                Ok(_) => {}
                Err(e) => warn!("Click evaluation failed: {e}"),
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    async fn scroll_to_bottom(&self) -> Result<()> {
        self.eval("window.scrollTo(0, document.body.scrollHeight)".to_string())
            .await?;
        Ok(())
    }

    async fn inner_text(&self, selector: &str) -> Result<Option<String>> {
        let value = self
            .eval(format!(
                "(() => {{ const el = document.querySelector({}); return el ? el.innerText : null; }})()",
                js_string(selector)
            ))
            .await?;
        Ok(value.and_then(|v| v.as_str().map(str::to_string)))
    }

    async fn inner_html(&self, selector: &str) -> Result<Option<String>> {
        let value = self
            .eval(format!(
                "(() => {{ const el = document.querySelector({}); return el ? el.innerHTML : null; }})()",
                js_string(selector)
            ))
            .await?;
        Ok(value.and_then(|v| v.as_str().map(str::to_string)))
    }

    async fn get_attribute(&self, selector: &str, attribute: &str) -> Result<Option<String>> {
        let value = self
            .eval(format!(
                "(() => {{ const el = document.querySelector({sel});
                    return el ? el.getAttribute({attr}) : null; }})()",
                sel = js_string(selector),
                attr = js_string(attribute),
            ))
            .await?;
        Ok(value.and_then(|v| v.as_str().map(str::to_string)))
    }

    async fn count(&self, selector: &str) -> Result<usize> {
        let value = self
            .eval(format!(
                "document.querySelectorAll({}).length",
                js_string(selector)
            ))
            .await?;
        Ok(value.and_then(|v| v.as_u64()).unwrap_or(0) as usize)
    }

    async fn texts(&self, selector: &str) -> Result<Vec<String>> {
        let value = self
            .eval(format!(
                "JSON.stringify(Array.from(document.querySelectorAll({})).map(el => el.innerText || ''))",
                js_string(selector)
            ))
            .await?;
        let json_text = value.and_then(|v| v.as_str().map(str::to_string)).unwrap_or_default();
        Ok(serde_json::from_str(&json_text).unwrap_or_default())
    }

    async fn content(&self) -> Result<String> {
        let tab = self.tab.clone();
        tokio::task::spawn_blocking(move || {
            tab.get_content()
                .map_err(|e| ScraperError::Browser(format!("content read failed: {e}")))
        })
        .await
        .map_err(|e| ScraperError::Browser(format!("browser task failed: {e}")))?
    }

    async fn navigate(&self, url: &str, waits: &WaitOptions) -> Result<()> {
        let tab = self.tab.clone();
        let url_owned = url.to_string();
        tokio::task::spawn_blocking(move || -> Result<()> {
            tab.navigate_to(&url_owned)
                .map_err(|e| ScraperError::TransientFetch(format!("navigation failed: {e}")))?;
            tab.wait_until_navigated()
                .map_err(|e| ScraperError::TransientFetch(format!("page never settled: {e}")))?;
            Ok(())
        })
        .await
        .map_err(|e| ScraperError::Browser(format!("browser task failed: {e}")))??;
        self.settle(waits).await;
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        let tab = self.tab.clone();
        tokio::task::spawn_blocking(move || Ok(tab.get_url()))
            .await
            .map_err(|e| ScraperError::Browser(format!("browser task failed: {e}")))?
    }

    async fn close(&self) {
        let tab = self.tab.clone();
        let _ = tokio::task::spawn_blocking(move || {
            if let Err(e) = tab.close(true) {
                debug!("Tab close failed (already gone?): {e}");
            }
        })
        .await;
    }
}
