//! Opaque AI capability used by the Discoverer: either infer a selector
//! bundle from sampled HTML, or extract a normalized event list directly.
//! The default implementation talks to the Gemini REST API; tests plug in
//! a deterministic substitute.

use crate::error::{Result, ScraperError};
use crate::types::{ItemSelector, SelectorBundle};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

/// One sampled event container: raw HTML snippet plus its rendered text.
#[derive(Debug, Clone)]
pub struct SampleBlock {
    pub html: String,
    pub text: String,
}

/// A bundle as proposed by the AI, with its self-reported confidence.
#[derive(Debug, Clone)]
pub struct DiscoveredBundle {
    pub bundle: SelectorBundle,
    pub confidence: f64,
}

/// Event record returned by one-shot AI extraction. Everything except the
/// name is optional; normalization decides what survives.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AiEventRecord {
    pub event_name: String,
    #[serde(default)]
    pub date_iso: Option<String>,
    #[serde(default)]
    pub end_date_iso: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub target_group: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub booking_info: Option<String>,
    #[serde(default, alias = "detail_link")]
    pub event_url: Option<String>,
}

#[async_trait]
pub trait AiExtractor: Send + Sync {
    /// Correlation-mode discovery: map the sampled HTML to its rendered
    /// text and propose a selector bundle.
    async fn discover_bundle(
        &self,
        url: &str,
        html: &str,
        samples: &[SampleBlock],
    ) -> Result<DiscoveredBundle>;

    /// One-shot fallback: extract the event list directly, no selectors.
    async fn extract_events(&self, url: &str, html: &str) -> Result<Vec<AiEventRecord>>;
}

const DEFAULT_MODEL: &str = "gemini-2.5-pro";
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const AI_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Gemini-backed extractor.
pub struct GeminiExtractor {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiExtractor {
    pub fn new(api_key: String, model_hint: Option<String>) -> Self {
        let base_url =
            std::env::var("AI_ENDPOINT").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Self {
            client: reqwest::Client::builder()
                .timeout(AI_CALL_TIMEOUT)
                .build()
                .unwrap_or_default(),
            api_key,
            model: model_hint.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url,
        }
    }

    async fn generate(&self, prompt: &str) -> Result<Value> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        );
        let payload = json!({
            "contents": [{"parts": [{"text": prompt}]}],
            "generationConfig": {
                "responseMimeType": "application/json",
                "temperature": 0.1,
            }
        });

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&payload)
            .send()
            .await
            .map_err(|e| ScraperError::AiTransport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ScraperError::AiTransport(e.to_string()))?;
        if !status.is_success() {
            return Err(ScraperError::AiTransport(format!("HTTP {status}: {body}")));
        }

        let envelope: Value = serde_json::from_str(&body)
            .map_err(|e| ScraperError::AiMalformedResponse(e.to_string()))?;
        let text = envelope
            .get("candidates")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("content"))
            .and_then(|c| c.get("parts"))
            .and_then(|p| p.get(0))
            .and_then(|p| p.get("text"))
            .and_then(|t| t.as_str())
            .ok_or_else(|| {
                ScraperError::AiMalformedResponse("response missing content text".into())
            })?;

        parse_model_json(text)
    }
}

#[async_trait]
impl AiExtractor for GeminiExtractor {
    async fn discover_bundle(
        &self,
        url: &str,
        html: &str,
        samples: &[SampleBlock],
    ) -> Result<DiscoveredBundle> {
        let prompt = build_discovery_prompt(url, html, samples);
        debug!("Running selector discovery ({} prompt chars)", prompt.len());
        let value = self.generate(&prompt).await?;
        parse_discovery_response(&value)
    }

    async fn extract_events(&self, url: &str, html: &str) -> Result<Vec<AiEventRecord>> {
        let prompt = build_event_list_prompt(url, html);
        debug!("Running one-shot event extraction ({} prompt chars)", prompt.len());
        let value = self.generate(&prompt).await?;
        parse_event_list_response(&value)
    }
}

/// Strips markdown fences and parses the model output, with one repair
/// attempt for truncated/over-comma'd JSON.
pub fn parse_model_json(text: &str) -> Result<Value> {
    let mut cleaned = text.trim();
    if let Some(stripped) = cleaned.strip_prefix("```json") {
        cleaned = stripped;
    } else if let Some(stripped) = cleaned.strip_prefix("```") {
        cleaned = stripped;
    }
    cleaned = cleaned.strip_suffix("```").unwrap_or(cleaned).trim();

    match serde_json::from_str(cleaned) {
        Ok(value) => Ok(value),
        Err(e) => {
            warn!("Model JSON parse error ({e}), attempting repair");
            repair_json(cleaned)
                .ok_or_else(|| ScraperError::AiMalformedResponse(e.to_string()))
        }
    }
}

/// Balances braces/brackets and drops trailing commas. Best effort only.
pub fn repair_json(text: &str) -> Option<Value> {
    let mut fixed = text.trim_end().to_string();
    if let Some(stripped) = fixed.strip_suffix(',') {
        fixed = stripped.to_string();
    }

    let mut in_string = false;
    let mut escaped = false;
    let (mut braces, mut brackets) = (0i32, 0i32);
    for c in fixed.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => braces += 1,
            '}' if !in_string => braces -= 1,
            '[' if !in_string => brackets += 1,
            ']' if !in_string => brackets -= 1,
            _ => {}
        }
    }
    if in_string {
        fixed.push('"');
    }
    for _ in 0..brackets.max(0) {
        fixed.push(']');
    }
    for _ in 0..braces.max(0) {
        fixed.push('}');
    }
    serde_json::from_str(&fixed).ok()
}

pub(crate) fn parse_discovery_response(value: &Value) -> Result<DiscoveredBundle> {
    let selectors = value
        .get("selectors")
        .ok_or_else(|| ScraperError::AiMalformedResponse("no selectors object".into()))?;
    let container = selectors
        .get("container")
        .and_then(|c| c.as_str())
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ScraperError::AiMalformedResponse("no container selector".into()))?;

    let mut items = BTreeMap::new();
    if let Some(map) = selectors.get("items").and_then(|i| i.as_object()) {
        for (field, spec) in map {
            let item = match spec {
                Value::String(s) if !s.trim().is_empty() && s != "null" => {
                    Some(ItemSelector::Css(s.trim().to_string()))
                }
                Value::Object(obj) => {
                    let selector = obj
                        .get("selector")
                        .and_then(|s| s.as_str())
                        .map(str::trim)
                        .filter(|s| !s.is_empty() && *s != "null");
                    let attribute = obj
                        .get("attribute")
                        .and_then(|a| a.as_str())
                        .map(str::trim)
                        .filter(|a| !a.is_empty() && *a != "null");
                    match (selector, attribute) {
                        (Some(sel), Some(attr)) => Some(ItemSelector::WithAttribute {
                            selector: sel.to_string(),
                            attribute: attr.to_string(),
                        }),
                        (Some(sel), None) => Some(ItemSelector::Css(sel.to_string())),
                        _ => None,
                    }
                }
                _ => None,
            };
            if let Some(item) = item {
                items.insert(field.clone(), item);
            }
        }
    }

    let confidence = value
        .get("confidence")
        .map(|c| c.get("overall").unwrap_or(c))
        .and_then(|c| c.as_f64())
        .unwrap_or(0.0)
        .clamp(0.0, 1.0);

    Ok(DiscoveredBundle {
        bundle: SelectorBundle {
            container: container.to_string(),
            items,
        },
        confidence,
    })
}

pub(crate) fn parse_event_list_response(value: &Value) -> Result<Vec<AiEventRecord>> {
    let raw_events = value
        .get("events")
        .and_then(|e| e.as_array())
        .cloned()
        .or_else(|| value.as_array().cloned())
        .ok_or_else(|| ScraperError::AiMalformedResponse("no events array".into()))?;

    let mut records = Vec::new();
    for raw in raw_events {
        match serde_json::from_value::<AiEventRecord>(raw) {
            Ok(record) if !record.event_name.trim().is_empty() => records.push(record),
            Ok(_) => {}
            Err(e) => debug!("Skipping unreadable AI event record: {e}"),
        }
    }
    Ok(records)
}

/// Byte-bounded truncation that respects char boundaries.
fn truncate(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn build_discovery_prompt(url: &str, html: &str, samples: &[SampleBlock]) -> String {
    let mut sample_text = String::new();
    for (i, sample) in samples.iter().take(3).enumerate() {
        sample_text.push_str(&format!(
            "SAMPLE EVENT {n}:\n---HTML---\n{html}\n---RENDERED TEXT---\n{text}\n---\n\n",
            n = i + 1,
            html = sample.html,
            text = sample.text,
        ));
    }

    format!(
        r#"You are an expert web-scraping assistant specializing in CSS selector discovery for Swedish cultural and event websites, using HTML + rendered-text correlation.

TARGET URL: {url}

You get raw HTML snippets of event containers and the rendered text of those same containers. Map HTML elements to the text fields they produce.

SAMPLE EVENTS:
{samples}

FULL PAGE HTML (for context):
{page}

RULES:
- The container selector must match ALL event instances (e.g. "article.event-card").
- Item selectors must be RELATIVE to the container ("h3.title", not "article.event-card h3.title").
- Prefer semantic tags (time, h2, h3, address) and data attributes; avoid dynamic ids and layout-only classes.
- Swedish keywords to expect: months (januari..december), "Inställt" (cancelled), "Fullbokat" (fully booked), "Målgrupp" (audience), "Boka" (booking).
- A selector is correct only if it isolates text matching the rendered samples.

OUTPUT (JSON only):
{{
  "selectors": {{
    "container": "<css>",
    "items": {{
      "event_name": "<css>",
      "date_iso": {{"selector": "<css>", "attribute": "datetime"}},
      "time": "<css>",
      "location": "<css>",
      "description": "<css>",
      "target_group": "<css>",
      "status": "<css>",
      "booking_info": "<css>",
      "event_url": "<css>"
    }}
  }},
  "confidence": {{"overall": 0.0}}
}}"#,
        url = url,
        samples = sample_text,
        page = truncate(html, 20_000),
    )
}

fn build_event_list_prompt(url: &str, html: &str) -> String {
    format!(
        r#"Extract every upcoming event from this Swedish event-listing page.

TARGET URL: {url}

HTML:
{page}

RULES:
- Keep all text in the original language; never translate.
- Dates must be ISO (YYYY-MM-DD). Swedish months: januari=01 .. december=12. A "5-8 december" range sets date_iso and end_date_iso.
- Times are HH:MM; convert "14.30" to "14:30".
- status is "scheduled" unless the text says Inställt/Cancelled (-> "cancelled") or Fullbokat (-> "fullbokat").
- booking_info: "Requires booking", "Drop-in", "Fullbokat", "Free entry" or "N/A".
- event_url must be the event's own detail link when one exists.

OUTPUT (JSON only):
{{
  "events": [
    {{
      "event_name": "...",
      "date_iso": "YYYY-MM-DD",
      "end_date_iso": null,
      "time": "HH:MM",
      "location": "...",
      "target_group": "...",
      "description": "...",
      "status": "scheduled",
      "booking_info": "N/A",
      "event_url": "..."
    }}
  ]
}}"#,
        url = url,
        page = truncate(html, 20_000),
    )
}
