//! Runs a stored selector bundle against rendered HTML and yields one raw
//! field map per event container.

use crate::error::{Result, ScraperError};
use crate::types::{ItemSelector, RawEventFields, SelectorBundle};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

pub fn collapse_whitespace(s: &str) -> String {
    WHITESPACE_RE.replace_all(s.trim(), " ").to_string()
}

const BOOKING_KEYWORDS: &[&str] = &["boka", "bokning", "drop-in", "dropin", "fullbokat"];

/// Extracts raw field maps from `html` using `bundle`. Records without an
/// event name are dropped; an empty result usually means the bundle no
/// longer matches the page.
pub fn extract_with_bundle(html: &str, bundle: &SelectorBundle) -> Result<Vec<RawEventFields>> {
    let container = Selector::parse(&bundle.container).map_err(|e| {
        ScraperError::Config(format!(
            "invalid container selector '{}': {e}",
            bundle.container
        ))
    })?;

    let document = Html::parse_document(html);
    let mut records = Vec::new();

    for element in document.select(&container) {
        let mut fields = RawEventFields::default();

        for (name, item) in &bundle.items {
            if item.is_empty() {
                continue;
            }
            match name.as_str() {
                "event_name" => {
                    fields.event_name = read_text(element, item).unwrap_or_default();
                }
                "date_iso" | "date" => {
                    fields.date_text = read_temporal(element, item);
                }
                "time" => {
                    fields.time_text = read_temporal(element, item);
                }
                "location" => {
                    fields.location = read_text(element, item);
                }
                "description" => {
                    fields.description = read_text(element, item);
                }
                "target_group" | "target_group_raw" => {
                    fields.target_group = read_scanning(element, item, |t| {
                        t.to_lowercase().contains("målgrupp")
                    });
                }
                "status" => {
                    fields.status_text = read_text(element, item);
                }
                "booking_info" | "booking_status" => {
                    fields.booking_text = read_scanning(element, item, |t| {
                        let lowered = t.to_lowercase();
                        BOOKING_KEYWORDS.iter().any(|k| lowered.contains(k))
                    });
                }
                "event_url" | "url" => {
                    fields.event_url = read_url(element, item);
                }
                other => {
                    debug!("Ignoring unknown bundle field '{other}'");
                }
            }
        }

        if fields.event_name.trim().is_empty() {
            continue;
        }
        records.push(fields);
    }

    Ok(records)
}

fn relative_selector(item: &ItemSelector) -> Option<Selector> {
    match Selector::parse(item.selector()) {
        Ok(sel) => Some(sel),
        Err(e) => {
            debug!("Skipping invalid item selector '{}': {e}", item.selector());
            None
        }
    }
}

fn element_text(element: ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<String>())
}

fn read_text(container: ElementRef<'_>, item: &ItemSelector) -> Option<String> {
    let selector = relative_selector(item)?;
    let element = container.select(&selector).next()?;
    let value = match item.attribute() {
        Some(attr) => element.value().attr(attr).map(collapse_whitespace),
        None => Some(element_text(element)),
    };
    value.filter(|v| !v.is_empty())
}

/// Date/time fields prefer the machine-readable `datetime` attribute of
/// `<time>`-like nodes over their display text.
fn read_temporal(container: ElementRef<'_>, item: &ItemSelector) -> Option<String> {
    let selector = relative_selector(item)?;
    let element = container.select(&selector).next()?;
    if let Some(attr) = item.attribute() {
        if let Some(value) = element.value().attr(attr) {
            let value = collapse_whitespace(value);
            if !value.is_empty() {
                return Some(value);
            }
        }
    }
    if let Some(datetime) = element.value().attr("datetime") {
        let value = collapse_whitespace(datetime);
        if !value.is_empty() {
            return Some(value);
        }
    }
    let text = element_text(element);
    (!text.is_empty()).then_some(text)
}

fn read_url(container: ElementRef<'_>, item: &ItemSelector) -> Option<String> {
    let selector = relative_selector(item)?;
    let element = container.select(&selector).next()?;
    let attr = item.attribute().unwrap_or("href");
    element
        .value()
        .attr(attr)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| {
            // The container itself may be the anchor.
            container
                .value()
                .attr(attr)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        })
}

/// Scans every match for one satisfying `wanted` (booking sentences,
/// "Målgrupp:" rows); falls back to the first non-empty text.
fn read_scanning(
    container: ElementRef<'_>,
    item: &ItemSelector,
    wanted: impl Fn(&str) -> bool,
) -> Option<String> {
    let selector = relative_selector(item)?;
    let mut first = None;
    for element in container.select(&selector) {
        let text = match item.attribute() {
            Some(attr) => element
                .value()
                .attr(attr)
                .map(collapse_whitespace)
                .unwrap_or_default(),
            None => element_text(element),
        };
        if text.is_empty() {
            continue;
        }
        if wanted(&text) {
            return Some(text);
        }
        if first.is_none() {
            first = Some(text);
        }
    }
    first
}
