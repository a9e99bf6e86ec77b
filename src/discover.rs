//! AI-assisted selector discovery: sample candidate containers, ask the
//! AI for a bundle, validate it structurally against the real HTML, and
//! decide whether the result is cacheable, single-run, or hopeless (in
//! which case the AI extracts the event list directly).

use crate::ai::{AiEventRecord, AiExtractor, SampleBlock};
use crate::error::{Result, ScraperError};
use crate::extract::collapse_whitespace;
use crate::types::SelectorBundle;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, info, warn};

/// Bundles at or above this adjusted confidence are cached.
pub const TRUST_THRESHOLD: f64 = 0.6;
/// Bundles at or above this are used for the current run only.
pub const UNTRUSTED_THRESHOLD: f64 = 0.3;

/// Fields that count towards adjusted confidence.
pub const REQUIRED_FIELDS: &[&str] = &[
    "event_name",
    "date_iso",
    "time",
    "location",
    "description",
    "target_group",
    "status",
];

const MAX_SAMPLES: usize = 5;
const SAMPLE_HTML_BYTES: usize = 500;
const SAMPLE_TEXT_BYTES: usize = 300;
const VALIDATED_CONTAINERS: usize = 3;

#[derive(Debug)]
pub enum Discovery {
    /// Validated bundle the caller may cache.
    Trusted { bundle: SelectorBundle, confidence: f64 },
    /// Usable for this run only; never cached.
    Untrusted { bundle: SelectorBundle, confidence: f64 },
    /// Selector inference failed; the AI extracted events directly.
    EventList(Vec<AiEventRecord>),
}

pub struct Discoverer<'a> {
    ai: &'a dyn AiExtractor,
}

impl<'a> Discoverer<'a> {
    pub fn new(ai: &'a dyn AiExtractor) -> Self {
        Self { ai }
    }

    /// Runs the full discovery decision. Warnings describe every fallback
    /// taken; a hard error means even one-shot extraction failed.
    pub async fn discover(&self, url: &str, html: &str) -> Result<(Discovery, Vec<String>)> {
        let mut warnings = Vec::new();

        let samples = extract_samples(html);
        if samples.is_empty() {
            debug!("No candidate containers sampled for {url}");
        }

        match self.discover_with_retry(url, html, &samples).await {
            Ok(discovered) => {
                let report = validate_bundle(&discovered.bundle, html);
                info!(
                    "Discovery for {url}: reported {:.2}, adjusted {:.2} ({} containers)",
                    discovered.confidence, report.adjusted_confidence, report.container_matches
                );

                if report.adjusted_confidence >= TRUST_THRESHOLD {
                    return Ok((
                        Discovery::Trusted {
                            bundle: discovered.bundle,
                            confidence: report.adjusted_confidence,
                        },
                        warnings,
                    ));
                }
                if report.adjusted_confidence >= UNTRUSTED_THRESHOLD {
                    warnings.push(format!(
                        "{url}: selectors validated at {:.0}%, using without caching",
                        report.adjusted_confidence * 100.0
                    ));
                    return Ok((
                        Discovery::Untrusted {
                            bundle: discovered.bundle,
                            confidence: report.adjusted_confidence,
                        },
                        warnings,
                    ));
                }
                warnings.push(format!(
                    "{url}: discovered selectors failed validation ({:.0}%), falling back to AI event list",
                    report.adjusted_confidence * 100.0
                ));
            }
            Err(e) => {
                warnings.push(format!("{url}: selector discovery failed: {e}"));
            }
        }

        let events = self.event_list_with_retry(url, html).await?;
        info!("One-shot AI extraction returned {} events for {url}", events.len());
        Ok((Discovery::EventList(events), warnings))
    }

    async fn discover_with_retry(
        &self,
        url: &str,
        html: &str,
        samples: &[SampleBlock],
    ) -> Result<crate::ai::DiscoveredBundle> {
        match self.ai.discover_bundle(url, html, samples).await {
            Err(ScraperError::AiTransport(e)) => {
                warn!("AI discovery transport error, retrying once: {e}");
                self.ai.discover_bundle(url, html, samples).await
            }
            other => other,
        }
    }

    async fn event_list_with_retry(&self, url: &str, html: &str) -> Result<Vec<AiEventRecord>> {
        match self.ai.extract_events(url, html).await {
            Err(ScraperError::AiTransport(e)) => {
                warn!("AI event extraction transport error, retrying once: {e}");
                self.ai.extract_events(url, html).await
            }
            other => other,
        }
    }
}

static CONTAINER_CLASS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)event|calendar|listing|card|item").unwrap());
static CANDIDATE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("article, div, section, li").unwrap());

fn clip(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// Heuristic sampling of candidate event containers: `<article>` plus any
/// block whose class smells like an event card, with enough rendered text
/// to be worth correlating.
pub fn extract_samples(html: &str) -> Vec<SampleBlock> {
    let document = Html::parse_document(html);
    let mut samples = Vec::new();

    for element in document.select(&CANDIDATE_SELECTOR) {
        if samples.len() >= MAX_SAMPLES {
            break;
        }
        let is_article = element.value().name() == "article";
        let class_hit = element
            .value()
            .attr("class")
            .map_or(false, |c| CONTAINER_CLASS_RE.is_match(c));
        if !is_article && !class_hit {
            continue;
        }

        let text = collapse_whitespace(&element.text().collect::<String>());
        if text.len() <= 20 {
            continue;
        }
        samples.push(SampleBlock {
            html: clip(&element.html(), SAMPLE_HTML_BYTES),
            text: clip(&text, SAMPLE_TEXT_BYTES),
        });
    }
    samples
}

#[derive(Debug)]
pub struct ValidationReport {
    pub container_matches: usize,
    pub passed_fields: usize,
    pub adjusted_confidence: f64,
}

/// Structural validation of a proposed bundle against the page it was
/// discovered from. `adjusted_confidence = passed_fields / required_fields`.
pub fn validate_bundle(bundle: &SelectorBundle, html: &str) -> ValidationReport {
    let mut report = ValidationReport {
        container_matches: 0,
        passed_fields: 0,
        adjusted_confidence: 0.0,
    };

    let Ok(container) = Selector::parse(&bundle.container) else {
        return report;
    };
    let document = Html::parse_document(html);
    let containers: Vec<_> = document
        .select(&container)
        .take(VALIDATED_CONTAINERS)
        .collect();
    report.container_matches = document.select(&container).count();
    if containers.is_empty() {
        return report;
    }

    for field in REQUIRED_FIELDS {
        let Some(item) = bundle.item(field) else { continue };
        let Ok(selector) = Selector::parse(item.selector()) else {
            continue;
        };
        let matched = containers.iter().any(|c| {
            c.select(&selector).any(|el| {
                let text = match item.attribute() {
                    Some(attr) => el.value().attr(attr).unwrap_or_default().to_string(),
                    None => el.text().collect::<String>(),
                };
                !collapse_whitespace(&text).is_empty()
            })
        });
        if matched {
            report.passed_fields += 1;
        }
    }

    report.adjusted_confidence = report.passed_fields as f64 / REQUIRED_FIELDS.len() as f64;
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ItemSelector;
    use std::collections::BTreeMap;

    const HTML: &str = r#"
        <html><body>
        <article class="event-card">
            <h3>Sagostund</h3>
            <time datetime="2025-12-24">24 december</time>
            <span class="when">10:00</span>
            <span class="loc">Biblioteket</span>
            <p class="teaser">Sagostund för de minsta i stora salen.</p>
            <span class="audience">Målgrupp: barn</span>
            <span class="state">Planerad</span>
        </article>
        <article class="event-card">
            <h3>Babyrytmik</h3>
            <time datetime="2025-12-26">26 december</time>
            <span class="when">11:00</span>
            <span class="loc">Biblioteket</span>
            <p class="teaser">Rytmik för bebisar tillsammans med föräldrar.</p>
            <span class="audience">Målgrupp: bebisar</span>
            <span class="state">Planerad</span>
        </article>
        </body></html>
    "#;

    fn full_bundle() -> SelectorBundle {
        let mut items = BTreeMap::new();
        items.insert("event_name".into(), ItemSelector::Css("h3".into()));
        items.insert(
            "date_iso".into(),
            ItemSelector::WithAttribute {
                selector: "time".into(),
                attribute: "datetime".into(),
            },
        );
        items.insert("time".into(), ItemSelector::Css(".when".into()));
        items.insert("location".into(), ItemSelector::Css(".loc".into()));
        items.insert("description".into(), ItemSelector::Css(".teaser".into()));
        items.insert("target_group".into(), ItemSelector::Css(".audience".into()));
        items.insert("status".into(), ItemSelector::Css(".state".into()));
        SelectorBundle {
            container: "article.event-card".into(),
            items,
        }
    }

    #[test]
    fn samples_find_event_like_containers() {
        let samples = extract_samples(HTML);
        assert_eq!(samples.len(), 2);
        assert!(samples[0].text.contains("Sagostund"));
        assert!(samples[0].html.contains("<h3>"));
    }

    #[test]
    fn full_bundle_validates_perfectly() {
        let report = validate_bundle(&full_bundle(), HTML);
        assert_eq!(report.container_matches, 2);
        assert_eq!(report.passed_fields, REQUIRED_FIELDS.len());
        assert!(report.adjusted_confidence >= TRUST_THRESHOLD);
    }

    #[test]
    fn missing_fields_lower_confidence() {
        let mut bundle = full_bundle();
        bundle.items.remove("time");
        bundle.items.remove("location");
        bundle.items.remove("status");
        bundle.items.remove("target_group");
        let report = validate_bundle(&bundle, HTML);
        assert_eq!(report.passed_fields, 3);
        assert!(report.adjusted_confidence < TRUST_THRESHOLD);
        assert!(report.adjusted_confidence >= UNTRUSTED_THRESHOLD);
    }

    #[test]
    fn unmatched_container_scores_zero() {
        let mut bundle = full_bundle();
        bundle.container = "li.nothing".into();
        let report = validate_bundle(&bundle, HTML);
        assert_eq!(report.container_matches, 0);
        assert_eq!(report.adjusted_confidence, 0.0);
    }
}
