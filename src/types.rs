use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Sentinel used wherever the catalog stores "no value" as text.
pub const NOT_AVAILABLE: &str = "N/A";

/// Normalized audience bucket for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetGroup {
    Children,
    Teens,
    Adults,
    Families,
    AllAges,
    Babies,
    PreschoolGroups,
}

impl TargetGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetGroup::Children => "children",
            TargetGroup::Teens => "teens",
            TargetGroup::Adults => "adults",
            TargetGroup::Families => "families",
            TargetGroup::AllAges => "all_ages",
            TargetGroup::Babies => "babies",
            TargetGroup::PreschoolGroups => "preschool_groups",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "children" => Some(TargetGroup::Children),
            "teens" => Some(TargetGroup::Teens),
            "adults" => Some(TargetGroup::Adults),
            "families" => Some(TargetGroup::Families),
            "all_ages" | "all" => Some(TargetGroup::AllAges),
            "babies" => Some(TargetGroup::Babies),
            "preschool_groups" | "preschool" => Some(TargetGroup::PreschoolGroups),
            _ => None,
        }
    }
}

impl fmt::Display for TargetGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling state of an event as observed on the source site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Scheduled,
    Cancelled,
    Fullbokat,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Scheduled => "scheduled",
            EventStatus::Cancelled => "cancelled",
            EventStatus::Fullbokat => "fullbokat",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "scheduled" => Some(EventStatus::Scheduled),
            "cancelled" => Some(EventStatus::Cancelled),
            "fullbokat" => Some(EventStatus::Fullbokat),
            _ => None,
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One event occurrence on one date.
///
/// Identity is the `(event_name, date_iso, event_url)` triple; an upsert
/// for the same triple overwrites every other field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_name: String,
    pub date_iso: NaiveDate,
    pub end_date_iso: Option<NaiveDate>,
    pub time: String,
    pub location: String,
    pub target_group_raw: String,
    pub target_group: TargetGroup,
    pub description: String,
    pub event_url: String,
    pub status: EventStatus,
    pub booking_info: String,
    pub last_scraped: DateTime<Utc>,
}

impl Event {
    /// True when the stored range actually spans more than one day.
    pub fn is_multi_day(&self) -> bool {
        self.end_date_iso.map_or(false, |end| end > self.date_iso)
    }
}

/// One item selector of a bundle: plain CSS, or CSS plus an attribute to
/// read instead of the element text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ItemSelector {
    Css(String),
    WithAttribute { selector: String, attribute: String },
}

impl ItemSelector {
    pub fn selector(&self) -> &str {
        match self {
            ItemSelector::Css(s) => s,
            ItemSelector::WithAttribute { selector, .. } => selector,
        }
    }

    pub fn attribute(&self) -> Option<&str> {
        match self {
            ItemSelector::Css(_) => None,
            ItemSelector::WithAttribute { attribute, .. } => Some(attribute),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.selector().trim().is_empty()
    }
}

/// Selector bundle in its admin-editable wire form:
/// `{"container": "<css>", "items": {"<field>": "<css>" | {"selector", "attribute"}}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectorBundle {
    pub container: String,
    pub items: BTreeMap<String, ItemSelector>,
}

impl SelectorBundle {
    pub fn item(&self, field: &str) -> Option<&ItemSelector> {
        self.items.get(field).filter(|s| !s.is_empty())
    }
}

/// A bundle as persisted: keyed by (domain, url_pattern).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorConfig {
    pub domain: String,
    pub url_pattern: String,
    pub bundle: SelectorBundle,
    pub last_updated: DateTime<Utc>,
}

/// A configured ingestion target, managed by the admin collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceUrl {
    pub id: i64,
    pub url: String,
    pub name: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunMode {
    Auto,
    Manual,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Auto => "Auto",
            RunMode::Manual => "Manual",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Ok,
    Warn,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Ok => "OK",
            RunStatus::Warn => "Warn",
            RunStatus::Error => "Error",
        }
    }
}

/// One record per orchestrator run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLog {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub mode: String,
    pub status: String,
    pub events_found: i64,
    pub failures: i64,
    pub warnings: Vec<String>,
}

/// Raw per-event field map as read off a listing page, before
/// normalization. Field values are whatever text the selectors matched.
#[derive(Debug, Clone, Default)]
pub struct RawEventFields {
    pub event_name: String,
    pub date_text: Option<String>,
    pub end_date_text: Option<String>,
    pub time_text: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub target_group: Option<String>,
    pub status_text: Option<String>,
    pub booking_text: Option<String>,
    pub event_url: Option<String>,
}

/// Result of one single-URL crawl.
#[derive(Debug, Default)]
pub struct CrawlOutcome {
    pub events: Vec<Event>,
    pub warnings: Vec<String>,
}
