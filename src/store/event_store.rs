use crate::db::{db_err, Database};
use crate::error::Result;
use crate::types::{Event, EventStatus, TargetGroup, NOT_AVAILABLE};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rusqlite::types::Value;
use rusqlite::Row;
use tracing::debug;

/// Query-time expansion of multi-day events never looks further ahead
/// than this, independent of the crawl horizon.
const EXPANSION_CAP_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateMode {
    AllTime,
    ThisWeek,
    Next30Days,
    On(NaiveDate),
}

/// Recognized filter options for the admin event listing.
#[derive(Debug, Clone)]
pub struct EventQuery {
    /// Substring match on the event name.
    pub search: Option<String>,
    /// Exact location; `None` means all venues.
    pub venue: Option<String>,
    /// Source name from the scraping_urls table, mapped to a host match.
    pub source: Option<String>,
    pub date_mode: DateMode,
    /// Empty means all target groups.
    pub target_groups: Vec<TargetGroup>,
    pub page: usize,
    pub per_page: usize,
}

impl Default for EventQuery {
    fn default() -> Self {
        Self {
            search: None,
            venue: None,
            source: None,
            date_mode: DateMode::AllTime,
            target_groups: Vec::new(),
            page: 1,
            per_page: 20,
        }
    }
}

#[derive(Clone)]
pub struct EventStore {
    db: Database,
}

impl EventStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Atomic insert-or-replace keyed by `(event_name, date_iso,
    /// event_url)`. Never fails on duplicates; `last_scraped` is stamped
    /// here.
    pub fn upsert(&self, event: &Event) -> Result<()> {
        let conn = self.db.lock();
        conn.execute(
            "INSERT INTO events (
                event_name, date_iso, event_url, end_date_iso, time, location,
                target_group_raw, target_group, status, booking_info, description, last_scraped
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(event_name, date_iso, event_url) DO UPDATE SET
                end_date_iso = excluded.end_date_iso,
                time = excluded.time,
                location = excluded.location,
                target_group_raw = excluded.target_group_raw,
                target_group = excluded.target_group,
                status = excluded.status,
                booking_info = excluded.booking_info,
                description = excluded.description,
                last_scraped = excluded.last_scraped",
            rusqlite::params![
                event.event_name,
                event.date_iso.format("%Y-%m-%d").to_string(),
                event.event_url,
                event
                    .end_date_iso
                    .map(|d| d.format("%Y-%m-%d").to_string())
                    .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
                event.time,
                event.location,
                event.target_group_raw,
                event.target_group.as_str(),
                event.status.as_str(),
                event.booking_info,
                event.description,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(db_err)?;
        debug!("Upserted event '{}' on {}", event.event_name, event.date_iso);
        Ok(())
    }

    /// Filtered, multi-day-expanded, paginated listing. Returns the page
    /// of virtual events plus the expanded total.
    pub fn filter(&self, q: &EventQuery, today: NaiveDate) -> Result<(Vec<Event>, usize)> {
        let (lower, upper) = date_window(q.date_mode, today);

        let mut sql = String::from(
            "SELECT event_name, date_iso, event_url, end_date_iso, time, location,
                    target_group_raw, target_group, status, booking_info, description, last_scraped
             FROM events WHERE 1=1",
        );
        let mut params: Vec<Value> = Vec::new();

        if let Some(search) = q.search.as_deref().filter(|s| !s.is_empty()) {
            sql.push_str(" AND event_name LIKE ?");
            params.push(Value::Text(format!("%{search}%")));
        }
        if let Some(venue) = q.venue.as_deref().filter(|v| !v.is_empty() && *v != "All") {
            sql.push_str(" AND location = ?");
            params.push(Value::Text(venue.to_string()));
        }
        if let Some(source) = q.source.as_deref().filter(|s| !s.is_empty() && *s != "All") {
            if let Some(host) = self.host_for_source(source)? {
                sql.push_str(" AND event_url LIKE ?");
                params.push(Value::Text(format!("%{host}%")));
            }
        }
        if !q.target_groups.is_empty() {
            let placeholders = vec!["?"; q.target_groups.len()].join(",");
            sql.push_str(&format!(" AND target_group IN ({placeholders})"));
            for group in &q.target_groups {
                params.push(Value::Text(group.as_str().to_string()));
            }
        }
        // An event overlaps the window when it starts before the upper
        // bound and its effective end reaches the lower bound; this keeps
        // multi-day events that began before the window.
        if let Some(upper) = upper {
            sql.push_str(" AND date_iso <= ?");
            params.push(Value::Text(upper.format("%Y-%m-%d").to_string()));
        }
        if let Some(lower) = lower {
            sql.push_str(
                " AND (CASE WHEN end_date_iso IS NULL OR end_date_iso = 'N/A'
                       THEN date_iso ELSE end_date_iso END) >= ?",
            );
            params.push(Value::Text(lower.format("%Y-%m-%d").to_string()));
        }
        sql.push_str(" ORDER BY date_iso ASC, event_name ASC");

        let conn = self.db.lock();
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(params), map_event_row)
            .map_err(db_err)?;

        let mut expanded = Vec::new();
        for row in rows {
            let event = row.map_err(db_err)?;
            expand_into(&mut expanded, event, q.date_mode, today, lower, upper);
        }
        expanded.sort_by(|a, b| (a.date_iso, &a.event_name).cmp(&(b.date_iso, &b.event_name)));

        let total = expanded.len();
        let page = q.page.max(1);
        let start = (page - 1).saturating_mul(q.per_page);
        let events = expanded
            .into_iter()
            .skip(start)
            .take(q.per_page)
            .collect();
        Ok((events, total))
    }

    /// Deletes events whose start date lies further back than `days`.
    pub fn delete_older_than(&self, days: i64, today: NaiveDate) -> Result<usize> {
        let cutoff = (today - Duration::days(days)).format("%Y-%m-%d").to_string();
        let conn = self.db.lock();
        let deleted = conn
            .execute("DELETE FROM events WHERE date_iso < ?1", rusqlite::params![cutoff])
            .map_err(db_err)?;
        Ok(deleted)
    }

    /// Targeted delete by identity triple.
    pub fn delete(&self, name: &str, date: NaiveDate, url: &str) -> Result<bool> {
        let conn = self.db.lock();
        let deleted = conn
            .execute(
                "DELETE FROM events WHERE event_name = ?1 AND date_iso = ?2 AND event_url = ?3",
                rusqlite::params![name, date.format("%Y-%m-%d").to_string(), url],
            )
            .map_err(db_err)?;
        Ok(deleted > 0)
    }

    pub fn count_all(&self) -> Result<i64> {
        let conn = self.db.lock();
        conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))
            .map_err(db_err)
    }

    pub fn count_between(&self, from: NaiveDate, to: NaiveDate) -> Result<i64> {
        let conn = self.db.lock();
        conn.query_row(
            "SELECT COUNT(*) FROM events WHERE date_iso >= ?1 AND date_iso <= ?2",
            rusqlite::params![
                from.format("%Y-%m-%d").to_string(),
                to.format("%Y-%m-%d").to_string()
            ],
            |row| row.get(0),
        )
        .map_err(db_err)
    }

    pub fn distinct_venues(&self) -> Result<Vec<String>> {
        let conn = self.db.lock();
        let mut stmt = conn
            .prepare(
                "SELECT DISTINCT location FROM events
                 WHERE location IS NOT NULL AND location != '' ORDER BY location",
            )
            .map_err(db_err)?;
        let rows = stmt.query_map([], |row| row.get(0)).map_err(db_err)?;
        rows.collect::<std::result::Result<Vec<String>, _>>()
            .map_err(db_err)
    }

    pub fn counts_by_venue(&self) -> Result<Vec<(String, i64)>> {
        let conn = self.db.lock();
        let mut stmt = conn
            .prepare(
                "SELECT location, COUNT(*) FROM events
                 WHERE location IS NOT NULL GROUP BY location ORDER BY COUNT(*) DESC",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(db_err)?;
        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(db_err)
    }

    pub fn counts_by_target_group(&self) -> Result<Vec<(String, i64)>> {
        let conn = self.db.lock();
        let mut stmt = conn
            .prepare(
                "SELECT target_group, COUNT(*) FROM events
                 WHERE target_group IS NOT NULL GROUP BY target_group",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(db_err)?;
        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(db_err)
    }

    fn host_for_source(&self, source: &str) -> Result<Option<String>> {
        let conn = self.db.lock();
        let url: Option<String> = conn
            .query_row(
                "SELECT url FROM scraping_urls WHERE name = ?1",
                rusqlite::params![source],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(db_err(other)),
            })?;
        Ok(url
            .and_then(|u| url::Url::parse(&u).ok())
            .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string())))
    }
}

fn date_window(mode: DateMode, today: NaiveDate) -> (Option<NaiveDate>, Option<NaiveDate>) {
    match mode {
        DateMode::AllTime => (None, None),
        DateMode::ThisWeek => (Some(today), Some(today + Duration::days(7))),
        DateMode::Next30Days => (Some(today), Some(today + Duration::days(30))),
        DateMode::On(d) => (Some(d), Some(d)),
    }
}

/// Expands one stored event into per-day virtual events, capped at 30
/// days ahead regardless of the underlying range or crawl horizon.
fn expand_into(
    out: &mut Vec<Event>,
    event: Event,
    mode: DateMode,
    today: NaiveDate,
    lower: Option<NaiveDate>,
    upper: Option<NaiveDate>,
) {
    let in_window = |d: NaiveDate| {
        lower.map_or(true, |lo| d >= lo) && upper.map_or(true, |hi| d <= hi)
    };

    if !event.is_multi_day() {
        if in_window(event.date_iso) {
            out.push(event);
        }
        return;
    }

    let end = event.end_date_iso.unwrap_or(event.date_iso);
    let cap = today + Duration::days(EXPANSION_CAP_DAYS);
    let mut day = event.date_iso.max(today);
    let last = end.min(cap);
    while day <= last {
        let emit = match mode {
            DateMode::On(target) => day == target,
            _ => in_window(day),
        };
        if emit {
            let mut virtual_event = event.clone();
            virtual_event.date_iso = day;
            virtual_event.end_date_iso = None;
            out.push(virtual_event);
        }
        day += Duration::days(1);
    }
}

fn map_event_row(row: &Row<'_>) -> rusqlite::Result<Event> {
    let date_text: String = row.get(1)?;
    let end_text: Option<String> = row.get(3)?;
    let last_scraped_text: String = row.get(11)?;

    let date_iso = NaiveDate::parse_from_str(&date_text, "%Y-%m-%d").map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let end_date_iso = end_text
        .filter(|t| t != NOT_AVAILABLE && !t.is_empty())
        .and_then(|t| NaiveDate::parse_from_str(&t, "%Y-%m-%d").ok());
    let last_scraped = DateTime::parse_from_rfc3339(&last_scraped_text)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now());

    let target_group: String = row.get::<_, Option<String>>(7)?.unwrap_or_default();
    let status: String = row.get::<_, Option<String>>(8)?.unwrap_or_default();

    Ok(Event {
        event_name: row.get(0)?,
        date_iso,
        event_url: row.get(2)?,
        end_date_iso,
        time: row.get::<_, Option<String>>(4)?.unwrap_or_else(|| NOT_AVAILABLE.into()),
        location: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
        target_group_raw: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
        target_group: TargetGroup::parse(&target_group).unwrap_or(TargetGroup::AllAges),
        status: EventStatus::parse(&status).unwrap_or(EventStatus::Scheduled),
        booking_info: row.get::<_, Option<String>>(9)?.unwrap_or_else(|| NOT_AVAILABLE.into()),
        description: row.get::<_, Option<String>>(10)?.unwrap_or_default(),
        last_scraped,
    })
}
