//! Adapter for true calendar sites that expose one day at a time behind a
//! "next day" control. Events are buffered per name across the stepped
//! days and emitted once, with `date_iso = first seen day` and
//! `end_date_iso = last seen day` for runs longer than one day.

use super::{AdapterContext, SiteAdapter};
use crate::browser::{BrowserSession, ClickTarget, WaitOptions};
use crate::error::Result;
use crate::extract::extract_with_bundle;
use crate::normalize::{
    classify_target_group, clean_event_name, detect_status, extract_time, location_from_title,
    parse_date,
};
use crate::types::{CrawlOutcome, Event, RawEventFields, NOT_AVAILABLE};
use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use std::collections::BTreeMap;
use std::time::Duration as StdDuration;
use tracing::{debug, info, warn};

const DAYS_TO_STEP: usize = 30;
const ITEM_WAIT_TIMEOUT: StdDuration = StdDuration::from_secs(20);

pub struct DaySteppingCalendar {
    host: &'static str,
    venue: &'static str,
    date_display_selector: &'static str,
    item_selector: &'static str,
    next_day_labels: &'static [&'static str],
    horizon_override: i64,
}

impl DaySteppingCalendar {
    pub fn skansen() -> Self {
        Self {
            host: "skansen.se",
            venue: "Skansen",
            date_display_selector: ".calendarTopBar__dropdownButton span.p",
            item_selector: "ul.calendarList__list li.calendarItem",
            next_day_labels: &["Next day", "Nästa dag"],
            horizon_override: 45,
        }
    }
}

struct BufferedEvent {
    first_seen: NaiveDate,
    last_seen: NaiveDate,
    fields: RawEventFields,
}

#[async_trait]
impl SiteAdapter for DaySteppingCalendar {
    fn name(&self) -> &'static str {
        "day_stepping_calendar"
    }

    fn matches(&self, host: &str) -> bool {
        host.ends_with(self.host)
    }

    fn horizon_days(&self) -> Option<i64> {
        Some(self.horizon_override)
    }

    async fn run(&self, ctx: AdapterContext<'_>) -> Option<Result<CrawlOutcome>> {
        Some(self.step_days(ctx).await)
    }
}

impl DaySteppingCalendar {
    async fn step_days(&self, ctx: AdapterContext<'_>) -> Result<CrawlOutcome> {
        let session = ctx
            .driver
            .open(ctx.url, &WaitOptions::network_idle(3000))
            .await?;
        let result = self.step_days_in_session(&ctx, session.as_ref()).await;
        session.close().await;
        result
    }

    async fn step_days_in_session(
        &self,
        ctx: &AdapterContext<'_>,
        session: &dyn BrowserSession,
    ) -> Result<CrawlOutcome> {
        let mut outcome = CrawlOutcome::default();

        for label in ["Godkänn", "Acceptera"] {
            let _ = session
                .click(&ClickTarget::Text(label.to_string()), true, 2000)
                .await;
        }

        let Some(bundle) = ctx.selector_store.get(ctx.url)? else {
            outcome
                .warnings
                .push(format!("{}: no selectors stored for calendar site", ctx.url));
            return Ok(outcome);
        };

        if !self.wait_for_items(session).await? {
            outcome
                .warnings
                .push(format!("{}: calendar items never rendered", ctx.url));
            return Ok(outcome);
        }

        let mut buffered: BTreeMap<String, BufferedEvent> = BTreeMap::new();

        for step in 0..DAYS_TO_STEP {
            let Some(day) = self.read_displayed_date(session, ctx.today).await else {
                outcome
                    .warnings
                    .push(format!("{}: could not read calendar date at step {step}", ctx.url));
                break;
            };

            let html = session.content().await?;
            for fields in extract_with_bundle(&html, &bundle)? {
                let name = clean_event_name(&fields.event_name);
                if name.is_empty() {
                    continue;
                }
                buffered
                    .entry(name)
                    .and_modify(|entry| entry.last_seen = day)
                    .or_insert(BufferedEvent {
                        first_seen: day,
                        last_seen: day,
                        fields,
                    });
            }

            if !self.advance_day(session).await? {
                debug!("No next-day control after step {step}");
                break;
            }
        }

        info!(
            "Day-stepping calendar buffered {} unique events from {}",
            buffered.len(),
            ctx.url
        );

        let horizon_end = ctx.today + Duration::days(ctx.horizon_days);
        for (name, entry) in buffered {
            let end = (entry.last_seen > entry.first_seen).then_some(entry.last_seen);
            if entry.first_seen > horizon_end || end.unwrap_or(entry.first_seen) < ctx.today {
                continue;
            }

            let fields = entry.fields;
            let description = fields
                .description
                .clone()
                .unwrap_or_else(|| NOT_AVAILABLE.to_string());
            let target_raw = fields.target_group.clone().unwrap_or_default();
            let event_url = fields
                .event_url
                .as_deref()
                .and_then(|href| url::Url::parse(ctx.url).ok()?.join(href).ok())
                .map(|u| u.to_string())
                .unwrap_or_else(|| ctx.url.to_string());

            outcome.events.push(Event {
                status: detect_status(&name, &description, ""),
                target_group: classify_target_group(&target_raw, &name, false),
                location: location_from_title(&name, self.venue),
                time: extract_time(fields.time_text.as_deref().unwrap_or_default()),
                event_name: name,
                date_iso: entry.first_seen,
                end_date_iso: end,
                target_group_raw: target_raw,
                description,
                event_url,
                booking_info: NOT_AVAILABLE.to_string(),
                last_scraped: Utc::now(),
            });
        }

        Ok(outcome)
    }

    async fn wait_for_items(&self, session: &dyn BrowserSession) -> Result<bool> {
        let deadline = tokio::time::Instant::now() + ITEM_WAIT_TIMEOUT;
        loop {
            if session.count(self.item_selector).await? > 0 {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(StdDuration::from_millis(500)).await;
        }
    }

    async fn read_displayed_date(
        &self,
        session: &dyn BrowserSession,
        today: NaiveDate,
    ) -> Option<NaiveDate> {
        let raw = match session.inner_text(self.date_display_selector).await {
            Ok(Some(text)) => text,
            Ok(None) => return None,
            Err(e) => {
                warn!("Error reading calendar date: {e}");
                return None;
            }
        };
        let cleaned = raw.replace("Select date:", "");
        let date_part = match cleaned.split_once(',') {
            Some((_, after_comma)) => after_comma,
            None => cleaned.as_str(),
        };
        parse_date(date_part.trim(), today)
    }

    async fn advance_day(&self, session: &dyn BrowserSession) -> Result<bool> {
        for label in self.next_day_labels {
            if session
                .click(&ClickTarget::Text(label.to_string()), false, 2000)
                .await?
            {
                tokio::time::sleep(StdDuration::from_millis(500)).await;
                let _ = self.wait_for_items(session).await?;
                return Ok(true);
            }
        }
        Ok(false)
    }
}
