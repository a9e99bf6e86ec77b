//! Pure text normalization: Swedish/ISO dates, times, target groups,
//! cancellation and booking state. No I/O; everything returns owned values
//! and `None`/sentinels instead of raising.

use crate::types::{EventStatus, TargetGroup, NOT_AVAILABLE};
use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

/// NFC-fold and lowercase, so keyword matching survives decomposed input.
fn fold(s: &str) -> String {
    s.nfc().collect::<String>().to_lowercase()
}

fn month_number(token: &str) -> Option<u32> {
    match token {
        "januari" | "jan" | "january" => Some(1),
        "februari" | "feb" | "february" => Some(2),
        "mars" | "mar" | "march" => Some(3),
        "april" | "apr" => Some(4),
        "maj" | "may" => Some(5),
        "juni" | "jun" | "june" => Some(6),
        "juli" | "jul" | "july" => Some(7),
        "augusti" | "aug" | "august" => Some(8),
        "september" | "sep" | "sept" => Some(9),
        "oktober" | "okt" | "oct" | "october" => Some(10),
        "november" | "nov" => Some(11),
        "december" | "dec" => Some(12),
        _ => None,
    }
}

static ISO_DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})-(\d{2})-(\d{2})").unwrap());
static DAY_MONTH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,2})\s+([a-zåäö]+)").unwrap());
static YEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(20\d{2})\b").unwrap());

/// Parses an ISO or Swedish/English textual date. With no explicit year,
/// a (month, day) strictly before today rolls forward to next year.
pub fn parse_date(s: &str, today: NaiveDate) -> Option<NaiveDate> {
    let text = fold(s.trim());
    if text.is_empty() {
        return None;
    }

    if let Some(caps) = ISO_DATE_RE.captures(&text) {
        let year: i32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        let day: u32 = caps[3].parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day);
    }

    let caps = DAY_MONTH_RE.captures(&text)?;
    let day: u32 = caps[1].parse().ok()?;
    let month = month_number(&caps[2])?;

    let year = match YEAR_RE.captures(&text) {
        Some(y) => y[1].parse().ok()?,
        None => {
            let mut year = today.year();
            if (month, day) < (today.month(), today.day()) {
                year += 1;
            }
            year
        }
    };
    NaiveDate::from_ymd_opt(year, month, day)
}

static ISO_RANGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{4}-\d{2}-\d{2})\s*[-–—]\s*(\d{4}-\d{2}-\d{2})").unwrap()
});
// "5-8 december": a bare day span sharing one month name.
static DAY_SPAN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{1,2})\s*[-–]\s*(\d{1,2})\s+([a-zåäö]+)(.*)$").unwrap()
});
// Spaced dash of any kind, or an unspaced en/em dash. An unspaced plain
// hyphen is never a range separator (it appears inside ISO dates and words
// like drop-in).
static RANGE_SPLIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+[-–—]\s+|\s*[–—]\s*").unwrap());

/// Splits a textual date range into start and optional end. Handles
/// Dec→Jan wrap both ways: implicit years roll forward day-by-day, and a
/// start without a year backs off to `end.year - 1` when the end carries
/// an explicit year and the months are inverted.
pub fn parse_date_range(s: &str, today: NaiveDate) -> Option<(NaiveDate, Option<NaiveDate>)> {
    let text = s.trim();
    if text.is_empty() {
        return None;
    }

    if let Some(caps) = ISO_RANGE_RE.captures(text) {
        let start = parse_date(&caps[1], today)?;
        let end = parse_date(&caps[2], today);
        return Some((start, end));
    }
    if ISO_DATE_RE.is_match(&fold(text)) {
        return parse_date(text, today).map(|d| (d, None));
    }

    let folded = fold(text);
    if let Some(caps) = DAY_SPAN_RE.captures(&folded) {
        if month_number(&caps[3]).is_some() {
            let tail = format!("{} {}", &caps[3], &caps[4]);
            let start = parse_date(&format!("{} {}", &caps[1], tail), today);
            let end = parse_date(&format!("{} {}", &caps[2], tail), today);
            if let (Some(start), Some(end)) = (start, end) {
                return Some((start, Some(end)));
            }
        }
    }

    let mut parts = RANGE_SPLIT_RE.splitn(text, 2);
    let start_text = parts.next()?.trim();
    let end_text = parts.next().map(str::trim).filter(|p| !p.is_empty());

    let end = end_text.and_then(|p| parse_date(p, today));

    let mut start = match parse_date(start_text, today) {
        Some(d) => d,
        None => {
            // Bare day number before the dash: borrow month and year from
            // the end date ("5 - 8 december").
            let day: u32 = fold(start_text).trim().parse().ok()?;
            let end = end?;
            NaiveDate::from_ymd_opt(end.year(), end.month(), day)?
        }
    };

    if let (Some(end), Some(end_text)) = (end, end_text) {
        let end_has_year = YEAR_RE.is_match(end_text);
        let start_has_year = YEAR_RE.is_match(start_text);
        if end_has_year && !start_has_year && start.month() > end.month() && start.year() == end.year()
        {
            start = NaiveDate::from_ymd_opt(end.year() - 1, start.month(), start.day())?;
        }
    }

    Some((start, end))
}

static DATETIME_TIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d{4}-\d{2}-\d{2}[T\s](\d{1,2}[:.]\d{2})").unwrap());
static TID_TIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)tid:\s*(\d{1,2}[:.]\d{2}(?:\s*-\s*\d{1,2}[:.]\d{2})?)").unwrap()
});
static KL_TIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)kl\.?\s*(\d{1,2}[:.]\d{2})").unwrap());
static BARE_TIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{1,2}[:.]\d{2}(?:\s*-\s*\d{1,2}[:.]\d{2})?)$").unwrap()
});
static ANY_TIME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d{1,2}[:.]\d{2})\b").unwrap());

/// Pulls an HH:MM-ish time out of free text; `N/A` when nothing matches.
/// Periods become colons ("14.30" → "14:30"). Idempotent.
pub fn extract_time(s: &str) -> String {
    let text = s.trim();
    if text.is_empty() || text == NOT_AVAILABLE {
        return NOT_AVAILABLE.to_string();
    }

    let matched = DATETIME_TIME_RE
        .captures(text)
        .or_else(|| TID_TIME_RE.captures(text))
        .or_else(|| BARE_TIME_RE.captures(text))
        .or_else(|| KL_TIME_RE.captures(text))
        .or_else(|| ANY_TIME_RE.captures(text));

    match matched {
        Some(caps) => caps[1].replace('.', ":"),
        None => NOT_AVAILABLE.to_string(),
    }
}

static AGE_MONTHS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,2})\s*(?:[-–]\s*(\d{1,2})\s*)?mån").unwrap());
static AGE_RANGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,2})\s*[-–]\s*(\d{1,2})\s*år").unwrap());
static AGE_SINGLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:för|från)\s+(\d{1,2})\s*år").unwrap());
static AGE_PLUS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{1,2})\s*\+").unwrap());

fn bucket_for_span(min_age: u32, max_age: u32) -> TargetGroup {
    // Spans crossing bucket boundaries land in the lowest bucket.
    if max_age <= 12 || min_age <= 12 {
        TargetGroup::Children
    } else if min_age <= 19 {
        TargetGroup::Teens
    } else {
        TargetGroup::Adults
    }
}

fn bucket_for_min(min_age: u32) -> TargetGroup {
    if min_age <= 12 {
        TargetGroup::Children
    } else if min_age <= 17 {
        TargetGroup::Teens
    } else {
        TargetGroup::Adults
    }
}

/// Classifies the audience of an event. Resolution order: preschool
/// source hint, age expressions in the raw text or event name, keyword
/// sets, and finally `all_ages`.
pub fn classify_target_group(raw: &str, event_name: &str, preschool_hint: bool) -> TargetGroup {
    if preschool_hint {
        return TargetGroup::PreschoolGroups;
    }

    let text = format!("{} {}", fold(raw), fold(event_name));

    if AGE_MONTHS_RE.is_match(&text) {
        return TargetGroup::Babies;
    }
    if let Some(caps) = AGE_RANGE_RE.captures(&text) {
        if let (Ok(min_age), Ok(max_age)) = (caps[1].parse::<u32>(), caps[2].parse::<u32>()) {
            return bucket_for_span(min_age.min(max_age), min_age.max(max_age));
        }
    }
    if let Some(caps) = AGE_SINGLE_RE.captures(&text) {
        if let Ok(age) = caps[1].parse::<u32>() {
            return if age <= 12 {
                TargetGroup::Children
            } else if age <= 19 {
                TargetGroup::Teens
            } else {
                TargetGroup::Adults
            };
        }
    }
    if let Some(caps) = AGE_PLUS_RE.captures(&text) {
        if let Ok(age) = caps[1].parse::<u32>() {
            return bucket_for_min(age);
        }
    }

    const CHILDREN: &[&str] = &["barn", "bebis", "småbarn", "förskola", "for children", "för barn"];
    const TEENS: &[&str] = &["ungdom", "teen", "tonåring", "unga"];
    const FAMILIES: &[&str] = &["familj", "family"];
    const ADULTS: &[&str] = &["vuxen", "vuxna", "adult", "senior"];
    const ALL_AGES: &[&str] = &["alla", "all ages", "general"];

    if CHILDREN.iter().any(|k| text.contains(k)) {
        return TargetGroup::Children;
    }
    if TEENS.iter().any(|k| text.contains(k)) {
        return TargetGroup::Teens;
    }
    if FAMILIES.iter().any(|k| text.contains(k)) {
        return TargetGroup::Families;
    }
    if ADULTS.iter().any(|k| text.contains(k)) {
        return TargetGroup::Adults;
    }
    if ALL_AGES.iter().any(|k| text.contains(k)) {
        return TargetGroup::AllAges;
    }
    TargetGroup::AllAges
}

const CANCELLED_KEYWORDS: &[&str] = &[
    "inställt",
    "inställd",
    "cancelled",
    "canceled",
    "avlyst",
    "ställs in",
    "avbokat",
];
const FULLY_BOOKED_KEYWORDS: &[&str] =
    &["fullbokat", "fullbokad", "fully booked", "sold out", "slutsålt"];

/// Cancellation/fully-booked detection over name + description + explicit
/// status text.
pub fn detect_status(name: &str, description: &str, status_text: &str) -> EventStatus {
    let combined = fold(&format!("{name} {description} {status_text}"));
    if CANCELLED_KEYWORDS.iter().any(|k| combined.contains(k)) {
        return EventStatus::Cancelled;
    }
    if FULLY_BOOKED_KEYWORDS.iter().any(|k| combined.contains(k)) {
        return EventStatus::Fullbokat;
    }
    EventStatus::Scheduled
}

const BOOKING_REQUIRED_KEYWORDS: &[&str] = &[
    "boka plats",
    "du behöver boka",
    "bokning krävs",
    "bokningen öppnar",
];

/// Booking-state classification of a free-text snippet.
pub fn extract_booking(text: &str) -> &'static str {
    let t = fold(text);
    if t.is_empty() {
        return NOT_AVAILABLE;
    }
    if t.contains("fullbokat") || t.contains("fullbokad") {
        return "Fullbokat";
    }
    if BOOKING_REQUIRED_KEYWORDS.iter().any(|k| t.contains(k)) {
        return "Requires booking";
    }
    if t.contains("drop-in") || t.contains("dropin") {
        return "Drop-in";
    }
    NOT_AVAILABLE
}

static CANCELLED_PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*inställt:\s*").unwrap());

/// Strips a leading "INSTÄLLT:" marker and trims whitespace.
pub fn clean_event_name(name: &str) -> String {
    CANCELLED_PREFIX_RE.replace(name, "").trim().to_string()
}

static LOCATION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\bat\s+([A-ZÅÄÖ][\wåäö\s]+?)(?:\s*[–-]|$)",
        r"\bin\s+([A-ZÅÄÖ][\wåäö\s]+?)(?:\s*[–-]|$)",
        r"\bi\s+([A-ZÅÄÖ][\wåäö\s]+?)(?:\s*[–-]|$)",
        r"\bpå\s+([A-ZÅÄÖ][\wåäö\s]+?)(?:\s*[–-]|$)",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

const VENUE_KEYWORDS: &[&str] = &[
    "farmstead", "church", "kyrka", "gård", "torg", "stage", "hall", "house", "hus",
];

/// Derives a location from an event title when the listing exposes none:
/// "Julmarknad på Bollnästorget" → "Bollnästorget".
pub fn location_from_title(title: &str, fallback: &str) -> String {
    if title.trim().is_empty() {
        return fallback.to_string();
    }
    for pattern in LOCATION_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(title) {
            let place = caps[1].trim().to_string();
            if place.len() > 2 {
                return place;
            }
        }
    }
    let lowered = fold(title);
    if VENUE_KEYWORDS.iter().any(|k| lowered.contains(k)) {
        return title.trim().to_string();
    }
    fallback.to_string()
}

static COMBINED_ISO_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4}-\d{2}-\d{2})\s+(\d{1,2}[:.]\d{2})").unwrap());
static COMBINED_TEXT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{1,2}\s+[a-zåäö]+(?:\s+20\d{2})?)\s+(?:kl\.?\s*)?(\d{1,2}[:.]\d{2})").unwrap()
});

/// Splits a combined date+time cell ("2025-12-30 14:00",
/// "30 december kl 14:00") into its parts. Either side may be absent.
pub fn split_datetime(s: &str, today: NaiveDate) -> (Option<NaiveDate>, Option<String>) {
    let text = fold(s.trim());
    if text.is_empty() {
        return (None, None);
    }
    if let Some(caps) = COMBINED_ISO_RE.captures(&text) {
        return (
            parse_date(&caps[1], today),
            Some(caps[2].replace('.', ":")),
        );
    }
    if let Some(caps) = COMBINED_TEXT_RE.captures(&text) {
        if let Some(date) = parse_date(&caps[1], today) {
            return (Some(date), Some(caps[2].replace('.', ":")));
        }
    }
    let time = extract_time(&text);
    if time != NOT_AVAILABLE {
        return (None, Some(time));
    }
    (parse_date(&text, today), None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn parses_iso_dates_with_trailing_noise() {
        let today = day(2025, 11, 10);
        assert_eq!(parse_date("2025-12-24", today), Some(day(2025, 12, 24)));
        assert_eq!(
            parse_date("2025-12-24T10:00:00", today),
            Some(day(2025, 12, 24))
        );
        assert_eq!(parse_date("not a date", today), None);
        assert_eq!(parse_date("", today), None);
    }

    #[test]
    fn parses_swedish_dates() {
        let today = day(2025, 11, 10);
        assert_eq!(parse_date("24 december", today), Some(day(2025, 12, 24)));
        assert_eq!(parse_date("tis 24 dec", today), Some(day(2025, 12, 24)));
        assert_eq!(parse_date("24 dec 2025", today), Some(day(2025, 12, 24)));
        assert_eq!(
            parse_date("24 december 2025", today),
            Some(day(2025, 12, 24))
        );
        assert_eq!(parse_date("24 December", today), Some(day(2025, 12, 24)));
    }

    #[test]
    fn rolls_past_dates_into_next_year() {
        let today = day(2025, 11, 10);
        assert_eq!(parse_date("3 januari", today), Some(day(2026, 1, 3)));
        // Same day as today does not roll.
        assert_eq!(parse_date("10 november", today), Some(day(2025, 11, 10)));
        // Explicit year wins over inference.
        assert_eq!(parse_date("3 januari 2025", today), Some(day(2025, 1, 3)));
    }

    #[test]
    fn rejects_impossible_dates() {
        let today = day(2025, 11, 10);
        assert_eq!(parse_date("31 februari", today), None);
    }

    #[test]
    fn range_with_dec_jan_rollover() {
        let today = day(2025, 12, 20);
        let (start, end) = parse_date_range("28 december – 3 januari", today).unwrap();
        assert_eq!(start, day(2025, 12, 28));
        assert_eq!(end, Some(day(2026, 1, 3)));
    }

    #[test]
    fn range_start_backs_off_when_end_year_is_explicit() {
        // Crawled in November, listing says "22 december - 2 januari 2026":
        // the start belongs to the year before the explicit end year.
        let today = day(2026, 11, 5);
        let (start, end) = parse_date_range("22 december - 2 januari 2026", today).unwrap();
        assert_eq!(end, Some(day(2026, 1, 2)));
        assert_eq!(start, day(2025, 12, 22));
    }

    #[test]
    fn range_iso_pair_is_not_split_on_inner_hyphens() {
        let today = day(2025, 11, 10);
        let (start, end) = parse_date_range("2026-03-02 - 2026-06-21", today).unwrap();
        assert_eq!(start, day(2026, 3, 2));
        assert_eq!(end, Some(day(2026, 6, 21)));
    }

    #[test]
    fn range_day_span_shares_month() {
        let today = day(2025, 11, 10);
        let (start, end) = parse_date_range("5-8 december", today).unwrap();
        assert_eq!(start, day(2025, 12, 5));
        assert_eq!(end, Some(day(2025, 12, 8)));
    }

    #[test]
    fn single_date_has_no_end() {
        let today = day(2025, 11, 10);
        let (start, end) = parse_date_range("24 december", today).unwrap();
        assert_eq!(start, day(2025, 12, 24));
        assert_eq!(end, None);
    }

    #[test]
    fn extracts_times() {
        assert_eq!(extract_time("2025-12-24 10:00"), "10:00");
        assert_eq!(extract_time("Tid: 14.30"), "14:30");
        assert_eq!(extract_time("kl. 10:00"), "10:00");
        assert_eq!(extract_time("18:00"), "18:00");
        assert_eq!(extract_time("10:00 - 12:00"), "10:00 - 12:00");
        assert_eq!(extract_time("hela dagen"), "N/A");
        assert_eq!(extract_time(""), "N/A");
    }

    #[test]
    fn extract_time_is_idempotent() {
        for input in ["2025-12-24T10:00", "Tid: 14.30", "kl 9.15", "ingen tid", "18:00"] {
            let once = extract_time(input);
            assert_eq!(extract_time(&once), once, "not idempotent for {input:?}");
        }
    }

    #[test]
    fn classifies_age_expressions() {
        assert_eq!(
            classify_target_group("3-6 år", "", false),
            TargetGroup::Children
        );
        assert_eq!(
            classify_target_group("", "Sagostund för 7 år", false),
            TargetGroup::Children
        );
        assert_eq!(
            classify_target_group("4-12 månader", "", false),
            TargetGroup::Babies
        );
        assert_eq!(
            classify_target_group("13-19 år", "", false),
            TargetGroup::Teens
        );
        assert_eq!(
            classify_target_group("18+", "", false),
            TargetGroup::Adults
        );
        // Span crossing bucket boundaries takes the lowest bucket.
        assert_eq!(
            classify_target_group("10-15 år", "", false),
            TargetGroup::Children
        );
    }

    #[test]
    fn classifies_keywords_and_defaults() {
        assert_eq!(
            classify_target_group("för barn", "", false),
            TargetGroup::Children
        );
        assert_eq!(
            classify_target_group("Unga vuxna", "", false),
            TargetGroup::Teens
        );
        assert_eq!(
            classify_target_group("familjevisning", "", false),
            TargetGroup::Families
        );
        assert_eq!(
            classify_target_group("för vuxna", "", false),
            TargetGroup::Adults
        );
        assert_eq!(classify_target_group("", "", false), TargetGroup::AllAges);
    }

    #[test]
    fn preschool_hint_wins_over_everything() {
        assert_eq!(
            classify_target_group("3-6 år", "Sagostund", true),
            TargetGroup::PreschoolGroups
        );
    }

    #[test]
    fn detects_cancellations_and_full_bookings() {
        assert_eq!(
            detect_status("INSTÄLLT: Babyrytmik", "", ""),
            EventStatus::Cancelled
        );
        assert_eq!(
            detect_status("Konsert", "tyvärr avlyst", ""),
            EventStatus::Cancelled
        );
        assert_eq!(
            detect_status("Julshow", "", "Fullbokat"),
            EventStatus::Fullbokat
        );
        assert_eq!(detect_status("Sagostund", "", ""), EventStatus::Scheduled);
    }

    #[test]
    fn classifies_booking_text() {
        assert_eq!(extract_booking("Fullbokat!"), "Fullbokat");
        assert_eq!(extract_booking("Du behöver boka plats"), "Requires booking");
        assert_eq!(extract_booking("Drop-in hela dagen"), "Drop-in");
        assert_eq!(extract_booking("fri entré"), "N/A");
        assert_eq!(extract_booking(""), "N/A");
    }

    #[test]
    fn cleans_cancelled_prefix() {
        assert_eq!(clean_event_name("INSTÄLLT: Babyrytmik"), "Babyrytmik");
        assert_eq!(clean_event_name("  Sagostund  "), "Sagostund");
        assert_eq!(clean_event_name("inställt:Julkonsert"), "Julkonsert");
    }

    #[test]
    fn derives_location_from_title() {
        assert_eq!(
            location_from_title("Julmarknad på Bollnästorget", "Skansen"),
            "Bollnästorget"
        );
        assert_eq!(
            location_from_title("Konsert i Seglora kyrka", "Skansen"),
            "Seglora kyrka"
        );
        assert_eq!(location_from_title("Vanlig visning", "Skansen"), "Skansen");
    }

    #[test]
    fn splits_combined_datetimes() {
        let today = day(2025, 11, 10);
        assert_eq!(
            split_datetime("2025-12-30 14:00", today),
            (Some(day(2025, 12, 30)), Some("14:00".to_string()))
        );
        assert_eq!(
            split_datetime("30 december kl 14:00", today),
            (Some(day(2025, 12, 30)), Some("14:00".to_string()))
        );
        assert_eq!(
            split_datetime("14.30", today),
            (None, Some("14:30".to_string()))
        );
        assert_eq!(split_datetime("", today), (None, None));
    }
}
