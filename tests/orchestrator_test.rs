mod common;

use chrono::{Duration, Local, NaiveDate, Utc};
use common::{full_bundle, listing_html, swedish_date, Card, MockAi, MockDriver};
use evenemang_scraper::adapters::AdapterRegistry;
use evenemang_scraper::config::RuntimeConfig;
use evenemang_scraper::db::Database;
use evenemang_scraper::orchestrator::Orchestrator;
use evenemang_scraper::store::{EventStore, RunLogStore, Settings, SourceUrls};
use evenemang_scraper::types::{
    Event, EventStatus, RunMode, RunStatus, TargetGroup, NOT_AVAILABLE,
};
use std::sync::Arc;

fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// The catalog seeds the canonical production URLs on first open; tests
/// start from a clean slate.
fn clear_seeded_sources(db: &Database) {
    let urls = SourceUrls::new(db.clone());
    for source in urls.list().unwrap() {
        urls.remove(source.id).unwrap();
    }
}

fn fast_config() -> RuntimeConfig {
    // Generous against the mock pipeline's virtual sleeps, tiny against
    // the hanging page; tests run with a paused clock either way.
    RuntimeConfig {
        per_url_timeout_s: 60,
        ..RuntimeConfig::default()
    }
}

fn good_listing() -> String {
    let date = swedish_date(today() + Duration::days(5));
    listing_html(&[
        Card::new("Sagostund", &date, "10:00"),
        Card::new("Babyrytmik", &date, "11:00"),
    ])
}

#[tokio::test(start_paused = true)]
async fn timed_out_worker_counts_as_failure_but_run_completes() {
    let db = Database::open_in_memory().unwrap();
    clear_seeded_sources(&db);
    let urls = SourceUrls::new(db.clone());
    urls.add("https://good.example/events", "Good").unwrap();
    urls.add("https://hang.example/kalender", "Hang").unwrap();

    let driver = MockDriver::new()
        .with_page("https://good.example/events", &good_listing())
        .with_hanging("https://hang.example/kalender");
    let orchestrator = Orchestrator::with_adapters(
        db.clone(),
        fast_config(),
        Arc::new(driver),
        Arc::new(MockAi::with_bundle(full_bundle(), 0.85)),
        AdapterRegistry::new(),
    );

    let summary = orchestrator.run(RunMode::Manual).await.unwrap();

    assert_eq!(summary.failures, 1);
    assert_eq!(summary.events_found, 2);
    assert_eq!(summary.status, RunStatus::Warn);
    assert!(summary.warnings.iter().any(|w| w.starts_with("Hang:")));

    // Partial results from the healthy worker are persisted.
    assert_eq!(EventStore::new(db.clone()).count_all().unwrap(), 2);

    // The run is logged with matching counters.
    let logs = RunLogStore::new(db).list(1, None).unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, "Warn");
    assert_eq!(logs[0].events_found, 2);
    assert_eq!(logs[0].failures, 1);
    assert_eq!(logs[0].mode, "Manual");
}

#[tokio::test(start_paused = true)]
async fn all_failures_and_zero_events_is_an_error_run() {
    let db = Database::open_in_memory().unwrap();
    clear_seeded_sources(&db);
    SourceUrls::new(db.clone())
        .add("https://hang.example/kalender", "Hang")
        .unwrap();

    let driver = MockDriver::new().with_hanging("https://hang.example/kalender");
    let orchestrator = Orchestrator::with_adapters(
        db.clone(),
        fast_config(),
        Arc::new(driver),
        Arc::new(MockAi::with_bundle(full_bundle(), 0.85)),
        AdapterRegistry::new(),
    );

    let summary = orchestrator.run(RunMode::Auto).await.unwrap();
    assert_eq!(summary.status, RunStatus::Error);
    assert_eq!(summary.events_found, 0);
    assert_eq!(summary.failures, 1);

    let logs = RunLogStore::new(db).list(1, Some("Error")).unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].mode, "Auto");
}

#[tokio::test(start_paused = true)]
async fn multiple_sources_aggregate_into_one_clean_run() {
    let db = Database::open_in_memory().unwrap();
    clear_seeded_sources(&db);
    let urls = SourceUrls::new(db.clone());
    urls.add("https://a.example/events", "A").unwrap();
    urls.add("https://b.example/events", "B").unwrap();

    let date = swedish_date(today() + Duration::days(3));
    let page_a = listing_html(&[Card::new("Konsert", &date, "19:00")]);
    let page_b = listing_html(&[
        Card::new("Visning", &date, "13:00"),
        Card::new("Verkstad", &date, "15:00"),
    ]);

    let driver = MockDriver::new()
        .with_page("https://a.example/events", &page_a)
        .with_page("https://b.example/events", &page_b);
    let orchestrator = Orchestrator::with_adapters(
        db.clone(),
        fast_config(),
        Arc::new(driver),
        Arc::new(MockAi::with_bundle(full_bundle(), 0.85)),
        AdapterRegistry::new(),
    );

    let summary = orchestrator.run(RunMode::Manual).await.unwrap();
    assert_eq!(summary.status, RunStatus::Ok);
    assert_eq!(summary.failures, 0);
    assert_eq!(summary.events_found, 3);
    assert_eq!(EventStore::new(db).count_all().unwrap(), 3);
}

#[tokio::test(start_paused = true)]
async fn disabled_sources_are_not_crawled() {
    let db = Database::open_in_memory().unwrap();
    clear_seeded_sources(&db);
    let urls = SourceUrls::new(db.clone());
    urls.add("https://a.example/events", "A").unwrap();
    let id = urls.list().unwrap()[0].id;
    urls.set_enabled(id, false).unwrap();

    // No pages registered: a crawl attempt would fail loudly.
    let orchestrator = Orchestrator::with_adapters(
        db.clone(),
        fast_config(),
        Arc::new(MockDriver::new()),
        Arc::new(MockAi::with_bundle(full_bundle(), 0.85)),
        AdapterRegistry::new(),
    );

    let summary = orchestrator.run(RunMode::Manual).await.unwrap();
    assert_eq!(summary.status, RunStatus::Warn);
    assert_eq!(summary.events_found, 0);
    assert_eq!(summary.failures, 0);
    assert!(summary
        .warnings
        .iter()
        .any(|w| w.contains("No enabled URLs")));
}

#[tokio::test(start_paused = true)]
async fn retention_sweep_runs_only_when_enabled() {
    let db = Database::open_in_memory().unwrap();
    clear_seeded_sources(&db);
    SourceUrls::new(db.clone())
        .add("https://a.example/events", "A")
        .unwrap();

    let store = EventStore::new(db.clone());
    let old_event = Event {
        event_name: "Forntida".into(),
        date_iso: today() - Duration::days(120),
        end_date_iso: None,
        time: NOT_AVAILABLE.into(),
        location: "Arkivet".into(),
        target_group_raw: String::new(),
        target_group: TargetGroup::AllAges,
        description: NOT_AVAILABLE.into(),
        event_url: "https://a.example/forntida".into(),
        status: EventStatus::Scheduled,
        booking_info: NOT_AVAILABLE.into(),
        last_scraped: Utc::now(),
    };
    store.upsert(&old_event).unwrap();

    let driver = || {
        MockDriver::new().with_page("https://a.example/events", &good_listing())
    };

    // Sweep disabled (the default): the old event stays.
    let orchestrator = Orchestrator::with_adapters(
        db.clone(),
        fast_config(),
        Arc::new(driver()),
        Arc::new(MockAi::with_bundle(full_bundle(), 0.85)),
        AdapterRegistry::new(),
    );
    orchestrator.run(RunMode::Manual).await.unwrap();
    assert_eq!(store.count_all().unwrap(), 3);

    // Enable the sweep and run again.
    let settings = Settings::new(db.clone());
    settings.set("auto_delete_enabled", "true").unwrap();
    settings.set("auto_delete_days", "90").unwrap();

    let orchestrator = Orchestrator::with_adapters(
        db.clone(),
        fast_config(),
        Arc::new(driver()),
        Arc::new(MockAi::with_bundle(full_bundle(), 0.85)),
        AdapterRegistry::new(),
    );
    orchestrator.run(RunMode::Manual).await.unwrap();
    assert_eq!(store.count_all().unwrap(), 2);
}
