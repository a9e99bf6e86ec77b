mod common;

use chrono::{Duration, Local};
use common::{full_bundle, listing_html, swedish_date, Card, MockAi};
use evenemang_scraper::ai::AiEventRecord;
use evenemang_scraper::discover::{Discoverer, Discovery};
use evenemang_scraper::extract::extract_with_bundle;
use evenemang_scraper::types::SelectorBundle;
use std::sync::atomic::Ordering;

fn sample_page() -> String {
    let date = swedish_date(Local::now().date_naive() + Duration::days(5));
    listing_html(&[
        Card::new("Sagostund", &date, "10:00"),
        Card::new("Babyrytmik", &date, "11:00"),
        Card::new("Slöjdverkstad", &date, "13:00"),
    ])
}

#[tokio::test]
async fn high_confidence_bundle_is_trusted() {
    let html = sample_page();
    let ai = MockAi::with_bundle(full_bundle(), 0.85);
    let discoverer = Discoverer::new(&ai);

    let (discovery, warnings) = discoverer
        .discover("https://example.org/events", &html)
        .await
        .unwrap();

    let Discovery::Trusted { bundle, confidence } = discovery else {
        panic!("expected trusted discovery");
    };
    assert!(confidence >= 0.6);
    assert!(warnings.is_empty());

    // Round trip: a trusted bundle must extract at least one event from
    // the HTML it was validated against.
    let records = extract_with_bundle(&html, &bundle).unwrap();
    assert!(!records.is_empty());
    assert_eq!(records[0].event_name, "Sagostund");
}

#[tokio::test]
async fn missing_name_selector_does_not_block_trust() {
    let html = sample_page();
    // Six of the seven required fields resolve (0.857): still above the
    // trust threshold, so the bundle stays cacheable.
    let mut bundle = full_bundle();
    bundle.items.remove("event_name");

    let ai = MockAi::with_bundle(bundle, 0.9);
    let discoverer = Discoverer::new(&ai);
    let (discovery, warnings) = discoverer
        .discover("https://example.org/events", &html)
        .await
        .unwrap();

    let Discovery::Trusted { confidence, .. } = discovery else {
        panic!("expected trusted discovery");
    };
    assert!(confidence >= 0.6);
    assert!(warnings.is_empty());
}

#[tokio::test]
async fn partially_working_bundle_is_untrusted() {
    let html = sample_page();
    // Only three of the seven required fields resolve.
    let mut bundle = full_bundle();
    bundle.items.remove("location");
    bundle.items.remove("description");
    bundle.items.remove("target_group");
    bundle.items.remove("status");

    let ai = MockAi::with_bundle(bundle, 0.9);
    let discoverer = Discoverer::new(&ai);
    let (discovery, warnings) = discoverer
        .discover("https://example.org/events", &html)
        .await
        .unwrap();

    let Discovery::Untrusted { confidence, .. } = discovery else {
        panic!("expected untrusted discovery");
    };
    assert!((0.3..0.6).contains(&confidence));
    assert_eq!(warnings.len(), 1);
}

#[tokio::test]
async fn hopeless_bundle_falls_back_to_event_list() {
    let html = sample_page();
    let mut ai = MockAi::with_bundle(
        SelectorBundle {
            container: "li.does-not-exist".into(),
            items: Default::default(),
        },
        0.9,
    );
    ai.events = vec![AiEventRecord {
        event_name: "Sagostund".into(),
        date_iso: Some("2025-12-24".into()),
        ..Default::default()
    }];

    let discoverer = Discoverer::new(&ai);
    let (discovery, warnings) = discoverer
        .discover("https://example.org/events", &html)
        .await
        .unwrap();

    let Discovery::EventList(records) = discovery else {
        panic!("expected event-list fallback");
    };
    assert_eq!(records.len(), 1);
    assert!(!warnings.is_empty());
    assert_eq!(ai.extract_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn transport_errors_get_one_retry() {
    let html = sample_page();
    let ai = MockAi::with_bundle(full_bundle(), 0.85).failing_transport(1);
    let discoverer = Discoverer::new(&ai);

    let (discovery, _) = discoverer
        .discover("https://example.org/events", &html)
        .await
        .unwrap();

    assert!(matches!(discovery, Discovery::Trusted { .. }));
    assert_eq!(ai.discover_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn persistent_transport_failure_falls_back_to_event_list() {
    let html = sample_page();
    let mut ai = MockAi::with_bundle(full_bundle(), 0.85).failing_transport(2);
    ai.events = vec![AiEventRecord {
        event_name: "Reservlista".into(),
        date_iso: Some("2025-12-24".into()),
        ..Default::default()
    }];

    let discoverer = Discoverer::new(&ai);
    let (discovery, warnings) = discoverer
        .discover("https://example.org/events", &html)
        .await
        .unwrap();

    // Both bundle attempts failed; the one-shot extractor saved the run.
    assert!(matches!(discovery, Discovery::EventList(_)));
    assert_eq!(ai.discover_calls.load(Ordering::SeqCst), 2);
    assert!(!warnings.is_empty());
}
