mod common;

use common::MockSession;
use evenemang_scraper::browser::BrowserSession;
use evenemang_scraper::paginate::Paginator;

#[tokio::test(start_paused = true)]
async fn load_more_clicks_until_button_disappears() {
    let session = MockSession::new(
        "https://example.org/events",
        "<html><body></body></html>".into(),
    )
    .with_clickable("Visa fler", 3);

    let mut paginator = Paginator::new(10);
    let actions = paginator.run(&session).await.unwrap();
    assert_eq!(actions, 3);
}

#[tokio::test(start_paused = true)]
async fn paginator_is_idempotent_per_session() {
    let session = MockSession::new(
        "https://example.org/events",
        "<html><body></body></html>".into(),
    )
    .with_clickable("Visa fler", 3);

    let mut paginator = Paginator::new(10);
    assert_eq!(paginator.run(&session).await.unwrap(), 3);
    // Second invocation on the same session does nothing.
    assert_eq!(paginator.run(&session).await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn click_budget_is_capped() {
    let session = MockSession::new(
        "https://example.org/events",
        "<html><body></body></html>".into(),
    )
    .with_clickable("Load more", 100);

    // Requested depth beyond the ceiling clamps to 40.
    let mut paginator = Paginator::new(100);
    let actions = paginator.run(&session).await.unwrap();
    assert_eq!(actions, 40);
}

#[tokio::test(start_paused = true)]
async fn url_parameter_stepping_stops_on_static_content() {
    let session = MockSession::new(
        "https://example.org/events?page=1",
        "<html><body>samma sida</body></html>".into(),
    );

    let mut paginator = Paginator::new(10);
    // Content never changes, so stepping detects no new pages.
    let actions = paginator.run(&session).await.unwrap();
    assert_eq!(actions, 0);
    // But the strategy did try page 2.
    assert_eq!(
        session.current_url().await.unwrap(),
        "https://example.org/events?page=2"
    );
}

#[tokio::test(start_paused = true)]
async fn next_label_walking() {
    let session = MockSession::new(
        "https://example.org/program",
        "<html><body></body></html>".into(),
    )
    .with_clickable("Nästa", 2);

    let mut paginator = Paginator::new(10);
    assert_eq!(paginator.run(&session).await.unwrap(), 2);
}
