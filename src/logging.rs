use std::fs;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_LOG_DIR: &str = "logs";

/// Wires up the two log destinations of a scrape run: human-readable
/// progress on stderr (stdout carries only the run summary the admin
/// surface parses), and a daily-rotated JSON file so per-URL warnings can
/// be inspected after a scheduled run finished unattended.
pub fn init_logging() {
    let log_dir = std::env::var("SCRAPER_LOG_DIR").unwrap_or_else(|_| DEFAULT_LOG_DIR.into());
    let _ = fs::create_dir_all(&log_dir);

    let daily_file = tracing_appender::rolling::daily(&log_dir, "evenemang.log");
    let (file_writer, guard) = tracing_appender::non_blocking(daily_file);

    let filter = EnvFilter::from_default_env()
        .add_directive("evenemang_scraper=info".parse().unwrap());

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().with_writer(file_writer))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    // The non-blocking writer only flushes while its guard lives; leak it
    // so buffered lines survive until process exit.
    std::mem::forget(guard);
}
