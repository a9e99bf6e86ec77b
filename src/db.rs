use crate::error::{Result, ScraperError};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::info;

/// Busy-wait window for the single catalog file under contention.
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared handle to the embedded catalog. All stores clone this; writes
/// serialize behind the mutex, reads see committed state.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(&path)?;
        info!("Opened catalog at {}", path.as_ref().display());
        Self::from_connection(conn)
    }

    /// In-memory catalog for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        init_schema(&conn)?;
        seed_defaults(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        // A poisoned lock only means another thread panicked mid-call;
        // the connection itself is still usable.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Maps SQLite lock contention to the dedicated error kind so callers can
/// decide to retry; everything else stays a database error.
pub(crate) fn db_err(e: rusqlite::Error) -> ScraperError {
    if let rusqlite::Error::SqliteFailure(inner, _) = &e {
        if matches!(
            inner.code,
            rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
        ) {
            return ScraperError::StoreBusy(e.to_string());
        }
    }
    ScraperError::Db(e)
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_name TEXT NOT NULL,
            date_iso TEXT NOT NULL,
            event_url TEXT NOT NULL,
            end_date_iso TEXT,
            time TEXT,
            location TEXT,
            target_group_raw TEXT,
            target_group TEXT,
            status TEXT,
            booking_info TEXT,
            description TEXT,
            last_scraped TEXT NOT NULL,
            UNIQUE(event_name, date_iso, event_url)
        );
        CREATE TABLE IF NOT EXISTS selector_configs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            domain TEXT NOT NULL,
            url_pattern TEXT NOT NULL,
            container_selector TEXT NOT NULL,
            item_selectors_json TEXT NOT NULL,
            last_updated TEXT NOT NULL,
            UNIQUE(domain, url_pattern)
        );
        CREATE TABLE IF NOT EXISTS scraping_urls (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            url TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            enabled INTEGER NOT NULL DEFAULT 1
        );
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT
        );
        CREATE TABLE IF NOT EXISTS scraping_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            type TEXT NOT NULL,
            status TEXT NOT NULL,
            events_found INTEGER NOT NULL DEFAULT 0,
            failures INTEGER NOT NULL DEFAULT 0,
            warnings TEXT
        );",
    )
    .map_err(db_err)
}

fn seed_defaults(conn: &Connection) -> Result<()> {
    let url_count: i64 = conn
        .query_row("SELECT COUNT(*) FROM scraping_urls", [], |row| row.get(0))
        .map_err(db_err)?;
    if url_count == 0 {
        let defaults = [
            ("https://biblioteket.stockholm.se/evenemang", "Biblioteket Stockholm"),
            ("https://biblioteket.stockholm.se/forskolor", "Forskolor"),
            ("https://www.skansen.se/en/calendar/", "Skansen"),
            ("https://www.modernamuseet.se/stockholm/sv/kalender/", "Moderna museet"),
            ("https://armemuseum.se/kalender/", "Armémuseum"),
            ("https://www.tekniskamuseet.se/pa-gang/", "Tekniska museet"),
        ];
        for (url, name) in defaults {
            conn.execute(
                "INSERT INTO scraping_urls (url, name, enabled) VALUES (?1, ?2, 1)",
                rusqlite::params![url, name],
            )
            .map_err(db_err)?;
        }
    }

    let settings_count: i64 = conn
        .query_row("SELECT COUNT(*) FROM settings", [], |row| row.get(0))
        .map_err(db_err)?;
    if settings_count == 0 {
        let defaults = [
            ("schedule_frequency", "weekly"),
            ("schedule_day", "monday"),
            ("schedule_time", "06:00"),
            ("date_range_days", "30"),
            ("auto_delete_enabled", "false"),
            ("auto_delete_days", "90"),
            ("email_enabled", "false"),
            ("email_address", ""),
            ("notify_on_complete", "true"),
            ("notify_on_failure", "true"),
            ("notify_weekly_summary", "false"),
        ];
        for (key, value) in defaults {
            conn.execute(
                "INSERT INTO settings (key, value) VALUES (?1, ?2)",
                rusqlite::params![key, value],
            )
            .map_err(db_err)?;
        }
    }
    Ok(())
}
