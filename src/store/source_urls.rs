use crate::db::{db_err, Database};
use crate::error::Result;
use crate::types::SourceUrl;
use rusqlite::Row;

/// CRUD over the configured ingestion targets.
#[derive(Clone)]
pub struct SourceUrls {
    db: Database,
}

impl SourceUrls {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn list(&self) -> Result<Vec<SourceUrl>> {
        let conn = self.db.lock();
        let mut stmt = conn
            .prepare("SELECT id, url, name, enabled FROM scraping_urls ORDER BY name")
            .map_err(db_err)?;
        let rows = stmt.query_map([], map_row).map_err(db_err)?;
        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(db_err)
    }

    pub fn enabled(&self) -> Result<Vec<SourceUrl>> {
        let conn = self.db.lock();
        let mut stmt = conn
            .prepare("SELECT id, url, name, enabled FROM scraping_urls WHERE enabled = 1 ORDER BY id")
            .map_err(db_err)?;
        let rows = stmt.query_map([], map_row).map_err(db_err)?;
        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(db_err)
    }

    /// Returns false when the URL already exists.
    pub fn add(&self, url: &str, name: &str) -> Result<bool> {
        let conn = self.db.lock();
        match conn.execute(
            "INSERT INTO scraping_urls (url, name, enabled) VALUES (?1, ?2, 1)",
            rusqlite::params![url, name],
        ) {
            Ok(_) => Ok(true),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Ok(false)
            }
            Err(e) => Err(db_err(e)),
        }
    }

    pub fn set_enabled(&self, id: i64, enabled: bool) -> Result<bool> {
        let conn = self.db.lock();
        let changed = conn
            .execute(
                "UPDATE scraping_urls SET enabled = ?1 WHERE id = ?2",
                rusqlite::params![enabled as i64, id],
            )
            .map_err(db_err)?;
        Ok(changed > 0)
    }

    pub fn remove(&self, id: i64) -> Result<bool> {
        let conn = self.db.lock();
        let deleted = conn
            .execute("DELETE FROM scraping_urls WHERE id = ?1", rusqlite::params![id])
            .map_err(db_err)?;
        Ok(deleted > 0)
    }
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<SourceUrl> {
    Ok(SourceUrl {
        id: row.get(0)?,
        url: row.get(1)?,
        name: row.get(2)?,
        enabled: row.get::<_, i64>(3)? != 0,
    })
}
