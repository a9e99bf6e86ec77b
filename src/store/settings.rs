use crate::db::{db_err, Database};
use crate::error::Result;

/// Key/value settings shared with the admin surface.
#[derive(Clone)]
pub struct Settings {
    db: Database,
}

impl Settings {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.db.lock();
        match conn.query_row(
            "SELECT value FROM settings WHERE key = ?1",
            rusqlite::params![key],
            |row| row.get(0),
        ) {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.db.lock();
        conn.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
            rusqlite::params![key, value],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool> {
        Ok(self
            .get(key)?
            .map(|v| matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes"))
            .unwrap_or(default))
    }

    pub fn get_i64(&self, key: &str, default: i64) -> Result<i64> {
        Ok(self
            .get(key)?
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default))
    }

    pub fn all(&self) -> Result<Vec<(String, String)>> {
        let conn = self.db.lock();
        let mut stmt = conn
            .prepare("SELECT key, value FROM settings ORDER BY key")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get::<_, Option<String>>(1)?.unwrap_or_default())))
            .map_err(db_err)?;
        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(db_err)
    }
}
