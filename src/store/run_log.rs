use crate::db::{db_err, Database};
use crate::error::Result;
use crate::types::{RunLog, RunMode, RunStatus};
use chrono::{DateTime, Duration, Utc};

/// Append-only log of orchestrator runs.
#[derive(Clone)]
pub struct RunLogStore {
    db: Database,
}

impl RunLogStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn add(
        &self,
        mode: RunMode,
        status: RunStatus,
        events_found: i64,
        failures: i64,
        warnings: &[String],
    ) -> Result<()> {
        let warnings_json = if warnings.is_empty() {
            None
        } else {
            Some(serde_json::to_string(warnings)?)
        };
        let conn = self.db.lock();
        conn.execute(
            "INSERT INTO scraping_logs (timestamp, type, status, events_found, failures, warnings)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                Utc::now().to_rfc3339(),
                mode.as_str(),
                status.as_str(),
                events_found,
                failures,
                warnings_json
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub fn list(&self, days: i64, status_filter: Option<&str>) -> Result<Vec<RunLog>> {
        let cutoff = (Utc::now() - Duration::days(days)).to_rfc3339();
        let conn = self.db.lock();

        let mut sql = String::from(
            "SELECT id, timestamp, type, status, events_found, failures, warnings
             FROM scraping_logs WHERE timestamp >= ?1",
        );
        if status_filter.is_some() {
            sql.push_str(" AND status = ?2");
        }
        sql.push_str(" ORDER BY timestamp DESC");

        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let map = |row: &rusqlite::Row<'_>| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, Option<String>>(6)?,
            ))
        };
        let rows = match status_filter {
            Some(status) => stmt
                .query_map(rusqlite::params![cutoff, status], map)
                .map_err(db_err)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(db_err)?,
            None => stmt
                .query_map(rusqlite::params![cutoff], map)
                .map_err(db_err)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(db_err)?,
        };

        let mut logs = Vec::with_capacity(rows.len());
        for (id, timestamp, mode, status, events_found, failures, warnings) in rows {
            logs.push(RunLog {
                id,
                timestamp: DateTime::parse_from_rfc3339(&timestamp)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
                mode,
                status,
                events_found,
                failures,
                warnings: warnings
                    .and_then(|w| serde_json::from_str(&w).ok())
                    .unwrap_or_default(),
            });
        }
        Ok(logs)
    }

    pub fn clear_older_than(&self, days: i64) -> Result<usize> {
        let cutoff = (Utc::now() - Duration::days(days)).to_rfc3339();
        let conn = self.db.lock();
        let deleted = conn
            .execute(
                "DELETE FROM scraping_logs WHERE timestamp < ?1",
                rusqlite::params![cutoff],
            )
            .map_err(db_err)?;
        Ok(deleted)
    }
}
