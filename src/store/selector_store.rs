use crate::db::{db_err, Database};
use crate::error::{Result, ScraperError};
use crate::types::{ItemSelector, SelectorBundle, SelectorConfig};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::debug;
use url::Url;

/// Persistent cache of per-(domain, url-pattern) selector bundles.
#[derive(Clone)]
pub struct SelectorStore {
    db: Database,
}

impl SelectorStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Longest-pattern match for the URL's path, falling back to any
    /// bundle stored for the bare domain.
    pub fn get(&self, url: &str) -> Result<Option<SelectorBundle>> {
        let (domain, path) = split_domain_path(url)?;
        let conn = self.db.lock();
        let mut stmt = conn
            .prepare(
                "SELECT url_pattern, container_selector, item_selectors_json
                 FROM selector_configs WHERE domain = ?1",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(rusqlite::params![domain], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(db_err)?;

        let mut candidates: Vec<(String, String, String)> = Vec::new();
        for row in rows {
            candidates.push(row.map_err(db_err)?);
        }
        if candidates.is_empty() {
            return Ok(None);
        }

        let best = candidates
            .iter()
            .filter(|(pattern, _, _)| glob_match(pattern, &path))
            .max_by_key(|(pattern, _, _)| pattern.len())
            // Domain-only fallback: any bundle for the host.
            .or_else(|| candidates.first());

        match best {
            Some((pattern, container, items_json)) => {
                debug!("Selector bundle hit for {domain}{path} via pattern '{pattern}'");
                let items: BTreeMap<String, ItemSelector> = serde_json::from_str(items_json)?;
                Ok(Some(SelectorBundle {
                    container: container.clone(),
                    items,
                }))
            }
            None => Ok(None),
        }
    }

    /// Upsert keyed by the URL's (domain, path).
    pub fn put(&self, url: &str, bundle: &SelectorBundle) -> Result<()> {
        if bundle.container.trim().is_empty() {
            return Err(ScraperError::Config(
                "selector bundle needs a non-empty container selector".into(),
            ));
        }
        let (domain, path) = split_domain_path(url)?;
        let items_json = serde_json::to_string(&bundle.items)?;
        let conn = self.db.lock();
        conn.execute(
            "INSERT INTO selector_configs
                (domain, url_pattern, container_selector, item_selectors_json, last_updated)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(domain, url_pattern) DO UPDATE SET
                container_selector = excluded.container_selector,
                item_selectors_json = excluded.item_selectors_json,
                last_updated = excluded.last_updated",
            rusqlite::params![
                domain,
                path,
                bundle.container,
                items_json,
                Utc::now().to_rfc3339()
            ],
        )
        .map_err(db_err)?;
        debug!("Saved selector bundle for {domain}{path}");
        Ok(())
    }

    pub fn list_all(&self) -> Result<Vec<SelectorConfig>> {
        let conn = self.db.lock();
        let mut stmt = conn
            .prepare(
                "SELECT domain, url_pattern, container_selector, item_selectors_json, last_updated
                 FROM selector_configs ORDER BY domain, url_pattern",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .map_err(db_err)?;

        let mut configs = Vec::new();
        for row in rows {
            let (domain, url_pattern, container, items_json, last_updated) = row.map_err(db_err)?;
            let items: BTreeMap<String, ItemSelector> = serde_json::from_str(&items_json)?;
            configs.push(SelectorConfig {
                domain,
                url_pattern,
                bundle: SelectorBundle { container, items },
                last_updated: DateTime::parse_from_rfc3339(&last_updated)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
            });
        }
        Ok(configs)
    }

    pub fn delete(&self, url: &str) -> Result<bool> {
        let (domain, path) = split_domain_path(url)?;
        let conn = self.db.lock();
        let deleted = conn
            .execute(
                "DELETE FROM selector_configs WHERE domain = ?1 AND url_pattern = ?2",
                rusqlite::params![domain, path],
            )
            .map_err(db_err)?;
        Ok(deleted > 0)
    }
}

/// Splits a URL into (www-stripped host, trailing-slash-normalized path).
pub fn split_domain_path(url: &str) -> Result<(String, String)> {
    let parsed = Url::parse(url)?;
    let domain = parsed
        .host_str()
        .ok_or_else(|| ScraperError::Config(format!("URL without host: {url}")))?
        .trim_start_matches("www.")
        .to_string();
    let path = parsed.path().trim_end_matches('/').to_string();
    Ok((domain, path))
}

/// Glob match where `*` matches any substring of the path.
fn glob_match(pattern: &str, path: &str) -> bool {
    let pattern = pattern.trim_end_matches('/');
    let path = path.trim_end_matches('/');
    if !pattern.contains('*') {
        return pattern == path;
    }

    let parts: Vec<&str> = pattern.split('*').collect();
    let mut rest = path;
    for (i, part) in parts.iter().enumerate() {
        if i == 0 {
            if !rest.starts_with(part) {
                return false;
            }
            rest = &rest[part.len()..];
        } else if i == parts.len() - 1 {
            return part.is_empty() || rest.ends_with(part);
        } else if part.is_empty() {
            continue;
        } else {
            match rest.find(part) {
                Some(idx) => rest = &rest[idx + part.len()..],
                None => return false,
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_matches_substrings() {
        assert!(glob_match("/evenemang", "/evenemang"));
        assert!(glob_match("/evenemang/", "/evenemang"));
        assert!(glob_match("/evenemang/*", "/evenemang/idag"));
        assert!(glob_match("/*/kalender", "/sv/kalender"));
        assert!(glob_match("*", "/anything/at/all"));
        assert!(!glob_match("/evenemang", "/kalender"));
        assert!(!glob_match("/evenemang/*", "/kalender/idag"));
    }

    #[test]
    fn splits_domain_and_path() {
        let (domain, path) =
            split_domain_path("https://www.skansen.se/en/calendar/").unwrap();
        assert_eq!(domain, "skansen.se");
        assert_eq!(path, "/en/calendar");
    }
}
