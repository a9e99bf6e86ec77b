use crate::error::{Result, ScraperError};
use serde::Deserialize;
use std::fs;
use std::path::Path;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Runtime configuration. Every key has a default so the binary runs with
/// no config file at all; unknown keys in `config.toml` are rejected at
/// startup.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RuntimeConfig {
    /// Parallel per-URL workers.
    pub concurrency: usize,
    /// Hard timeout for one URL's pipeline, in seconds.
    pub per_url_timeout_s: u64,
    /// Forward-looking window for kept events, in days.
    pub horizon_days: i64,
    /// Events older than this many days are swept when auto-delete is on.
    pub retention_days: i64,
    /// Upper bound on detail-page fetches per run.
    pub detail_fetch_cap_per_run: usize,
    /// Model name passed to the AI extractor.
    pub ai_model_hint: Option<String>,
    /// Path of the SQLite catalog.
    pub db_path: String,
    pub schedule: ScheduleConfig,
    /// Secret channel only: read from the environment, never from the file.
    #[serde(skip)]
    pub ai_api_key: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            per_url_timeout_s: 1800,
            horizon_days: 30,
            retention_days: 90,
            detail_fetch_cap_per_run: 200,
            ai_model_hint: None,
            db_path: "events.db".to_string(),
            schedule: ScheduleConfig::default(),
            ai_api_key: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ScheduleConfig {
    pub frequency: ScheduleFrequency,
    pub day: String,
    pub time_hhmm: String,
    pub custom_iso: Option<String>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            frequency: ScheduleFrequency::Weekly,
            day: "monday".to_string(),
            time_hhmm: "06:00".to_string(),
            custom_iso: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleFrequency {
    Daily,
    Weekly,
    Custom,
}

impl RuntimeConfig {
    /// Loads `config.toml` if present, overlays environment secrets, and
    /// validates. Any unrecognized key is a startup error.
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = if path.as_ref().exists() {
            let content = fs::read_to_string(&path).map_err(|e| {
                ScraperError::Config(format!(
                    "failed to read config file '{}': {e}",
                    path.as_ref().display()
                ))
            })?;
            toml::from_str::<RuntimeConfig>(&content)
                .map_err(|e| ScraperError::Config(format!("invalid config: {e}")))?
        } else {
            RuntimeConfig::default()
        };

        config.ai_api_key = std::env::var("AI_API_KEY").ok().filter(|k| !k.is_empty());
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(ScraperError::Config("concurrency must be >= 1".into()));
        }
        if self.per_url_timeout_s == 0 {
            return Err(ScraperError::Config("per_url_timeout_s must be >= 1".into()));
        }
        if self.horizon_days <= 0 || self.retention_days <= 0 {
            return Err(ScraperError::Config(
                "horizon_days and retention_days must be positive".into(),
            ));
        }
        self.schedule.validate()
    }
}

impl ScheduleConfig {
    fn validate(&self) -> Result<()> {
        let hhmm = self.time_hhmm.as_bytes();
        let well_formed = hhmm.len() == 5
            && hhmm[2] == b':'
            && hhmm.iter().enumerate().all(|(i, b)| i == 2 || b.is_ascii_digit());
        if !well_formed {
            return Err(ScraperError::Config(format!(
                "schedule.time_hhmm '{}' is not HH:MM",
                self.time_hhmm
            )));
        }
        if self.frequency == ScheduleFrequency::Custom && self.custom_iso.is_none() {
            return Err(ScraperError::Config(
                "schedule.frequency = \"custom\" requires schedule.custom_iso".into(),
            ));
        }
        Ok(())
    }
}
