use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScraperError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("browser error: {0}")]
    Browser(String),

    #[error("transient fetch error: {0}")]
    TransientFetch(String),

    #[error("stored selectors matched no containers on {0}")]
    SelectorMismatch(String),

    #[error("selector discovery confidence too low ({0:.2})")]
    DiscoveryLowConfidence(f64),

    #[error("AI transport error: {0}")]
    AiTransport(String),

    #[error("AI returned malformed response: {0}")]
    AiMalformedResponse(String),

    #[error("store busy: {0}")]
    StoreBusy(String),

    #[error("worker timed out after {0}s")]
    WorkerTimeout(u64),

    #[error("missing required field: {0}")]
    MissingField(String),
}

impl ScraperError {
    /// Errors worth one in-worker retry before the URL is marked failed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ScraperError::TransientFetch(_) | ScraperError::Http(_) | ScraperError::StoreBusy(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ScraperError>;
