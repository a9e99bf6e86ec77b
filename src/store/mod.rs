// Per-table stores over the shared catalog handle.
pub mod event_store;
pub mod run_log;
pub mod selector_store;
pub mod settings;
pub mod source_urls;

pub use event_store::{DateMode, EventQuery, EventStore};
pub use run_log::RunLogStore;
pub use selector_store::SelectorStore;
pub use settings::Settings;
pub use source_urls::SourceUrls;
