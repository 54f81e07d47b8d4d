//! Client-side backend for the Field Schedule application: the sled
//! entity store with profile isolation, the stream client for the
//! scheduling service, and the orchestrator driving end-to-end runs.

use std::path::PathBuf;

use once_cell::sync::Lazy;

pub mod client;
pub mod orchestrator;
pub mod profile;
pub mod store;

pub use orchestrator::{Orchestrator, RunOptions, RunSummary};
pub use store::{EntityStore, SledStore, StoreError};

static DATA_DIR: Lazy<PathBuf> = Lazy::new(|| {
  dirs::data_dir()
    .unwrap_or_else(|| PathBuf::from("."))
    .join("field-schedule")
});

/// Default on-disk location of the entity store.
pub fn default_db_path() -> PathBuf {
  DATA_DIR.join("store")
}

/// Whether the destructive dev-only reset is enabled
/// (`HAS_DB_RESET_BUTTON`).
pub fn db_reset_enabled() -> bool {
  std::env::var("HAS_DB_RESET_BUTTON")
    .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
    .unwrap_or(false)
}
