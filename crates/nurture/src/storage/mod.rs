//! Persistence for lead tracking and sync state
//!
//! Load-all/save-all snapshots behind the [`LeadStore`] trait, so the engine
//! can run against JSON files on disk or an in-memory store in tests.

mod json;
mod memory;
mod traits;

pub use json::{JsonFileStore, LEADS_FILE, SYNC_STATE_FILE};
pub use memory::InMemoryLeadStore;
pub use traits::{LeadStore, Snapshot};
