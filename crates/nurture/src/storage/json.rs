//! JSON file storage
//!
//! Two pretty-printed documents in the data directory:
//!
//! ```text
//! lead_tracking.json   { "<email>": { "status": ..., "notes": [...] }, ... }
//! sync_state.json      { "last_checked_iso": ..., "processed_message_ids": [...] }
//! ```
//!
//! Both documents are written to temp files before either is renamed into
//! place, so a serialization or write failure leaves the previous pair
//! untouched.

use anyhow::{Context, Result};
use log::debug;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use super::{LeadStore, Snapshot};
use crate::models::{LeadEmail, LeadRecord, SyncState};

/// Lead tracking filename in the data directory
pub const LEADS_FILE: &str = "lead_tracking.json";

/// Sync state filename in the data directory
pub const SYNC_STATE_FILE: &str = "sync_state.json";

/// File-backed [`LeadStore`]
pub struct JsonFileStore {
    leads_path: PathBuf,
    sync_path: PathBuf,
    /// Serializes saves from this process
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Store using the standard filenames under `dir`
    pub fn new(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self::with_paths(dir.join(LEADS_FILE), dir.join(SYNC_STATE_FILE))
    }

    pub fn with_paths(leads_path: PathBuf, sync_path: PathBuf) -> Self {
        Self {
            leads_path,
            sync_path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn leads_path(&self) -> &Path {
        &self.leads_path
    }

    pub fn sync_path(&self) -> &Path {
        &self.sync_path
    }
}

impl LeadStore for JsonFileStore {
    fn load(&self) -> Result<Snapshot> {
        let leads: BTreeMap<LeadEmail, LeadRecord> =
            ::config::load_json_file_opt(&self.leads_path)
                .context("Failed to load lead tracking")?
                .unwrap_or_default();
        let sync: SyncState = ::config::load_json_file_opt(&self.sync_path)
            .context("Failed to load sync state")?
            .unwrap_or_default();

        debug!(
            "Loaded {} lead record(s) and {} processed id(s)",
            leads.len(),
            sync.processed_len()
        );
        Ok(Snapshot { leads, sync })
    }

    fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let leads = ::config::prepare_json_file(&self.leads_path, &snapshot.leads)
            .context("Failed to prepare lead tracking")?;
        let sync = ::config::prepare_json_file(&self.sync_path, &snapshot.sync)
            .context("Failed to prepare sync state")?;

        leads.commit().context("Failed to save lead tracking")?;
        sync.commit().context("Failed to save sync state")?;

        debug!(
            "Saved {} lead record(s) to {}",
            snapshot.leads.len(),
            self.leads_path.display()
        );
        Ok(())
    }
}
