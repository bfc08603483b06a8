//! Storage trait definitions

use anyhow::Result;
use std::collections::BTreeMap;

use crate::models::{LeadEmail, LeadRecord, SyncState};

/// Everything the engine persists between cycles
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Tracking records keyed by lead email
    pub leads: BTreeMap<LeadEmail, LeadRecord>,
    pub sync: SyncState,
}

/// Trait for snapshot persistence
///
/// Implementations must never leave a half-written snapshot behind: either
/// the previous snapshot or the new one is readable after `save` returns,
/// whether it succeeded or not.
pub trait LeadStore: Send + Sync {
    /// Load the last saved snapshot. A store that was never written yields
    /// an empty snapshot.
    fn load(&self) -> Result<Snapshot>;

    /// Replace the stored snapshot
    fn save(&self, snapshot: &Snapshot) -> Result<()>;
}
