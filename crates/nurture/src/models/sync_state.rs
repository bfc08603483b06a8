//! Sync state tracking for incremental reply polling

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};

use super::timestamp;
use super::MessageId;

/// Checkpoint of what has already been examined
///
/// Persisted separately from the leads. One per engine instance.
/// `processed_ids` keeps insertion order so the oldest ids are evicted
/// first when the set is truncated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "SyncStateDoc", into = "SyncStateDoc")]
pub struct SyncState {
    /// Start time of the most recent successful poll
    pub last_checked: Option<DateTime<Utc>>,
    processed_ids: VecDeque<MessageId>,
    index: HashSet<MessageId>,
}

/// On-disk shape of [`SyncState`]
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct SyncStateDoc {
    #[serde(with = "timestamp::iso_opt")]
    last_checked_iso: Option<DateTime<Utc>>,
    processed_message_ids: Vec<MessageId>,
}

impl From<SyncStateDoc> for SyncState {
    fn from(doc: SyncStateDoc) -> Self {
        let mut state = SyncState {
            last_checked: doc.last_checked_iso,
            ..Default::default()
        };
        for id in doc.processed_message_ids {
            state.push(id);
        }
        state
    }
}

impl From<SyncState> for SyncStateDoc {
    fn from(state: SyncState) -> Self {
        SyncStateDoc {
            last_checked_iso: state.last_checked,
            processed_message_ids: state.processed_ids.into_iter().collect(),
        }
    }
}

impl SyncState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.index.contains(id)
    }

    /// Processed ids, oldest first
    pub fn processed_ids(&self) -> impl Iterator<Item = &MessageId> {
        self.processed_ids.iter()
    }

    pub fn processed_len(&self) -> usize {
        self.processed_ids.len()
    }

    /// Append an id unless already present. Returns whether it was added.
    pub fn push(&mut self, id: MessageId) -> bool {
        if !self.index.insert(id.clone()) {
            return false;
        }
        self.processed_ids.push_back(id);
        true
    }

    /// Evict the oldest ids until at most `cap` remain
    pub fn truncate_to(&mut self, cap: usize) -> usize {
        let mut evicted = 0;
        while self.processed_ids.len() > cap {
            if let Some(oldest) = self.processed_ids.pop_front() {
                self.index.remove(&oldest);
                evicted += 1;
            }
        }
        evicted
    }
}
