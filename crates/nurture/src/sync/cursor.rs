//! Sync cursor over [`SyncState`]
//!
//! Produces the query window for the next poll and filters out messages
//! already consumed. The provider's time filter is coarse, so consecutive
//! windows may overlap; the processed-id set absorbs the overlap.

use chrono::{DateTime, Utc};
use std::collections::HashSet;

use crate::models::{MessageId, SyncState};
use crate::source::InboxQuery;

/// Checkpoint of what has already been examined, plus its bounds
#[derive(Debug, Clone)]
pub struct SyncCursor {
    state: SyncState,
    cap: usize,
    initial_window_days: u32,
}

impl SyncCursor {
    pub fn new(state: SyncState, cap: usize, initial_window_days: u32) -> Self {
        Self {
            state,
            cap: cap.max(1),
            initial_window_days: initial_window_days.max(1),
        }
    }

    /// Query for the next poll
    ///
    /// Anchored at the watermark, or a short recent window before the first
    /// successful poll.
    pub fn next_query(&self) -> InboxQuery {
        match self.state.last_checked {
            Some(watermark) => InboxQuery::After(watermark),
            None => InboxQuery::NewerThanDays(self.initial_window_days),
        }
    }

    /// False iff the id has already been processed
    pub fn should_process(&self, id: &MessageId) -> bool {
        !self.state.contains(id)
    }

    /// Advance the watermark and remember `seen`
    ///
    /// Called once after the full page loop. The set is then truncated to
    /// the cap, evicting the oldest ids first. Returns the number evicted.
    pub fn commit(
        &mut self,
        watermark: DateTime<Utc>,
        seen: impl IntoIterator<Item = MessageId>,
    ) -> usize {
        // Never move the watermark backwards
        if self.state.last_checked.is_none_or(|current| watermark > current) {
            self.state.last_checked = Some(watermark);
        }
        for id in seen {
            self.state.push(id);
        }
        self.state.truncate_to(self.cap)
    }

    /// Remember `seen` without moving the watermark
    ///
    /// Used when a poll was cut short: the same window is searched again
    /// next cycle and the ids already applied must not be applied twice.
    pub fn remember(&mut self, seen: impl IntoIterator<Item = MessageId>) -> usize {
        for id in seen {
            self.state.push(id);
        }
        self.state.truncate_to(self.cap)
    }

    pub fn watermark(&self) -> Option<DateTime<Utc>> {
        self.state.last_checked
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    pub fn into_state(self) -> SyncState {
        self.state
    }
}

/// Ids seen during one poll, in first-seen order
#[derive(Debug, Default)]
pub struct SeenIds {
    order: Vec<MessageId>,
    index: HashSet<MessageId>,
}

impl SeenIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the id was already seen in this poll
    pub fn insert(&mut self, id: MessageId) -> bool {
        if !self.index.insert(id.clone()) {
            return false;
        }
        self.order.push(id);
        true
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.index.contains(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl IntoIterator for SeenIds {
    type Item = MessageId;
    type IntoIter = std::vec::IntoIter<MessageId>;

    fn into_iter(self) -> Self::IntoIter {
        self.order.into_iter()
    }
}
