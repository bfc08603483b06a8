//! Message source abstraction
//!
//! The engine talks to the mail provider only through [`MessageSource`]:
//! paginated search, fetch by id, and send. Gmail is one implementation;
//! [`InMemoryMessageSource`] backs tests and dry runs.

mod memory;

pub use memory::{InMemoryMessageSource, SentMessage};

use chrono::{DateTime, Utc};

use crate::error::SourceError;
use crate::models::{FetchedMessage, MessageId};

/// One page of search results
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPage {
    pub message_ids: Vec<MessageId>,
    pub next_page_token: Option<String>,
}

/// Time-bounded inbox query
///
/// Rendered to provider syntax by [`InboxQuery::to_provider_query`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboxQuery {
    /// Messages received after this instant (second granularity)
    After(DateTime<Utc>),
    /// Messages received within the last N days
    NewerThanDays(u32),
}

impl InboxQuery {
    /// Gmail-style query string, e.g. `in:inbox after:1700000000`
    pub fn to_provider_query(&self) -> String {
        match self {
            Self::After(ts) => format!("in:inbox after:{}", ts.timestamp()),
            Self::NewerThanDays(days) => format!("in:inbox newer_than:{}d", days),
        }
    }

    /// Whether a message received at `received_at` falls inside the window
    pub fn matches(&self, received_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self {
            Self::After(ts) => received_at.timestamp() > ts.timestamp(),
            Self::NewerThanDays(days) => received_at > now - chrono::Duration::days(*days as i64),
        }
    }
}

impl std::fmt::Display for InboxQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_provider_query())
    }
}

/// Narrow interface to the mail provider
///
/// Implementations must be usable from the loop thread and from control
/// requests, hence `Send + Sync`.
pub trait MessageSource: Send + Sync {
    /// List message ids matching `query`, one page at a time
    fn search(
        &self,
        query: &InboxQuery,
        page_token: Option<&str>,
    ) -> Result<SearchPage, SourceError>;

    /// Fetch headers and decoded body parts of a message
    fn fetch(&self, id: &MessageId) -> Result<FetchedMessage, SourceError>;

    /// Send a complete RFC 5322 message. Returns the provider id.
    fn send(&self, raw_message: &str) -> Result<MessageId, SourceError>;

    /// Address of the authenticated mailbox, if the provider knows it
    fn account_address(&self) -> Result<Option<String>, SourceError> {
        Ok(None)
    }
}
