//! Reply polling
//!
//! Safe to re-run after any failure: a message is applied at most once and
//! the watermark only moves after a complete poll.

mod cursor;
mod replies;

pub use cursor::{SeenIds, SyncCursor};
pub use replies::{ReplyContext, ReplySyncStats, sync_replies};
