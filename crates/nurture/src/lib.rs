//! Nurture crate - Business logic for lead nurturing
//!
//! This crate provides the platform-independent engine:
//! - Domain models (Lead, LeadBook, SyncState, FetchedMessage)
//! - Reply classification and the lead state machine
//! - Follow-up scheduling and outbound message composition
//! - Message source trait with Gmail and in-memory implementations
//! - Lead store trait with JSON file and in-memory implementations
//! - Cycle orchestration, the background loop and its control surface
//!
//! Everything is synchronous. Network calls block the calling thread and
//! the loop runs on a dedicated worker thread.

pub mod classify;
pub mod config;
pub mod contacts;
pub mod control;
pub mod engine;
pub mod error;
pub mod followup;
pub mod gmail;
pub mod logging;
pub mod models;
pub mod outbound;
pub mod report;
pub mod runner;
pub mod source;
pub mod storage;
pub mod sync;

pub use classify::{Outcome, classify};
pub use config::{ConfigHandle, GmailCredentials, NurtureConfig};
pub use contacts::{CONTACTS_FILE, ContactSource, CsvContactSource, StaticContacts};
pub use control::{ControlRequest, ControlResponse, ControlSurface};
pub use engine::{CycleOutcome, NurtureEngine, OutreachStats};
pub use error::{NurtureError, SourceError};
pub use followup::{FollowUpStats, due_follow_up, run_follow_ups};
pub use gmail::{GmailAuth, GmailClient};
pub use logging::{init_logging, recent_logs};
pub use models::{
    Contact, EmailAddress, FetchedMessage, Lead, LeadBook, LeadEmail, LeadRecord, LeadStatus,
    MessageId, SyncState,
};
pub use report::LeadReport;
pub use runner::{CancellationToken, NurtureRunner, RunnerStatus, backoff_delay};
pub use source::{InMemoryMessageSource, InboxQuery, MessageSource, SearchPage};
pub use storage::{InMemoryLeadStore, JsonFileStore, LeadStore, Snapshot};
pub use sync::{ReplySyncStats, SyncCursor, sync_replies};
