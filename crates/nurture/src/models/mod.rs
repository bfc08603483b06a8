//! Domain models for lead nurturing

mod book;
mod contact;
mod lead;
mod message;
mod sync_state;
pub mod timestamp;

pub use book::LeadBook;
pub use contact::Contact;
pub use lead::{
    EXHAUSTED_NOTE, FollowUpEffect, Lead, LeadEmail, LeadRecord, LeadStatus, Note, ReplyEffect,
};
pub use message::{EmailAddress, FetchedMessage, Header, MessageId, MessagePart};
pub use sync_state::SyncState;
