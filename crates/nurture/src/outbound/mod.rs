//! Outbound mail
//!
//! - `templates`: fills the configured templates for a lead
//! - `compose`: builds the RFC 5322 text handed to the message source

mod compose;
mod templates;

pub use compose::{Attachment, OutgoingMessage};
pub use templates::{RenderedTemplate, TemplateKind, render_placeholders};
