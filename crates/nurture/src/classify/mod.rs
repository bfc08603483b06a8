//! Reply classification
//!
//! - `keywords`: maps body text to an [`Outcome`]
//! - `text`: pulls classifiable text out of a multi-part message

mod keywords;
pub mod text;

pub use keywords::{Outcome, classify};
pub use text::{body_text, strip_markup};
