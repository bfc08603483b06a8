//! Contact list rows

use serde::{Deserialize, Serialize};

use super::LeadEmail;

/// One row of the contact list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub email: LeadEmail,
    pub first_name: String,
    pub company: String,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub bcc: Vec<String>,
    /// File paths, only used by the outbound sender
    #[serde(default)]
    pub attachments: Vec<String>,
}

impl Contact {
    pub fn new(email: &str, first_name: impl Into<String>, company: impl Into<String>) -> Self {
        Self {
            email: LeadEmail::new(email),
            first_name: first_name.into(),
            company: company.into(),
            cc: Vec::new(),
            bcc: Vec::new(),
            attachments: Vec::new(),
        }
    }
}
