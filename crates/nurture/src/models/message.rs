//! Provider-neutral message shapes
//!
//! The engine only needs an id, the sender, a subject and the body parts of
//! an inbound message. Adapters decode transfer encodings before handing
//! parts over.

use serde::{Deserialize, Serialize};

/// Unique identifier for a message at the provider
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An email address with optional display name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailAddress {
    /// Display name (e.g., "John Doe")
    pub name: Option<String>,
    /// Email address (e.g., "john@example.com")
    pub email: String,
}

impl EmailAddress {
    /// Create a new email address with just the email
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            name: None,
            email: email.into(),
        }
    }

    /// Create a new email address with a display name
    pub fn with_name(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            email: email.into(),
        }
    }

    /// Parse an email address from a string like "John Doe <john@example.com>"
    pub fn parse(s: &str) -> Self {
        let s = s.trim();

        if let Some(angle_start) = s.rfind('<')
            && let Some(angle_end) = s.rfind('>')
            && angle_start < angle_end
        {
            let name = s[..angle_start].trim().trim_matches('"').trim();
            let email = s[angle_start + 1..angle_end].trim();
            return Self {
                name: if name.is_empty() {
                    None
                } else {
                    Some(name.to_string())
                },
                email: email.to_string(),
            };
        }

        Self {
            name: None,
            email: s.to_string(),
        }
    }

    /// Format the address for a message header
    pub fn display(&self) -> String {
        match &self.name {
            Some(name) => format!("{} <{}>", name, self.email),
            None => self.email.clone(),
        }
    }
}

/// Header name-value pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// One leaf body part, already decoded to text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePart {
    /// MIME type, e.g. "text/plain; charset=utf-8"
    pub mime_type: String,
    pub body: String,
}

impl MessagePart {
    pub fn new(mime_type: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            body: body.into(),
        }
    }

    /// Whether the part's MIME type is `essence`, ignoring parameters and case
    pub fn is(&self, essence: &str) -> bool {
        self.mime_type
            .split(';')
            .next()
            .is_some_and(|m| m.trim().eq_ignore_ascii_case(essence))
    }
}

/// A message as returned by `MessageSource::fetch`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchedMessage {
    pub id: MessageId,
    pub headers: Vec<Header>,
    /// Leaf parts in document order
    pub parts: Vec<MessagePart>,
}

impl FetchedMessage {
    pub fn new(id: impl Into<MessageId>) -> Self {
        Self {
            id: id.into(),
            headers: Vec::new(),
            parts: Vec::new(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push(Header::new(name, value));
        self
    }

    pub fn part(mut self, mime_type: &str, body: &str) -> Self {
        self.parts.push(MessagePart::new(mime_type, body));
        self
    }

    /// Get a header value by name (case-insensitive)
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// Parsed `From` header
    pub fn sender(&self) -> Option<EmailAddress> {
        self.header_value("From")
            .map(EmailAddress::parse)
            .filter(|a| !a.email.is_empty())
    }

    pub fn subject(&self) -> &str {
        self.header_value("Subject").unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_email_with_name() {
        let addr = EmailAddress::parse("John Doe <john@example.com>");
        assert_eq!(addr.name, Some("John Doe".to_string()));
        assert_eq!(addr.email, "john@example.com");
    }

    #[test]
    fn test_parse_email_with_quoted_name() {
        let addr = EmailAddress::parse("\"Doe, John\" <john@example.com>");
        assert_eq!(addr.name, Some("Doe, John".to_string()));
        assert_eq!(addr.email, "john@example.com");
    }

    #[test]
    fn test_parse_email_without_name() {
        let addr = EmailAddress::parse("john@example.com");
        assert_eq!(addr.name, None);
        assert_eq!(addr.email, "john@example.com");
    }

    #[test]
    fn test_display_with_name() {
        let addr = EmailAddress::with_name("John Doe", "john@example.com");
        assert_eq!(addr.display(), "John Doe <john@example.com>");
    }

    #[test]
    fn test_part_mime_matching() {
        let part = MessagePart::new("Text/Plain; charset=UTF-8", "hi");
        assert!(part.is("text/plain"));
        assert!(!part.is("text/html"));
    }

    #[test]
    fn test_header_lookup_case_insensitive() {
        let msg = FetchedMessage::new("m1")
            .header("FROM", "Ann <ann@example.com>")
            .header("Subject", "Re: hello");
        assert_eq!(msg.sender().unwrap().email, "ann@example.com");
        assert_eq!(msg.subject(), "Re: hello");
        assert_eq!(msg.header_value("cc"), None);
    }
}
