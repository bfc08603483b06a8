//! RFC 5322 message composition
//!
//! Produces the raw text handed to [`MessageSource::send`](crate::source::MessageSource::send).
//! Encoding, folding and multipart layout are left to `mail-builder`.

use anyhow::{Context, Result};
use mail_builder::MessageBuilder;
use mail_builder::headers::address::Address;
use std::path::Path;

use crate::error::SourceError;
use crate::models::EmailAddress;

/// A file attached to an outgoing message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

impl Attachment {
    /// Read an attachment from disk, guessing the content type from the
    /// extension
    pub fn from_path(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)
            .with_context(|| format!("Failed to read attachment {}", path.display()))?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("Attachment path has no file name: {}", path.display()))?;
        let content_type = guess_content_type(&filename).to_string();

        Ok(Self {
            filename,
            content_type,
            data,
        })
    }
}

fn guess_content_type(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
}

/// Builder for an outgoing plain-text message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub from: Option<EmailAddress>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<Attachment>,
}

impl OutgoingMessage {
    pub fn new(to: &str, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to: vec![to.to_string()],
            subject: subject.into(),
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn from(mut self, from: Option<EmailAddress>) -> Self {
        self.from = from;
        self
    }

    pub fn cc(mut self, cc: &[String]) -> Self {
        self.cc.extend(cc.iter().filter(|a| !a.trim().is_empty()).cloned());
        self
    }

    pub fn bcc(mut self, bcc: &[String]) -> Self {
        self.bcc.extend(bcc.iter().filter(|a| !a.trim().is_empty()).cloned());
        self
    }

    pub fn attach(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Render the message as RFC 5322 text
    ///
    /// Header values are flattened to a single line before encoding.
    pub fn to_rfc5322(&self) -> Result<String, SourceError> {
        let subject = flatten(&self.subject);
        let from_name = self
            .from
            .as_ref()
            .and_then(|f| f.name.as_deref())
            .map(|n| flatten(n.trim()))
            .filter(|n| !n.is_empty());

        let mut builder = MessageBuilder::new()
            .to(address_list(&self.to))
            .subject(subject.as_str())
            .text_body(self.body.as_str());

        if let Some(from) = &self.from {
            builder = builder.from(Address::new_address(from_name.as_deref(), from.email.as_str()));
        }
        if !self.cc.is_empty() {
            builder = builder.cc(address_list(&self.cc));
        }
        if !self.bcc.is_empty() {
            builder = builder.bcc(address_list(&self.bcc));
        }
        for attachment in &self.attachments {
            builder = builder.attachment(
                attachment.content_type.as_str(),
                attachment.filename.as_str(),
                attachment.data.as_slice(),
            );
        }

        builder
            .write_to_string()
            .map_err(|e| {
                SourceError::rejected("compose", format!("Failed to build message: {}", e))
            })
    }
}

fn address_list(addresses: &[String]) -> Address<'_> {
    Address::new_list(
        addresses
            .iter()
            .map(|a| Address::new_address(None::<&str>, a.trim()))
            .collect(),
    )
}

/// Header values must not carry line breaks
fn flatten(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}
