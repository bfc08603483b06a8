//! Gmail API response normalization
//!
//! Converts Gmail API responses to provider-neutral [`FetchedMessage`]s:
//! top-level headers plus every leaf part with its body base64-decoded.

use anyhow::{Context, Result};
use base64::prelude::*;

use super::api::{GmailMessage, MessageBody, MessagePart as ApiPart, MessagePayload};
use crate::models::{FetchedMessage, Header, MessageId, MessagePart};

/// Normalize a Gmail API message
pub fn normalize_message(gmail_msg: GmailMessage) -> Result<FetchedMessage> {
    let payload = gmail_msg
        .payload
        .as_ref()
        .with_context(|| format!("Message {} has no payload", gmail_msg.id))?;

    let headers = payload
        .headers
        .as_ref()
        .map(|hs| {
            hs.iter()
                .map(|h| Header::new(&h.name, &h.value))
                .collect()
        })
        .unwrap_or_default();

    let mut parts = Vec::new();
    collect_payload_parts(payload, &mut parts);

    Ok(FetchedMessage {
        id: MessageId::new(gmail_msg.id),
        headers,
        parts,
    })
}

/// Collect leaf parts from the payload, or the payload body itself for
/// single-part messages
fn collect_payload_parts(payload: &MessagePayload, out: &mut Vec<MessagePart>) {
    match &payload.parts {
        Some(parts) if !parts.is_empty() => collect_parts(parts, out),
        _ => {
            if let Some(part) = leaf_part(payload.mime_type.as_deref(), payload.body.as_ref()) {
                out.push(part);
            }
        }
    }
}

/// Recursively flatten message parts in document order
fn collect_parts(parts: &[ApiPart], out: &mut Vec<MessagePart>) {
    for part in parts {
        if let Some(nested) = &part.parts
            && !nested.is_empty()
        {
            collect_parts(nested, out);
            continue;
        }

        // Attachments carry an attachmentId instead of inline data
        if part.filename.as_deref().is_some_and(|f| !f.is_empty()) {
            continue;
        }

        if let Some(leaf) = leaf_part(part.mime_type.as_deref(), part.body.as_ref()) {
            out.push(leaf);
        }
    }
}

fn leaf_part(mime_type: Option<&str>, body: Option<&MessageBody>) -> Option<MessagePart> {
    let data = body?.data.as_deref()?;
    let text = decode_base64_body(data)?;
    Some(MessagePart::new(mime_type.unwrap_or("text/plain"), text))
}

/// Decode base64-encoded body data
///
/// Gmail uses URL-safe base64 but padding can vary, so we try multiple decoders.
fn decode_base64_body(data: &str) -> Option<String> {
    use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE};

    let decoders: &[&base64::engine::GeneralPurpose] =
        &[&BASE64_URL_SAFE_NO_PAD, &URL_SAFE, &STANDARD, &STANDARD_NO_PAD];

    decoders
        .iter()
        .filter_map(|decoder| decoder.decode(data).ok())
        .find_map(|decoded| String::from_utf8(decoded).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::body_text;
    use crate::gmail::api::Header as ApiHeader;

    fn body(text: &str) -> Option<MessageBody> {
        Some(MessageBody {
            data: Some(BASE64_URL_SAFE_NO_PAD.encode(text)),
        })
    }

    fn part(mime: &str, text: &str) -> ApiPart {
        ApiPart {
            mime_type: Some(mime.to_string()),
            filename: Some(String::new()),
            headers: None,
            body: body(text),
            parts: None,
        }
    }

    fn message(payload: MessagePayload) -> GmailMessage {
        GmailMessage {
            id: "m1".to_string(),
            payload: Some(payload),
        }
    }

    #[test]
    fn test_single_part_message() {
        let msg = message(MessagePayload {
            headers: Some(vec![ApiHeader {
                name: "From".to_string(),
                value: "Ann <ann@example.com>".to_string(),
            }]),
            body: body("Yes, let's book a call"),
            parts: None,
            mime_type: Some("text/plain".to_string()),
        });

        let fetched = normalize_message(msg).unwrap();
        assert_eq!(fetched.sender().unwrap().email, "ann@example.com");
        assert_eq!(fetched.parts.len(), 1);
        assert_eq!(fetched.parts[0].body, "Yes, let's book a call");
    }

    #[test]
    fn test_nested_multipart_is_flattened() {
        let alternative = ApiPart {
            mime_type: Some("multipart/alternative".to_string()),
            filename: None,
            headers: None,
            body: None,
            parts: Some(vec![
                part("text/plain", "plain body"),
                part("text/html", "<p>html body</p>"),
            ]),
        };
        let attachment = ApiPart {
            filename: Some("deck.pdf".to_string()),
            ..part("application/pdf", "%PDF")
        };

        let msg = message(MessagePayload {
            headers: None,
            body: None,
            parts: Some(vec![alternative, attachment]),
            mime_type: Some("multipart/mixed".to_string()),
        });

        let fetched = normalize_message(msg).unwrap();
        assert_eq!(fetched.parts.len(), 2);
        assert!(fetched.parts[1].is("text/html"));
        assert_eq!(body_text(&fetched).as_deref(), Some("plain body"));
    }

    #[test]
    fn test_missing_payload_is_error() {
        let msg = GmailMessage {
            id: "m1".to_string(),
            payload: None,
        };
        assert!(normalize_message(msg).is_err());
    }

    #[test]
    fn test_decode_base64_body() {
        // "Hello, World!" in base64url
        let encoded = "SGVsbG8sIFdvcmxkIQ";
        let decoded = decode_base64_body(encoded);
        assert_eq!(decoded, Some("Hello, World!".to_string()));
    }
}
