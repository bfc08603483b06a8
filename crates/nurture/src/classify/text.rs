//! Lossy plain-text extraction from message parts
//!
//! This is not a markup parser. Tags are removed with a regular expression,
//! `<script>`/`<style>` blocks are dropped, a handful of common entities are
//! decoded and whitespace is collapsed. Good enough for keyword matching,
//! not for display.

use regex::Regex;
use std::sync::LazyLock;

use crate::models::{FetchedMessage, MessagePart};

static SCRIPT_STYLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style)\b[^>]*>.*?</(script|style)\s*>").expect("valid regex")
});

static BLOCK_BREAK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<\s*(br|/p|/div|/li|/tr|/h[1-6])\b[^>]*>").expect("valid regex")
});

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid regex"));

static SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t\r\f]+").expect("valid regex"));

static BLANK_LINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n+").expect("valid regex"));

/// Body text of a message for classification
///
/// Prefers the first non-empty `text/plain` part. Falls back to the first
/// `text/html` part with markup stripped. Returns `None` when neither
/// yields any text.
pub fn body_text(message: &FetchedMessage) -> Option<String> {
    body_text_from_parts(&message.parts)
}

pub fn body_text_from_parts(parts: &[MessagePart]) -> Option<String> {
    if let Some(plain) = parts
        .iter()
        .filter(|p| p.is("text/plain"))
        .map(|p| p.body.trim())
        .find(|b| !b.is_empty())
    {
        return Some(plain.to_string());
    }

    parts
        .iter()
        .filter(|p| p.is("text/html"))
        .map(|p| strip_markup(&p.body))
        .find(|b| !b.is_empty())
}

/// Best-effort removal of HTML markup
pub fn strip_markup(html: &str) -> String {
    let text = SCRIPT_STYLE.replace_all(html, " ");
    let text = BLOCK_BREAK.replace_all(&text, "\n");
    let text = TAG.replace_all(&text, " ");
    let text = decode_entities(&text);
    let text = SPACES.replace_all(&text, " ");
    let text = BLANK_LINES.replace_all(&text, "\n");

    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Decode the entities that commonly appear in mail bodies
fn decode_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
