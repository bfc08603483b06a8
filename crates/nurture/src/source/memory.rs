//! In-memory message source
//!
//! Used by tests and by `--dry-run`. Holds a mailbox of inbound messages,
//! records everything sent, and can be told to fail sends or searches to
//! exercise the transient-error paths.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

use super::{InboxQuery, MessageSource, SearchPage};
use crate::error::SourceError;
use crate::models::{FetchedMessage, MessageId};

/// A message handed to [`MessageSource::send`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub id: MessageId,
    pub to: String,
    pub subject: String,
    pub raw: String,
}

impl SentMessage {
    fn parse(id: MessageId, raw: &str) -> Self {
        let mut to = String::new();
        let mut subject = String::new();
        for (name, value) in unfolded_headers(raw) {
            if name.eq_ignore_ascii_case("To") {
                to = bare_addresses(&value);
            } else if name.eq_ignore_ascii_case("Subject") {
                subject = value;
            }
        }
        Self {
            id,
            to,
            subject,
            raw: raw.to_string(),
        }
    }

    /// Unfolded value of the first header called `name`
    pub fn header(&self, name: &str) -> Option<String> {
        unfolded_headers(&self.raw)
            .into_iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }
}

/// Header fields up to the first blank line, continuation lines joined
fn unfolded_headers(raw: &str) -> Vec<(String, String)> {
    let mut headers: Vec<(String, String)> = Vec::new();
    for line in raw.lines() {
        if line.is_empty() {
            break;
        }
        if line.starts_with([' ', '\t']) {
            if let Some((_, value)) = headers.last_mut() {
                value.push(' ');
                value.push_str(line.trim());
            }
        } else if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }
    headers
}

/// `"Ann" <ann@acme.com>, <bob@acme.com>` -> `ann@acme.com, bob@acme.com`
fn bare_addresses(value: &str) -> String {
    value
        .split(',')
        .map(|part| {
            let part = part.trim();
            match (part.rfind('<'), part.rfind('>')) {
                (Some(open), Some(close)) if open < close => &part[open + 1..close],
                _ => part,
            }
        })
        .filter(|a| !a.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

struct StoredMessage {
    received_at: DateTime<Utc>,
    message: FetchedMessage,
}

/// In-memory implementation of [`MessageSource`]
pub struct InMemoryMessageSource {
    inbox: RwLock<Vec<StoredMessage>>,
    sent: RwLock<Vec<SentMessage>>,
    page_size: usize,
    /// Return every message regardless of the query window
    ignore_window: bool,
    failing_recipients: RwLock<HashSet<String>>,
    failing_searches: AtomicUsize,
    searches: AtomicUsize,
    fetches: AtomicUsize,
    account: Mutex<Option<String>>,
}

impl InMemoryMessageSource {
    /// Create an empty mailbox
    pub fn new() -> Self {
        Self {
            inbox: RwLock::new(Vec::new()),
            sent: RwLock::new(Vec::new()),
            page_size: 50,
            ignore_window: false,
            failing_recipients: RwLock::new(HashSet::new()),
            failing_searches: AtomicUsize::new(0),
            searches: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
            account: Mutex::new(None),
        }
    }

    /// Page size returned by `search`
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Make every search return the whole inbox, simulating a provider whose
    /// time filter is coarser than the watermark
    pub fn with_ignored_window(mut self) -> Self {
        self.ignore_window = true;
        self
    }

    pub fn with_account(self, address: &str) -> Self {
        *self.account.lock().unwrap_or_else(PoisonError::into_inner) = Some(address.to_string());
        self
    }

    /// Deliver a message to the inbox
    pub fn deliver(&self, message: FetchedMessage, received_at: DateTime<Utc>) {
        self.inbox
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(StoredMessage {
                received_at,
                message,
            });
    }

    /// Convenience for a plain-text reply
    pub fn deliver_reply(
        &self,
        id: &str,
        from: &str,
        subject: &str,
        body: &str,
        received_at: DateTime<Utc>,
    ) {
        let message = FetchedMessage::new(id)
            .header("From", from)
            .header("Subject", subject)
            .part("text/plain; charset=utf-8", body);
        self.deliver(message, received_at);
    }

    /// Make sends to `recipient` fail with a transient error
    pub fn fail_sends_to(&self, recipient: &str) {
        self.failing_recipients
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(recipient.trim().to_lowercase());
    }

    pub fn clear_send_failures(&self) {
        self.failing_recipients
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Make the next `n` searches fail with a transient error
    pub fn fail_next_searches(&self, n: usize) {
        self.failing_searches.store(n, Ordering::SeqCst);
    }

    /// Everything sent so far, in order
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Messages sent to one recipient
    pub fn sent_to(&self, recipient: &str) -> Vec<SentMessage> {
        let recipient = recipient.to_lowercase();
        self.sent()
            .into_iter()
            .filter(|m| m.to.to_lowercase().contains(&recipient))
            .collect()
    }

    pub fn search_count(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryMessageSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageSource for InMemoryMessageSource {
    fn search(
        &self,
        query: &InboxQuery,
        page_token: Option<&str>,
    ) -> Result<SearchPage, SourceError> {
        self.searches.fetch_add(1, Ordering::SeqCst);

        let remaining_failures = self.failing_searches.load(Ordering::SeqCst);
        if remaining_failures > 0 {
            self.failing_searches
                .store(remaining_failures - 1, Ordering::SeqCst);
            return Err(SourceError::transient("search", "simulated outage"));
        }

        let offset = match page_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| SourceError::rejected("search", format!("bad page token {}", token)))?,
            None => 0,
        };

        let now = Utc::now();
        let inbox = self.inbox.read().unwrap_or_else(PoisonError::into_inner);
        let matching: Vec<MessageId> = inbox
            .iter()
            .filter(|m| self.ignore_window || query.matches(m.received_at, now))
            .map(|m| m.message.id.clone())
            .collect();

        let end = (offset + self.page_size).min(matching.len());
        let message_ids = matching.get(offset..end).map(<[_]>::to_vec).unwrap_or_default();
        let next_page_token = (end < matching.len()).then(|| end.to_string());

        Ok(SearchPage {
            message_ids,
            next_page_token,
        })
    }

    fn fetch(&self, id: &MessageId) -> Result<FetchedMessage, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.inbox
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|m| &m.message.id == id)
            .map(|m| m.message.clone())
            .ok_or_else(|| SourceError::rejected("fetch", format!("no message {}", id)))
    }

    fn send(&self, raw_message: &str) -> Result<MessageId, SourceError> {
        let mut sent = self.sent.write().unwrap_or_else(PoisonError::into_inner);
        let id = MessageId::new(format!("sent-{}", sent.len() + 1));
        let message = SentMessage::parse(id, raw_message);

        let failing = self
            .failing_recipients
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if failing.iter().any(|r| message.to.to_lowercase().contains(r)) {
            return Err(SourceError::transient(
                "send",
                format!("simulated send failure to {}", message.to),
            ));
        }

        let id = message.id.clone();
        sent.push(message);
        Ok(id)
    }

    fn account_address(&self) -> Result<Option<String>, SourceError> {
        Ok(self
            .account
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_paginates() {
        let source = InMemoryMessageSource::new().with_page_size(2);
        let now = Utc::now();
        for i in 0..5 {
            source.deliver_reply(&format!("m{}", i), "a@x.com", "hi", "body", now);
        }

        let query = InboxQuery::NewerThanDays(1);
        let first = source.search(&query, None).unwrap();
        assert_eq!(first.message_ids.len(), 2);
        let second = source
            .search(&query, first.next_page_token.as_deref())
            .unwrap();
        let third = source
            .search(&query, second.next_page_token.as_deref())
            .unwrap();
        assert_eq!(third.message_ids, vec![MessageId::new("m4")]);
        assert!(third.next_page_token.is_none());
    }

    #[test]
    fn test_search_respects_window() {
        let source = InMemoryMessageSource::new();
        let now = Utc::now();
        source.deliver_reply("old", "a@x.com", "hi", "body", now - chrono::Duration::days(3));
        source.deliver_reply("new", "a@x.com", "hi", "body", now);

        let page = source.search(&InboxQuery::NewerThanDays(1), None).unwrap();
        assert_eq!(page.message_ids, vec![MessageId::new("new")]);
    }

    #[test]
    fn test_send_records_and_fails() {
        let source = InMemoryMessageSource::new();
        source
            .send("To: a@x.com\r\nSubject: Hello\r\n\r\nbody")
            .unwrap();
        source.fail_sends_to("b@x.com");
        let err = source
            .send("To: b@x.com\r\nSubject: Hello\r\n\r\nbody")
            .unwrap_err();
        assert!(err.is_transient());

        let sent = source.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "a@x.com");
        assert_eq!(sent[0].subject, "Hello");
    }

    #[test]
    fn test_sent_headers_unfold_and_strip_names() {
        let source = InMemoryMessageSource::new();
        source
            .send("To: \"Ann\" <ann@acme.com>,\r\n <bob@acme.com>\r\nSubject: A long\r\n subject\r\n\r\nTo: body@x.com")
            .unwrap();

        let sent = source.sent();
        assert_eq!(sent[0].to, "ann@acme.com, bob@acme.com");
        assert_eq!(sent[0].subject, "A long subject");
        assert_eq!(sent[0].header("subject").as_deref(), Some("A long subject"));
        assert!(sent[0].header("From").is_none());
        assert_eq!(source.sent_to("bob@acme.com").len(), 1);
    }

    #[test]
    fn test_failing_searches() {
        let source = InMemoryMessageSource::new();
        source.fail_next_searches(1);
        assert!(source.search(&InboxQuery::NewerThanDays(1), None).is_err());
        assert!(source.search(&InboxQuery::NewerThanDays(1), None).is_ok());
    }
}
