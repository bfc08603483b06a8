//! Inbound reply sync
//!
//! Polls the message source through the [`SyncCursor`], classifies every
//! newly seen reply from a known lead and applies it to that lead. The
//! cursor is committed once, after the whole page loop.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::{BTreeSet, HashSet};

use super::cursor::{SeenIds, SyncCursor};
use crate::classify::{Outcome, body_text, classify};
use crate::config::NurtureConfig;
use crate::models::{EmailAddress, FetchedMessage, LeadBook, LeadEmail};
use crate::outbound::{OutgoingMessage, TemplateKind};
use crate::source::MessageSource;

/// Inputs shared by every message in one poll
pub struct ReplyContext<'a> {
    pub source: &'a dyn MessageSource,
    pub config: &'a NurtureConfig,
    /// Our own address: used as `From` on acknowledgments, and mail from it
    /// is never treated as a reply
    pub sender: Option<&'a EmailAddress>,
    /// Start of the poll; becomes the new watermark
    pub now: DateTime<Utc>,
}

/// Statistics from one reply poll
#[derive(Debug, Default, Clone)]
pub struct ReplySyncStats {
    /// Search pages requested
    pub pages: usize,
    /// Ids returned by search, including already processed ones
    pub messages_listed: usize,
    /// Ids skipped because they were processed in an earlier poll
    pub messages_skipped: usize,
    /// Messages fetched
    pub messages_fetched: usize,
    /// Fetch failures. These ids are retried next cycle.
    pub fetch_errors: usize,
    /// Replies from known leads that were classified and applied
    pub replies_applied: usize,
    pub interested: usize,
    pub not_interested: usize,
    pub neutral: usize,
    /// Messages from non-leads, from ourselves, or without a sender
    pub messages_ignored: usize,
    /// Replies with no extractable text, left unclassified
    pub empty_bodies: usize,
    pub acknowledgments_sent: usize,
    pub acknowledgment_failures: usize,
    /// Processed ids evicted by the cap on commit
    pub ids_evicted: usize,
    /// Whether the watermark moved to the start of this poll
    pub watermark_advanced: bool,
    /// Search failure that cut the poll short
    pub poll_error: Option<String>,
    /// Leads changed by a reply in this poll
    pub touched: BTreeSet<LeadEmail>,
    /// Duration of the poll
    pub duration_ms: u64,
}

/// Poll for replies and apply them to `book`
///
/// Never fails as a whole. Transient provider errors are logged and
/// recorded in the returned stats:
/// - a failed search ends the page loop early
/// - a failed fetch leaves that id unprocessed
///
/// In both cases the ids already applied are remembered but the watermark
/// stays put, so the same window is searched again next cycle without
/// double-counting anything.
pub fn sync_replies(
    book: &mut LeadBook,
    cursor: &mut SyncCursor,
    ctx: &ReplyContext<'_>,
) -> ReplySyncStats {
    let start = std::time::Instant::now();
    let mut stats = ReplySyncStats::default();
    let mut seen = SeenIds::new();

    let query = cursor.next_query();
    debug!("Polling for replies: {}", query);

    let mut page_token: Option<String> = None;
    let mut requested_tokens: HashSet<String> = HashSet::new();
    loop {
        let page = match ctx.source.search(&query, page_token.as_deref()) {
            Ok(page) => page,
            Err(e) => {
                warn!("Reply poll stopped after {} page(s): {}", stats.pages, e);
                stats.poll_error = Some(e.to_string());
                break;
            }
        };
        stats.pages += 1;
        stats.messages_listed += page.message_ids.len();

        for id in page.message_ids {
            if !cursor.should_process(&id) || seen.contains(&id) {
                stats.messages_skipped += 1;
                continue;
            }

            let message = match ctx.source.fetch(&id) {
                Ok(message) => message,
                Err(e) => {
                    warn!("Failed to fetch message {}: {}", id, e);
                    stats.fetch_errors += 1;
                    continue;
                }
            };
            stats.messages_fetched += 1;

            process_message(book, &message, ctx, &mut stats);
            seen.insert(id);
        }

        match page.next_page_token {
            Some(next) if requested_tokens.insert(next.clone()) => page_token = Some(next),
            Some(next) => {
                warn!("Page token {} repeated, ending reply poll", next);
                break;
            }
            None => break,
        }
    }

    let complete = stats.poll_error.is_none() && stats.fetch_errors == 0;
    stats.ids_evicted = if complete {
        stats.watermark_advanced = true;
        cursor.commit(ctx.now, seen)
    } else {
        cursor.remember(seen)
    };

    if stats.ids_evicted > 0 {
        debug!("Evicted {} oldest processed message ids", stats.ids_evicted);
    }

    stats.duration_ms = start.elapsed().as_millis() as u64;
    info!(
        "Reply poll: {} listed, {} new, {} applied ({} interested, {} not interested, {} neutral), {} ignored",
        stats.messages_listed,
        stats.messages_fetched,
        stats.replies_applied,
        stats.interested,
        stats.not_interested,
        stats.neutral,
        stats.messages_ignored
    );
    stats
}

/// Apply one fetched message. The caller marks it seen afterwards.
fn process_message(
    book: &mut LeadBook,
    message: &FetchedMessage,
    ctx: &ReplyContext<'_>,
    stats: &mut ReplySyncStats,
) {
    let Some(from) = message.sender() else {
        debug!("Message {} has no sender, ignoring", message.id);
        stats.messages_ignored += 1;
        return;
    };

    if ctx
        .sender
        .is_some_and(|own| own.email.eq_ignore_ascii_case(&from.email))
    {
        stats.messages_ignored += 1;
        return;
    }

    let email = LeadEmail::new(&from.email);
    let Some(lead) = book.get_mut(email.as_str()) else {
        debug!("Message {} from non-lead {}, ignoring", message.id, email);
        stats.messages_ignored += 1;
        return;
    };

    let Some(body) = body_text(message) else {
        warn!(
            "Reply {} from {} has no readable body, recording it unclassified",
            message.id, email
        );
        lead.record_unclassified_reply(message.subject(), ctx.now);
        stats.empty_bodies += 1;
        stats.touched.insert(email);
        return;
    };

    let outcome = classify(&body, &ctx.config.response_keywords);
    let effect = lead.apply_reply(outcome, message.subject(), &ctx.config.lead_scoring, ctx.now);
    stats.replies_applied += 1;
    stats.touched.insert(email.clone());

    info!(
        "Reply from {} classified {} (score {:+}, {} -> {})",
        email, outcome, effect.score_delta, effect.previous_status, lead.status
    );

    match outcome {
        Outcome::Interested => stats.interested += 1,
        Outcome::NotInterested => stats.not_interested += 1,
        Outcome::Neutral => stats.neutral += 1,
    }

    if outcome != Outcome::Interested || !ctx.config.automation.auto_respond_to_interest {
        return;
    }

    let rendered = ctx.config.templates.render(TemplateKind::Interested, lead);
    let subject = reply_subject(message.subject(), &rendered.subject);
    let sent = OutgoingMessage::new(email.as_str(), subject, rendered.body)
        .from(ctx.sender.cloned())
        .to_rfc5322()
        .and_then(|raw| ctx.source.send(&raw));

    match sent {
        Ok(sent_id) => {
            lead.record_acknowledgment(ctx.now);
            stats.acknowledgments_sent += 1;
            debug!("Acknowledgment {} sent to {}", sent_id, email);
        }
        Err(e) => {
            warn!("Failed to send acknowledgment to {}: {}", email, e);
            stats.acknowledgment_failures += 1;
        }
    }
}

/// Subject for an acknowledgment: "Re: <their subject>", or the configured
/// fallback when the reply had none
fn reply_subject(original: &str, fallback: &str) -> String {
    let original = original.trim();
    if original.is_empty() {
        fallback.to_string()
    } else if original.get(..3).is_some_and(|p| p.eq_ignore_ascii_case("re:")) {
        original.to_string()
    } else {
        format!("Re: {}", original)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Lead, LeadStatus, MessageId, SyncState};
    use crate::error::SourceError;
    use crate::source::{InMemoryMessageSource, InboxQuery, SearchPage};
    use chrono::{Duration, TimeZone};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 5, 10, 0, 0).unwrap()
    }

    fn book() -> LeadBook {
        let mut book = LeadBook::new();
        let mut ann = Lead::new("ann@acme.com", "Ann", "Acme");
        ann.status = LeadStatus::Contacted;
        book.insert(ann);
        book.insert(Lead::new("bob@beta.io", "Bob", "Beta"));
        book
    }

    fn cursor() -> SyncCursor {
        SyncCursor::new(SyncState::new(), 500, 1)
    }

    #[test]
    fn test_applies_replies_and_acknowledges_interest() {
        let source = InMemoryMessageSource::new().with_ignored_window();
        source.deliver_reply("m1", "Ann <Ann@Acme.com>", "Hello", "Yes, send a demo", now());
        source.deliver_reply("m2", "bob@beta.io", "Re: intro", "Who is this?", now());

        let config = NurtureConfig::default();
        let own = EmailAddress::with_name("Sam", "sam@vendor.com");
        let ctx = ReplyContext {
            source: &source,
            config: &config,
            sender: Some(&own),
            now: now(),
        };

        let mut book = book();
        let mut cursor = cursor();
        let stats = sync_replies(&mut book, &mut cursor, &ctx);

        assert_eq!(stats.replies_applied, 2);
        assert_eq!(stats.interested, 1);
        assert_eq!(stats.neutral, 1);
        assert!(stats.watermark_advanced);
        assert_eq!(cursor.watermark(), Some(now()));

        let ann = book.get("ann@acme.com").unwrap();
        assert_eq!(ann.status, LeadStatus::Interested);
        assert_eq!(ann.lead_score, 10);

        let sent = source.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "ann@acme.com");
        assert_eq!(sent[0].subject, "Re: Hello");
        let from = sent[0].header("From").unwrap();
        assert!(from.contains("Sam") && from.contains("<sam@vendor.com>"));
    }

    #[test]
    fn test_overlapping_windows_count_once() {
        let source = InMemoryMessageSource::new().with_ignored_window();
        source.deliver_reply("m1", "bob@beta.io", "Re: intro", "ok", now());

        let config = NurtureConfig::default();
        let mut book = book();
        let mut cursor = cursor();

        for hours in 0..2 {
            let ctx = ReplyContext {
                source: &source,
                config: &config,
                sender: None,
                now: now() + Duration::hours(hours),
            };
            sync_replies(&mut book, &mut cursor, &ctx);
        }

        let bob = book.get("bob@beta.io").unwrap();
        assert_eq!(bob.response_count, 1);
        assert_eq!(bob.lead_score, 2);
        assert_eq!(source.fetch_count(), 1);
    }

    #[test]
    fn test_ignores_self_and_strangers() {
        let source = InMemoryMessageSource::new().with_ignored_window();
        source.deliver_reply("m1", "sam@vendor.com", "Following up", "demo", now());
        source.deliver_reply("m2", "eve@other.org", "Hi", "yes", now());

        let config = NurtureConfig::default();
        let own = EmailAddress::new("sam@vendor.com");
        let ctx = ReplyContext {
            source: &source,
            config: &config,
            sender: Some(&own),
            now: now(),
        };

        let mut book = book();
        let mut cursor = cursor();
        let stats = sync_replies(&mut book, &mut cursor, &ctx);

        assert_eq!(stats.messages_ignored, 2);
        assert_eq!(stats.replies_applied, 0);
        assert!(!cursor.should_process(&MessageId::new("m2")));
        assert!(source.sent().is_empty());
    }

    #[test]
    fn test_empty_body_counts_without_classification() {
        let source = InMemoryMessageSource::new().with_ignored_window();
        source.deliver(
            FetchedMessage::new("m1")
                .header("From", "ann@acme.com")
                .header("Subject", "Re: hi")
                .part("application/pdf", "%PDF-1.4"),
            now(),
        );

        let config = NurtureConfig::default();
        let ctx = ReplyContext {
            source: &source,
            config: &config,
            sender: None,
            now: now(),
        };

        let mut book = book();
        let stats = sync_replies(&mut book, &mut cursor(), &ctx);

        assert_eq!(stats.empty_bodies, 1);
        assert_eq!(stats.replies_applied, 0);
        assert!(stats.touched.contains(&LeadEmail::new("ann@acme.com")));

        let ann = book.get("ann@acme.com").unwrap();
        assert_eq!(ann.response_count, 1);
        assert_eq!(ann.lead_score, 0);
        assert_eq!(ann.status, LeadStatus::Contacted);
        assert_eq!(ann.last_contact, Some(now()));
        assert_eq!(ann.notes().len(), 1);
        assert!(ann.notes()[0].text.ends_with("Re: hi"));
    }

    /// Hands out page tokens A -> B -> A forever
    struct CyclingSource {
        searches: AtomicUsize,
    }

    impl MessageSource for CyclingSource {
        fn search(
            &self,
            _query: &InboxQuery,
            page_token: Option<&str>,
        ) -> Result<SearchPage, SourceError> {
            self.searches.fetch_add(1, Ordering::SeqCst);
            let next = match page_token {
                Some("A") => "B",
                _ => "A",
            };
            Ok(SearchPage {
                message_ids: Vec::new(),
                next_page_token: Some(next.to_string()),
            })
        }

        fn fetch(&self, id: &MessageId) -> Result<FetchedMessage, SourceError> {
            Err(SourceError::rejected("fetch", format!("no message {}", id)))
        }

        fn send(&self, _raw_message: &str) -> Result<MessageId, SourceError> {
            Ok(MessageId::new("sent"))
        }
    }

    #[test]
    fn test_cycling_page_tokens_stop() {
        let source = CyclingSource {
            searches: AtomicUsize::new(0),
        };
        let config = NurtureConfig::default();
        let ctx = ReplyContext {
            source: &source,
            config: &config,
            sender: None,
            now: now(),
        };

        let stats = sync_replies(&mut book(), &mut cursor(), &ctx);

        // first page, then A and B; A comes back again and ends the poll
        assert_eq!(stats.pages, 3);
        assert_eq!(source.searches.load(Ordering::SeqCst), 3);
        assert!(stats.poll_error.is_none());
    }

    #[test]
    fn test_search_failure_keeps_watermark() {
        let source = InMemoryMessageSource::new();
        source.fail_next_searches(1);

        let config = NurtureConfig::default();
        let ctx = ReplyContext {
            source: &source,
            config: &config,
            sender: None,
            now: now(),
        };

        let mut cursor = cursor();
        let stats = sync_replies(&mut book(), &mut cursor, &ctx);

        assert!(stats.poll_error.is_some());
        assert!(!stats.watermark_advanced);
        assert_eq!(cursor.watermark(), None);
    }

    #[test]
    fn test_failed_acknowledgment_still_applies_reply() {
        let source = InMemoryMessageSource::new().with_ignored_window();
        source.deliver_reply("m1", "ann@acme.com", "", "let's have a call", now());
        source.fail_sends_to("ann@acme.com");

        let config = NurtureConfig::default();
        let ctx = ReplyContext {
            source: &source,
            config: &config,
            sender: None,
            now: now(),
        };

        let mut book = book();
        let stats = sync_replies(&mut book, &mut cursor(), &ctx);

        assert_eq!(stats.acknowledgment_failures, 1);
        let ann = book.get("ann@acme.com").unwrap();
        assert_eq!(ann.status, LeadStatus::Interested);
        assert_eq!(ann.notes().len(), 1);
    }

    #[test]
    fn test_reply_subject() {
        assert_eq!(reply_subject("Intro", "x"), "Re: Intro");
        assert_eq!(reply_subject("RE: Intro", "x"), "RE: Intro");
        assert_eq!(reply_subject("  ", "Re: Next steps"), "Re: Next steps");
    }
}
