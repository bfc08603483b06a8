//! Integration tests for the nurture crate
//!
//! These tests drive complete cycles through the engine with an in-memory
//! message source, and exercise the file-backed store in a temp directory.

use chrono::{DateTime, Duration, TimeZone, Utc};
use nurture::config::{ConfigHandle, NurtureConfig};
use nurture::models::{LeadEmail, LeadRecord, MessageId, SyncState};
use nurture::storage::{InMemoryLeadStore, JsonFileStore, LEADS_FILE, LeadStore, Snapshot};
use nurture::sync::{ReplyContext, SyncCursor, sync_replies};
use nurture::{
    Contact, ControlSurface, CsvContactSource, InMemoryMessageSource, LeadBook, LeadStatus,
    NurtureEngine, NurtureRunner, StaticContacts,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::TempDir;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 3, 8, 0, 0).unwrap()
}

/// Engine over in-memory parts, seeded with `records`
struct Harness {
    source: Arc<InMemoryMessageSource>,
    store: Arc<InMemoryLeadStore>,
    config: Arc<ConfigHandle>,
    engine: Arc<NurtureEngine>,
}

fn harness(contacts: Vec<Contact>, records: BTreeMap<LeadEmail, LeadRecord>) -> Harness {
    let source = Arc::new(InMemoryMessageSource::new().with_ignored_window());
    let store = Arc::new(InMemoryLeadStore::with_snapshot(Snapshot {
        leads: records,
        sync: SyncState::default(),
    }));
    let config = Arc::new(ConfigHandle::new(NurtureConfig::default()));
    let engine = Arc::new(NurtureEngine::new(
        source.clone(),
        store.clone(),
        Arc::new(StaticContacts(contacts)),
        config.clone(),
    ));
    Harness {
        source,
        store,
        config,
        engine,
    }
}

fn contacted(days_ago: i64, follow_ups: u32) -> LeadRecord {
    LeadRecord {
        status: LeadStatus::Contacted,
        last_contact: Some(t0() - Duration::days(days_ago)),
        follow_up_count: follow_ups,
        ..Default::default()
    }
}

fn record<'a>(snapshot: &'a Snapshot, email: &str) -> &'a LeadRecord {
    &snapshot.leads[&LeadEmail::new(email)]
}

#[test]
fn test_neutral_replies_add_two_points_each() {
    let h = harness(
        vec![Contact::new("a@x.com", "Ann", "Acme")],
        BTreeMap::from([(LeadEmail::new("a@x.com"), contacted(1, 0))]),
    );
    for i in 0..3 {
        h.source.deliver_reply(
            &format!("m{}", i),
            "Ann <a@x.com>",
            "Re: hello",
            "Thanks for the note, will read later.",
            t0(),
        );
    }

    let outcome = h.engine.run_cycle_at(t0()).unwrap();
    assert_eq!(outcome.replies.neutral, 3);

    let snapshot = h.store.snapshot();
    let ann = record(&snapshot, "a@x.com");
    assert_eq!(ann.lead_score, 6);
    assert_eq!(ann.response_count, 3);
    assert_eq!(ann.status, LeadStatus::Contacted);
}

#[test]
fn test_interest_wins_over_opt_out() {
    let h = harness(
        vec![Contact::new("a@x.com", "Ann", "Acme")],
        BTreeMap::from([(LeadEmail::new("a@x.com"), contacted(1, 0))]),
    );
    h.source.deliver_reply(
        "m1",
        "a@x.com",
        "Re: hello",
        "Not interested in the old plan, but yes to a demo.",
        t0(),
    );

    let outcome = h.engine.run_cycle_at(t0()).unwrap();
    assert_eq!(outcome.replies.interested, 1);

    let snapshot = h.store.snapshot();
    let ann = record(&snapshot, "a@x.com");
    assert_eq!(ann.status, LeadStatus::Interested);
    assert_eq!(ann.lead_score, 10);
    // Auto-acknowledgment went out
    let ack = h.source.sent_to("a@x.com");
    assert_eq!(ack.len(), 1);
    assert_eq!(ack[0].subject, "Re: hello");
}

#[test]
fn test_reply_applied_once_across_cycles() {
    let h = harness(
        vec![Contact::new("a@x.com", "Ann", "Acme")],
        BTreeMap::from([(LeadEmail::new("a@x.com"), contacted(1, 0))]),
    );
    h.source
        .deliver_reply("m1", "a@x.com", "Re: hello", "Sounds good", t0());

    h.engine.run_cycle_at(t0()).unwrap();
    // Inbox still holds m1; the cursor must filter it
    h.engine.run_cycle_at(t0() + Duration::hours(4)).unwrap();

    let snapshot = h.store.snapshot();
    assert_eq!(record(&snapshot, "a@x.com").response_count, 1);
    assert!(snapshot.sync.contains(&MessageId::new("m1")));
}

#[test]
fn test_processed_ids_stay_under_cap() {
    let mut config = NurtureConfig::default();
    config.sync.processed_id_cap = 10;
    let config = config.normalized().unwrap();

    let source = InMemoryMessageSource::new()
        .with_ignored_window()
        .with_page_size(7);
    for i in 0..25 {
        source.deliver_reply(&format!("m{:02}", i), "stranger@elsewhere.com", "hi", "hello", t0());
    }

    let mut book = LeadBook::new();
    let mut cursor = SyncCursor::new(SyncState::default(), 10, 1);
    let stats = sync_replies(
        &mut book,
        &mut cursor,
        &ReplyContext {
            source: &source,
            config: &config,
            sender: None,
            now: t0(),
        },
    );

    assert_eq!(stats.messages_fetched, 25);
    assert_eq!(stats.messages_ignored, 25);
    assert_eq!(cursor.state().processed_len(), 10);
    assert_eq!(stats.ids_evicted, 15);
    // Oldest evicted first
    assert!(!cursor.state().contains(&MessageId::new("m00")));
    assert!(cursor.state().contains(&MessageId::new("m24")));
}

#[test]
fn test_first_follow_up_sent_once() {
    let h = harness(
        vec![Contact::new("a@x.com", "Ann", "Acme")],
        BTreeMap::from([(
            LeadEmail::new("a@x.com"),
            LeadRecord {
                status: LeadStatus::New,
                last_contact: Some(t0() - Duration::days(3)),
                ..Default::default()
            },
        )]),
    );

    let first = h.engine.run_cycle_at(t0()).unwrap();
    assert_eq!(first.follow_ups.follow_ups_sent, 1);

    let again = h.engine.run_cycle_at(t0() + Duration::minutes(5)).unwrap();
    assert_eq!(again.follow_ups.follow_ups_sent, 0);

    assert_eq!(h.source.sent_to("a@x.com").len(), 1);
    let snapshot = h.store.snapshot();
    let ann = record(&snapshot, "a@x.com");
    assert_eq!(ann.follow_up_count, 1);
    assert_eq!(ann.last_contact, Some(t0()));
}

#[test]
fn test_follow_ups_exhaust_to_not_interested() {
    let h = harness(
        vec![Contact::new("a@x.com", "Ann", "Acme")],
        BTreeMap::from([(LeadEmail::new("a@x.com"), contacted(8, 1))]),
    );

    let outcome = h.engine.run_cycle_at(t0()).unwrap();
    assert_eq!(outcome.follow_ups.follow_ups_sent, 1);
    assert_eq!(outcome.follow_ups.exhausted, 1);
    assert_eq!(outcome.report.follow_ups_exhausted, 1);

    let later = h.engine.run_cycle_at(t0() + Duration::days(30)).unwrap();
    assert_eq!(later.follow_ups.follow_ups_sent, 0);

    let snapshot = h.store.snapshot();
    let ann = record(&snapshot, "a@x.com");
    assert_eq!(ann.status, LeadStatus::NotInterested);
    assert_eq!(ann.follow_up_count, 2);
    assert_eq!(h.source.sent().len(), 1);
}

#[test]
fn test_failed_send_keeps_lead_eligible() {
    let h = harness(
        vec![Contact::new("a@x.com", "Ann", "Acme")],
        BTreeMap::from([(LeadEmail::new("a@x.com"), contacted(4, 0))]),
    );
    h.source.fail_sends_to("a@x.com");

    let outcome = h.engine.run_cycle_at(t0()).unwrap();
    assert_eq!(outcome.follow_ups.send_failures, 1);
    assert_eq!(record(&h.store.snapshot(), "a@x.com").follow_up_count, 0);

    h.source.clear_send_failures();
    let retry = h.engine.run_cycle_at(t0() + Duration::hours(4)).unwrap();
    assert_eq!(retry.follow_ups.follow_ups_sent, 1);
}

#[test]
fn test_json_store_round_trip() {
    let dir = TempDir::new().unwrap();
    let store = JsonFileStore::new(dir.path());

    let mut sync = SyncState::default();
    sync.last_checked = Some(t0());
    sync.push(MessageId::new("m1"));
    let snapshot = Snapshot {
        leads: BTreeMap::from([
            (LeadEmail::new("a@x.com"), contacted(2, 1)),
            (LeadEmail::new("b@x.com"), LeadRecord::default()),
        ]),
        sync,
    };

    store.save(&snapshot).unwrap();
    let reloaded = JsonFileStore::new(dir.path()).load().unwrap();
    assert_eq!(reloaded, snapshot);
    assert_eq!(record(&reloaded, "b@x.com").last_contact, None);

    let text = std::fs::read_to_string(dir.path().join(LEADS_FILE)).unwrap();
    assert!(text.contains("\"last_contact\": null"));
}

#[test]
fn test_new_contact_end_to_end() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("contacts.csv"),
        "to,first_name,company\na@x.com,Ann,Acme\n",
    )
    .unwrap();

    let source = Arc::new(InMemoryMessageSource::new());
    let store = Arc::new(JsonFileStore::new(dir.path()));
    let engine = NurtureEngine::new(
        source.clone(),
        store.clone(),
        Arc::new(CsvContactSource::new(dir.path().join("contacts.csv"))),
        Arc::new(ConfigHandle::new(NurtureConfig::default())),
    );

    let outcome = engine.run_cycle_at(t0()).unwrap();
    assert_eq!(outcome.follow_ups.follow_ups_sent, 0);
    assert!(source.sent().is_empty());

    let snapshot = store.load().unwrap();
    let ann = record(&snapshot, "a@x.com");
    assert_eq!(ann.status, LeadStatus::New);
    assert_eq!(ann.last_contact, None);
    assert_eq!(ann.response_count, 0);
    assert_eq!(ann.follow_up_count, 0);
    assert_eq!(ann.lead_score, 0);
}

#[test]
fn test_config_update_applies_next_cycle() {
    let h = harness(
        vec![Contact::new("a@x.com", "Ann", "Acme")],
        BTreeMap::from([(LeadEmail::new("a@x.com"), contacted(4, 0))]),
    );

    h.config
        .update(&json!({"automation": {"auto_send_follow_ups": false}}))
        .unwrap();
    let outcome = h.engine.run_cycle_at(t0()).unwrap();
    assert!(outcome.follow_ups.disabled);
    assert!(h.source.sent().is_empty());

    h.config
        .update(&json!({"automation": {"auto_send_follow_ups": true}}))
        .unwrap();
    let outcome = h.engine.run_cycle_at(t0()).unwrap();
    assert_eq!(outcome.follow_ups.follow_ups_sent, 1);
}

#[test]
fn test_concurrent_cycles_do_not_double_send() {
    let h = harness(
        vec![Contact::new("a@x.com", "Ann", "Acme")],
        BTreeMap::from([(LeadEmail::new("a@x.com"), contacted(4, 0))]),
    );

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let engine = Arc::clone(&h.engine);
            std::thread::spawn(move || engine.run_cycle_at(t0()).unwrap())
        })
        .collect();
    let sent: usize = handles
        .into_iter()
        .map(|h| h.join().unwrap().follow_ups.follow_ups_sent)
        .sum();

    assert_eq!(sent, 1);
    assert_eq!(h.source.sent().len(), 1);
    assert_eq!(h.store.save_count(), 4);
}

#[test]
fn test_control_surface_flow() {
    let h = harness(vec![Contact::new("a@x.com", "Ann", "Acme")], BTreeMap::new());
    let surface = ControlSurface::new(Arc::new(NurtureRunner::new(h.engine.clone())));

    let response = surface.handle_line(r#"{"op": "run_once"}"#);
    assert!(response.ok);
    assert!(response.text.contains("Total leads:     1"));

    let response = surface.handle_line(r#"{"op": "get_report"}"#);
    assert!(response.ok);

    let response =
        surface.handle_line(r#"{"op": "update_config", "config": {"sender_name": "Sam"}}"#);
    assert!(response.ok);
    assert_eq!(h.config.snapshot().sender_name.as_deref(), Some("Sam"));

    let response = surface.handle_line(r#"{"op": "send_test", "email": "bad"}"#);
    assert!(!response.ok);
}
