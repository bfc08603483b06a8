//! Lead model and its status state machine
//!
//! A lead is a contact-list row plus the tracking record the engine keeps
//! for it. Only the tracking record is persisted; display metadata always
//! comes from the contact list.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::timestamp;
use super::Contact;
use crate::classify::Outcome;
use crate::config::LeadScoring;

/// Note appended when a lead is given up on after its last follow-up
pub const EXHAUSTED_NOTE: &str = "Follow-ups exhausted, no reply";

const REPLY_NOTE_PREFIX: &str = "Response received";

/// Normalized (trimmed, lowercased) email address used as the lead key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct LeadEmail(String);

impl LeadEmail {
    pub fn new(email: &str) -> Self {
        Self(email.trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for LeadEmail {
    fn from(s: String) -> Self {
        Self::new(&s)
    }
}

impl From<&str> for LeadEmail {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<LeadEmail> for String {
    fn from(e: LeadEmail) -> Self {
        e.0
    }
}

impl std::fmt::Display for LeadEmail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Engagement status of a lead
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    #[default]
    New,
    Contacted,
    Responded,
    Interested,
    NotInterested,
    Scheduled,
}

impl LeadStatus {
    pub const ALL: [LeadStatus; 6] = [
        LeadStatus::New,
        LeadStatus::Contacted,
        LeadStatus::Responded,
        LeadStatus::Interested,
        LeadStatus::NotInterested,
        LeadStatus::Scheduled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Contacted => "contacted",
            Self::Responded => "responded",
            Self::Interested => "interested",
            Self::NotInterested => "not_interested",
            Self::Scheduled => "scheduled",
        }
    }

    /// Statuses the follow-up scheduler may act on
    pub fn awaits_follow_up(&self) -> bool {
        matches!(self, Self::New | Self::Contacted)
    }
}

impl std::fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a lead's activity log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// `None` only for legacy lines without a leading date
    pub date: Option<NaiveDate>,
    pub text: String,
}

impl Note {
    pub fn new(date: NaiveDate, text: impl Into<String>) -> Self {
        Self {
            date: Some(date),
            text: text.into(),
        }
    }

    /// Parse a legacy "YYYY-MM-DD: text" line
    fn from_legacy_line(line: &str) -> Self {
        if let Some((date, text)) = line.split_once(": ")
            && let Ok(date) = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        {
            return Self {
                date: Some(date),
                text: text.to_string(),
            };
        }
        Self {
            date: None,
            text: line.to_string(),
        }
    }
}

impl std::fmt::Display for Note {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.date {
            Some(date) => write!(f, "{}: {}", date.format("%Y-%m-%d"), self.text),
            None => f.write_str(&self.text),
        }
    }
}

/// Accept either a list of notes or a legacy newline-joined string
fn deserialize_notes<'de, D>(deserializer: D) -> Result<Vec<Note>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NotesDoc {
        List(Vec<Note>),
        Legacy(String),
        Missing(()),
    }

    Ok(match NotesDoc::deserialize(deserializer)? {
        NotesDoc::List(notes) => notes,
        NotesDoc::Legacy(s) => s
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(Note::from_legacy_line)
            .collect(),
        NotesDoc::Missing(()) => Vec::new(),
    })
}

/// Persisted tracking record for one lead
///
/// Every field defaults, so a partial document still loads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeadRecord {
    pub status: LeadStatus,
    #[serde(with = "timestamp::iso_opt")]
    pub last_contact: Option<DateTime<Utc>>,
    pub response_count: u32,
    pub follow_up_count: u32,
    pub lead_score: i64,
    #[serde(deserialize_with = "deserialize_notes")]
    pub notes: Vec<Note>,
}

/// What an inbound reply did to a lead
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyEffect {
    pub outcome: Outcome,
    pub previous_status: LeadStatus,
    pub score_delta: i64,
}

/// What a sent follow-up did to a lead
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FollowUpEffect {
    /// 1-based number of the follow-up just recorded
    pub number: u32,
    /// The maximum was reached and the lead was given up on
    pub exhausted: bool,
}

/// A tracked contact with nurturing state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lead {
    pub email: LeadEmail,
    pub first_name: String,
    pub company: String,
    pub status: LeadStatus,
    pub last_contact: Option<DateTime<Utc>>,
    pub response_count: u32,
    pub follow_up_count: u32,
    pub lead_score: i64,
    notes: Vec<Note>,
}

impl Lead {
    /// A fresh lead with no tracking history
    pub fn new(email: &str, first_name: impl Into<String>, company: impl Into<String>) -> Self {
        Self::from_contact(&Contact::new(email, first_name, company), LeadRecord::default())
    }

    pub fn from_contact(contact: &Contact, record: LeadRecord) -> Self {
        Self {
            email: contact.email.clone(),
            first_name: contact.first_name.clone(),
            company: contact.company.clone(),
            status: record.status,
            last_contact: record.last_contact,
            response_count: record.response_count,
            follow_up_count: record.follow_up_count,
            lead_score: record.lead_score,
            notes: record.notes,
        }
    }

    /// Snapshot of the persisted fields
    pub fn record(&self) -> LeadRecord {
        LeadRecord {
            status: self.status,
            last_contact: self.last_contact,
            response_count: self.response_count,
            follow_up_count: self.follow_up_count,
            lead_score: self.lead_score,
            notes: self.notes.clone(),
        }
    }

    /// Activity log, oldest first
    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    /// Append to the activity log. Existing entries are never touched.
    pub fn add_note(&mut self, now: DateTime<Utc>, text: impl Into<String>) {
        self.notes.push(Note::new(now.date_naive(), text));
    }

    /// Apply a classified inbound reply
    pub fn apply_reply(
        &mut self,
        outcome: Outcome,
        subject: &str,
        scoring: &LeadScoring,
        now: DateTime<Utc>,
    ) -> ReplyEffect {
        let previous_status = self.status;

        let score_delta = match outcome {
            Outcome::Interested => {
                self.status = LeadStatus::Interested;
                scoring.response_bonus + scoring.interest_bonus
            }
            Outcome::NotInterested => {
                self.status = LeadStatus::NotInterested;
                -scoring.not_interested_penalty
            }
            Outcome::Neutral => scoring.neutral_bonus,
        };

        self.lead_score += score_delta;
        self.note_reply(subject, now);

        ReplyEffect {
            outcome,
            previous_status,
            score_delta,
        }
    }

    /// Record a reply whose body could not be read
    ///
    /// Counts as a response and resets the silence clock, but leaves the
    /// score and status alone.
    pub fn record_unclassified_reply(&mut self, subject: &str, now: DateTime<Utc>) {
        self.note_reply(subject, now);
    }

    fn note_reply(&mut self, subject: &str, now: DateTime<Utc>) {
        self.response_count += 1;
        self.last_contact = Some(now);

        let subject = if subject.trim().is_empty() {
            "(no subject)"
        } else {
            subject.trim()
        };
        self.add_note(now, format!("{} - {}", REPLY_NOTE_PREFIX, subject));
    }

    /// Record a successfully sent scripted follow-up
    ///
    /// Reaching `max_follow_ups` gives up on the lead.
    pub fn record_follow_up(&mut self, max_follow_ups: u32, now: DateTime<Utc>) -> FollowUpEffect {
        self.follow_up_count += 1;
        self.last_contact = Some(now);
        if self.status == LeadStatus::New {
            self.status = LeadStatus::Contacted;
        }
        self.add_note(now, format!("Follow-up {} sent", self.follow_up_count));

        let exhausted = self.follow_up_count >= max_follow_ups;
        if exhausted {
            self.status = LeadStatus::NotInterested;
            self.add_note(now, EXHAUSTED_NOTE);
        }

        FollowUpEffect {
            number: self.follow_up_count,
            exhausted,
        }
    }

    /// Record a successfully sent initial outreach
    pub fn record_outreach(&mut self, now: DateTime<Utc>) {
        self.last_contact = Some(now);
        if self.status == LeadStatus::New {
            self.status = LeadStatus::Contacted;
        }
        self.add_note(now, "Initial outreach sent");
    }

    /// Record a successfully sent acknowledgment of interest
    pub fn record_acknowledgment(&mut self, now: DateTime<Utc>) {
        self.last_contact = Some(now);
        self.add_note(now, "Interest acknowledgment sent");
    }

    /// Whether the lead is `not_interested` because follow-ups ran out
    /// rather than because of an explicit opt-out
    pub fn is_exhausted(&self) -> bool {
        self.status == LeadStatus::NotInterested
            && self
                .notes
                .iter()
                .rev()
                .find(|n| n.text == EXHAUSTED_NOTE || n.text.starts_with(REPLY_NOTE_PREFIX))
                .is_some_and(|n| n.text == EXHAUSTED_NOTE)
    }

    /// Display label used in reports
    pub fn display_name(&self) -> String {
        match (self.first_name.is_empty(), self.company.is_empty()) {
            (false, false) => format!("{} at {}", self.first_name, self.company),
            (false, true) => self.first_name.clone(),
            (true, false) => format!("{} ({})", self.email, self.company),
            (true, true) => self.email.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_lead_email_normalized() {
        assert_eq!(LeadEmail::new("  Ann@Example.COM ").as_str(), "ann@example.com");
        assert_eq!(LeadEmail::from("A@x.com"), LeadEmail::from("a@X.com"));
    }

    #[test]
    fn test_new_lead_defaults() {
        let lead = Lead::new("a@x.com", "Ann", "X");
        assert_eq!(lead.status, LeadStatus::New);
        assert_eq!(lead.response_count, 0);
        assert_eq!(lead.follow_up_count, 0);
        assert_eq!(lead.lead_score, 0);
        assert!(lead.last_contact.is_none());
        assert!(lead.notes().is_empty());
    }

    #[test]
    fn test_interested_reply() {
        let scoring = LeadScoring::default();
        let mut lead = Lead::new("a@x.com", "Ann", "X");

        let effect = lead.apply_reply(Outcome::Interested, "Re: hello", &scoring, now());

        assert_eq!(lead.status, LeadStatus::Interested);
        assert_eq!(lead.lead_score, scoring.response_bonus + scoring.interest_bonus);
        assert_eq!(lead.response_count, 1);
        assert_eq!(lead.last_contact, Some(now()));
        assert_eq!(effect.previous_status, LeadStatus::New);
        assert_eq!(lead.notes().len(), 1);
        assert_eq!(lead.notes()[0].to_string(), "2025-06-02: Response received - Re: hello");
    }

    #[test]
    fn test_not_interested_reply_after_interest() {
        let scoring = LeadScoring::default();
        let mut lead = Lead::new("a@x.com", "Ann", "X");
        lead.apply_reply(Outcome::Interested, "yes", &scoring, now());
        lead.apply_reply(Outcome::NotInterested, "stop", &scoring, now());

        assert_eq!(lead.status, LeadStatus::NotInterested);
        assert_eq!(lead.lead_score, 10 - 5);
        assert_eq!(lead.response_count, 2);
    }

    #[test]
    fn test_neutral_reply_keeps_status() {
        let scoring = LeadScoring::default();
        let mut lead = Lead::new("a@x.com", "Ann", "X");
        lead.status = LeadStatus::Contacted;
        lead.apply_reply(Outcome::Neutral, "", &scoring, now());

        assert_eq!(lead.status, LeadStatus::Contacted);
        assert_eq!(lead.lead_score, 2);
        assert!(lead.notes()[0].text.ends_with("(no subject)"));
    }

    #[test]
    fn test_unclassified_reply_counts_without_scoring() {
        let mut lead = Lead::new("a@x.com", "Ann", "X");
        lead.status = LeadStatus::Contacted;
        lead.lead_score = 4;

        lead.record_unclassified_reply("Re: hi", now());

        assert_eq!(lead.status, LeadStatus::Contacted);
        assert_eq!(lead.lead_score, 4);
        assert_eq!(lead.response_count, 1);
        assert_eq!(lead.last_contact, Some(now()));
        assert_eq!(lead.notes()[0].to_string(), "2025-06-02: Response received - Re: hi");
    }

    #[test]
    fn test_follow_up_moves_forward_then_gives_up() {
        let mut lead = Lead::new("a@x.com", "Ann", "X");

        let first = lead.record_follow_up(2, now());
        assert_eq!(first, FollowUpEffect { number: 1, exhausted: false });
        assert_eq!(lead.status, LeadStatus::Contacted);

        let second = lead.record_follow_up(2, now());
        assert!(second.exhausted);
        assert!(lead.is_exhausted());
        assert_eq!(lead.status, LeadStatus::NotInterested);
        assert_eq!(lead.follow_up_count, 2);
    }

    #[test]
    fn test_notes_append_only() {
        let mut lead = Lead::new("a@x.com", "Ann", "X");
        lead.add_note(now(), "first");
        lead.add_note(now(), "second");
        let texts: Vec<_> = lead.notes().iter().map(|n| n.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second"]);
    }

    #[test]
    fn test_record_roundtrip_with_null_contact() {
        let lead = Lead::new("a@x.com", "Ann", "X");
        let json = serde_json::to_string(&lead.record()).unwrap();
        assert!(json.contains("\"last_contact\":null"));
        let back: LeadRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, lead.record());
    }

    #[test]
    fn test_legacy_record_parses() {
        let json = r#"{
            "status": "contacted",
            "last_contact": "2025-05-30T10:15:00.123456",
            "response_count": 1,
            "follow_up_count": 0,
            "lead_score": 2,
            "notes": "\n2025-05-30: Response received - Re: hi"
        }"#;
        let record: LeadRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.status, LeadStatus::Contacted);
        assert!(record.last_contact.is_some());
        assert_eq!(record.notes.len(), 1);
        assert_eq!(record.notes[0].text, "Response received - Re: hi");
    }

    #[test]
    fn test_partial_record_defaults() {
        let record: LeadRecord = serde_json::from_str(r#"{"lead_score": -3}"#).unwrap();
        assert_eq!(record.status, LeadStatus::New);
        assert_eq!(record.lead_score, -3);
        assert!(record.notes.is_empty());
    }
}
