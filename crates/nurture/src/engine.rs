//! Nurturing cycle orchestrator
//!
//! One cycle: load the snapshot, poll and apply replies, send due
//! follow-ups, save the snapshot, report. Cycles are serialized by a lock
//! held for the whole cycle, so a scheduled cycle and an on-demand one never
//! race on the same snapshot.

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use crate::config::{ConfigHandle, NurtureConfig};
use crate::contacts::ContactSource;
use crate::error::NurtureError;
use crate::followup::{FollowUpStats, run_follow_ups};
use crate::models::{Contact, EmailAddress, LeadBook, LeadEmail, LeadStatus, MessageId};
use crate::outbound::{Attachment, OutgoingMessage, TemplateKind};
use crate::report::{DEFAULT_TOP_N, LeadReport};
use crate::source::MessageSource;
use crate::storage::{LeadStore, Snapshot};
use crate::sync::{ReplyContext, ReplySyncStats, SyncCursor, sync_replies};

/// Result of one completed cycle
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub started_at: DateTime<Utc>,
    pub replies: ReplySyncStats,
    pub follow_ups: FollowUpStats,
    pub report: LeadReport,
    pub duration_ms: u64,
}

impl fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Cycle at {} finished in {} ms",
            self.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
            self.duration_ms
        )?;
        writeln!(
            f,
            "Replies: {} applied ({} interested, {} not interested, {} neutral), {} acknowledgment(s) sent",
            self.replies.replies_applied,
            self.replies.interested,
            self.replies.not_interested,
            self.replies.neutral,
            self.replies.acknowledgments_sent
        )?;
        if let Some(err) = &self.replies.poll_error {
            writeln!(f, "Reply poll incomplete: {}", err)?;
        }
        if self.follow_ups.disabled {
            writeln!(f, "Follow-ups: disabled")?;
        } else {
            writeln!(
                f,
                "Follow-ups: {} sent, {} failed, {} given up",
                self.follow_ups.follow_ups_sent,
                self.follow_ups.send_failures,
                self.follow_ups.exhausted
            )?;
        }
        writeln!(f)?;
        write!(f, "{}", self.report)
    }
}

/// Result of an initial outreach pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutreachStats {
    pub sent: usize,
    pub failed: usize,
    /// Leads already contacted or past `new`
    pub skipped: usize,
}

/// Orchestrates cycles over a message source, a store and a contact list
pub struct NurtureEngine {
    source: Arc<dyn MessageSource>,
    store: Arc<dyn LeadStore>,
    contacts: Arc<dyn ContactSource>,
    config: Arc<ConfigHandle>,
    /// Base directory for relative attachment paths
    attachment_dir: Option<PathBuf>,
    /// Held for the duration of every load-modify-save sequence
    cycle_lock: Mutex<()>,
    /// Provider profile address, looked up once
    account_address: Mutex<Option<String>>,
}

impl NurtureEngine {
    pub fn new(
        source: Arc<dyn MessageSource>,
        store: Arc<dyn LeadStore>,
        contacts: Arc<dyn ContactSource>,
        config: Arc<ConfigHandle>,
    ) -> Self {
        Self {
            source,
            store,
            contacts,
            config,
            attachment_dir: None,
            cycle_lock: Mutex::new(()),
            account_address: Mutex::new(None),
        }
    }

    /// Resolve relative attachment paths against `dir`
    pub fn with_attachment_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.attachment_dir = Some(dir.into());
        self
    }

    pub fn config(&self) -> &Arc<ConfigHandle> {
        &self.config
    }

    /// Run one full cycle now
    pub fn run_cycle(&self) -> Result<CycleOutcome, NurtureError> {
        self.run_cycle_at(Utc::now())
    }

    /// Run one full cycle as of `now`
    ///
    /// Provider failures are absorbed by the sync and follow-up steps. Only
    /// loading or saving the snapshot fails the cycle, and a failed save
    /// leaves the previous snapshot on disk.
    pub fn run_cycle_at(&self, now: DateTime<Utc>) -> Result<CycleOutcome, NurtureError> {
        let _guard = self.cycle_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let start = std::time::Instant::now();
        let config = self.config.snapshot();

        let (_, mut book, sync) = self.load_book()?;
        let mut cursor = SyncCursor::new(
            sync,
            config.sync.processed_id_cap,
            config.sync.initial_window_days,
        );
        info!(
            "Starting cycle: {} lead(s), watermark {}",
            book.len(),
            cursor
                .watermark()
                .map(|w| w.to_rfc3339())
                .unwrap_or_else(|| "none".to_string())
        );

        let sender = self.sender_address(&config);

        let replies = sync_replies(
            &mut book,
            &mut cursor,
            &ReplyContext {
                source: self.source.as_ref(),
                config: &config,
                sender: sender.as_ref(),
                now,
            },
        );

        let follow_ups = run_follow_ups(
            &mut book,
            &config,
            self.source.as_ref(),
            sender.as_ref(),
            now,
            &replies.touched,
        );

        self.save_book(&book, cursor.into_state())?;

        let report = LeadReport::from_book(&book, DEFAULT_TOP_N, now);
        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Cycle complete in {} ms: {} repl(ies), {} follow-up(s), {} lead(s) interested",
            duration_ms, replies.replies_applied, follow_ups.follow_ups_sent, report.interested
        );

        Ok(CycleOutcome {
            started_at: now,
            replies,
            follow_ups,
            report,
            duration_ms,
        })
    }

    /// Report over the current snapshot without running a cycle
    pub fn report(&self) -> Result<LeadReport, NurtureError> {
        let (_, book, _) = self.load_book()?;
        Ok(LeadReport::from_book(&book, DEFAULT_TOP_N, Utc::now()))
    }

    /// Number of active leads on the contact list
    pub fn lead_count(&self) -> Result<usize, NurtureError> {
        Ok(self.load_book()?.1.len())
    }

    /// Send the initial template to every lead never contacted
    pub fn send_initial_outreach(&self) -> Result<OutreachStats, NurtureError> {
        self.send_initial_outreach_at(Utc::now())
    }

    /// Send the initial template as of `now`
    ///
    /// A lead is only marked contacted after its message was accepted, so
    /// failed leads are picked up by the next pass.
    pub fn send_initial_outreach_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<OutreachStats, NurtureError> {
        let _guard = self.cycle_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let config = self.config.snapshot();

        let (contacts, mut book, sync) = self.load_book()?;
        let contacts: BTreeMap<LeadEmail, Contact> = contacts
            .into_iter()
            .map(|c| (c.email.clone(), c))
            .collect();
        let sender = self.sender_address(&config);
        let mut stats = OutreachStats::default();

        for lead in book.iter_mut() {
            if lead.status != LeadStatus::New || lead.last_contact.is_some() {
                stats.skipped += 1;
                continue;
            }

            let rendered = config.templates.render(TemplateKind::Initial, lead);
            let mut message =
                OutgoingMessage::new(lead.email.as_str(), rendered.subject, rendered.body)
                    .from(sender.clone());

            if let Some(contact) = contacts.get(&lead.email) {
                message = message.cc(&contact.cc).bcc(&contact.bcc);
                match self.load_attachments(contact) {
                    Ok(attachments) => {
                        for attachment in attachments {
                            message = message.attach(attachment);
                        }
                    }
                    Err(e) => {
                        warn!("Skipping outreach to {}: {:#}", lead.email, e);
                        stats.failed += 1;
                        continue;
                    }
                }
            }

            match message.to_rfc5322().and_then(|raw| self.source.send(&raw)) {
                Ok(id) => {
                    lead.record_outreach(now);
                    stats.sent += 1;
                    debug!("Initial outreach {} sent to {}", id, lead.email);
                }
                Err(e) => {
                    warn!("Failed to send initial outreach to {}: {}", lead.email, e);
                    stats.failed += 1;
                }
            }
        }

        self.save_book(&book, sync)?;
        info!(
            "Initial outreach: {} sent, {} failed, {} skipped",
            stats.sent, stats.failed, stats.skipped
        );
        Ok(stats)
    }

    /// Send a one-off message, e.g. a status summary
    pub fn send_test(
        &self,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<MessageId, NurtureError> {
        let to = to.trim();
        if !is_address(to) {
            return Err(NurtureError::invalid_argument(format!(
                "'{}' is not an email address",
                to
            )));
        }

        let config = self.config.snapshot();
        let raw = OutgoingMessage::new(to, subject, body)
            .from(self.sender_address(&config))
            .to_rfc5322()?;

        let id = self.source.send(&raw)?;
        info!("Test message {} sent to {}", id, to);
        Ok(id)
    }

    /// Address used as `From`: the configured sender, else the provider
    /// profile address
    pub fn sender_address(&self, config: &NurtureConfig) -> Option<EmailAddress> {
        let name = config.sender_name.clone().filter(|n| !n.is_empty());

        let email = match config.sender_email.clone().filter(|e| !e.is_empty()) {
            Some(email) => email,
            None => self.account_address()?,
        };

        Some(EmailAddress {
            name,
            email: email.to_lowercase(),
        })
    }

    fn account_address(&self) -> Option<String> {
        let mut cached = self
            .account_address
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if cached.is_none() {
            match self.source.account_address() {
                Ok(address) => *cached = address,
                Err(e) => warn!("Could not determine sender address: {}", e),
            }
        }
        cached.clone()
    }

    /// Load contacts and the stored snapshot and merge them
    fn load_book(
        &self,
    ) -> Result<(Vec<Contact>, LeadBook, crate::models::SyncState), NurtureError> {
        let contacts = self.contacts.load().map_err(|e| {
            error!("Failed to load contact list: {:#}", e);
            NurtureError::config(e)
        })?;
        let Snapshot { leads, sync } = self.store.load().map_err(|e| {
            error!("Failed to load lead snapshot: {:#}", e);
            NurtureError::persistence(e)
        })?;

        let book = LeadBook::from_contacts(&contacts, leads);
        if book.detached_len() > 0 {
            debug!(
                "{} tracking record(s) no longer on the contact list",
                book.detached_len()
            );
        }
        Ok((contacts, book, sync))
    }

    fn save_book(
        &self,
        book: &LeadBook,
        sync: crate::models::SyncState,
    ) -> Result<(), NurtureError> {
        let snapshot = Snapshot {
            leads: book.records(),
            sync,
        };
        self.store.save(&snapshot).map_err(|e| {
            error!("Failed to save lead snapshot: {:#}", e);
            NurtureError::persistence(e)
        })
    }

    fn load_attachments(&self, contact: &Contact) -> anyhow::Result<Vec<Attachment>> {
        contact
            .attachments
            .iter()
            .map(|path| {
                let path = PathBuf::from(path);
                let path = match &self.attachment_dir {
                    Some(dir) if path.is_relative() => dir.join(path),
                    _ => path,
                };
                Attachment::from_path(&path)
            })
            .collect()
    }
}

fn is_address(s: &str) -> bool {
    s.split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'))
        && !s.contains(char::is_whitespace)
}
