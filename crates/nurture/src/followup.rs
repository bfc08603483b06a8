//! Follow-up scheduler
//!
//! Decides per lead and per cycle whether a scripted follow-up is due.
//! Only leads still waiting on a reply (`new`/`contacted`) with a recorded
//! `last_contact` are considered, and at most one follow-up fires per lead
//! per cycle.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::BTreeSet;

use crate::config::{FollowUpSchedule, NurtureConfig};
use crate::models::{EmailAddress, Lead, LeadBook, LeadEmail};
use crate::outbound::{OutgoingMessage, TemplateKind};
use crate::source::MessageSource;

/// A follow-up that is due for one lead
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FollowUpStep {
    /// 1-based follow-up number about to be sent
    pub number: u32,
    /// Whole days since last contact
    pub elapsed_days: i64,
    pub template: TemplateKind,
}

/// Statistics from one scheduler pass
#[derive(Debug, Default, Clone)]
pub struct FollowUpStats {
    /// Leads eligible by status and with a last contact
    pub leads_considered: usize,
    pub follow_ups_sent: usize,
    /// Transient send failures. These leads are retried next cycle.
    pub send_failures: usize,
    /// Leads given up on this pass after their last follow-up
    pub exhausted: usize,
    /// Leads skipped because a reply touched them this cycle
    pub skipped_touched: usize,
    /// Set when automatic follow-ups are switched off
    pub disabled: bool,
}

/// Whether a follow-up is due for `lead` at `now`
///
/// The first follow-up waits `followup_1_days` of silence, later ones
/// `followup_2_days`, both counted in whole days since `last_contact`.
/// Returns `None` once `max_follow_ups` have been sent.
pub fn due_follow_up(
    lead: &Lead,
    schedule: &FollowUpSchedule,
    now: DateTime<Utc>,
) -> Option<FollowUpStep> {
    if !lead.status.awaits_follow_up() {
        return None;
    }
    let last_contact = lead.last_contact?;
    if lead.follow_up_count >= schedule.max_follow_ups {
        return None;
    }

    let elapsed_days = (now - last_contact).num_days();
    let threshold = if lead.follow_up_count == 0 {
        schedule.followup_1_days
    } else {
        schedule.followup_2_days
    };

    (elapsed_days >= threshold).then(|| {
        let number = lead.follow_up_count + 1;
        FollowUpStep {
            number,
            elapsed_days,
            template: TemplateKind::follow_up(number),
        }
    })
}

/// Send every due follow-up and record it on the lead
///
/// A lead is only mutated after its follow-up was accepted by the source,
/// so a failed send leaves it eligible next cycle. Leads in `skip` (touched
/// by a reply this cycle) are left alone.
pub fn run_follow_ups(
    book: &mut LeadBook,
    config: &NurtureConfig,
    source: &dyn MessageSource,
    sender: Option<&EmailAddress>,
    now: DateTime<Utc>,
    skip: &BTreeSet<LeadEmail>,
) -> FollowUpStats {
    let mut stats = FollowUpStats::default();

    if !config.automation.auto_send_follow_ups {
        debug!("Automatic follow-ups disabled");
        stats.disabled = true;
        return stats;
    }

    let schedule = &config.follow_up_schedule;

    for lead in book.iter_mut() {
        if !lead.status.awaits_follow_up() || lead.last_contact.is_none() {
            continue;
        }
        stats.leads_considered += 1;

        if skip.contains(&lead.email) {
            stats.skipped_touched += 1;
            continue;
        }

        let Some(step) = due_follow_up(lead, schedule, now) else {
            continue;
        };

        let rendered = config.templates.render(step.template, lead);
        let sent = OutgoingMessage::new(lead.email.as_str(), rendered.subject, rendered.body)
            .from(sender.cloned())
            .to_rfc5322()
            .and_then(|raw| source.send(&raw));

        if let Err(e) = sent {
            warn!(
                "Failed to send follow-up {} to {}: {}",
                step.number, lead.email, e
            );
            stats.send_failures += 1;
            continue;
        }

        let effect = lead.record_follow_up(schedule.max_follow_ups, now);
        stats.follow_ups_sent += 1;
        info!(
            "Follow-up {} sent to {} after {} day(s) of silence",
            effect.number, lead.email, step.elapsed_days
        );

        if effect.exhausted {
            stats.exhausted += 1;
            info!(
                "No reply from {} after {} follow-up(s), marking not interested",
                lead.email, effect.number
            );
        }
    }

    stats
}
