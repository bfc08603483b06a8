//! Read-only aggregation over lead records

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::models::{Lead, LeadBook, LeadEmail, LeadStatus};

/// Number of leads listed in the ranked sections
pub const DEFAULT_TOP_N: usize = 5;

/// One row of a ranked section
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeadSummary {
    pub email: LeadEmail,
    pub name: String,
    pub status: LeadStatus,
    pub lead_score: i64,
    pub last_contact: Option<DateTime<Utc>>,
}

impl LeadSummary {
    fn from_lead(lead: &Lead) -> Self {
        Self {
            email: lead.email.clone(),
            name: lead.display_name(),
            status: lead.status,
            lead_score: lead.lead_score,
            last_contact: lead.last_contact,
        }
    }
}

/// Aggregate statistics over all active leads
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeadReport {
    pub generated_at: DateTime<Utc>,
    pub total: usize,
    /// Leads past `new`
    pub contacted: usize,
    /// Leads with at least one reply
    pub responded: usize,
    pub interested: usize,
    /// `responded / contacted`, 0 when nobody was contacted
    pub response_rate: f64,
    /// `interested / responded`, 0 when nobody responded
    pub interest_rate: f64,
    /// Count per status in state-machine order
    pub by_status: Vec<(LeadStatus, usize)>,
    pub total_responses: u64,
    pub average_score: f64,
    pub max_score: Option<i64>,
    pub min_score: Option<i64>,
    /// Given up on after the last follow-up, as opposed to opting out
    pub follow_ups_exhausted: usize,
    /// Highest scores first
    pub top_leads: Vec<LeadSummary>,
    /// Most recent `last_contact` first
    pub recent_activity: Vec<LeadSummary>,
}

impl LeadReport {
    pub fn from_book(book: &LeadBook, top_n: usize, now: DateTime<Utc>) -> Self {
        Self::from_leads(book.iter(), top_n, now)
    }

    pub fn from_leads<'a>(
        leads: impl IntoIterator<Item = &'a Lead>,
        top_n: usize,
        now: DateTime<Utc>,
    ) -> Self {
        let leads: Vec<&Lead> = leads.into_iter().collect();
        let total = leads.len();

        // A lead that wrote in first has been in contact even while still new
        let contacted = leads
            .iter()
            .filter(|l| l.status != LeadStatus::New || l.response_count > 0)
            .count();
        let responded = leads.iter().filter(|l| l.response_count > 0).count();
        let interested = leads
            .iter()
            .filter(|l| l.status == LeadStatus::Interested)
            .count();

        let by_status = LeadStatus::ALL
            .iter()
            .map(|s| (*s, leads.iter().filter(|l| l.status == *s).count()))
            .collect();

        let total_responses = leads.iter().map(|l| u64::from(l.response_count)).sum();
        let score_sum: i64 = leads.iter().map(|l| l.lead_score).sum();

        let mut top_leads: Vec<&Lead> = leads.clone();
        // Stable sort keeps email order among equal scores
        top_leads.sort_by(|a, b| b.lead_score.cmp(&a.lead_score));

        let mut recent: Vec<&Lead> = leads
            .iter()
            .copied()
            .filter(|l| l.last_contact.is_some())
            .collect();
        recent.sort_by(|a, b| b.last_contact.cmp(&a.last_contact));

        Self {
            generated_at: now,
            total,
            contacted,
            responded,
            interested,
            response_rate: ratio(responded, contacted),
            interest_rate: ratio(interested, responded),
            by_status,
            total_responses,
            average_score: if total == 0 {
                0.0
            } else {
                score_sum as f64 / total as f64
            },
            max_score: leads.iter().map(|l| l.lead_score).max(),
            min_score: leads.iter().map(|l| l.lead_score).min(),
            follow_ups_exhausted: leads.iter().filter(|l| l.is_exhausted()).count(),
            top_leads: top_leads
                .into_iter()
                .take(top_n)
                .map(LeadSummary::from_lead)
                .collect(),
            recent_activity: recent
                .into_iter()
                .take(top_n)
                .map(LeadSummary::from_lead)
                .collect(),
        }
    }

    /// Count for one status
    pub fn count(&self, status: LeadStatus) -> usize {
        self.by_status
            .iter()
            .find(|(s, _)| *s == status)
            .map_or(0, |(_, n)| *n)
    }
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

impl fmt::Display for LeadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Lead nurturing report ({})",
            self.generated_at.format("%Y-%m-%d %H:%M UTC")
        )?;
        writeln!(f, "Total leads:     {}", self.total)?;
        writeln!(f, "Contacted:       {}", self.contacted)?;
        writeln!(
            f,
            "Responded:       {} ({:.1}% of contacted)",
            self.responded,
            self.response_rate * 100.0
        )?;
        writeln!(
            f,
            "Interested:      {} ({:.1}% of responders)",
            self.interested,
            self.interest_rate * 100.0
        )?;
        writeln!(f, "Total responses: {}", self.total_responses)?;
        writeln!(f, "Gave up (no reply after follow-ups): {}", self.follow_ups_exhausted)?;

        writeln!(f)?;
        writeln!(f, "By status:")?;
        for (status, count) in &self.by_status {
            writeln!(f, "  {:<15} {}", status.as_str(), count)?;
        }

        if let (Some(max), Some(min)) = (self.max_score, self.min_score) {
            writeln!(f)?;
            writeln!(
                f,
                "Scores: average {:.1}, max {}, min {}",
                self.average_score, max, min
            )?;
        }

        if !self.top_leads.is_empty() {
            writeln!(f)?;
            writeln!(f, "Top leads by score:")?;
            for (i, lead) in self.top_leads.iter().enumerate() {
                writeln!(
                    f,
                    "  {}. {} <{}>: {} ({})",
                    i + 1,
                    lead.name,
                    lead.email,
                    lead.lead_score,
                    lead.status
                )?;
            }
        }

        if !self.recent_activity.is_empty() {
            writeln!(f)?;
            writeln!(f, "Recent activity:")?;
            for lead in &self.recent_activity {
                let when = lead
                    .last_contact
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                writeln!(f, "  {}  {} <{}> ({})", when, lead.name, lead.email, lead.status)?;
            }
        }

        Ok(())
    }
}
