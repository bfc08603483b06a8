//! The in-memory lead map for one cycle

use std::collections::BTreeMap;

use super::{Contact, Lead, LeadEmail, LeadRecord};

/// All leads known to the engine, keyed by normalized email
///
/// Tracking records whose email is no longer on the contact list are kept
/// aside untouched and written back on save. The engine never deletes a
/// record; removing a contact from the list only stops nurturing it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LeadBook {
    leads: BTreeMap<LeadEmail, Lead>,
    detached: BTreeMap<LeadEmail, LeadRecord>,
}

impl LeadBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge the contact list with persisted tracking records
    ///
    /// Contacts without a record start as fresh `new` leads. Duplicate
    /// contact rows keep the first occurrence.
    pub fn from_contacts(
        contacts: &[Contact],
        mut records: BTreeMap<LeadEmail, LeadRecord>,
    ) -> Self {
        let mut leads = BTreeMap::new();
        for contact in contacts {
            if leads.contains_key(&contact.email) {
                continue;
            }
            let record = records.remove(&contact.email).unwrap_or_default();
            leads.insert(contact.email.clone(), Lead::from_contact(contact, record));
        }

        Self {
            leads,
            detached: records,
        }
    }

    pub fn insert(&mut self, lead: Lead) {
        self.detached.remove(&lead.email);
        self.leads.insert(lead.email.clone(), lead);
    }

    pub fn get(&self, email: &str) -> Option<&Lead> {
        self.leads.get(&LeadEmail::new(email))
    }

    pub fn get_mut(&mut self, email: &str) -> Option<&mut Lead> {
        self.leads.get_mut(&LeadEmail::new(email))
    }

    pub fn contains(&self, email: &str) -> bool {
        self.leads.contains_key(&LeadEmail::new(email))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Lead> {
        self.leads.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Lead> {
        self.leads.values_mut()
    }

    /// Number of active leads
    pub fn len(&self) -> usize {
        self.leads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leads.is_empty()
    }

    /// Number of records kept for emails no longer on the contact list
    pub fn detached_len(&self) -> usize {
        self.detached.len()
    }

    /// Every tracking record to persist: active leads plus detached ones
    pub fn records(&self) -> BTreeMap<LeadEmail, LeadRecord> {
        let mut out = self.detached.clone();
        for (email, lead) in &self.leads {
            out.insert(email.clone(), lead.record());
        }
        out
    }
}
