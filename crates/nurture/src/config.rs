//! Configuration loading for the nurturing engine
//!
//! Two kinds of configuration live here:
//! - [`NurtureConfig`], the engine document (`nurturing_config.json`), every
//!   section optional and defaulted
//! - [`GmailCredentials`], the OAuth client for the Gmail adapter
//!
//! [`ConfigHandle`] holds the current engine document behind an atomic
//! pointer swap. A cycle takes one snapshot at its start and never sees a
//! later update.

use anyhow::{Context, Result, bail};
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Engine configuration filename in the data directory
pub const CONFIG_FILE: &str = "nurturing_config.json";

/// Credentials filename in the data directory
const CREDENTIALS_FILE: &str = "google-credentials.json";

/// Automation toggles and loop interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Automation {
    pub check_responses_interval_hours: u64,
    pub auto_respond_to_interest: bool,
    pub auto_send_follow_ups: bool,
}

impl Default for Automation {
    fn default() -> Self {
        Self {
            check_responses_interval_hours: 4,
            auto_respond_to_interest: true,
            auto_send_follow_ups: true,
        }
    }
}

/// Keyword lists per classification outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseKeywords {
    pub interested: Vec<String>,
    pub not_interested: Vec<String>,
}

impl Default for ResponseKeywords {
    fn default() -> Self {
        Self {
            interested: ["interested", "yes", "demo", "call", "meeting"]
                .map(String::from)
                .to_vec(),
            not_interested: ["not interested", "no thanks", "stop", "unsubscribe"]
                .map(String::from)
                .to_vec(),
        }
    }
}

/// Score deltas per classification outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeadScoring {
    /// Added for any interested reply
    pub response_bonus: i64,
    /// Added on top of `response_bonus` for an interested reply
    pub interest_bonus: i64,
    /// Added for a reply matching neither keyword list
    pub neutral_bonus: i64,
    /// Subtracted for an explicit opt-out
    pub not_interested_penalty: i64,
}

impl Default for LeadScoring {
    fn default() -> Self {
        Self {
            response_bonus: 5,
            interest_bonus: 5,
            neutral_bonus: 2,
            not_interested_penalty: 5,
        }
    }
}

/// Follow-up thresholds in whole days since last contact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FollowUpSchedule {
    pub followup_1_days: i64,
    pub followup_2_days: i64,
    pub max_follow_ups: u32,
}

impl Default for FollowUpSchedule {
    fn default() -> Self {
        Self {
            followup_1_days: 3,
            followup_2_days: 7,
            max_follow_ups: 2,
        }
    }
}

/// Inbound polling parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Upper bound on remembered message ids
    pub processed_id_cap: usize,
    /// Window used before the first successful poll
    pub initial_window_days: u32,
    /// Page size requested from the provider
    pub page_size: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            processed_id_cap: 500,
            initial_window_days: 1,
            page_size: 100,
        }
    }
}

/// Message templates. `{{first_name}}` and `{{company}}` are substituted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Templates {
    pub initial_subject: String,
    pub initial: String,
    pub follow_up_subject: String,
    pub followup_1: String,
    pub followup_2: String,
    pub interested_subject: String,
    pub interested: String,
}

impl Default for Templates {
    fn default() -> Self {
        Self {
            initial_subject: "Quick question for {{company}}".to_string(),
            initial: "Hi {{first_name}},\n\n\
                      I'm reaching out because we help teams like {{company}} follow up \
                      with every inbound lead automatically.\n\n\
                      Do you have time for a 10-minute call this week?\n\n\
                      Thank you"
                .to_string(),
            follow_up_subject: "Following up".to_string(),
            followup_1: "Hi {{first_name}},\n\n\
                         Following up on my earlier message.\n\n\
                         Quick question: what's your biggest challenge with lead \
                         follow-ups at {{company}} right now?\n\n\
                         Best"
                .to_string(),
            followup_2: "Hi {{first_name}},\n\n\
                         I understand you might not be ready to discuss this right now.\n\n\
                         If you'd like a quick demo, just reply with \"demo\".\n\n\
                         I'll stop following up after this.\n\n\
                         Best"
                .to_string(),
            interested_subject: "Re: Next steps".to_string(),
            interested: "Hi {{first_name}},\n\n\
                         Great to hear from you!\n\n\
                         Here's a link to book a 10-minute demo: [Calendar Link]\n\n\
                         Looking forward to showing you how this can help {{company}}.\n\n\
                         Best"
                .to_string(),
        }
    }
}

/// The engine configuration document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NurtureConfig {
    pub automation: Automation,
    pub response_keywords: ResponseKeywords,
    pub lead_scoring: LeadScoring,
    pub follow_up_schedule: FollowUpSchedule,
    pub sync: SyncSettings,
    pub templates: Templates,
    pub sender_email: Option<String>,
    pub sender_name: Option<String>,
}

impl NurtureConfig {
    /// Parse a configuration document and normalize it
    pub fn from_json(json: &str) -> Result<Self> {
        let config: NurtureConfig =
            serde_json::from_str(json).context("Failed to parse nurturing config JSON")?;
        config.normalized()
    }

    /// Load from a file, falling back to defaults when it doesn't exist
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match ::config::load_json_file_opt::<NurtureConfig>(path)? {
            Some(config) => config.normalized(),
            None => {
                log::info!(
                    "No config at {}, using engine defaults",
                    path.display()
                );
                Ok(Self::default())
            }
        }
    }

    /// Trim and lowercase keywords, drop empty ones, then validate
    pub fn normalized(mut self) -> Result<Self> {
        for list in [
            &mut self.response_keywords.interested,
            &mut self.response_keywords.not_interested,
        ] {
            *list = list
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect();
        }
        self.sender_email = self
            .sender_email
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        self.sender_name = self
            .sender_name
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        let schedule = &self.follow_up_schedule;
        if schedule.followup_1_days < 0 {
            bail!("follow_up_schedule.followup_1_days must not be negative");
        }
        if schedule.followup_1_days >= schedule.followup_2_days {
            bail!(
                "follow_up_schedule.followup_1_days ({}) must be less than followup_2_days ({})",
                schedule.followup_1_days,
                schedule.followup_2_days
            );
        }
        if self.sync.processed_id_cap == 0 {
            bail!("sync.processed_id_cap must be at least 1");
        }
        if self.sync.page_size == 0 {
            bail!("sync.page_size must be at least 1");
        }
        if self.automation.check_responses_interval_hours == 0 {
            bail!("automation.check_responses_interval_hours must be at least 1");
        }
        Ok(())
    }

    /// Apply a partial JSON document on top of this one
    ///
    /// Objects merge key by key; any other value replaces what was there.
    pub fn merged(&self, partial: &serde_json::Value) -> Result<Self> {
        if !partial.is_object() {
            bail!("Config update must be a JSON object");
        }
        let mut current =
            serde_json::to_value(self).context("Failed to serialize current config")?;
        merge_json(&mut current, partial);
        let merged: NurtureConfig =
            serde_json::from_value(current).context("Config update has invalid values")?;
        merged.normalized()
    }
}

fn merge_json(target: &mut serde_json::Value, patch: &serde_json::Value) {
    match (target, patch) {
        (serde_json::Value::Object(target), serde_json::Value::Object(patch)) => {
            for (key, value) in patch {
                merge_json(
                    target.entry(key.clone()).or_insert(serde_json::Value::Null),
                    value,
                );
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

/// Shared, atomically replaceable engine configuration
pub struct ConfigHandle {
    current: ArcSwap<NurtureConfig>,
    path: Option<PathBuf>,
    /// Serializes writers; readers never take it
    write_lock: Mutex<()>,
}

impl ConfigHandle {
    /// A handle that is never written to disk
    pub fn new(config: NurtureConfig) -> Self {
        Self {
            current: ArcSwap::from_pointee(config),
            path: None,
            write_lock: Mutex::new(()),
        }
    }

    /// Load the document at `path` (defaults if absent) and persist updates there
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let config = NurtureConfig::load_or_default(&path)?;
        Ok(Self {
            current: ArcSwap::from_pointee(config),
            path: Some(path),
            write_lock: Mutex::new(()),
        })
    }

    /// The configuration to use for the whole of one cycle
    pub fn snapshot(&self) -> Arc<NurtureConfig> {
        self.current.load_full()
    }

    /// Replace the whole configuration
    pub fn replace(&self, config: NurtureConfig) -> Result<Arc<NurtureConfig>> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let config = config.normalized()?;
        self.persist(&config)?;
        let config = Arc::new(config);
        self.current.store(Arc::clone(&config));
        Ok(config)
    }

    /// Merge a partial document into the current configuration
    ///
    /// Validation and persistence happen before the swap, so a bad update
    /// leaves the running configuration untouched.
    pub fn update(&self, partial: &serde_json::Value) -> Result<Arc<NurtureConfig>> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let merged = self.snapshot().merged(partial)?;
        self.persist(&merged)?;
        let merged = Arc::new(merged);
        self.current.store(Arc::clone(&merged));
        Ok(merged)
    }

    /// Re-read the document from disk
    pub fn reload(&self) -> Result<Arc<NurtureConfig>> {
        let Some(path) = &self.path else {
            return Ok(self.snapshot());
        };
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let config = Arc::new(NurtureConfig::load_or_default(path)?);
        self.current.store(Arc::clone(&config));
        Ok(config)
    }

    fn persist(&self, config: &NurtureConfig) -> Result<()> {
        if let Some(path) = &self.path {
            ::config::save_json_file(path, config)?;
        }
        Ok(())
    }
}

/// OAuth credentials for Gmail API access
#[derive(Debug, Clone)]
pub struct GmailCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// Google Cloud Console credential file format (installed app)
#[derive(Deserialize)]
struct GoogleCredentialFile {
    installed: Option<InstalledCredentials>,
    web: Option<InstalledCredentials>,
}

#[derive(Deserialize)]
struct InstalledCredentials {
    client_id: String,
    client_secret: String,
}

impl GmailCredentials {
    /// Load credentials using the following priority:
    /// 1. Compile-time embedded credentials
    /// 2. `google-credentials.json` in `data_dir`
    /// 3. Runtime environment variables
    pub fn load(data_dir: &Path) -> Result<Self> {
        if let Some(creds) = Self::from_compile_time() {
            return Ok(creds);
        }

        let path = data_dir.join(CREDENTIALS_FILE);
        if path.exists() {
            return Self::from_file(&path);
        }

        Self::from_env()
    }

    /// Credentials embedded at build time via GOOGLE_CLIENT_ID / GOOGLE_CLIENT_SECRET
    pub fn from_compile_time() -> Option<Self> {
        let client_id = option_env!("GOOGLE_CLIENT_ID")?;
        let client_secret = option_env!("GOOGLE_CLIENT_SECRET")?;

        if client_id.is_empty() || client_secret.is_empty() {
            return None;
        }

        Some(Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        })
    }

    /// Load credentials from a specific JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let creds: GoogleCredentialFile = ::config::load_json_file(path)?;
        Self::from_credential_file(creds)
    }

    fn from_credential_file(creds: GoogleCredentialFile) -> Result<Self> {
        // Support both "installed" (desktop) and "web" credential types
        let installed = creds
            .installed
            .or(creds.web)
            .context("Credentials file missing 'installed' or 'web' section")?;

        Ok(Self {
            client_id: installed.client_id,
            client_secret: installed.client_secret,
        })
    }

    /// Parse credentials from JSON string (Google Cloud Console format)
    pub fn from_json(json: &str) -> Result<Self> {
        let creds: GoogleCredentialFile =
            serde_json::from_str(json).context("Failed to parse credentials JSON")?;
        Self::from_credential_file(creds)
    }

    /// Load credentials from environment variables
    pub fn from_env() -> Result<Self> {
        let client_id = std::env::var("GMAIL_CLIENT_ID")
            .context("GMAIL_CLIENT_ID environment variable not set")?;
        let client_secret = std::env::var("GMAIL_CLIENT_SECRET")
            .context("GMAIL_CLIENT_SECRET environment variable not set")?;

        Ok(Self {
            client_id,
            client_secret,
        })
    }
}
