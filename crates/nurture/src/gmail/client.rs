//! Gmail API HTTP client
//!
//! Implements [`MessageSource`] over the Gmail REST API.
//! Uses synchronous HTTP (ureq) to be executor-agnostic.

use base64::prelude::*;
use log::{debug, warn};
use std::time::Duration;

use super::GmailAuth;
use super::api::{
    GmailMessage, ListMessagesResponse, ProfileResponse, SendRequest, SendResponse,
};
use super::normalize::normalize_message;
use crate::error::SourceError;
use crate::models::{FetchedMessage, MessageId};
use crate::source::{InboxQuery, MessageSource, SearchPage};

/// Gmail API client
pub struct GmailClient {
    auth: GmailAuth,
    page_size: usize,
    max_retries: u32,
}

impl GmailClient {
    /// Gmail API base URL
    const BASE_URL: &'static str = "https://gmail.googleapis.com/gmail/v1";

    /// Create a new Gmail client
    pub fn new(auth: GmailAuth) -> Self {
        Self {
            auth,
            page_size: 100,
            max_retries: 3,
        }
    }

    /// Results per search page (clamped to 1..=500)
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.clamp(1, 500);
        self
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth.is_authenticated()
    }

    /// List message ids matching a Gmail search query
    pub fn list_messages(
        &self,
        query: &str,
        page_token: Option<&str>,
    ) -> Result<ListMessagesResponse, SourceError> {
        let mut url = format!(
            "{}/users/me/messages?q={}&maxResults={}",
            Self::BASE_URL,
            urlencoding::encode(query),
            self.page_size
        );

        if let Some(token) = page_token {
            url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
        }

        self.with_retry("search", || {
            let access_token = self.auth.get_access_token()?;
            let mut response = ureq::get(&url)
                .header("Authorization", &format!("Bearer {}", access_token))
                .call()
                .map_err(|e| classify_http_error("search", e))?;

            response
                .body_mut()
                .read_json()
                .map_err(|e| {
                    SourceError::rejected("search", format!("Failed to parse list response: {}", e))
                })
        })
    }

    /// Get full message details by ID
    pub fn get_message(&self, id: &MessageId) -> Result<GmailMessage, SourceError> {
        let url = format!(
            "{}/users/me/messages/{}?format=full",
            Self::BASE_URL,
            urlencoding::encode(id.as_str())
        );

        self.with_retry("fetch", || {
            let access_token = self.auth.get_access_token()?;
            let mut response = ureq::get(&url)
                .header("Authorization", &format!("Bearer {}", access_token))
                .call()
                .map_err(|e| classify_http_error("fetch", e))?;

            response
                .body_mut()
                .read_json()
                .map_err(|e| {
                    SourceError::rejected("fetch", format!("Failed to parse message {}: {}", id, e))
                })
        })
    }

    /// Send a raw RFC 5322 message
    ///
    /// Not retried: a send that timed out may still have gone through, and
    /// the engine treats the failure as transient for the next cycle.
    pub fn send_raw(&self, raw_message: &str) -> Result<SendResponse, SourceError> {
        let access_token = self.auth.get_access_token()?;
        let url = format!("{}/users/me/messages/send", Self::BASE_URL);
        let body = SendRequest {
            raw: BASE64_URL_SAFE.encode(raw_message.as_bytes()),
        };

        let mut response = ureq::post(&url)
            .header("Authorization", &format!("Bearer {}", access_token))
            .send_json(&body)
            .map_err(|e| classify_http_error("send", e))?;

        response
            .body_mut()
            .read_json()
            .map_err(|e| {
                SourceError::rejected("send", format!("Failed to parse send response: {}", e))
            })
    }

    /// Get the authenticated user's profile
    pub fn get_profile(&self) -> Result<ProfileResponse, SourceError> {
        let url = format!("{}/users/me/profile", Self::BASE_URL);

        self.with_retry("profile", || {
            let access_token = self.auth.get_access_token()?;
            let mut response = ureq::get(&url)
                .header("Authorization", &format!("Bearer {}", access_token))
                .call()
                .map_err(|e| classify_http_error("profile", e))?;

            response
                .body_mut()
                .read_json()
                .map_err(|e| {
                    SourceError::rejected("profile", format!("Failed to parse profile: {}", e))
                })
        })
    }

    /// Run `op`, retrying transient failures with exponential backoff
    fn with_retry<T>(
        &self,
        operation: &str,
        mut op: impl FnMut() -> Result<T, SourceError>,
    ) -> Result<T, SourceError> {
        let mut delay = Duration::from_millis(100);
        let mut attempt = 1;

        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    debug!("{} attempt {} failed: {}", operation, attempt, e);
                    // Add jitter to delay
                    let jitter = Duration::from_millis(rand_jitter());
                    std::thread::sleep(delay + jitter);
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl MessageSource for GmailClient {
    fn search(
        &self,
        query: &InboxQuery,
        page_token: Option<&str>,
    ) -> Result<SearchPage, SourceError> {
        let response = self.list_messages(&query.to_provider_query(), page_token)?;

        Ok(SearchPage {
            message_ids: response
                .messages
                .unwrap_or_default()
                .into_iter()
                .map(|m| MessageId::new(m.id))
                .collect(),
            next_page_token: response.next_page_token.filter(|t| !t.is_empty()),
        })
    }

    fn fetch(&self, id: &MessageId) -> Result<FetchedMessage, SourceError> {
        let message = self.get_message(id)?;
        normalize_message(message).map_err(|e| SourceError::rejected("fetch", format!("{:#}", e)))
    }

    fn send(&self, raw_message: &str) -> Result<MessageId, SourceError> {
        let response = self.send_raw(raw_message)?;
        Ok(MessageId::new(response.id))
    }

    fn account_address(&self) -> Result<Option<String>, SourceError> {
        match self.get_profile() {
            Ok(profile) => Ok(Some(profile.email_address)),
            Err(e) => {
                warn!("Could not read Gmail profile: {}", e);
                Err(e)
            }
        }
    }
}

/// Map a ureq error onto the transient/rejected split
///
/// Rate limiting, server errors and transport failures are transient.
/// Any other status means the request itself was refused.
fn classify_http_error(operation: &str, err: ureq::Error) -> SourceError {
    match err {
        ureq::Error::StatusCode(code) if code == 429 || code >= 500 => {
            SourceError::transient(operation, format!("HTTP {}", code))
        }
        ureq::Error::StatusCode(code) => SourceError::rejected(operation, format!("HTTP {}", code)),
        other => SourceError::transient(operation, other.to_string()),
    }
}

/// Generate a random jitter value (0-100ms)
fn rand_jitter() -> u64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let hasher = RandomState::new().build_hasher();
    hasher.finish() % 100
}
