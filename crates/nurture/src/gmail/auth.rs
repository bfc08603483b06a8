//! Gmail OAuth2 token management
//!
//! Reads a previously authorized token from `gmail-tokens.json` and refreshes
//! it when it is about to expire. The interactive consent flow is not part of
//! the engine; the token file must already exist.
//! Uses synchronous HTTP (ureq) to be executor-agnostic.

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::config::GmailCredentials;
use crate::error::SourceError;

/// Token file name inside the data directory
pub const TOKEN_FILE: &str = "gmail-tokens.json";

/// Refresh this many seconds before the recorded expiry
const EXPIRY_BUFFER_SECS: i64 = 300;

/// OAuth2 configuration and token management for Gmail
pub struct GmailAuth {
    client_id: String,
    client_secret: String,
    token_path: PathBuf,
    /// Serializes refreshes so concurrent callers don't race on the file
    refresh_lock: Mutex<()>,
}

/// Stored token data
#[derive(Debug, Serialize, Deserialize)]
struct StoredToken {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: Option<i64>,
}

impl StoredToken {
    fn is_fresh(&self, now: i64) -> bool {
        self.expires_at
            .is_some_and(|expires_at| expires_at > now + EXPIRY_BUFFER_SECS)
    }
}

/// Token response from Google
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
}

impl GmailAuth {
    const TOKEN_URL: &'static str = "https://oauth2.googleapis.com/token";

    /// Create a new GmailAuth reading tokens from `data_dir`
    pub fn new(credentials: &GmailCredentials, data_dir: &Path) -> Self {
        Self {
            client_id: credentials.client_id.clone(),
            client_secret: credentials.client_secret.clone(),
            token_path: data_dir.join(TOKEN_FILE),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn token_path(&self) -> &Path {
        &self.token_path
    }

    /// Get a valid access token, refreshing as needed
    ///
    /// A missing or unreadable token file is a rejection: retrying will not
    /// help until someone authorizes the account again. A failed refresh
    /// request is transient.
    pub fn get_access_token(&self) -> Result<String, SourceError> {
        let _guard = self
            .refresh_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let token = self
            .load_token()
            .map_err(|e| SourceError::rejected("auth", format!("{:#}", e)))?;

        let now = chrono::Utc::now().timestamp();
        if token.is_fresh(now) {
            return Ok(token.access_token);
        }

        let Some(refresh_token) = token.refresh_token else {
            return Err(SourceError::rejected(
                "auth",
                "access token expired and no refresh token is stored",
            ));
        };

        debug!("Refreshing Gmail access token");
        let fresh = self.refresh_access_token(&refresh_token)?;
        self.save_token_response(&fresh)
            .map_err(|e| SourceError::rejected("auth", format!("{:#}", e)))?;
        info!("Gmail access token refreshed");
        Ok(fresh.access_token)
    }

    /// Check whether a usable token is stored, without refreshing
    pub fn is_authenticated(&self) -> bool {
        match self.load_token() {
            Ok(token) => {
                token.is_fresh(chrono::Utc::now().timestamp()) || token.refresh_token.is_some()
            }
            Err(_) => false,
        }
    }

    /// Refresh an access token using a refresh token
    fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenResponse, SourceError> {
        let response = ureq::post(Self::TOKEN_URL).send_form([
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ]);

        let mut token: TokenResponse = match response {
            Ok(resp) => resp.into_body().read_json().map_err(|e| {
                SourceError::rejected("auth", format!("Failed to parse refresh response: {}", e))
            })?,
            Err(ureq::Error::StatusCode(code @ (400 | 401))) => {
                return Err(SourceError::rejected(
                    "auth",
                    format!("refresh token rejected ({})", code),
                ));
            }
            Err(e) => {
                return Err(SourceError::transient(
                    "auth",
                    format!("Failed to refresh access token: {}", e),
                ));
            }
        };

        // Preserve the refresh token if not returned
        if token.refresh_token.is_none() {
            token.refresh_token = Some(refresh_token.to_string());
        }

        Ok(token)
    }

    /// Load stored token from disk
    fn load_token(&self) -> Result<StoredToken> {
        ::config::load_json_file(&self.token_path).with_context(|| {
            format!(
                "No usable Gmail token at {}; authorize the account first",
                self.token_path.display()
            )
        })
    }

    /// Save token response to disk
    fn save_token_response(&self, token: &TokenResponse) -> Result<()> {
        let stored = StoredToken {
            access_token: token.access_token.clone(),
            refresh_token: token.refresh_token.clone(),
            expires_at: token
                .expires_in
                .map(|d| chrono::Utc::now().timestamp() + d as i64),
        };

        ::config::save_json_file(&self.token_path, &stored)
    }
}
