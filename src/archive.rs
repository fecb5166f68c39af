//! Archival client for terminal procedure results.
//!
//! After a run reaches its terminal state the procedure is POSTed as JSON
//! to a configured external record store with a bearer token. Archiving is
//! best-effort by design: transport and auth failures are logged by the
//! caller and never affect the run outcome or the observer connection.

use reqwest::Client;

use crate::config::ArchiveSettings;
use crate::core::Procedure;
use crate::error::AppResult;

/// HTTP client posting finished procedures to the record store.
#[derive(Clone, Debug)]
pub struct ArchiveClient {
    url: String,
    token: String,
    client: Client,
}

impl ArchiveClient {
    /// Build a client when archiving is configured. Returns `None` when the
    /// url or token is missing, which disables archiving silently.
    pub fn from_settings(settings: &ArchiveSettings) -> Option<Self> {
        if settings.url.is_empty() || settings.access_token.is_empty() {
            return None;
        }
        Some(Self {
            url: settings.url.clone(),
            token: settings.access_token.clone(),
            client: Client::new(),
        })
    }

    /// POST one terminal procedure. The caller decides what to do with a
    /// failure (log and move on).
    pub async fn post(&self, procedure: &Procedure) -> AppResult<()> {
        self.client
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(procedure)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
