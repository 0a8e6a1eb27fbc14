//! Client for the databox HTTP gateway.
//!
//! The gateway fronts the Austrian government portals (FinanzOnline databox,
//! ELDA, Firmenbuch) with a JSON API: open a session, list new entries for a
//! date range, download individual documents, close the session. This crate
//! only speaks the gateway protocol; polling policy, persistence and
//! deduplication live in the server.

pub mod error;
pub mod models;

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};

pub use error::DataboxError;
pub use models::{DataboxCredentials, DataboxDownload, DataboxEntry, DataboxSession};

use models::{ListResponse, SessionResponse};

#[derive(Debug, Clone)]
pub struct DataboxClientOptions {
    /// Base URL of the gateway, e.g. `https://databox-gw.internal`.
    pub base_url: String,
    /// Per-request timeout. Downloads get 4x this.
    pub timeout: Duration,
}

impl Default for DataboxClientOptions {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8085".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DataboxClient {
    options: DataboxClientOptions,
    client: Client,
}

impl DataboxClient {
    pub fn new(options: DataboxClientOptions) -> Result<Self, DataboxError> {
        let client = Client::builder()
            .timeout(options.timeout * 4)
            .build()
            .map_err(DataboxError::Transport)?;

        Ok(Self { options, client })
    }

    /// Open an authenticated session for one account.
    pub async fn open_session(
        &self,
        credentials: &DataboxCredentials,
    ) -> Result<DataboxSession, DataboxError> {
        let url = format!("{}/v1/sessions", self.options.base_url);

        let response = self
            .client
            .post(&url)
            .timeout(self.options.timeout)
            .json(&credentials)
            .send()
            .await?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                let message = response.text().await.unwrap_or_default();
                return Err(DataboxError::Auth {
                    subscriber_id: credentials.subscriber_id.clone(),
                    message,
                });
            }
            StatusCode::TOO_MANY_REQUESTS => return Err(DataboxError::RateLimited),
            status if !status.is_success() => {
                return Err(DataboxError::Decode(format!("session open: HTTP {status}")));
            }
            _ => {}
        }

        let body: SessionResponse = response
            .json()
            .await
            .map_err(|e| DataboxError::Decode(e.to_string()))?;

        tracing::debug!(subscriber_id = %credentials.subscriber_id, "databox session opened");

        Ok(DataboxSession {
            session_id: body.session_id,
            subscriber_id: credentials.subscriber_id.clone(),
        })
    }

    /// List entries received in `[from, to]`, newest first.
    pub async fn list_entries(
        &self,
        session: &DataboxSession,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<DataboxEntry>, DataboxError> {
        let url = format!("{}/v1/databox/entries", self.options.base_url);

        let response = self
            .client
            .get(&url)
            .timeout(self.options.timeout)
            .bearer_auth(&session.session_id)
            .query(&[("from", from.to_rfc3339()), ("to", to.to_rfc3339())])
            .send()
            .await?;

        match response.status() {
            StatusCode::UNAUTHORIZED => return Err(DataboxError::SessionExpired),
            StatusCode::TOO_MANY_REQUESTS => return Err(DataboxError::RateLimited),
            status if !status.is_success() => {
                return Err(DataboxError::Decode(format!("entry list: HTTP {status}")));
            }
            _ => {}
        }

        let body: ListResponse = response
            .json()
            .await
            .map_err(|e| DataboxError::Decode(e.to_string()))?;

        Ok(body.entries)
    }

    /// Download one entry's content.
    pub async fn download(
        &self,
        session: &DataboxSession,
        external_id: &str,
    ) -> Result<DataboxDownload, DataboxError> {
        let url = format!(
            "{}/v1/databox/entries/{}/content",
            self.options.base_url, external_id
        );

        let response = self
            .client
            .get(&url)
            .bearer_auth(&session.session_id)
            .send()
            .await?;

        match response.status() {
            StatusCode::UNAUTHORIZED => return Err(DataboxError::SessionExpired),
            StatusCode::NOT_FOUND => {
                return Err(DataboxError::EntryNotFound {
                    external_id: external_id.to_string(),
                });
            }
            StatusCode::TOO_MANY_REQUESTS => return Err(DataboxError::RateLimited),
            status if !status.is_success() => {
                return Err(DataboxError::Decode(format!("download: HTTP {status}")));
            }
            _ => {}
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();

        let bytes = response.bytes().await?.to_vec();

        Ok(DataboxDownload {
            bytes,
            content_type,
        })
    }

    /// Close a session. Best-effort; an expired session is not an error.
    pub async fn close_session(&self, session: &DataboxSession) -> Result<(), DataboxError> {
        let url = format!(
            "{}/v1/sessions/{}",
            self.options.base_url, session.session_id
        );

        let response = self.client.delete(&url).send().await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Ok(());
        }
        if !response.status().is_success() {
            tracing::warn!(
                status = %response.status(),
                subscriber_id = %session.subscriber_id,
                "databox session close failed"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_point_at_localhost() {
        let options = DataboxClientOptions::default();
        assert!(options.base_url.starts_with("http://localhost"));
    }

    #[test]
    fn client_builds_with_defaults() {
        assert!(DataboxClient::new(DataboxClientOptions::default()).is_ok());
    }
}
