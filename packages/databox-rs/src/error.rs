use thiserror::Error;

/// Errors returned by the databox gateway client.
#[derive(Debug, Error)]
pub enum DataboxError {
    /// Login rejected: wrong credentials, locked account, revoked user.
    /// Not retryable; retrying would lock the portal user out.
    #[error("authentication failed for subscriber {subscriber_id}: {message}")]
    Auth {
        subscriber_id: String,
        message: String,
    },

    /// The session expired or was invalidated server-side.
    #[error("session expired")]
    SessionExpired,

    /// The requested entry does not exist in this databox.
    #[error("entry not found: {external_id}")]
    EntryNotFound { external_id: String },

    /// The portal throttled us (HTTP 429 or the SOAP equivalent).
    #[error("rate limited by portal")]
    RateLimited,

    /// Transport-level failure (DNS, TLS, timeout, 5xx).
    #[error("gateway request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The gateway answered with something we could not decode.
    #[error("unexpected gateway response: {0}")]
    Decode(String),
}

impl DataboxError {
    /// Whether a caller should retry the operation later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DataboxError::RateLimited | DataboxError::Transport(_) | DataboxError::SessionExpired
        )
    }
}
