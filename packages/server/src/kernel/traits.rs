// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - no business logic. Domain code
// (classification, deadline extraction, reminder policy) lives in
// `domains` and consumes these through `ServerDeps`.
//
// Naming convention: Base* for trait names (e.g., BaseLlm, BaseNotifier)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use databox::{DataboxCredentials, DataboxDownload, DataboxEntry, DataboxError, DataboxSession};

// =============================================================================
// LLM (Infrastructure - generic JSON-completion capability)
// =============================================================================

/// LLM failure split by retryability.
///
/// Rate limits and 5xx responses are worth retrying; everything else
/// (invalid request, auth, content policy) is not.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM request failed (retryable): {0}")]
    Retryable(String),
    #[error("LLM request failed: {0}")]
    Fatal(String),
}

#[async_trait]
pub trait BaseLlm: Send + Sync {
    /// Complete a system+user prompt pair, returning the raw response text.
    ///
    /// Callers parse the response themselves; implementations must not
    /// attempt JSON repair.
    async fn complete(&self, system: &str, user: &str, temperature: f32)
        -> Result<String, LlmError>;

    /// Rough number of tokens consumed by the last call, when the provider
    /// reports it. Used for per-analysis accounting only.
    fn last_tokens_used(&self) -> Option<i32> {
        None
    }
}

// =============================================================================
// OCR engine
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrOutput {
    pub text: String,
    /// Per-page text, in order. May be empty when the engine reports only
    /// the combined text.
    pub pages: Vec<String>,
    /// Overall recognition confidence in [0, 1].
    pub confidence: f32,
    pub provider: String,
}

#[async_trait]
pub trait BaseOcrEngine: Send + Sync {
    async fn process(&self, bytes: &[u8]) -> anyhow::Result<OcrOutput>;
}

// =============================================================================
// Notifier
// =============================================================================

/// What happened to a notification, as far as the channel can tell.
///
/// `Accepted` means the channel queued it without confirming delivery.
/// Reminder gates only advance on `Delivered` or `Accepted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryStatus {
    Delivered,
    Accepted,
    Failed,
}

impl DeliveryStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, DeliveryStatus::Delivered | DeliveryStatus::Accepted)
    }
}

#[async_trait]
pub trait BaseNotifier: Send + Sync {
    /// Send a deadline reminder to a tenant recipient. Best-effort.
    async fn send_deadline_reminder(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> anyhow::Result<DeliveryStatus>;

    /// Deliver a JSON payload to a tenant-configured webhook. Best-effort.
    async fn send_webhook(
        &self,
        url: &str,
        payload: &serde_json::Value,
    ) -> anyhow::Result<DeliveryStatus>;
}

// =============================================================================
// Document fetcher (databox gateway)
// =============================================================================

/// Session-oriented access to a remote databox.
///
/// The concrete implementation wraps [`databox::DataboxClient`]; tests use
/// the in-memory mock from `test_dependencies`.
#[async_trait]
pub trait BaseDocumentFetcher: Send + Sync {
    async fn open_session(
        &self,
        credentials: &DataboxCredentials,
    ) -> Result<DataboxSession, DataboxError>;

    async fn list_new_since(
        &self,
        session: &DataboxSession,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<DataboxEntry>, DataboxError>;

    async fn download(
        &self,
        session: &DataboxSession,
        external_id: &str,
    ) -> Result<DataboxDownload, DataboxError>;

    async fn close_session(&self, session: &DataboxSession) -> Result<(), DataboxError>;
}

// =============================================================================
// Credential store
// =============================================================================

/// Access to per-account portal credentials.
///
/// Implementations decrypt inside the store and hand out the plaintext
/// struct for the duration of one handler invocation. Credentials must
/// never appear in logs, job payloads or results.
#[async_trait]
pub trait BaseCredentialStore: Send + Sync {
    async fn credentials_for_account(
        &self,
        tenant_id: Uuid,
        account_id: Uuid,
    ) -> anyhow::Result<DataboxCredentials>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivered_and_accepted_count_as_success() {
        assert!(DeliveryStatus::Delivered.is_success());
        assert!(DeliveryStatus::Accepted.is_success());
        assert!(!DeliveryStatus::Failed.is_success());
    }
}
