// Mock implementations of the collaborator traits for tests.
//
// The mocks record every call and serve queued responses, so tests can
// assert both behaviour and interaction without any external service.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use databox::{
    DataboxCredentials, DataboxDownload, DataboxEntry, DataboxError, DataboxSession,
};

use super::traits::{
    BaseCredentialStore, BaseDocumentFetcher, BaseLlm, BaseNotifier, BaseOcrEngine,
    DeliveryStatus, LlmError, OcrOutput,
};

// =============================================================================
// Mock LLM
// =============================================================================

#[derive(Clone)]
enum MockLlmResponse {
    Text(String),
    Retryable(String),
    Fatal(String),
}

/// Mock LLM serving queued responses; falls back to an empty JSON object.
pub struct MockLlm {
    responses: Arc<Mutex<Vec<MockLlmResponse>>>,
    calls: Arc<Mutex<Vec<(String, String)>>>,
}

impl MockLlm {
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_response(self, response: impl Into<String>) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push(MockLlmResponse::Text(response.into()));
        self
    }

    pub fn with_json_response<T: serde::Serialize>(self, data: &T) -> Self {
        let json = serde_json::to_string(data).expect("mock response must serialize");
        self.with_response(json)
    }

    pub fn with_retryable_error(self, message: impl Into<String>) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push(MockLlmResponse::Retryable(message.into()));
        self
    }

    pub fn with_fatal_error(self, message: impl Into<String>) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push(MockLlmResponse::Fatal(message.into()));
        self
    }

    /// All (system, user) prompt pairs sent so far.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl Default for MockLlm {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseLlm for MockLlm {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        _temperature: f32,
    ) -> Result<String, LlmError> {
        self.calls
            .lock()
            .unwrap()
            .push((system.to_string(), user.to_string()));

        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Ok("{}".to_string());
        }

        match responses.remove(0) {
            MockLlmResponse::Text(text) => Ok(text),
            MockLlmResponse::Retryable(msg) => Err(LlmError::Retryable(msg)),
            MockLlmResponse::Fatal(msg) => Err(LlmError::Fatal(msg)),
        }
    }
}

// =============================================================================
// Mock OCR engine
// =============================================================================

pub struct MockOcrEngine {
    output: Mutex<Option<OcrOutput>>,
    fail: bool,
    calls: Arc<Mutex<usize>>,
}

impl MockOcrEngine {
    pub fn with_output(text: impl Into<String>, confidence: f32) -> Self {
        let text = text.into();
        Self {
            output: Mutex::new(Some(OcrOutput {
                pages: vec![text.clone()],
                text,
                confidence,
                provider: "mock".to_string(),
            })),
            fail: false,
            calls: Arc::new(Mutex::new(0)),
        }
    }

    pub fn failing() -> Self {
        Self {
            output: Mutex::new(None),
            fail: true,
            calls: Arc::new(Mutex::new(0)),
        }
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl BaseOcrEngine for MockOcrEngine {
    async fn process(&self, _bytes: &[u8]) -> Result<OcrOutput> {
        *self.calls.lock().unwrap() += 1;
        if self.fail {
            anyhow::bail!("mock OCR failure");
        }
        self.output
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| anyhow::anyhow!("mock OCR has no output configured"))
    }
}

// =============================================================================
// Mock notifier
// =============================================================================

#[derive(Debug, Clone)]
pub struct SentReminder {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

pub struct MockNotifier {
    status: DeliveryStatus,
    reminders: Arc<Mutex<Vec<SentReminder>>>,
    webhooks: Arc<Mutex<Vec<(String, serde_json::Value)>>>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self {
            status: DeliveryStatus::Delivered,
            reminders: Arc::new(Mutex::new(Vec::new())),
            webhooks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A notifier whose channel always reports failure.
    pub fn failing() -> Self {
        Self {
            status: DeliveryStatus::Failed,
            ..Self::new()
        }
    }

    pub fn reminders(&self) -> Vec<SentReminder> {
        self.reminders.lock().unwrap().clone()
    }

    pub fn reminder_count(&self) -> usize {
        self.reminders.lock().unwrap().len()
    }

    pub fn webhooks(&self) -> Vec<(String, serde_json::Value)> {
        self.webhooks.lock().unwrap().clone()
    }
}

impl Default for MockNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseNotifier for MockNotifier {
    async fn send_deadline_reminder(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> Result<DeliveryStatus> {
        self.reminders.lock().unwrap().push(SentReminder {
            recipient: recipient.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(self.status)
    }

    async fn send_webhook(
        &self,
        url: &str,
        payload: &serde_json::Value,
    ) -> Result<DeliveryStatus> {
        self.webhooks
            .lock()
            .unwrap()
            .push((url.to_string(), payload.clone()));
        Ok(self.status)
    }
}

// =============================================================================
// Mock document fetcher
// =============================================================================

/// In-memory databox: a list of entries plus per-entry content.
pub struct MockFetcher {
    entries: Mutex<Vec<DataboxEntry>>,
    downloads: Mutex<HashMap<String, (Vec<u8>, String)>>,
    fail_auth: bool,
    open_sessions: Arc<Mutex<usize>>,
    closed_sessions: Arc<Mutex<usize>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            downloads: Mutex::new(HashMap::new()),
            fail_auth: false,
            open_sessions: Arc::new(Mutex::new(0)),
            closed_sessions: Arc::new(Mutex::new(0)),
        }
    }

    pub fn failing_auth() -> Self {
        Self {
            fail_auth: true,
            ..Self::new()
        }
    }

    /// Add an entry with its downloadable content.
    pub fn with_entry(
        self,
        external_id: &str,
        type_hint: &str,
        received_at: DateTime<Utc>,
        bytes: &[u8],
        content_type: &str,
    ) -> Self {
        self.entries.lock().unwrap().push(DataboxEntry {
            external_id: external_id.to_string(),
            type_hint: Some(type_hint.to_string()),
            title: Some(format!("Dokument {external_id}")),
            sender: Some("Finanzamt Österreich".to_string()),
            received_at,
            file_size: Some(bytes.len() as i64),
        });
        self.downloads.lock().unwrap().insert(
            external_id.to_string(),
            (bytes.to_vec(), content_type.to_string()),
        );
        self
    }

    pub fn sessions_opened(&self) -> usize {
        *self.open_sessions.lock().unwrap()
    }

    pub fn sessions_closed(&self) -> usize {
        *self.closed_sessions.lock().unwrap()
    }
}

impl Default for MockFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseDocumentFetcher for MockFetcher {
    async fn open_session(
        &self,
        credentials: &DataboxCredentials,
    ) -> Result<DataboxSession, DataboxError> {
        if self.fail_auth {
            return Err(DataboxError::Auth {
                subscriber_id: credentials.subscriber_id.clone(),
                message: "invalid pin".to_string(),
            });
        }
        *self.open_sessions.lock().unwrap() += 1;
        Ok(DataboxSession {
            session_id: Uuid::new_v4().to_string(),
            subscriber_id: credentials.subscriber_id.clone(),
        })
    }

    async fn list_new_since(
        &self,
        _session: &DataboxSession,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<DataboxEntry>, DataboxError> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.received_at >= from && e.received_at <= to)
            .cloned()
            .collect())
    }

    async fn download(
        &self,
        _session: &DataboxSession,
        external_id: &str,
    ) -> Result<DataboxDownload, DataboxError> {
        let downloads = self.downloads.lock().unwrap();
        match downloads.get(external_id) {
            Some((bytes, content_type)) => Ok(DataboxDownload {
                bytes: bytes.clone(),
                content_type: content_type.clone(),
            }),
            None => Err(DataboxError::EntryNotFound {
                external_id: external_id.to_string(),
            }),
        }
    }

    async fn close_session(&self, _session: &DataboxSession) -> Result<(), DataboxError> {
        *self.closed_sessions.lock().unwrap() += 1;
        Ok(())
    }
}

// =============================================================================
// Mock credential store
// =============================================================================

pub struct MockCredentialStore;

#[async_trait]
impl BaseCredentialStore for MockCredentialStore {
    async fn credentials_for_account(
        &self,
        _tenant_id: Uuid,
        account_id: Uuid,
    ) -> Result<DataboxCredentials> {
        Ok(DataboxCredentials {
            subscriber_id: account_id.simple().to_string(),
            user_id: "test-user".to_string(),
            pin: "test-pin".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_llm_serves_queued_then_default() {
        let llm = MockLlm::new().with_response("first");
        assert_eq!(llm.complete("s", "u", 0.0).await.unwrap(), "first");
        assert_eq!(llm.complete("s", "u", 0.0).await.unwrap(), "{}");
        assert_eq!(llm.call_count(), 2);
    }

    #[tokio::test]
    async fn mock_fetcher_filters_by_range() {
        let now = Utc::now();
        let fetcher = MockFetcher::new().with_entry(
            "FN-1",
            "bescheid",
            now - chrono::Duration::days(40),
            b"PDFA",
            "application/pdf",
        );

        let session = fetcher
            .open_session(&DataboxCredentials {
                subscriber_id: "1".into(),
                user_id: "u".into(),
                pin: "p".into(),
            })
            .await
            .unwrap();

        let entries = fetcher
            .list_new_since(&session, now - chrono::Duration::days(30), now)
            .await
            .unwrap();
        assert!(entries.is_empty());
    }
}
