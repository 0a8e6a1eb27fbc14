//! OpenAI-compatible chat completion client.
//!
//! The platform only needs one LLM capability: "system + user prompt in,
//! text out", with a retryable/fatal split on failures. Any gateway that
//! speaks the `/chat/completions` shape works (OpenAI, Azure, a local
//! vLLM); the base URL and model come from configuration.

use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::traits::{BaseLlm, LlmError};

pub struct OpenAiCompatClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    last_tokens: AtomicI32,
}

impl OpenAiCompatClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("reqwest client construction cannot fail with static options");

        Self {
            client,
            base_url: base_url.into(),
            model: model.into(),
            api_key,
            last_tokens: AtomicI32::new(-1),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    total_tokens: i32,
}

#[async_trait]
impl BaseLlm for OpenAiCompatClient {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        temperature: f32,
    ) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);

        let body = json!({
            "model": self.model,
            "temperature": temperature,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| LlmError::Retryable(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(LlmError::Retryable(format!("HTTP {status}")));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(LlmError::Fatal(format!("HTTP {status}: {detail}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Fatal(format!("malformed completion response: {e}")))?;

        if let Some(usage) = &parsed.usage {
            self.last_tokens.store(usage.total_tokens, Ordering::Relaxed);
        }

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::Fatal("completion had no choices".to_string()))
    }

    fn last_tokens_used(&self) -> Option<i32> {
        match self.last_tokens.load(Ordering::Relaxed) {
            n if n >= 0 => Some(n),
            _ => None,
        }
    }
}
