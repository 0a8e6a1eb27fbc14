//! HTTP client for the OCR engine.
//!
//! The engine runs as a sidecar service (tesseract-based or a hosted
//! vision model) exposing a single `POST /ocr` endpoint that accepts the
//! raw document bytes and answers with text, per-page text and an overall
//! confidence.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use super::traits::{BaseOcrEngine, OcrOutput};

pub struct HttpOcrEngine {
    client: reqwest::Client,
    base_url: String,
}

impl HttpOcrEngine {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .expect("reqwest client construction cannot fail with static options");

        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct OcrResponse {
    text: String,
    #[serde(default)]
    pages: Vec<String>,
    confidence: f32,
    #[serde(default)]
    provider: Option<String>,
}

#[async_trait]
impl BaseOcrEngine for HttpOcrEngine {
    async fn process(&self, bytes: &[u8]) -> Result<OcrOutput> {
        let url = format!("{}/ocr", self.base_url);

        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes.to_vec())
            .send()
            .await
            .context("OCR request failed")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("OCR engine returned HTTP {status}");
        }

        let body: OcrResponse = response
            .json()
            .await
            .context("OCR response was not valid JSON")?;

        Ok(OcrOutput {
            text: body.text,
            pages: body.pages,
            confidence: body.confidence.clamp(0.0, 1.0),
            provider: body.provider.unwrap_or_else(|| "tesseract".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_defaults_provider_and_pages() {
        let raw = r#"{"text": "BESCHEID", "confidence": 0.93}"#;
        let parsed: OcrResponse = serde_json::from_str(raw).unwrap();
        assert!(parsed.pages.is_empty());
        assert!(parsed.provider.is_none());
    }
}
