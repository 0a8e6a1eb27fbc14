//! Outbound notifications.
//!
//! Reminders go to the tenant's notification endpoint (typically a mail
//! bridge or chat integration) as JSON webhooks. Delivery is best-effort;
//! the reminder handler decides what a failed delivery means for its
//! at-most-once gate.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

use super::traits::{BaseNotifier, DeliveryStatus};

pub struct WebhookNotifier {
    client: reqwest::Client,
    /// Endpoint that fans reminders out to the tenant's channels.
    reminder_url: String,
}

impl WebhookNotifier {
    pub fn new(reminder_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client construction cannot fail with static options");

        Self {
            client,
            reminder_url: reminder_url.into(),
        }
    }

    fn status_from_response(status: reqwest::StatusCode) -> DeliveryStatus {
        if status == reqwest::StatusCode::ACCEPTED {
            DeliveryStatus::Accepted
        } else if status.is_success() {
            DeliveryStatus::Delivered
        } else {
            DeliveryStatus::Failed
        }
    }
}

#[async_trait]
impl BaseNotifier for WebhookNotifier {
    async fn send_deadline_reminder(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> Result<DeliveryStatus> {
        let payload = json!({
            "recipient": recipient,
            "subject": subject,
            "body": body,
        });

        let response = self
            .client
            .post(&self.reminder_url)
            .json(&payload)
            .send()
            .await
            .context("reminder delivery request failed")?;

        let status = Self::status_from_response(response.status());
        if status == DeliveryStatus::Failed {
            warn!(
                http_status = %response.status(),
                recipient,
                "reminder delivery rejected"
            );
        }

        Ok(status)
    }

    async fn send_webhook(
        &self,
        url: &str,
        payload: &serde_json::Value,
    ) -> Result<DeliveryStatus> {
        let response = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .context("webhook delivery request failed")?;

        Ok(Self::status_from_response(response.status()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_maps_to_delivery_status() {
        assert_eq!(
            WebhookNotifier::status_from_response(reqwest::StatusCode::OK),
            DeliveryStatus::Delivered
        );
        assert_eq!(
            WebhookNotifier::status_from_response(reqwest::StatusCode::ACCEPTED),
            DeliveryStatus::Accepted
        );
        assert_eq!(
            WebhookNotifier::status_from_response(reqwest::StatusCode::BAD_GATEWAY),
            DeliveryStatus::Failed
        );
    }
}
