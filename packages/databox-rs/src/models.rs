use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Credentials for one databox account.
///
/// `subscriber_id` is the portal participant number (Teilnehmer-ID),
/// `user_id`/`pin` the technical user the tenant registered for polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataboxCredentials {
    pub subscriber_id: String,
    pub user_id: String,
    pub pin: String,
}

/// An authenticated gateway session.
///
/// Sessions are short-lived; the gateway invalidates them server-side after
/// a few minutes of inactivity, so callers should close them promptly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataboxSession {
    pub session_id: String,
    pub subscriber_id: String,
}

/// One entry in the databox index listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataboxEntry {
    /// Issuer-assigned identifier, stable across listings.
    #[serde(rename = "applkey")]
    pub external_id: String,
    /// Document class hint as reported by the portal (e.g. "B" for Bescheid).
    #[serde(default)]
    pub type_hint: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub sender: Option<String>,
    pub received_at: DateTime<Utc>,
    #[serde(default)]
    pub file_size: Option<i64>,
}

/// Downloaded document content.
#[derive(Debug, Clone)]
pub struct DataboxDownload {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SessionResponse {
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListResponse {
    #[serde(default)]
    pub entries: Vec<DataboxEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_deserializes_portal_fields() {
        let json = r#"{
            "applkey": "2025-BVE-0042",
            "type_hint": "B",
            "title": "Einkommensteuerbescheid 2024",
            "received_at": "2025-06-01T08:30:00Z"
        }"#;

        let entry: DataboxEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.external_id, "2025-BVE-0042");
        assert_eq!(entry.type_hint.as_deref(), Some("B"));
        assert!(entry.sender.is_none());
    }
}
