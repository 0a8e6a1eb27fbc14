//! Deadline reminder handler.
//!
//! Daily scan that turns persisted deadlines into notifications at the
//! configured day offsets. The sent-marker column is the at-most-once
//! gate: it is set only after a delivery the channel did not reject, so a
//! concurrent run can at worst duplicate a notification, never lose one.
//! Downstream consumers are expected to tolerate duplicates.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domains::analysis::ExtractedDeadline;
use crate::domains::documents::{Document, ReminderOffset};
use crate::kernel::jobs::{JobContext, JobError};

const DEFAULT_REMINDER_DAYS: [i64; 3] = [7, 3, 1];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadlineReminderPayload {
    pub tenant_id: Uuid,
    /// Day offsets to remind at; defaults to {7, 3, 1}.
    #[serde(default)]
    pub reminder_days: Option<Vec<i64>>,
    /// Also scan AI-extracted deadlines (reminder + overdue categories).
    #[serde(default = "default_true")]
    pub include_extracted: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeadlineReminderResult {
    pub documents_checked: u64,
    pub reminders_sent: u64,
    pub analysis_reminders_sent: u64,
    pub overdue_alerts: u64,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

/// Handler for the `deadline_reminder` job type.
pub async fn run_deadline_reminder(
    payload: DeadlineReminderPayload,
    ctx: JobContext,
) -> Result<serde_json::Value, JobError> {
    let started = std::time::Instant::now();
    let deps = &ctx.deps;
    let pool = &deps.db_pool;
    let today = Utc::now().date_naive();
    let tenant_id = payload.tenant_id;

    let mut result = DeadlineReminderResult::default();
    let offsets = payload
        .reminder_days
        .clone()
        .unwrap_or_else(|| DEFAULT_REMINDER_DAYS.to_vec());

    // Notifications route through the tenant's configured channel; the
    // bridge resolves the actual recipients.
    let recipient = format!("tenant:{tenant_id}");

    for days in &offsets {
        // Offsets without a dedicated marker column (0, 14, ...) are not
        // emitted at all.
        let Some(offset) = ReminderOffset::from_days(*days) else {
            continue;
        };
        let target = today + Duration::days(*days);

        let documents = Document::due_for_reminder(tenant_id, target, offset, pool)
            .await
            .map_err(JobError::from)?;

        for document in documents {
            result.documents_checked += 1;

            if ctx.cancellation.is_cancelled() {
                result.errors.push("cancelled mid-scan".to_string());
                break;
            }

            // Narrow the duplicate window: a concurrent run may have
            // marked this document since the listing.
            match Document::reminder_sent_at(tenant_id, document.id, offset, pool).await {
                Ok(None) => {}
                Ok(Some(_)) => continue,
                Err(e) => {
                    result.errors.push(format!("document {}: {e}", document.id));
                    continue;
                }
            }

            let subject = format!(
                "Frist in {} Tagen: {}",
                days,
                document.title.as_deref().unwrap_or(&document.external_id)
            );
            let body = reminder_body(&document, *days);

            match deps
                .notifier
                .send_deadline_reminder(&recipient, &subject, &body)
                .await
            {
                Ok(status) if status.is_success() => {
                    result.reminders_sent += 1;
                    let won = Document::mark_reminder_sent(tenant_id, document.id, offset, pool)
                        .await
                        .map_err(JobError::from)?;
                    if !won {
                        // The losing updater of a concurrent pair; the
                        // duplicate notification is already out.
                        warn!(
                            document_id = %document.id,
                            offset_days = days,
                            "reminder gate lost after emission (duplicate sent)"
                        );
                    }
                }
                Ok(_) => {
                    // Channel rejected it; leave the column NULL so the
                    // next run retries.
                    result
                        .errors
                        .push(format!("document {}: delivery failed", document.id));
                }
                Err(e) => {
                    result.errors.push(format!("document {}: {e}", document.id));
                }
            }
        }
    }

    if payload.include_extracted {
        scan_extracted_deadlines(&ctx, tenant_id, &offsets, &recipient, &mut result).await;
    }

    result.duration_ms = started.elapsed().as_millis() as u64;

    info!(
        tenant_id = %tenant_id,
        documents_checked = result.documents_checked,
        reminders_sent = result.reminders_sent,
        analysis_reminders_sent = result.analysis_reminders_sent,
        overdue_alerts = result.overdue_alerts,
        error_count = result.errors.len(),
        "deadline reminder run finished"
    );

    serde_json::to_value(result).map_err(|e| JobError::permanent(e.to_string()))
}

/// AI-extracted deadlines: the same offsets, plus overdue alerts for
/// unacknowledged deadlines already in the past. These carry no sent
/// marker, so they are at-least-once by construction.
async fn scan_extracted_deadlines(
    ctx: &JobContext,
    tenant_id: Uuid,
    offsets: &[i64],
    recipient: &str,
    result: &mut DeadlineReminderResult,
) {
    let deps = &ctx.deps;
    let pool = &deps.db_pool;
    let today = Utc::now().date_naive();

    for days in offsets {
        let target = today + Duration::days(*days);
        let deadlines = match ExtractedDeadline::find_due_on(tenant_id, target, pool).await {
            Ok(deadlines) => deadlines,
            Err(e) => {
                result.errors.push(format!("extracted deadlines: {e}"));
                continue;
            }
        };

        for deadline in deadlines {
            let subject = format!("Frist ({}) in {} Tagen", kind_label(&deadline), days);
            let body = format!(
                "Am {} läuft eine Frist ab: {}",
                deadline.due_date, deadline.description
            );
            match deps
                .notifier
                .send_deadline_reminder(recipient, &subject, &body)
                .await
            {
                Ok(status) if status.is_success() => result.analysis_reminders_sent += 1,
                Ok(_) => result
                    .errors
                    .push(format!("deadline {}: delivery failed", deadline.id)),
                Err(e) => result.errors.push(format!("deadline {}: {e}", deadline.id)),
            }
        }
    }

    let overdue = match ExtractedDeadline::find_overdue(tenant_id, today, pool).await {
        Ok(overdue) => overdue,
        Err(e) => {
            result.errors.push(format!("overdue deadlines: {e}"));
            return;
        }
    };

    for deadline in overdue {
        let subject = format!("ÜBERFÄLLIG: Frist vom {}", deadline.due_date);
        let body = format!(
            "Eine Frist ist seit {} überfällig und wurde nicht bestätigt: {}",
            deadline.due_date, deadline.description
        );
        match deps
            .notifier
            .send_deadline_reminder(recipient, &subject, &body)
            .await
        {
            Ok(status) if status.is_success() => result.overdue_alerts += 1,
            Ok(_) => result
                .errors
                .push(format!("deadline {}: delivery failed", deadline.id)),
            Err(e) => result.errors.push(format!("deadline {}: {e}", deadline.id)),
        }
    }
}

fn reminder_body(document: &Document, days: i64) -> String {
    let deadline = document
        .deadline
        .map(|d| d.to_string())
        .unwrap_or_default();
    json!({
        "document_id": document.id,
        "external_id": document.external_id,
        "deadline": deadline,
        "days_until": days,
        "sender": document.sender,
    })
    .to_string()
}

fn kind_label(deadline: &ExtractedDeadline) -> &'static str {
    use crate::domains::analysis::DeadlineKind;
    match deadline.kind {
        DeadlineKind::Response => "Antwort",
        DeadlineKind::Payment => "Zahlung",
        DeadlineKind::Submission => "Einreichung",
        DeadlineKind::Appeal => "Beschwerde",
        DeadlineKind::Other => "Sonstige",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_defaults() {
        let raw = json!({"tenant_id": Uuid::new_v4()});
        let payload: DeadlineReminderPayload = serde_json::from_value(raw).unwrap();
        assert!(payload.reminder_days.is_none());
        assert!(payload.include_extracted);
    }

    #[test]
    fn custom_offsets_decode() {
        let raw = json!({
            "tenant_id": Uuid::new_v4(),
            "reminder_days": [14, 7, 0],
            "include_extracted": false,
        });
        let payload: DeadlineReminderPayload = serde_json::from_value(raw).unwrap();
        assert_eq!(payload.reminder_days, Some(vec![14, 7, 0]));
        assert!(!payload.include_extracted);
    }
}
