//! Deadline and amount extraction: LLM first, German regex as fallback.

use chrono::NaiveDate;
use serde::Deserialize;
use tracing::warn;

use crate::domains::analysis::german;
use crate::domains::analysis::json::parse_llm_json;
use crate::domains::analysis::prompts::EXTRACT_SYSTEM;
use crate::domains::analysis::types::{AmountDraft, AmountKind, DeadlineDraft, DeadlineKind};
use crate::kernel::traits::BaseLlm;

use super::classify::truncate_text;

const MIN_AMOUNT_EUROS: f64 = 1.0;
const MAX_AMOUNT_EUROS: f64 = 10_000_000.0;

#[derive(Debug, Deserialize)]
struct RawExtraction {
    #[serde(default)]
    deadlines: Vec<RawDeadline>,
    #[serde(default)]
    amounts: Vec<RawAmount>,
}

#[derive(Debug, Deserialize)]
struct RawDeadline {
    date: String,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    is_hard: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawAmount {
    amount: serde_json::Value,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    confidence: Option<f32>,
}

/// Extract deadlines and amounts from the text.
///
/// The LLM path validates every entry strictly (date format, enum fields,
/// numeric ranges); anything that fails validation is dropped rather than
/// repaired. When the call itself fails or the response is not JSON, the
/// deterministic regex extractors take over.
pub async fn extract_entities(
    llm: &dyn BaseLlm,
    text: &str,
    truncate: usize,
) -> (Vec<DeadlineDraft>, Vec<AmountDraft>) {
    let excerpt = truncate_text(text, truncate);

    match llm.complete(EXTRACT_SYSTEM, excerpt, 0.1).await {
        Ok(response) => match parse_llm_json::<RawExtraction>(&response) {
            Some(raw) => {
                let deadlines = raw
                    .deadlines
                    .into_iter()
                    .filter_map(validate_deadline)
                    .collect();
                let amounts = raw.amounts.into_iter().filter_map(validate_amount).collect();
                (deadlines, amounts)
            }
            None => {
                warn!("unusable extraction response, using regex extractors");
                (german::extract_deadlines(text), german::extract_amounts(text))
            }
        },
        Err(e) => {
            warn!(error = %e, "extraction LLM call failed, using regex extractors");
            (german::extract_deadlines(text), german::extract_amounts(text))
        }
    }
}

fn validate_deadline(raw: RawDeadline) -> Option<DeadlineDraft> {
    // The prompt demands ISO dates; anything else is a model invention.
    let date = NaiveDate::parse_from_str(raw.date.trim(), "%Y-%m-%d").ok()?;

    let kind = match raw.kind.as_deref() {
        None => DeadlineKind::Response,
        Some(value) => parse_deadline_kind(value)?,
    };

    let confidence = raw.confidence.unwrap_or(0.7);
    if !(0.0..=1.0).contains(&confidence) {
        return None;
    }

    Some(DeadlineDraft {
        kind,
        date,
        description: raw.description.unwrap_or_default(),
        confidence,
        is_hard: raw.is_hard.unwrap_or(true),
    })
}

fn parse_deadline_kind(value: &str) -> Option<DeadlineKind> {
    match value.trim().to_lowercase().as_str() {
        "response" => Some(DeadlineKind::Response),
        "payment" => Some(DeadlineKind::Payment),
        "submission" => Some(DeadlineKind::Submission),
        "appeal" => Some(DeadlineKind::Appeal),
        "other" => Some(DeadlineKind::Other),
        _ => None,
    }
}

fn validate_amount(raw: RawAmount) -> Option<AmountDraft> {
    let euros = match &raw.amount {
        serde_json::Value::Number(n) => n.as_f64()?,
        serde_json::Value::String(s) => s.trim().replace(',', ".").parse::<f64>().ok()?,
        _ => return None,
    };

    if !(MIN_AMOUNT_EUROS..=MAX_AMOUNT_EUROS).contains(&euros) {
        return None;
    }

    let kind = match raw.kind.as_deref() {
        None => AmountKind::Other,
        Some(value) => parse_amount_kind(value)?,
    };

    let confidence = raw.confidence.unwrap_or(0.7);
    if !(0.0..=1.0).contains(&confidence) {
        return None;
    }

    Some(AmountDraft {
        kind,
        amount_cents: (euros * 100.0).round() as i64,
        currency: "EUR".to_string(),
        description: raw.description.unwrap_or_default(),
        confidence,
    })
}

fn parse_amount_kind(value: &str) -> Option<AmountKind> {
    match value.trim().to_lowercase().as_str() {
        "tax_due" => Some(AmountKind::TaxDue),
        "refund" => Some(AmountKind::Refund),
        "penalty" => Some(AmountKind::Penalty),
        "fee" => Some(AmountKind::Fee),
        "total" => Some(AmountKind::Total),
        "other" => Some(AmountKind::Other),
        _ => None,
    }
}
