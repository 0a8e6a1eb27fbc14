//! Document classification: LLM first, keyword heuristic as fallback.

use serde::Deserialize;
use tracing::{debug, warn};

use crate::domains::analysis::json::parse_llm_json;
use crate::domains::analysis::prompts::CLASSIFY_SYSTEM;
use crate::domains::analysis::types::{Classification, DocumentType, Urgency};
use crate::kernel::traits::BaseLlm;

/// Raw LLM answer before validation.
#[derive(Debug, Deserialize)]
struct RawClassification {
    #[serde(rename = "type")]
    doc_type: String,
    #[serde(default)]
    subtype: Option<String>,
    confidence: f32,
    #[serde(default)]
    urgency: Option<String>,
}

/// Truncate at a char boundary without splitting a code point.
pub fn truncate_text(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

/// Classify a document's text.
///
/// Validation is strict: an unknown type, an out-of-range confidence or a
/// malformed response all fall back to the keyword heuristic rather than
/// trusting the model.
pub async fn classify(llm: &dyn BaseLlm, text: &str, truncate: usize) -> Classification {
    let excerpt = truncate_text(text, truncate);

    match llm.complete(CLASSIFY_SYSTEM, excerpt, 0.1).await {
        Ok(response) => match validate(&response) {
            Some(classification) => classification,
            None => {
                warn!("unusable classification response, using keyword heuristic");
                classify_heuristic(text)
            }
        },
        Err(e) => {
            warn!(error = %e, "classification LLM call failed, using keyword heuristic");
            classify_heuristic(text)
        }
    }
}

fn validate(response: &str) -> Option<Classification> {
    let raw: RawClassification = parse_llm_json(response)?;

    let doc_type = DocumentType::parse(&raw.doc_type)?;
    if !(0.0..=1.0).contains(&raw.confidence) {
        return None;
    }
    let urgency = match raw.urgency.as_deref() {
        Some(value) => Urgency::parse(value)?,
        None => Urgency::Normal,
    };

    Some(Classification {
        doc_type,
        subtype: raw.subtype.filter(|s| !s.trim().is_empty()),
        confidence: raw.confidence,
        urgency,
    })
}

/// Keyword fallback. Specific classes are checked before generic ones;
/// "Bescheid" shows up in almost every tax document, so it comes late.
pub fn classify_heuristic(text: &str) -> Classification {
    let haystack = text.to_lowercase();

    let hit = [
        ("zahlungsbefehl", DocumentType::Zahlungsbefehl, Urgency::Critical),
        ("ergänzungsersuchen", DocumentType::Ersuchen, Urgency::High),
        ("ersuchen um ergänzung", DocumentType::Ersuchen, Urgency::High),
        ("vorhalt", DocumentType::Vorhalt, Urgency::High),
        ("mahnung", DocumentType::Mahnung, Urgency::High),
        ("zahlungserinnerung", DocumentType::Mahnung, Urgency::High),
        ("rechnung", DocumentType::Rechnung, Urgency::Normal),
        ("bescheid", DocumentType::Bescheid, Urgency::Normal),
        ("mitteilung", DocumentType::Mitteilung, Urgency::Low),
    ]
    .into_iter()
    .find(|(keyword, _, _)| haystack.contains(keyword));

    match hit {
        Some((keyword, doc_type, urgency)) => {
            debug!(keyword, doc_type = doc_type.as_str(), "heuristic classification hit");
            Classification {
                doc_type,
                subtype: None,
                confidence: 0.6,
                urgency,
            }
        }
        None => Classification::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::test_dependencies::MockLlm;

    #[tokio::test]
    async fn valid_llm_response_is_used() {
        let llm = MockLlm::new().with_response(
            r#"{"type": "mahnung", "subtype": "zweite Mahnung", "confidence": 0.93, "urgency": "high"}"#,
        );
        let c = classify(&llm, "MAHNUNG", 4000).await;
        assert_eq!(c.doc_type, DocumentType::Mahnung);
        assert_eq!(c.subtype.as_deref(), Some("zweite Mahnung"));
        assert!((c.confidence - 0.93).abs() < 1e-6);
        assert_eq!(c.urgency, Urgency::High);
    }

    #[tokio::test]
    async fn invalid_json_falls_back_to_heuristic() {
        let llm = MockLlm::new().with_response("I think this is a Bescheid??");
        let c = classify(&llm, "ERGÄNZUNGSERSUCHEN gemäß § 161 BAO", 4000).await;
        assert_eq!(c.doc_type, DocumentType::Ersuchen);
        assert_eq!(c.urgency, Urgency::High);
        assert!((c.confidence - 0.6).abs() < 1e-6);
    }

    #[tokio::test]
    async fn unknown_type_falls_back() {
        let llm =
            MockLlm::new().with_response(r#"{"type": "liebesbrief", "confidence": 0.99}"#);
        let c = classify(&llm, "MITTEILUNG über Kontostand", 4000).await;
        assert_eq!(c.doc_type, DocumentType::Mitteilung);
    }

    #[tokio::test]
    async fn out_of_range_confidence_falls_back() {
        let llm = MockLlm::new().with_response(r#"{"type": "bescheid", "confidence": 1.7}"#);
        let c = classify(&llm, "plain letter", 4000).await;
        assert_eq!(c.doc_type, DocumentType::Sonstige);
        assert!((c.confidence - 0.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn llm_error_falls_back() {
        let llm = MockLlm::new().with_retryable_error("HTTP 503");
        let c = classify(&llm, "ZAHLUNGSBEFEHL des Bezirksgerichts", 4000).await;
        assert_eq!(c.doc_type, DocumentType::Zahlungsbefehl);
        assert_eq!(c.urgency, Urgency::Critical);
    }

    #[test]
    fn heuristic_without_keywords_is_sonstige() {
        let c = classify_heuristic("Sehr geehrte Damen und Herren, anbei die Unterlagen.");
        assert_eq!(c.doc_type, DocumentType::Sonstige);
        assert!((c.confidence - 0.5).abs() < 1e-6);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let text = "äöü".repeat(10);
        let truncated = truncate_text(&text, 5);
        assert_eq!(truncated.chars().count(), 5);
    }
}
