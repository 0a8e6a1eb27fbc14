//! Response suggestions, only for document classes that expect an answer
//! (Ergänzungsersuchen, Vorhalt).

use serde::Deserialize;
use tracing::warn;

use crate::domains::analysis::json::parse_llm_json;
use crate::domains::analysis::prompts::SUGGEST_SYSTEM;
use crate::domains::analysis::types::{Classification, DocumentType, SuggestionDraft};
use crate::kernel::traits::BaseLlm;

use super::classify::truncate_text;

#[derive(Debug, Deserialize)]
struct RawSuggestions {
    #[serde(default)]
    suggestions: Vec<RawSuggestion>,
}

#[derive(Debug, Deserialize)]
struct RawSuggestion {
    title: String,
    body: String,
    #[serde(default)]
    tone: Option<String>,
}

pub fn wants_suggestions(classification: &Classification) -> bool {
    matches!(
        classification.doc_type,
        DocumentType::Ersuchen | DocumentType::Vorhalt
    )
}

pub async fn generate_suggestions(
    llm: &dyn BaseLlm,
    classification: &Classification,
    text: &str,
    truncate: usize,
) -> Vec<SuggestionDraft> {
    if !wants_suggestions(classification) {
        return Vec::new();
    }

    let excerpt = truncate_text(text, truncate);

    let response = match llm.complete(SUGGEST_SYSTEM, excerpt, 0.4).await {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "suggestion LLM call failed, skipping stage");
            return Vec::new();
        }
    };

    let Some(raw) = parse_llm_json::<RawSuggestions>(&response) else {
        return Vec::new();
    };

    raw.suggestions
        .into_iter()
        .filter(|s| !s.title.trim().is_empty() && !s.body.trim().is_empty())
        .map(|s| SuggestionDraft {
            title: s.title,
            body: s.body,
            tone: s.tone.unwrap_or_else(|| "formal".to_string()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::test_dependencies::MockLlm;

    fn classification(doc_type: DocumentType) -> Classification {
        Classification {
            doc_type,
            ..Classification::default()
        }
    }

    #[tokio::test]
    async fn only_ersuchen_and_vorhalt_get_suggestions() {
        let llm = MockLlm::new();
        let result = generate_suggestions(
            &llm,
            &classification(DocumentType::Bescheid),
            "text",
            10_000,
        )
        .await;
        assert!(result.is_empty());
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn suggestions_parse_for_ersuchen() {
        let llm = MockLlm::new().with_response(
            r#"{"suggestions": [{"title": "Unterlagen nachreichen", "body": "Sehr geehrte Damen und Herren, ..."}]}"#,
        );
        let result = generate_suggestions(
            &llm,
            &classification(DocumentType::Ersuchen),
            "text",
            10_000,
        )
        .await;
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].tone, "formal");
    }

    #[tokio::test]
    async fn llm_failure_yields_empty() {
        let llm = MockLlm::new().with_fatal_error("quota exceeded");
        let result = generate_suggestions(
            &llm,
            &classification(DocumentType::Vorhalt),
            "text",
            10_000,
        )
        .await;
        assert!(result.is_empty());
    }
}
