//! The analysis pipeline state machine.
//!
//! Stages run strictly sequentially over one document:
//!
//! ```text
//! created → text_extracted → classified → summarised
//!         → deadlines_extracted → amounts_extracted
//!         → actions_synthesised → suggestions_generated → completed
//! ```
//!
//! `failed` is reachable from any state on a fatal condition (missing
//! document, no text at all). Per-stage failures degrade instead: OCR
//! falls back to direct extraction, classification to keywords, entity
//! extraction to regex, summary and suggestions are skipped.

use chrono::Utc;
use tracing::debug;

use crate::kernel::traits::{BaseLlm, BaseOcrEngine};

use super::stages::{actions, classify, extract, suggestions, summary, text};
use super::types::{
    AnalysisOutcome, ConfidenceWarning, TextProvider, error_codes, severity_for_confidence,
};

/// Confidence below this threshold produces a warning.
const WARNING_THRESHOLD: f32 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Created,
    TextExtracted,
    Classified,
    Summarised,
    DeadlinesExtracted,
    AmountsExtracted,
    ActionsSynthesised,
    SuggestionsGenerated,
    Completed,
    Failed,
}

/// Truncation budgets for the LLM stages.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub truncate_classify: usize,
    pub truncate_extract: usize,
    pub truncate_summarise: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            truncate_classify: 4_000,
            truncate_extract: 6_000,
            truncate_summarise: 10_000,
        }
    }
}

impl PipelineConfig {
    pub fn from_app_config(config: &crate::kernel::AppConfig) -> Self {
        Self {
            truncate_classify: config.analysis_truncate_classify,
            truncate_extract: config.analysis_truncate_extract,
            truncate_summarise: config.analysis_truncate_summarise,
        }
    }
}

/// Run the full pipeline over one document's bytes.
///
/// Persistence is the caller's concern; this function only talks to the
/// LLM and OCR collaborators.
pub async fn run_pipeline(
    bytes: &[u8],
    mime_type: &str,
    llm: &dyn BaseLlm,
    ocr: Option<&dyn BaseOcrEngine>,
    config: &PipelineConfig,
) -> AnalysisOutcome {
    let started = std::time::Instant::now();
    let mut stage = PipelineStage::Created;

    // Text extraction. Both OCR and direct extraction coming up empty is
    // the first fatal condition.
    let extraction = text::extract_text(bytes, mime_type, ocr).await;
    if extraction.provider == TextProvider::None || extraction.text.trim().is_empty() {
        let mut outcome = AnalysisOutcome::failed(
            error_codes::NO_TEXT,
            "no text could be extracted from the document",
        );
        outcome.processing_time_ms = started.elapsed().as_millis() as i64;
        return outcome;
    }
    stage = advance(stage, PipelineStage::TextExtracted);

    let mut outcome = AnalysisOutcome {
        is_scanned: extraction.is_scanned,
        ocr_confidence: extraction.ocr_confidence,
        text_length: extraction.text.chars().count() as i32,
        page_count: extraction.page_count,
        ..Default::default()
    };
    let doc_text = &extraction.text;

    let classification = classify::classify(llm, doc_text, config.truncate_classify).await;
    stage = advance(stage, PipelineStage::Classified);

    outcome.summary = summary::summarise(llm, doc_text, config.truncate_summarise).await;
    stage = advance(stage, PipelineStage::Summarised);

    let (deadlines, amounts) =
        extract::extract_entities(llm, doc_text, config.truncate_extract).await;
    outcome.deadlines = deadlines;
    stage = advance(stage, PipelineStage::DeadlinesExtracted);
    outcome.amounts = amounts;
    stage = advance(stage, PipelineStage::AmountsExtracted);

    let today = Utc::now().date_naive();
    outcome.actions = actions::synthesise_actions(&classification, &outcome.deadlines, today);
    stage = advance(stage, PipelineStage::ActionsSynthesised);

    outcome.suggestions =
        suggestions::generate_suggestions(llm, &classification, doc_text, config.truncate_summarise)
            .await;
    stage = advance(stage, PipelineStage::SuggestionsGenerated);

    outcome.classification = Some(classification);
    outcome.warnings = compute_warnings(&outcome);
    outcome.tokens_used = llm.last_tokens_used();
    outcome.processing_time_ms = started.elapsed().as_millis() as i64;

    advance(stage, PipelineStage::Completed);
    outcome
}

fn advance(from: PipelineStage, to: PipelineStage) -> PipelineStage {
    debug!(?from, ?to, "pipeline stage transition");
    to
}

/// Low-confidence warnings over the finished outcome. One warning per
/// doubtful category, keyed to the weakest entity in it.
pub fn compute_warnings(outcome: &AnalysisOutcome) -> Vec<ConfidenceWarning> {
    let mut warnings = Vec::new();

    if let Some(classification) = &outcome.classification {
        if classification.confidence < WARNING_THRESHOLD {
            warnings.push(warning(
                "classification",
                classification.confidence,
                format!(
                    "classification as '{}' is uncertain",
                    classification.doc_type.as_str()
                ),
            ));
        }
    }

    if outcome.is_scanned {
        if let Some(confidence) = outcome.ocr_confidence {
            if confidence < WARNING_THRESHOLD {
                warnings.push(warning(
                    "ocr",
                    confidence,
                    "OCR text recognition is uncertain".to_string(),
                ));
            }
        }
    }

    if let Some(weakest) = weakest_confidence(outcome.deadlines.iter().map(|d| d.confidence)) {
        if weakest < WARNING_THRESHOLD {
            warnings.push(warning(
                "deadlines",
                weakest,
                "at least one extracted deadline is uncertain".to_string(),
            ));
        }
    }

    if let Some(weakest) = weakest_confidence(outcome.amounts.iter().map(|a| a.confidence)) {
        if weakest < WARNING_THRESHOLD {
            warnings.push(warning(
                "amounts",
                weakest,
                "at least one extracted amount is uncertain".to_string(),
            ));
        }
    }

    if let Some(weakest) = weakest_confidence(outcome.actions.iter().map(|a| a.confidence)) {
        if weakest < WARNING_THRESHOLD {
            warnings.push(warning(
                "action_items",
                weakest,
                "at least one action item is uncertain".to_string(),
            ));
        }
    }

    warnings
}

fn weakest_confidence(values: impl Iterator<Item = f32>) -> Option<f32> {
    values.fold(None, |weakest, value| match weakest {
        None => Some(value),
        Some(current) => Some(current.min(value)),
    })
}

fn warning(source: &str, confidence: f32, message: String) -> ConfidenceWarning {
    ConfidenceWarning {
        source: source.to_string(),
        confidence,
        severity: severity_for_confidence(confidence),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::analysis::types::{Classification, WarningSeverity};
    use crate::kernel::test_dependencies::{MockLlm, MockOcrEngine};

    #[tokio::test]
    async fn empty_document_fails_with_no_text() {
        let llm = MockLlm::new();
        let outcome =
            run_pipeline(b"", "text/plain", &llm, None, &PipelineConfig::default()).await;

        assert!(outcome.is_failed());
        let (code, _) = outcome.failure.unwrap();
        assert_eq!(code, error_codes::NO_TEXT);
        // No LLM stage ran after the fatal condition.
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn scanned_enquiry_with_broken_llm_degrades_gracefully() {
        // OCR yields usable text; the classifier answers garbage; the
        // extractor is down. Everything falls back deterministically.
        let llm = MockLlm::new()
            .with_response("this is not json at all {{{")
            .with_retryable_error("HTTP 503") // summary
            .with_retryable_error("HTTP 503") // extraction
            .with_retryable_error("HTTP 503"); // suggestions
        let ocr = MockOcrEngine::with_output(
            "ERGÄNZUNGSERSUCHEN\nWir ersuchen um Stellungnahme bis 30.11.2025.",
            0.72,
        );

        let outcome = run_pipeline(
            b"%PDF-1.4",
            "application/pdf",
            &llm,
            Some(&ocr),
            &PipelineConfig::default(),
        )
        .await;

        assert!(!outcome.is_failed());
        assert!(outcome.is_scanned);

        let classification = outcome.classification.as_ref().unwrap();
        assert_eq!(classification.doc_type.as_str(), "ersuchen");

        assert_eq!(outcome.deadlines.len(), 1);
        assert_eq!(
            outcome.deadlines[0].date,
            chrono::NaiveDate::from_ymd_opt(2025, 11, 30).unwrap()
        );

        // The enquiry rule fires with the deadline attached.
        assert!(outcome.actions.iter().any(|a| a.title == "Respond to enquiry"));

        let class_warning = outcome
            .warnings
            .iter()
            .find(|w| w.source == "classification")
            .unwrap();
        assert_eq!(class_warning.severity, WarningSeverity::Low);
    }

    #[test]
    fn warnings_cover_every_category() {
        let outcome = AnalysisOutcome {
            classification: Some(Classification {
                confidence: 0.2,
                ..Classification::default()
            }),
            is_scanned: true,
            ocr_confidence: Some(0.45),
            ..Default::default()
        };

        let warnings = compute_warnings(&outcome);
        assert_eq!(warnings.len(), 2);
        assert_eq!(warnings[0].source, "classification");
        assert_eq!(warnings[0].severity, WarningSeverity::High);
        assert_eq!(warnings[1].source, "ocr");
        assert_eq!(warnings[1].severity, WarningSeverity::Medium);
    }

    #[test]
    fn confident_outcome_has_no_warnings() {
        let outcome = AnalysisOutcome {
            classification: Some(Classification {
                confidence: 0.95,
                ..Classification::default()
            }),
            is_scanned: false,
            ocr_confidence: None,
            ..Default::default()
        };

        assert!(compute_warnings(&outcome).is_empty());
    }
}
