//! End-to-end pipeline runs against mock collaborators.

use chrono::NaiveDate;

use backoffice_core::domains::analysis::{
    ActionPriority, DeadlineKind, DocumentType, PipelineConfig, WarningSeverity, run_pipeline,
};
use backoffice_core::kernel::test_dependencies::{MockLlm, MockOcrEngine};

/// Scanned enquiry, broken classifier, dead extraction model: the
/// heuristics and regex extractors must carry the run to completion.
#[tokio::test]
async fn scanned_enquiry_with_invalid_llm_json() {
    let ocr = MockOcrEngine::with_output(
        "ERGÄNZUNGSERSUCHEN\n\
         Betreff: Einkommensteuer 2024\n\
         Wir ersuchen um Beantwortung bis 30.11.2025.",
        0.72,
    );
    let llm = MockLlm::new()
        .with_response("Klar! Das Dokument ist sicher ein Ersuchen (kein JSON hier)")
        .with_retryable_error("HTTP 503") // summary
        .with_retryable_error("HTTP 503") // deadline/amount extraction
        .with_retryable_error("HTTP 503"); // suggestions

    let outcome = run_pipeline(
        b"%PDF-1.7 scanned",
        "application/pdf",
        &llm,
        Some(&ocr),
        &PipelineConfig::default(),
    )
    .await;

    assert!(!outcome.is_failed());
    assert!(outcome.is_scanned);
    assert_eq!(outcome.ocr_confidence, Some(0.72));

    let classification = outcome.classification.as_ref().unwrap();
    assert_eq!(classification.doc_type, DocumentType::Ersuchen);

    let expected_date = NaiveDate::from_ymd_opt(2025, 11, 30).unwrap();
    assert_eq!(outcome.deadlines.len(), 1);
    assert_eq!(outcome.deadlines[0].date, expected_date);
    assert_eq!(outcome.deadlines[0].kind, DeadlineKind::Response);

    let respond = outcome
        .actions
        .iter()
        .find(|a| a.title == "Respond to enquiry")
        .expect("enquiry action item");
    assert_eq!(respond.priority, ActionPriority::High);
    assert_eq!(respond.due_date, Some(expected_date));

    let classification_warning = outcome
        .warnings
        .iter()
        .find(|w| w.source == "classification")
        .expect("classification warning");
    assert_eq!(classification_warning.severity, WarningSeverity::Low);

    // OCR at 0.72 is also below the warning threshold.
    assert!(outcome.warnings.iter().any(|w| w.source == "ocr"));
}

/// Healthy LLM end to end: classification, summary, entities and
/// suggestions all come from the model.
#[tokio::test]
async fn text_document_with_healthy_llm() {
    let llm = MockLlm::new()
        .with_response(
            r#"{"type": "ersuchen", "subtype": "Ergänzungsersuchen", "confidence": 0.94, "urgency": "high"}"#,
        )
        .with_response(
            r#"{"summary": "Das Finanzamt ersucht um Unterlagen zur Einkommensteuer 2024.",
                "key_points": ["Frist 30.11.2025", "Belege über Werbungskosten"]}"#,
        )
        .with_response(
            r#"{"deadlines": [{"date": "2025-11-30", "kind": "response", "description": "Beantwortung", "confidence": 0.92}],
                "amounts": [{"amount": 1520.5, "kind": "tax_due", "description": "Nachforderung", "confidence": 0.88}]}"#,
        )
        .with_response(
            r#"{"suggestions": [{"title": "Belege nachreichen", "body": "Sehr geehrte Damen und Herren, ...", "tone": "formal"}]}"#,
        );

    let text = "Ergänzungsersuchen betreffend Einkommensteuer 2024. Frist: 30.11.2025.";
    let outcome = run_pipeline(
        text.as_bytes(),
        "text/plain",
        &llm,
        None,
        &PipelineConfig::default(),
    )
    .await;

    assert!(!outcome.is_failed());
    assert!(!outcome.is_scanned);

    let classification = outcome.classification.as_ref().unwrap();
    assert_eq!(classification.doc_type, DocumentType::Ersuchen);
    assert!(classification.confidence > 0.9);

    assert!(outcome.summary.is_some());
    assert_eq!(outcome.deadlines.len(), 1);
    assert_eq!(outcome.amounts.len(), 1);
    assert_eq!(outcome.amounts[0].amount_cents, 152_050);
    assert_eq!(outcome.suggestions.len(), 1);

    // Confident run: no warnings at all.
    assert!(outcome.warnings.is_empty());

    // classify + summarise + extract + suggest
    assert_eq!(llm.call_count(), 4);
}

#[tokio::test]
async fn empty_document_fails_fatally() {
    let llm = MockLlm::new();
    let outcome = run_pipeline(
        b"",
        "application/octet-stream",
        &llm,
        None,
        &PipelineConfig::default(),
    )
    .await;

    assert!(outcome.is_failed());
    let (code, _) = outcome.failure.clone().unwrap();
    assert_eq!(code, "no_text");
    assert_eq!(llm.call_count(), 0);
}

/// A Mitteilung produces neither suggestion calls nor action items.
#[tokio::test]
async fn plain_notification_stays_minimal() {
    let llm = MockLlm::new()
        .with_response(r#"{"type": "mitteilung", "confidence": 0.9, "urgency": "low"}"#)
        .with_response(r#"{"summary": "Kontostandsmitteilung.", "key_points": []}"#)
        .with_response(r#"{"deadlines": [], "amounts": []}"#);

    let outcome = run_pipeline(
        "Mitteilung über den Abgabenkontostand".as_bytes(),
        "text/plain",
        &llm,
        None,
        &PipelineConfig::default(),
    )
    .await;

    assert!(!outcome.is_failed());
    assert!(outcome.actions.is_empty());
    assert!(outcome.suggestions.is_empty());
    // No suggestion call for a Mitteilung: classify + summarise + extract.
    assert_eq!(llm.call_count(), 3);
}
