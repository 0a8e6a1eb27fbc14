//! Pipeline value types.
//!
//! The pipeline stages communicate through these structs and only the job
//! handler persists them, so the whole pipeline runs against mocks in
//! tests without a database.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ============================================================================
// Classification
// ============================================================================

/// Austrian document classes the platform understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    /// Official decision.
    Bescheid,
    /// Supplementary enquiry (Ergänzungsersuchen).
    Ersuchen,
    /// Plain notification.
    Mitteilung,
    /// Payment reminder / dunning letter.
    Mahnung,
    /// Invoice.
    Rechnung,
    /// Preliminary objection notice (Vorhalt).
    Vorhalt,
    /// Court payment order.
    Zahlungsbefehl,
    /// Everything else.
    #[default]
    Sonstige,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Bescheid => "bescheid",
            DocumentType::Ersuchen => "ersuchen",
            DocumentType::Mitteilung => "mitteilung",
            DocumentType::Mahnung => "mahnung",
            DocumentType::Rechnung => "rechnung",
            DocumentType::Vorhalt => "vorhalt",
            DocumentType::Zahlungsbefehl => "zahlungsbefehl",
            DocumentType::Sonstige => "sonstige",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "bescheid" => Some(DocumentType::Bescheid),
            "ersuchen" => Some(DocumentType::Ersuchen),
            "mitteilung" => Some(DocumentType::Mitteilung),
            "mahnung" => Some(DocumentType::Mahnung),
            "rechnung" => Some(DocumentType::Rechnung),
            "vorhalt" => Some(DocumentType::Vorhalt),
            "zahlungsbefehl" => Some(DocumentType::Zahlungsbefehl),
            "sonstige" => Some(DocumentType::Sonstige),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl Urgency {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "low" => Some(Urgency::Low),
            "normal" => Some(Urgency::Normal),
            "high" => Some(Urgency::High),
            "critical" => Some(Urgency::Critical),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub doc_type: DocumentType,
    pub subtype: Option<String>,
    /// In [0, 1].
    pub confidence: f32,
    pub urgency: Urgency,
}

impl Default for Classification {
    fn default() -> Self {
        Self {
            doc_type: DocumentType::Sonstige,
            subtype: None,
            confidence: 0.5,
            urgency: Urgency::Normal,
        }
    }
}

// ============================================================================
// Text extraction
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextProvider {
    /// Hosted vision OCR.
    Hunyuan,
    /// Local tesseract-based OCR.
    Tesseract,
    /// Direct text extraction from the file bytes.
    Direct,
    /// Nothing produced text.
    None,
}

#[derive(Debug, Clone)]
pub struct TextExtraction {
    pub text: String,
    pub page_count: i32,
    /// Only set when an OCR provider produced the text.
    pub ocr_confidence: Option<f32>,
    pub provider: TextProvider,
    pub is_scanned: bool,
}

// ============================================================================
// Extracted entities (drafts, pre-persistence)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "deadline_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeadlineKind {
    #[default]
    Response,
    Payment,
    Submission,
    Appeal,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadlineDraft {
    pub kind: DeadlineKind,
    pub date: NaiveDate,
    pub description: String,
    pub confidence: f32,
    pub is_hard: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "amount_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AmountKind {
    TaxDue,
    Refund,
    Penalty,
    Fee,
    Total,
    #[default]
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmountDraft {
    pub kind: AmountKind,
    /// Euro cents; the wire formats are parsed exactly, never via floats.
    pub amount_cents: i64,
    pub currency: String,
    pub description: String,
    pub confidence: f32,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type, Default,
)]
#[sqlx(type_name = "action_priority", rename_all = "snake_case")]
#[serde(rename_all = "lowercase")]
pub enum ActionPriority {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDraft {
    pub title: String,
    pub description: String,
    pub priority: ActionPriority,
    pub category: String,
    pub due_date: Option<NaiveDate>,
    pub confidence: f32,
    pub source_text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestionDraft {
    pub title: String,
    pub body: String,
    pub tone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryDraft {
    pub summary: String,
    pub key_points: Vec<String>,
}

// ============================================================================
// Warnings
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningSeverity {
    Low,
    Medium,
    High,
}

/// Low-confidence flag attached to the analysis result (not persisted as
/// its own row).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceWarning {
    /// Which stage produced the doubtful output: "classification", "ocr",
    /// "deadlines", "amounts", "action_items".
    pub source: String,
    pub confidence: f32,
    pub severity: WarningSeverity,
    pub message: String,
}

/// Severity for a confidence value already known to be below the warning
/// threshold.
pub fn severity_for_confidence(confidence: f32) -> WarningSeverity {
    if confidence < 0.3 {
        WarningSeverity::High
    } else if confidence < 0.5 {
        WarningSeverity::Medium
    } else {
        WarningSeverity::Low
    }
}

// ============================================================================
// Pipeline outcome
// ============================================================================

/// Machine-readable failure tags persisted on a failed analysis.
pub mod error_codes {
    pub const DOCUMENT_NOT_FOUND: &str = "document_not_found";
    pub const NO_TEXT: &str = "no_text";
}

/// Everything one pipeline run produced. The handler persists this.
#[derive(Debug, Clone, Default)]
pub struct AnalysisOutcome {
    pub failure: Option<(String, String)>,
    pub is_scanned: bool,
    pub ocr_confidence: Option<f32>,
    pub text_length: i32,
    pub page_count: i32,
    pub classification: Option<Classification>,
    pub summary: Option<SummaryDraft>,
    pub deadlines: Vec<DeadlineDraft>,
    pub amounts: Vec<AmountDraft>,
    pub actions: Vec<ActionDraft>,
    pub suggestions: Vec<SuggestionDraft>,
    pub warnings: Vec<ConfidenceWarning>,
    pub tokens_used: Option<i32>,
    pub processing_time_ms: i64,
}

impl AnalysisOutcome {
    pub fn failed(code: &str, message: impl Into<String>) -> Self {
        Self {
            failure: Some((code.to_string(), message.into())),
            ..Default::default()
        }
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }
}
