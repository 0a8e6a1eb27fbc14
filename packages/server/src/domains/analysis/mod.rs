//! Document analysis: OCR/text extraction, classification, deadline and
//! amount extraction, action items, response suggestions.

pub mod german;
pub mod handler;
pub mod json;
pub mod models;
pub mod pipeline;
pub mod prompts;
pub mod stages;
pub mod types;

pub use handler::{AnalysisPayload, run_document_analysis};
pub use models::{
    ActionItem, ActionStatus, Analysis, AnalysisStatus, ExtractedAmount, ExtractedDeadline,
    ResponseSuggestion,
};
pub use pipeline::{PipelineConfig, compute_warnings, run_pipeline};
pub use types::{
    ActionDraft, ActionPriority, AmountDraft, AmountKind, AnalysisOutcome, Classification,
    ConfidenceWarning, DeadlineDraft, DeadlineKind, DocumentType, SummaryDraft, TextProvider,
    Urgency, WarningSeverity,
};
