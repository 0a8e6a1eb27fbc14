//! Action item synthesis.
//!
//! Purely rule-based: the classification decides the headline item, every
//! extracted deadline adds a dated follow-up whose priority scales with
//! how soon it is due.

use chrono::NaiveDate;

use crate::domains::analysis::types::{
    ActionDraft, ActionPriority, Classification, DeadlineDraft, DocumentType,
};

/// Rule-derived items carry a fixed high confidence; the uncertainty sits
/// in the inputs (classification, deadlines), not in these rules.
const RULE_CONFIDENCE: f32 = 0.9;

fn priority_for_days_until(days: i64) -> ActionPriority {
    if days <= 3 {
        ActionPriority::High
    } else if days <= 14 {
        ActionPriority::Medium
    } else {
        ActionPriority::Low
    }
}

pub fn synthesise_actions(
    classification: &Classification,
    deadlines: &[DeadlineDraft],
    today: NaiveDate,
) -> Vec<ActionDraft> {
    let mut actions = Vec::new();
    let first_deadline = deadlines.iter().map(|d| d.date).min();

    match classification.doc_type {
        DocumentType::Ersuchen => actions.push(ActionDraft {
            title: "Respond to enquiry".to_string(),
            description: "Answer the supplementary enquiry and submit the requested documents."
                .to_string(),
            priority: ActionPriority::High,
            category: "response".to_string(),
            due_date: first_deadline,
            confidence: RULE_CONFIDENCE,
            source_text: None,
        }),
        DocumentType::Mahnung => actions.push(ActionDraft {
            title: "Review and settle payment reminder".to_string(),
            description: "Check the dunning letter and settle the outstanding balance."
                .to_string(),
            priority: ActionPriority::High,
            category: "payment".to_string(),
            due_date: first_deadline,
            confidence: RULE_CONFIDENCE,
            source_text: None,
        }),
        DocumentType::Zahlungsbefehl => actions.push(ActionDraft {
            title: "Urgent: handle payment order".to_string(),
            description:
                "A court payment order requires action within the statutory objection period."
                    .to_string(),
            priority: ActionPriority::High,
            category: "payment".to_string(),
            due_date: first_deadline,
            confidence: RULE_CONFIDENCE,
            source_text: None,
        }),
        DocumentType::Bescheid => actions.push(ActionDraft {
            title: "Review decision".to_string(),
            description: "Review the official decision and verify the assessed figures."
                .to_string(),
            priority: ActionPriority::Medium,
            category: "review".to_string(),
            due_date: first_deadline,
            confidence: RULE_CONFIDENCE,
            source_text: None,
        }),
        _ => {}
    }

    for deadline in deadlines {
        let days_until = (deadline.date - today).num_days();
        actions.push(ActionDraft {
            title: format!("Meet {} deadline", kind_label(deadline)),
            description: format!("Deadline on {} must be met.", deadline.date),
            priority: priority_for_days_until(days_until),
            category: "deadline".to_string(),
            due_date: Some(deadline.date),
            confidence: RULE_CONFIDENCE.min(deadline.confidence + 0.1),
            source_text: if deadline.description.is_empty() {
                None
            } else {
                Some(deadline.description.clone())
            },
        });
    }

    actions
}

fn kind_label(deadline: &DeadlineDraft) -> &'static str {
    use crate::domains::analysis::types::DeadlineKind;
    match deadline.kind {
        DeadlineKind::Response => "response",
        DeadlineKind::Payment => "payment",
        DeadlineKind::Submission => "submission",
        DeadlineKind::Appeal => "appeal",
        DeadlineKind::Other => "general",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::analysis::types::DeadlineKind;

    fn classification(doc_type: DocumentType) -> Classification {
        Classification {
            doc_type,
            ..Classification::default()
        }
    }

    fn deadline(date: NaiveDate) -> DeadlineDraft {
        DeadlineDraft {
            kind: DeadlineKind::Response,
            date,
            description: "Frist".to_string(),
            confidence: 0.8,
            is_hard: true,
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 11, 1).unwrap()
    }

    #[test]
    fn ersuchen_produces_response_item_with_first_deadline() {
        let due = NaiveDate::from_ymd_opt(2025, 11, 30).unwrap();
        let actions = synthesise_actions(
            &classification(DocumentType::Ersuchen),
            &[deadline(due)],
            today(),
        );

        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].title, "Respond to enquiry");
        assert_eq!(actions[0].priority, ActionPriority::High);
        assert_eq!(actions[0].due_date, Some(due));
    }

    #[test]
    fn bescheid_produces_medium_review_item() {
        let actions = synthesise_actions(&classification(DocumentType::Bescheid), &[], today());
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].title, "Review decision");
        assert_eq!(actions[0].priority, ActionPriority::Medium);
    }

    #[test]
    fn mahnung_and_zahlungsbefehl_are_high_priority() {
        for doc_type in [DocumentType::Mahnung, DocumentType::Zahlungsbefehl] {
            let actions = synthesise_actions(&classification(doc_type), &[], today());
            assert_eq!(actions[0].priority, ActionPriority::High);
        }
    }

    #[test]
    fn mitteilung_without_deadlines_produces_nothing() {
        let actions = synthesise_actions(&classification(DocumentType::Mitteilung), &[], today());
        assert!(actions.is_empty());
    }

    #[test]
    fn deadline_priority_scales_with_days_until() {
        let base = today();
        let cases = [
            (2, ActionPriority::High),
            (3, ActionPriority::High),
            (4, ActionPriority::Medium),
            (14, ActionPriority::Medium),
            (15, ActionPriority::Low),
            (60, ActionPriority::Low),
        ];

        for (days, expected) in cases {
            let date = base + chrono::Duration::days(days);
            let actions = synthesise_actions(
                &classification(DocumentType::Sonstige),
                &[deadline(date)],
                base,
            );
            assert_eq!(actions.len(), 1);
            assert_eq!(actions[0].priority, expected, "days={days}");
        }
    }

    #[test]
    fn overdue_deadline_is_high_priority() {
        let date = today() - chrono::Duration::days(2);
        let actions = synthesise_actions(
            &classification(DocumentType::Sonstige),
            &[deadline(date)],
            today(),
        );
        assert_eq!(actions[0].priority, ActionPriority::High);
    }
}
