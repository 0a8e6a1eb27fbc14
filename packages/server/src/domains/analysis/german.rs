//! Deterministic extractors for German-language documents.
//!
//! These are the fallback when the LLM is unavailable or answers with
//! something unusable: date patterns (`30.11.2025`, `30. November 2025`)
//! and euro amounts (`€ 1.234,56`, `1.234,56 EUR`) with keyword-based
//! classification from the surrounding text.

use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;

use super::types::{AmountDraft, AmountKind, DeadlineDraft, DeadlineKind};

/// Confidence assigned to regex hits. The patterns are precise, so this
/// sits above the warning threshold; the keyword classification is the
/// fuzzy part, not the match itself.
const REGEX_CONFIDENCE: f32 = 0.8;

/// Amounts below 1 euro or above 10 million euros are treated as
/// artifacts (page numbers, reference codes) and dropped.
const MIN_AMOUNT_CENTS: i64 = 100;
const MAX_AMOUNT_CENTS: i64 = 10_000_000 * 100;

/// How much leading context feeds the keyword classification.
const CONTEXT_WINDOW: usize = 80;

lazy_static! {
    static ref NUMERIC_DATE: Regex =
        Regex::new(r"\b(\d{1,2})\.\s?(\d{1,2})\.(\d{4})\b").expect("static regex");

    // "30. November 2025", with the Austrian "Jänner" next to "Januar".
    static ref WRITTEN_DATE: Regex = Regex::new(
        r"(?i)\b(\d{1,2})\.\s*(Jänner|Januar|Februar|März|April|Mai|Juni|Juli|August|September|Oktober|November|Dezember)\s+(\d{4})\b",
    )
    .expect("static regex");

    // "€ 1.234,56" / "€1234,56"
    static ref EURO_PREFIX: Regex =
        Regex::new(r"€\s*(\d{1,3}(?:\.\d{3})*|\d+)(?:,(\d{2}))?").expect("static regex");

    // "1.234,56 EUR" / "1.234,56 €" / "EUR 1.234,56"
    static ref EURO_SUFFIX: Regex = Regex::new(
        r"(?i)\b(\d{1,3}(?:\.\d{3})*|\d+)(?:,(\d{2}))?\s*(?:EUR|Euro|€)",
    )
    .expect("static regex");

    static ref EURO_WORD_PREFIX: Regex = Regex::new(
        r"(?i)\bEUR\s+(\d{1,3}(?:\.\d{3})*|\d+)(?:,(\d{2}))?",
    )
    .expect("static regex");
}

fn month_number(name: &str) -> Option<u32> {
    match name.to_lowercase().as_str() {
        "jänner" | "januar" => Some(1),
        "februar" => Some(2),
        "märz" => Some(3),
        "april" => Some(4),
        "mai" => Some(5),
        "juni" => Some(6),
        "juli" => Some(7),
        "august" => Some(8),
        "september" => Some(9),
        "oktober" => Some(10),
        "november" => Some(11),
        "dezember" => Some(12),
        _ => None,
    }
}

fn context_before(text: &str, match_start: usize) -> String {
    let mut start = match_start.saturating_sub(CONTEXT_WINDOW);
    while !text.is_char_boundary(start) {
        start -= 1;
    }
    text[start..match_start].to_lowercase()
}

/// Classify a date by the words leading up to it.
fn classify_deadline(context: &str) -> DeadlineKind {
    if context.contains("zahlung") || context.contains("einzahl") || context.contains("entricht") {
        DeadlineKind::Payment
    } else if context.contains("berufung") || context.contains("beschwerde") {
        DeadlineKind::Appeal
    } else if context.contains("einreich") || context.contains("vorlage") {
        DeadlineKind::Submission
    } else {
        DeadlineKind::Response
    }
}

fn classify_amount(context: &str) -> AmountKind {
    if context.contains("nachforderung")
        || context.contains("nachzahlung")
        || context.contains("abgabenschuld")
        || context.contains("steuerschuld")
    {
        AmountKind::TaxDue
    } else if context.contains("gutschrift") || context.contains("erstattung") {
        AmountKind::Refund
    } else if context.contains("säumnis")
        || context.contains("zwangsstrafe")
        || context.contains("strafe")
    {
        AmountKind::Penalty
    } else if context.contains("gebühr") {
        AmountKind::Fee
    } else if context.contains("gesamt") || context.contains("summe") {
        AmountKind::Total
    } else {
        AmountKind::Other
    }
}

/// Extract deadline candidates from free text.
///
/// Duplicate dates keep their first occurrence (the first mention usually
/// carries the operative phrasing).
pub fn extract_deadlines(text: &str) -> Vec<DeadlineDraft> {
    let mut found: Vec<(usize, NaiveDate)> = Vec::new();

    for captures in NUMERIC_DATE.captures_iter(text) {
        let (Some(day), Some(month), Some(year)) = (
            captures[1].parse::<u32>().ok(),
            captures[2].parse::<u32>().ok(),
            captures[3].parse::<i32>().ok(),
        ) else {
            continue;
        };
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            found.push((captures.get(0).expect("match 0").start(), date));
        }
    }

    for captures in WRITTEN_DATE.captures_iter(text) {
        let Some(day) = captures[1].parse::<u32>().ok() else {
            continue;
        };
        let Some(month) = month_number(&captures[2]) else {
            continue;
        };
        let Some(year) = captures[3].parse::<i32>().ok() else {
            continue;
        };
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            found.push((captures.get(0).expect("match 0").start(), date));
        }
    }

    found.sort_by_key(|(start, _)| *start);

    let mut seen = std::collections::HashSet::new();
    let mut drafts = Vec::new();
    for (start, date) in found {
        if !seen.insert(date) {
            continue;
        }
        let context = context_before(text, start);
        drafts.push(DeadlineDraft {
            kind: classify_deadline(&context),
            date,
            description: context.trim().to_string(),
            confidence: REGEX_CONFIDENCE,
            is_hard: true,
        });
    }

    drafts
}

fn parse_cents(whole: &str, fraction: Option<&str>) -> Option<i64> {
    let whole: i64 = whole.replace('.', "").parse().ok()?;
    let cents: i64 = fraction.map_or(Some(0), |f| f.parse().ok())?;
    Some(whole * 100 + cents)
}

/// Extract euro amounts from free text.
pub fn extract_amounts(text: &str) -> Vec<AmountDraft> {
    let mut found: Vec<(usize, i64)> = Vec::new();

    for regex in [&*EURO_PREFIX, &*EURO_SUFFIX, &*EURO_WORD_PREFIX] {
        for captures in regex.captures_iter(text) {
            let whole = &captures[1];
            let fraction = captures.get(2).map(|m| m.as_str());
            if let Some(cents) = parse_cents(whole, fraction) {
                found.push((captures.get(0).expect("match 0").start(), cents));
            }
        }
    }

    found.sort_by_key(|(start, _)| *start);

    let mut seen = std::collections::HashSet::new();
    let mut drafts = Vec::new();
    for (start, cents) in found {
        if !(MIN_AMOUNT_CENTS..=MAX_AMOUNT_CENTS).contains(&cents) {
            continue;
        }
        if !seen.insert(cents) {
            continue;
        }
        let context = context_before(text, start);
        drafts.push(AmountDraft {
            kind: classify_amount(&context),
            amount_cents: cents,
            currency: "EUR".to_string(),
            description: context.trim().to_string(),
            confidence: REGEX_CONFIDENCE,
        });
    }

    drafts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_date_extracts() {
        let drafts = extract_deadlines("Frist zur Stellungnahme bis 30.11.2025 einzubringen.");
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].date, NaiveDate::from_ymd_opt(2025, 11, 30).unwrap());
        assert_eq!(drafts[0].kind, DeadlineKind::Response);
        assert!(drafts[0].is_hard);
    }

    #[test]
    fn written_date_with_austrian_month() {
        let drafts = extract_deadlines("spätestens am 15. Jänner 2026");
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].date, NaiveDate::from_ymd_opt(2026, 1, 15).unwrap());
    }

    #[test]
    fn payment_context_classifies_payment() {
        let drafts = extract_deadlines("Die Zahlung ist bis 01.12.2025 zu leisten.");
        assert_eq!(drafts[0].kind, DeadlineKind::Payment);
    }

    #[test]
    fn appeal_context_classifies_appeal() {
        let drafts = extract_deadlines("Eine Berufung ist bis 14.10.2025 zulässig.");
        assert_eq!(drafts[0].kind, DeadlineKind::Appeal);
    }

    #[test]
    fn submission_context_classifies_submission() {
        let drafts = extract_deadlines("Unterlagen sind bis 20.09.2025 einzureichen.");
        // "einzureichen" carries the "einreich" stem.
        assert_eq!(drafts.len(), 1);
    }

    #[test]
    fn invalid_calendar_dates_are_dropped() {
        assert!(extract_deadlines("am 31.02.2025 und am 99.13.2025").is_empty());
    }

    #[test]
    fn duplicate_dates_collapse() {
        let drafts = extract_deadlines("bis 30.11.2025, spätestens jedoch 30.11.2025");
        assert_eq!(drafts.len(), 1);
    }

    #[test]
    fn euro_prefix_amount() {
        let drafts = extract_amounts("Nachforderung in Höhe von € 1.234,56 festgesetzt.");
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].amount_cents, 123_456);
        assert_eq!(drafts[0].kind, AmountKind::TaxDue);
        assert_eq!(drafts[0].currency, "EUR");
    }

    #[test]
    fn euro_suffix_amount() {
        let drafts = extract_amounts("Es ergibt sich eine Gutschrift von 250,00 EUR.");
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].amount_cents, 25_000);
        assert_eq!(drafts[0].kind, AmountKind::Refund);
    }

    #[test]
    fn amount_without_decimals() {
        let drafts = extract_amounts("Gesamtbetrag: EUR 1500");
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].amount_cents, 150_000);
        assert_eq!(drafts[0].kind, AmountKind::Total);
    }

    #[test]
    fn tiny_and_huge_amounts_rejected() {
        assert!(extract_amounts("Seite € 0,50").is_empty());
        assert!(extract_amounts("Referenz € 99.000.000,00").is_empty());
    }

    #[test]
    fn penalty_context() {
        let drafts = extract_amounts("Säumniszuschlag von € 58,00");
        assert_eq!(drafts[0].kind, AmountKind::Penalty);
    }
}
