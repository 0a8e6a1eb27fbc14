//! Summary stage. Optional: an LLM failure skips the stage.

use serde::Deserialize;
use tracing::warn;

use crate::domains::analysis::json::parse_llm_json;
use crate::domains::analysis::prompts::SUMMARISE_SYSTEM;
use crate::domains::analysis::types::SummaryDraft;
use crate::kernel::traits::BaseLlm;

use super::classify::truncate_text;

#[derive(Debug, Deserialize)]
struct RawSummary {
    summary: String,
    #[serde(default)]
    key_points: Vec<String>,
}

pub async fn summarise(llm: &dyn BaseLlm, text: &str, truncate: usize) -> Option<SummaryDraft> {
    let excerpt = truncate_text(text, truncate);

    let response = match llm.complete(SUMMARISE_SYSTEM, excerpt, 0.3).await {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "summary LLM call failed, skipping stage");
            return None;
        }
    };

    let raw: RawSummary = parse_llm_json(&response)?;
    if raw.summary.trim().is_empty() {
        return None;
    }

    Some(SummaryDraft {
        summary: raw.summary,
        key_points: raw
            .key_points
            .into_iter()
            .filter(|p| !p.trim().is_empty())
            .collect(),
    })
}
