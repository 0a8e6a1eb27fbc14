//! Permissive extraction of JSON from LLM responses.
//!
//! Models wrap JSON in prose, markdown fences or both. Extraction is
//! permissive on the input shape; validation of the parsed value is the
//! caller's job and is strict.

use serde::de::DeserializeOwned;

/// Pull the first JSON object or array out of an LLM response.
///
/// Tries, in order: a fenced ```json block, any fenced block, the
/// outermost `{...}` or `[...]` span.
pub fn extract_json_block(response: &str) -> Option<&str> {
    if let Some(block) = fenced_block(response) {
        return Some(block);
    }
    outermost_span(response, '{', '}').or_else(|| outermost_span(response, '[', ']'))
}

/// Extract and deserialize in one step.
pub fn parse_llm_json<T: DeserializeOwned>(response: &str) -> Option<T> {
    let block = extract_json_block(response)?;
    serde_json::from_str(block).ok()
}

fn fenced_block(response: &str) -> Option<&str> {
    let fence_start = response.find("```")?;
    let after_fence = &response[fence_start + 3..];
    // Skip a language tag like "json" up to the first newline.
    let content_start = after_fence.find('\n')? + 1;
    let content = &after_fence[content_start..];
    let fence_end = content.find("```")?;
    let block = content[..fence_end].trim();
    if block.is_empty() { None } else { Some(block) }
}

fn outermost_span(response: &str, open: char, close: char) -> Option<&str> {
    let start = response.find(open)?;
    let end = response.rfind(close)?;
    if end <= start {
        return None;
    }
    Some(&response[start..=end])
}
