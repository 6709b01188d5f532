//! Recovery of structured JSON from free-form model output.
//!
//! Chat and vision models wrap their answer in prose, Markdown fences, or
//! both. [`extract_json`] tries progressively looser strategies and returns
//! the first one that parses:
//!
//! 1. the whole text,
//! 2. the interior of the first ```` ``` ```` fenced block (optionally tagged `json`),
//! 3. the span from the first `{` to the last `}`.
//!
//! The brace span is tried last since it is the least precise.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::error::ExtractionError;

static FENCED_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"```(?:json)?\s*([\s\S]*?)\s*```").expect("fenced block pattern is valid")
});

pub fn extract_json(text: &str) -> Result<Value, ExtractionError> {
    if let Ok(value) = serde_json::from_str(text) {
        return Ok(value);
    }

    if let Some(value) = fenced_block(text).and_then(|inner| serde_json::from_str(inner).ok()) {
        return Ok(value);
    }

    if let Some(value) = brace_span(text).and_then(|span| serde_json::from_str(span).ok()) {
        return Ok(value);
    }

    Err(ExtractionError {
        raw_text: text.to_string(),
    })
}

fn fenced_block(text: &str) -> Option<&str> {
    FENCED_BLOCK
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

fn brace_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}
