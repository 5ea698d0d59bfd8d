//! JSON extraction from free-form generator text.
//!
//! Generators wrap their JSON in code fences, reasoning blocks, and chatty
//! preambles. [`parse`] peels those away and decodes the first `{` .. last `}`
//! span. It is a pure function.

use thiserror::Error;

/// The generator's text could not be turned into a JSON object.
///
/// Always carries the untouched raw text for diagnostics and for building the
/// next attempt's prompt.
#[derive(Debug, Clone, Error)]
#[error("could not parse generator output: {reason}")]
pub struct ParseError {
    pub reason: String,
    pub raw: String,
}

const FENCE: &str = "```";
const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";

/// Extract and decode the JSON object embedded in `raw`.
pub fn parse(raw: &str) -> Result<serde_json::Value, ParseError> {
    let fail = |reason: String| ParseError {
        reason,
        raw: raw.to_string(),
    };

    let without_reasoning = strip_reasoning(raw);
    let text = strip_fences(without_reasoning.trim());

    let start = text
        .find('{')
        .ok_or_else(|| fail("no '{' in output".to_string()))?;
    let end = text
        .rfind('}')
        .filter(|end| *end > start)
        .ok_or_else(|| fail("no closing '}' after the first '{'".to_string()))?;

    serde_json::from_str(&text[start..=end]).map_err(|e| fail(format!("invalid JSON: {e}")))
}

/// Drop the fence lines when the whole text is one fenced block.
fn strip_fences(text: &str) -> &str {
    let mut body = text;
    if body.starts_with(FENCE) {
        body = match body.find('\n') {
            Some(newline) => &body[newline + 1..],
            None => &body[FENCE.len()..],
        };
    }
    let trimmed = body.trim_end();
    if let Some(rest) = trimmed.strip_suffix(FENCE) {
        body = rest;
    }
    body.trim()
}

/// Remove `<think>..</think>` spans emitted by reasoning models. An unclosed
/// block swallows the rest of the text, leaving nothing to parse.
fn strip_reasoning(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find(THINK_OPEN) {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + THINK_OPEN.len()..];
        match after_open.find(THINK_CLOSE) {
            Some(close) => rest = &after_open[close + THINK_CLOSE.len()..],
            None => {
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out
}
