//! Validation of raw model output into a structured explanation.
//!
//! Models wrap JSON in markdown fences, prepend chatter, or drift from the
//! schema. Everything recoverable is recovered; anything else is rejected
//! so the caller falls back to a static explanation.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use super::models::{AttackPhase, LlmConfidence, LlmExplanation};

const MAX_FIELD_LEN: usize = 500;
const MAX_TAGS: usize = 8;
const MAX_TAG_LEN: usize = 50;

/// Why a model response was rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("empty response")]
    Empty,
    #[error("response is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("response is not a JSON object")]
    NotAnObject,
    #[error("missing required field {0:?}")]
    MissingField(&'static str),
}

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"```(?:json)?\s*([\s\S]+?)\s*```").unwrap())
}

fn brace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{[\s\S]+\}").unwrap())
}

fn truncate_chars(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

/// Parse and validate raw model output.
///
/// Returns an error when the output is malformed or misses required
/// fields; the caller is responsible for substituting a fallback.
pub fn validate_response(raw_text: &str) -> Result<LlmExplanation, ValidationError> {
    let text = raw_text.trim();
    if text.is_empty() {
        return Err(ValidationError::Empty);
    }

    // Strip markdown fences, then isolate the first {...} block in case
    // the model added preamble text
    let mut text = match fence_re().captures(text) {
        Some(captures) => captures[1].to_string(),
        None => text.to_string(),
    };
    if let Some(found) = brace_re().find(&text) {
        text = found.as_str().to_string();
    }

    let data: Value = serde_json::from_str(&text)
        .map_err(|err| ValidationError::InvalidJson(err.to_string()))?;
    let object = data.as_object().ok_or(ValidationError::NotAnObject)?;

    let required_str = |key: &'static str| -> Result<String, ValidationError> {
        let value = object
            .get(key)
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_default();
        let value = value.trim().to_string();
        if value.is_empty() {
            return Err(ValidationError::MissingField(key));
        }
        Ok(truncate_chars(&value, MAX_FIELD_LEN))
    };

    let summary = required_str("summary")?;
    let severity_reasoning = required_str("severity_reasoning")?;
    let recommended_action = required_str("recommended_action")?;

    let ioc_tags: Vec<String> = object
        .get("ioc_tags")
        .and_then(|v| v.as_array())
        .map(|tags| {
            tags.iter()
                .filter_map(|tag| match tag {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .take(MAX_TAGS)
                .map(|tag| truncate_chars(&tag, MAX_TAG_LEN))
                .collect()
        })
        .unwrap_or_default();

    let llm_confidence = object
        .get("llm_confidence")
        .and_then(|v| v.as_str())
        .map(LlmConfidence::parse_lenient)
        .unwrap_or(LlmConfidence::Uncertain);

    let attack_phase = object
        .get("attack_phase")
        .and_then(|v| v.as_str())
        .map(AttackPhase::parse_lenient)
        .unwrap_or(AttackPhase::Unknown);

    Ok(LlmExplanation {
        summary,
        severity_reasoning,
        recommended_action,
        ioc_tags,
        attack_phase,
        llm_confidence,
        fallback_used: false,
    })
}

/// Convenience wrapper that logs and flattens failures to `None`.
pub fn validate_response_opt(raw_text: &str) -> Option<LlmExplanation> {
    match validate_response(raw_text) {
        Ok(explanation) => Some(explanation),
        Err(err) => {
            let preview: String = raw_text.chars().take(200).collect();
            warn!(error = %err, raw = %preview, "LLM output rejected");
            None
        }
    }
}
