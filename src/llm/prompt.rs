//! Sanitized prompt construction for the model server.
//!
//! Evidence is whitelist-filtered, every string is truncated and stripped
//! of control characters, and known prompt-injection patterns are replaced
//! with an opaque token before anything reaches the model.

use std::sync::OnceLock;

use md5::Md5;
use regex::Regex;
use serde_json::Value;
use sha2::Digest;

use crate::engine::{Alert, Evidence, WindowContext};

const MAX_STRING_LEN: usize = 120;
const MAX_EVIDENCE_JSON_LEN: usize = 600;
const MAX_LIST_ITEMS: usize = 10;

/// Evidence keys allowed through to the model.
const ALLOWED_EVIDENCE_KEYS: &[&str] = &[
    "port_count",
    "unique_ports_contacted",
    "sampled_ports",
    "syn_rate",
    "total_syn_packets",
    "syn_only_flow_count",
    "peak_syn_rate",
    "target_ips",
    "attempt_count",
    "attempts_per_minute",
    "service",
    "dst_port",
    "total_dns_queries",
    "avg_payload_size",
    "trigger_reason",
    "duration_seconds",
    "packets_per_second",
    "window_size_seconds",
    "threshold",
    "attack_type",
    "unique_sources",
];

pub const SYSTEM_PROMPT: &str = "\
You are a network security analyst assistant.
You will receive structured data about a detected network anomaly.
Your task: provide a clear, accurate security explanation.

RULES:
- Respond ONLY with valid JSON matching the schema below.
- No text before or after the JSON object.
- If uncertain, set llm_confidence to \"UNCERTAIN\".
- Do not speculate about attribution or actor identity.
- Base analysis ONLY on the provided data.

OUTPUT SCHEMA (respond with exactly this structure):
{
  \"summary\": \"<1-2 sentence plain-English explanation>\",
  \"severity_reasoning\": \"<why this severity was assigned>\",
  \"recommended_action\": \"<one specific actionable step>\",
  \"ioc_tags\": [\"<tag1>\", \"<tag2>\"],
  \"llm_confidence\": \"HIGH|MEDIUM|LOW|UNCERTAIN\",
  \"attack_phase\": \"reconnaissance|initial-access|lateral-movement|exfiltration|c2|unknown\"
}";

fn injection_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(concat!(
            r"(?i)ignore\s+(previous|all|prior)\s+instructions?",
            r"|you\s+are\s+(now|a)\s+",
            r"|forget\s+(everything|all|your)",
            r"|system\s*:",
            r"|assistant\s*:",
            r"|<\s*/?\s*(system|user|assistant)",
            r"|\[INST\]",
            r"|###\s*(instruction|system)",
        ))
        .unwrap()
    })
}

fn control_chars_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\x00-\x1f\x7f]").unwrap())
}

/// Truncate, neutralise injection patterns, strip control characters and
/// escape quotes/newlines.
pub fn sanitize_str(value: &str) -> String {
    let truncated: String = value.chars().take(MAX_STRING_LEN).collect();
    if injection_re().is_match(&truncated) {
        let digest = Md5::digest(truncated.as_bytes());
        return format!("[SANITIZED:{}]", &hex::encode(digest)[..8]);
    }
    control_chars_re()
        .replace_all(&truncated, "")
        .replace('"', "\\\"")
        .replace('\n', " ")
        .replace('\r', "")
}

/// Filter evidence down to whitelisted keys with sanitized values.
///
/// Numbers pass through, strings are sanitized, lists are truncated and
/// sanitized elementwise, and nested structures are silently dropped.
pub fn sanitize_evidence(evidence: &Evidence) -> Evidence {
    let mut safe = Evidence::new();
    for (key, value) in evidence {
        if !ALLOWED_EVIDENCE_KEYS.contains(&key.as_str()) {
            continue;
        }
        match value {
            Value::Number(_) | Value::Bool(_) => {
                safe.insert(key.clone(), value.clone());
            }
            Value::String(s) => {
                safe.insert(key.clone(), Value::String(sanitize_str(s)));
            }
            Value::Array(items) => {
                let cleaned: Vec<Value> = items
                    .iter()
                    .take(MAX_LIST_ITEMS)
                    .filter_map(|item| match item {
                        Value::Number(_) => Some(item.clone()),
                        Value::String(s) => Some(Value::String(sanitize_str(s))),
                        _ => None,
                    })
                    .collect();
                safe.insert(key.clone(), Value::Array(cleaned));
            }
            // Nested objects and nulls are dropped
            _ => {}
        }
    }
    safe
}

/// Build the (system, user) prompt pair for one alert.
pub fn build_prompt(alert: &Alert, context: &WindowContext) -> (String, String) {
    let safe_evidence = sanitize_evidence(&alert.evidence);
    let mut evidence_json =
        serde_json::to_string_pretty(&Value::Object(safe_evidence)).unwrap_or_default();
    if evidence_json.len() > MAX_EVIDENCE_JSON_LEN {
        let mut cut = MAX_EVIDENCE_JSON_LEN;
        while !evidence_json.is_char_boundary(cut) {
            cut -= 1;
        }
        evidence_json.truncate(cut);
    }

    let mut protocols = format!("{:?}", context.protocol_counts);
    protocols.truncate(80);

    let user_prompt = format!(
        "ANOMALY DETECTED — ANALYSIS REQUIRED\n\
         \n\
         Detection Rule: {rule}\n\
         Timestamp: {timestamp}\n\
         Source IP: {src_ip}\n\
         Destination IP: {dst_ip}\n\
         Severity: {severity}\n\
         Rule Confidence: {confidence:.2}\n\
         \n\
         Evidence Summary:\n\
         {evidence_json}\n\
         \n\
         Network Context (window: {window_size}s):\n\
         - Total packets: {total_packets}\n\
         - Unique source IPs: {unique_src}\n\
         - Unique dest ports: {unique_dst_ports}\n\
         - Protocol mix: {protocols}\n\
         \n\
         Provide your security analysis as JSON.",
        rule = sanitize_str(&alert.rule_name),
        timestamp = alert.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
        src_ip = sanitize_str(&alert.src_ip),
        dst_ip = sanitize_str(&alert.dst_ip),
        severity = alert.severity,
        confidence = alert.confidence,
        evidence_json = evidence_json,
        window_size = alert.window_size_seconds,
        total_packets = context.total_packets,
        unique_src = context.unique_src_count,
        unique_dst_ports = context.unique_dst_ports_count,
        protocols = protocols,
    );

    (SYSTEM_PROMPT.to_string(), user_prompt)
}
