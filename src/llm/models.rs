//! Data types for the LLM enrichment layer.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Model's self-reported confidence in its explanation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LlmConfidence {
    High,
    Medium,
    Low,
    Uncertain,
}

impl LlmConfidence {
    /// Clamp an arbitrary string onto the enum; anything unknown is
    /// `Uncertain`.
    pub fn parse_lenient(value: &str) -> Self {
        match value.to_uppercase().as_str() {
            "HIGH" => LlmConfidence::High,
            "MEDIUM" => LlmConfidence::Medium,
            "LOW" => LlmConfidence::Low,
            _ => LlmConfidence::Uncertain,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LlmConfidence::High => "HIGH",
            LlmConfidence::Medium => "MEDIUM",
            LlmConfidence::Low => "LOW",
            LlmConfidence::Uncertain => "UNCERTAIN",
        }
    }
}

impl fmt::Display for LlmConfidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// MITRE ATT&CK-style phase of the detected activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttackPhase {
    Reconnaissance,
    InitialAccess,
    LateralMovement,
    Exfiltration,
    C2,
    Unknown,
}

impl AttackPhase {
    /// Clamp an arbitrary string onto the enum; anything unknown is
    /// `Unknown`.
    pub fn parse_lenient(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "reconnaissance" => AttackPhase::Reconnaissance,
            "initial-access" => AttackPhase::InitialAccess,
            "lateral-movement" => AttackPhase::LateralMovement,
            "exfiltration" => AttackPhase::Exfiltration,
            "c2" => AttackPhase::C2,
            _ => AttackPhase::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AttackPhase::Reconnaissance => "reconnaissance",
            AttackPhase::InitialAccess => "initial-access",
            AttackPhase::LateralMovement => "lateral-movement",
            AttackPhase::Exfiltration => "exfiltration",
            AttackPhase::C2 => "c2",
            AttackPhase::Unknown => "unknown",
        }
    }
}

impl fmt::Display for AttackPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured explanation returned by the LLM (or a static fallback).
///
/// Plain strings and lists throughout - safe to serialise and broadcast
/// without further processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmExplanation {
    /// 1-2 sentence plain-English explanation of what was detected.
    pub summary: String,
    /// Why this severity level was assigned.
    pub severity_reasoning: String,
    /// One specific, actionable response step.
    pub recommended_action: String,
    /// e.g. `["port-scan", "reconnaissance", "automated-tool"]`
    pub ioc_tags: Vec<String>,
    pub attack_phase: AttackPhase,
    pub llm_confidence: LlmConfidence,
    /// True when the LLM was skipped or failed and a static fallback was
    /// returned instead.
    pub fallback_used: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_lenient_parse() {
        assert_eq!(LlmConfidence::parse_lenient("high"), LlmConfidence::High);
        assert_eq!(LlmConfidence::parse_lenient("MEDIUM"), LlmConfidence::Medium);
        assert_eq!(LlmConfidence::parse_lenient("99%"), LlmConfidence::Uncertain);
    }

    #[test]
    fn test_attack_phase_lenient_parse() {
        assert_eq!(AttackPhase::parse_lenient("C2"), AttackPhase::C2);
        assert_eq!(
            AttackPhase::parse_lenient("Lateral-Movement"),
            AttackPhase::LateralMovement
        );
        assert_eq!(AttackPhase::parse_lenient("cyberwar"), AttackPhase::Unknown);
    }

    #[test]
    fn test_phase_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_string(&AttackPhase::InitialAccess).unwrap(),
            "\"initial-access\""
        );
    }
}
