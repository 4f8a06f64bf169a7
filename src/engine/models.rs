//! Detection-engine data types: severity levels, rule results, alerts.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Rule-specific evidence attached to results and alerts.
///
/// Kept as an open JSON map: keys stay opaque strings so the enrichment
/// layer's whitelist contract is preserved, and values are restricted by
/// convention to JSON-serialisable primitives and flat lists.
pub type Evidence = serde_json::Map<String, Value>;

/// Four-level alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "LOW" => Ok(Severity::Low),
            "MEDIUM" => Ok(Severity::Medium),
            "HIGH" => Ok(Severity::High),
            "CRITICAL" => Ok(Severity::Critical),
            _ => Err(()),
        }
    }
}

/// Return value of every rule's `analyze` call.
#[derive(Debug, Clone)]
pub struct RuleResult {
    pub triggered: bool,
    /// Detection confidence in [0, 1].
    pub confidence: f64,
    pub evidence: Evidence,
    pub description: String,
}

impl RuleResult {
    /// A non-triggered result with the given description.
    pub fn not_triggered(description: &str) -> Self {
        Self {
            triggered: false,
            confidence: 0.0,
            evidence: Evidence::new(),
            description: description.to_string(),
        }
    }
}

/// Threat alert produced when a rule fires above the engine's confidence
/// threshold and survives the alert gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Unique UUID4 identifier.
    pub alert_id: String,
    /// Wall-clock time at alert creation.
    pub timestamp: DateTime<Utc>,
    /// Identifier of the rule that fired, e.g. `port_scan`.
    pub rule_name: String,
    pub severity: Severity,
    /// Confidence from the underlying rule result, in [0, 1].
    pub confidence: f64,
    /// Primary source IP involved in the suspicious activity.
    pub src_ip: String,
    /// Primary destination IP, or `multiple` when many are involved.
    pub dst_ip: String,
    pub description: String,
    pub evidence: Evidence,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub window_size_seconds: u32,
}

/// Window-level statistics carried alongside an alert for prompt context.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WindowContext {
    pub total_packets: u64,
    pub unique_src_count: usize,
    pub unique_dst_ports_count: usize,
    pub protocol_counts: std::collections::HashMap<String, u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_roundtrip() {
        for sev in [Severity::Low, Severity::Medium, Severity::High, Severity::Critical] {
            assert_eq!(sev.as_str().parse::<Severity>().unwrap(), sev);
        }
        assert!("BOGUS".parse::<Severity>().is_err());
        assert_eq!("critical".parse::<Severity>().unwrap(), Severity::Critical);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn test_severity_serialization() {
        assert_eq!(serde_json::to_string(&Severity::High).unwrap(), "\"HIGH\"");
    }

    #[test]
    fn test_not_triggered_result() {
        let result = RuleResult::not_triggered("nothing detected");
        assert!(!result.triggered);
        assert_eq!(result.confidence, 0.0);
        assert!(result.evidence.is_empty());
    }
}
