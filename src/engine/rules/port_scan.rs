//! Port scan detection.
//!
//! A single source contacting an unusually high number of distinct
//! destination ports within one window - classic horizontal or vertical
//! reconnaissance.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

use serde_json::json;

use crate::engine::models::{Evidence, RuleResult, Severity};
use crate::state::AggregatedWindow;

use super::Rule;

/// Detects port scanning by a single source IP.
///
/// For each source seen in the window's top flows, the distinct destination
/// ports it contacted are collected; the rule fires when the worst offender
/// meets the per-horizon threshold.
pub struct PortScanRule {
    /// Unique dst ports per src required to fire, by window horizon.
    pub min_ports_1s: usize,
    pub min_ports_10s: usize,
    pub min_ports_60s: usize,
}

impl Default for PortScanRule {
    fn default() -> Self {
        Self {
            min_ports_1s: 15,
            min_ports_10s: 30,
            min_ports_60s: 50,
        }
    }
}

impl PortScanRule {
    fn threshold_for(&self, window_size: u32) -> usize {
        if window_size <= 1 {
            self.min_ports_1s
        } else if window_size <= 10 {
            self.min_ports_10s
        } else {
            self.min_ports_60s
        }
    }

    fn severity_for(confidence: f64) -> Severity {
        if confidence >= 0.9 {
            Severity::Critical
        } else if confidence >= 0.7 {
            Severity::High
        } else if confidence >= 0.4 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

impl Rule for PortScanRule {
    fn name(&self) -> &'static str {
        "port_scan"
    }

    fn severity(&self) -> Severity {
        Severity::High
    }

    fn analyze(&self, window: &AggregatedWindow) -> RuleResult {
        let threshold = self.threshold_for(window.window_size_seconds);

        // src_ip -> distinct dst ports seen in top flows
        let mut ports_per_src: HashMap<IpAddr, HashSet<u16>> = HashMap::new();
        for flow in &window.top_flows {
            ports_per_src
                .entry(flow.key.src_ip)
                .or_default()
                .insert(flow.key.dst_port);
        }

        let worst = ports_per_src
            .iter()
            .max_by_key(|(_, ports)| ports.len())
            .map(|(src, ports)| (*src, ports));

        let (worst_src, ports) = match worst {
            Some((src, ports)) if ports.len() >= threshold => (src, ports),
            _ => return RuleResult::not_triggered("no port scan detected"),
        };

        let count = ports.len();
        // 0.33 at threshold, 1.0 at 3x threshold
        let confidence = (count as f64 / (threshold as f64 * 3.0)).min(1.0);
        let severity = Self::severity_for(confidence);

        let mut sampled_ports: Vec<u16> = ports.iter().copied().collect();
        sampled_ports.sort_unstable();
        sampled_ports.truncate(10);

        let mut evidence = Evidence::new();
        evidence.insert("src_ip".into(), json!(worst_src.to_string()));
        evidence.insert("unique_ports_contacted".into(), json!(count));
        evidence.insert("sampled_ports".into(), json!(sampled_ports));
        evidence.insert("window_size_seconds".into(), json!(window.window_size_seconds));
        evidence.insert("threshold".into(), json!(threshold));
        evidence.insert("severity".into(), json!(severity.as_str()));

        RuleResult {
            triggered: true,
            confidence,
            evidence,
            description: format!(
                "{worst_src} contacted {count} unique ports in {}s window (threshold={threshold})",
                window.window_size_seconds
            ),
        }
    }
}
