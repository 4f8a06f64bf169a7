//! SYN flood detection.
//!
//! A high rate of TCP SYN packets with few or no SYN-ACK responses is
//! characteristic of a SYN flood DoS or aggressive half-open scanning.

use std::collections::BTreeSet;

use serde_json::json;

use crate::engine::models::{Evidence, RuleResult, Severity};
use crate::model::FlagLabel;
use crate::state::{AggregatedWindow, FlowRecord};

use super::Rule;

/// Detects SYN flood / half-open scanning attacks.
///
/// Confidence blends raw SYN volume against the SYN-only share of TCP
/// flows: `0.6 * volume_ratio + 0.4 * syn_only_ratio`.
pub struct SynFloodRule {
    /// SYNs/sec per flow required to count as suspicious.
    pub syn_rate_threshold: f64,
    /// Total SYN-only packets required in a 1 s window.
    pub min_syn_packets_1s: u64,
    /// Total SYN-only packets required in 10 s and 60 s windows.
    pub min_syn_packets_10s: u64,
}

impl Default for SynFloodRule {
    fn default() -> Self {
        Self {
            syn_rate_threshold: 50.0,
            min_syn_packets_1s: 100,
            min_syn_packets_10s: 500,
        }
    }
}

impl SynFloodRule {
    fn threshold_for(&self, window_size: u32) -> u64 {
        if window_size <= 1 {
            self.min_syn_packets_1s
        } else {
            // 10 s and 60 s share a threshold: sustained floods are less
            // likely over a minute but the bar stays consistent
            self.min_syn_packets_10s
        }
    }

    fn is_syn_only(&self, flow: &FlowRecord) -> bool {
        flow.flags_seen.contains(&FlagLabel::Syn)
            && !flow.flags_seen.contains(&FlagLabel::SynAck)
            && flow.packets_per_second() >= self.syn_rate_threshold
    }
}

impl Rule for SynFloodRule {
    fn name(&self) -> &'static str {
        "syn_flood"
    }

    fn severity(&self) -> Severity {
        Severity::Critical
    }

    fn analyze(&self, window: &AggregatedWindow) -> RuleResult {
        let threshold = self.threshold_for(window.window_size_seconds);

        // Only TCP flows carry flag info
        let tcp_flows: Vec<&FlowRecord> = window
            .top_flows
            .iter()
            .filter(|flow| !flow.flags_seen.is_empty())
            .collect();

        let syn_only: Vec<&FlowRecord> = tcp_flows
            .iter()
            .copied()
            .filter(|flow| self.is_syn_only(flow))
            .collect();

        let total_syn_packets: u64 = syn_only.iter().map(|flow| flow.packet_count).sum();

        if syn_only.is_empty() || total_syn_packets < threshold {
            return RuleResult::not_triggered("no SYN flood detected");
        }

        let syn_only_ratio = syn_only.len() as f64 / tcp_flows.len().max(1) as f64;
        let confidence =
            (total_syn_packets as f64 / threshold as f64 * 0.6 + syn_only_ratio * 0.4).min(1.0);

        // Sorted lists, never raw sets, so the evidence serialises stably
        let src_ips: BTreeSet<String> =
            syn_only.iter().map(|flow| flow.key.src_ip.to_string()).collect();
        let src_ips: Vec<String> = src_ips.into_iter().collect();
        let target_ips: BTreeSet<String> =
            syn_only.iter().map(|flow| flow.key.dst_ip.to_string()).collect();
        let target_ips: Vec<String> = target_ips.into_iter().take(5).collect();
        let peak_rate = syn_only
            .iter()
            .map(|flow| flow.packets_per_second())
            .fold(0.0_f64, f64::max);

        let mut evidence = Evidence::new();
        evidence.insert("src_ips".into(), json!(src_ips));
        evidence.insert("total_syn_packets".into(), json!(total_syn_packets));
        evidence.insert("syn_only_flow_count".into(), json!(syn_only.len()));
        evidence.insert("peak_syn_rate".into(), json!((peak_rate * 100.0).round() / 100.0));
        evidence.insert("target_ips".into(), json!(target_ips));
        evidence.insert("window_size_seconds".into(), json!(window.window_size_seconds));
        evidence.insert("threshold".into(), json!(threshold));

        let primary_src = src_ips.first().cloned().unwrap_or_else(|| "unknown".into());
        if target_ips.len() == 1 {
            evidence.insert("dst_ip".into(), json!(target_ips[0]));
        }

        RuleResult {
            triggered: true,
            confidence,
            evidence,
            description: format!(
                "SYN flood from {primary_src}: {total_syn_packets} SYN-only packets at up to \
                 {peak_rate:.0} pkt/s in {}s window",
                window.window_size_seconds
            ),
        }
    }
}
