//! DNS tunneling detection.
//!
//! High query volume or oversized payloads from a single host suggest data
//! encoded into DNS queries - a common covert exfiltration channel.

use std::collections::HashMap;
use std::net::IpAddr;

use serde_json::json;

use crate::engine::models::{Evidence, RuleResult, Severity};
use crate::model::Protocol;
use crate::state::{AggregatedWindow, FlowRecord};

use super::Rule;

/// Detects data exfiltration via DNS tunneling.
///
/// DNS flows are grouped by source; the rule triggers on query volume,
/// average payload size, or both, with `confidence = max(query_score,
/// payload_score)`.
pub struct DnsTunnelingRule {
    pub max_dns_queries: u64,
    pub max_dns_payload_bytes: f64,
}

impl Default for DnsTunnelingRule {
    fn default() -> Self {
        Self {
            max_dns_queries: 200,
            max_dns_payload_bytes: 150.0,
        }
    }
}

impl Rule for DnsTunnelingRule {
    fn name(&self) -> &'static str {
        "dns_tunneling"
    }

    fn severity(&self) -> Severity {
        Severity::High
    }

    fn analyze(&self, window: &AggregatedWindow) -> RuleResult {
        let dns_flows: Vec<&FlowRecord> = window
            .top_flows
            .iter()
            .filter(|flow| flow.key.protocol == Protocol::Dns)
            .collect();

        if dns_flows.is_empty() {
            return RuleResult::not_triggered("no DNS flows in window");
        }

        let mut by_src: HashMap<IpAddr, Vec<&FlowRecord>> = HashMap::new();
        for flow in dns_flows {
            by_src.entry(flow.key.src_ip).or_default().push(flow);
        }

        let q_threshold = self.max_dns_queries;
        let p_threshold = self.max_dns_payload_bytes;

        let mut best: Option<(f64, Evidence, String)> = None;

        for (src_ip, flows) in by_src {
            let total_queries: u64 = flows.iter().map(|flow| flow.packet_count).sum();
            let avg_payload: f64 = flows.iter().map(|flow| flow.avg_payload_size()).sum::<f64>()
                / flows.len() as f64;

            let query_score = (total_queries as f64 / (q_threshold as f64 * 2.0)).min(1.0);
            let payload_score = (avg_payload / (p_threshold * 2.0)).min(1.0);
            let confidence = query_score.max(payload_score);

            let by_volume = total_queries >= q_threshold;
            let by_payload = avg_payload >= p_threshold;
            if !(by_volume || by_payload) {
                continue;
            }
            if let Some((best_confidence, _, _)) = &best {
                if confidence <= *best_confidence {
                    continue;
                }
            }

            let trigger_reason = match (by_volume, by_payload) {
                (true, false) => "volume",
                (false, true) => "payload_size",
                _ => "volume+payload_size",
            };
            let avg_rounded = (avg_payload * 100.0).round() / 100.0;

            let mut evidence = Evidence::new();
            evidence.insert("src_ip".into(), json!(src_ip.to_string()));
            evidence.insert("total_dns_queries".into(), json!(total_queries));
            evidence.insert("avg_payload_size".into(), json!(avg_rounded));
            evidence.insert("trigger_reason".into(), json!(trigger_reason));
            evidence.insert("window_size_seconds".into(), json!(window.window_size_seconds));

            let description = format!(
                "DNS tunneling suspected from {src_ip}: {total_queries} queries, \
                 avg payload {avg_rounded}B ({trigger_reason})"
            );
            best = Some((confidence, evidence, description));
        }

        match best {
            Some((confidence, evidence, description)) => RuleResult {
                triggered: true,
                confidence,
                evidence,
                description,
            },
            None => RuleResult::not_triggered("no DNS tunneling detected"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::rules::test_support::{dns_flow, tcp_flow, window_with_flows};
    use crate::model::FlagLabel;

    #[test]
    fn test_volume_trigger() {
        let rule = DnsTunnelingRule::default();
        let window = window_with_flows(10, vec![dns_flow("10.0.0.5", "8.8.8.8", 300, 60.0)]);

        let result = rule.analyze(&window);
        assert!(result.triggered);
        assert_eq!(result.evidence["trigger_reason"], "volume");
        assert_eq!(result.evidence["total_dns_queries"], 300);
        assert!((result.confidence - 0.75).abs() < 0.001);
    }

    #[test]
    fn test_payload_trigger() {
        let rule = DnsTunnelingRule::default();
        let window = window_with_flows(10, vec![dns_flow("10.0.0.5", "8.8.8.8", 50, 220.0)]);

        let result = rule.analyze(&window);
        assert!(result.triggered);
        assert_eq!(result.evidence["trigger_reason"], "payload_size");
    }

    #[test]
    fn test_both_triggers_combined_reason() {
        let rule = DnsTunnelingRule::default();
        let window = window_with_flows(10, vec![dns_flow("10.0.0.5", "8.8.8.8", 400, 200.0)]);

        let result = rule.analyze(&window);
        assert!(result.triggered);
        assert_eq!(result.evidence["trigger_reason"], "volume+payload_size");
    }

    #[test]
    fn test_normal_dns_does_not_fire() {
        let rule = DnsTunnelingRule::default();
        let window = window_with_flows(10, vec![dns_flow("10.0.0.5", "8.8.8.8", 40, 60.0)]);
        assert!(!rule.analyze(&window).triggered);
    }

    #[test]
    fn test_ignores_non_dns_flows() {
        let rule = DnsTunnelingRule::default();
        let flow = tcp_flow("10.0.0.5", "8.8.8.8", 443, 1000, 100.0, 400.0, &[FlagLabel::Ack]);
        let window = window_with_flows(10, vec![flow]);
        let result = rule.analyze(&window);
        assert!(!result.triggered);
        assert_eq!(result.description, "no DNS flows in window");
    }

    #[test]
    fn test_worst_source_wins() {
        let rule = DnsTunnelingRule::default();
        let window = window_with_flows(
            10,
            vec![
                dns_flow("10.0.0.5", "8.8.8.8", 250, 60.0),
                dns_flow("10.0.0.6", "8.8.4.4", 700, 60.0),
            ],
        );

        let result = rule.analyze(&window);
        assert!(result.triggered);
        assert_eq!(result.evidence["src_ip"], "10.0.0.6");
    }
}
