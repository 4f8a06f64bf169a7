//! C2 beaconing detection.
//!
//! Long-lived, low-rate, small-payload flows to uncommon ports are the
//! behavioural signature of malware checking in with its controller.

use serde_json::json;

use crate::engine::models::{Evidence, RuleResult, Severity};
use crate::state::AggregatedWindow;

use super::Rule;

/// Detects command-and-control beaconing.
pub struct BeaconingRule {
    /// Minimum flow lifetime. Must stay below the flow TTL or candidates
    /// expire right at the trigger boundary and the rule never fires.
    pub min_beacon_duration: f64,
    pub min_beacon_rate: f64,
    pub max_beacon_rate: f64,
    pub max_beacon_payload: f64,
    /// Ports where long low-rate flows are ordinary traffic.
    pub common_ports: Vec<u16>,
}

impl Default for BeaconingRule {
    fn default() -> Self {
        Self {
            min_beacon_duration: 45.0,
            min_beacon_rate: 0.1,
            max_beacon_rate: 2.0,
            max_beacon_payload: 128.0,
            common_ports: vec![80, 443, 53, 22, 25, 587],
        }
    }
}

impl Rule for BeaconingRule {
    fn name(&self) -> &'static str {
        "beaconing"
    }

    fn severity(&self) -> Severity {
        Severity::Critical
    }

    fn analyze(&self, window: &AggregatedWindow) -> RuleResult {
        let suspicious: Vec<_> = window
            .top_flows
            .iter()
            .filter(|flow| {
                let pps = flow.packets_per_second();
                flow.duration_secs() >= self.min_beacon_duration
                    && pps >= self.min_beacon_rate
                    && pps <= self.max_beacon_rate
                    && flow.avg_payload_size() <= self.max_beacon_payload
                    && !self.common_ports.contains(&flow.key.dst_port)
            })
            .collect();

        // The most beacon-like candidate is the one closest to the middle
        // of the plausible rate band.
        let mid_rate = (self.min_beacon_rate + self.max_beacon_rate) / 2.0;
        let worst = suspicious
            .iter()
            .min_by(|a, b| {
                let da = (a.packets_per_second() - mid_rate).abs();
                let db = (b.packets_per_second() - mid_rate).abs();
                da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
            })
            .copied();
        let worst = match worst {
            Some(flow) => flow,
            None => return RuleResult::not_triggered("no beaconing detected"),
        };

        let duration = worst.duration_secs();
        let pps = worst.packets_per_second();
        let duration_score = (duration / (self.min_beacon_duration * 5.0)).min(1.0);
        let rate_score = 1.0 - (pps - mid_rate).abs() / mid_rate;
        let confidence = (duration_score * 0.6 + rate_score.max(0.0) * 0.4).min(1.0);

        let mut evidence = Evidence::new();
        evidence.insert("src_ip".into(), json!(worst.key.src_ip.to_string()));
        evidence.insert("dst_ip".into(), json!(worst.key.dst_ip.to_string()));
        evidence.insert("dst_port".into(), json!(worst.key.dst_port));
        evidence.insert("duration_seconds".into(), json!((duration * 10.0).round() / 10.0));
        evidence.insert("packets_per_second".into(), json!((pps * 1000.0).round() / 1000.0));
        evidence.insert(
            "avg_payload_size".into(),
            json!((worst.avg_payload_size() * 100.0).round() / 100.0),
        );
        evidence.insert("window_size_seconds".into(), json!(window.window_size_seconds));

        RuleResult {
            triggered: true,
            confidence,
            evidence,
            description: format!(
                "Possible beaconing: {}->{}:{} at {pps:.2} pkt/s for {duration:.0}s \
                 (payload {:.0}B)",
                worst.key.src_ip,
                worst.key.dst_ip,
                worst.key.dst_port,
                worst.avg_payload_size()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::rules::test_support::{tcp_flow, window_with_flows};
    use crate::model::FlagLabel;

    fn beacon_flow(pps: f64, count: u64, payload: f64, dst_port: u16) -> crate::state::FlowRecord {
        tcp_flow("10.0.0.4", "1.2.3.4", dst_port, count, pps, payload, &[FlagLabel::Ack])
    }

    #[test]
    fn test_slow_regular_flow_fires() {
        let rule = BeaconingRule::default();
        // 60 packets at 0.5/s => 120 s duration
        let window = window_with_flows(10, vec![beacon_flow(0.5, 60, 64.0, 4444)]);

        let result = rule.analyze(&window);
        assert!(result.triggered);
        assert!((result.evidence["duration_seconds"].as_f64().unwrap() - 120.0).abs() < 1.0);
        assert!(result.confidence > 0.0);
    }

    #[test]
    fn test_short_lived_flow_does_not_fire() {
        let rule = BeaconingRule::default();
        // 10 s lifetime is far below the duration floor
        let window = window_with_flows(10, vec![beacon_flow(1.0, 10, 64.0, 4444)]);
        assert!(!rule.analyze(&window).triggered);
    }

    #[test]
    fn test_common_port_is_ignored() {
        let rule = BeaconingRule::default();
        let window = window_with_flows(10, vec![beacon_flow(0.5, 60, 64.0, 443)]);
        assert!(!rule.analyze(&window).triggered);
    }

    #[test]
    fn test_high_rate_flow_is_not_a_beacon() {
        let rule = BeaconingRule::default();
        let window = window_with_flows(10, vec![beacon_flow(50.0, 5000, 64.0, 4444)]);
        assert!(!rule.analyze(&window).triggered);
    }

    #[test]
    fn test_large_payload_flow_is_not_a_beacon() {
        let rule = BeaconingRule::default();
        let window = window_with_flows(10, vec![beacon_flow(0.5, 60, 900.0, 4444)]);
        assert!(!rule.analyze(&window).triggered);
    }

    #[test]
    fn test_candidate_closest_to_mid_rate_wins() {
        let rule = BeaconingRule::default();
        let near_mid = tcp_flow("10.0.0.8", "5.6.7.8", 9999, 105, 1.0, 32.0, &[FlagLabel::Ack]);
        let edge = tcp_flow("10.0.0.9", "5.6.7.9", 9998, 12, 0.12, 32.0, &[FlagLabel::Ack]);
        let window = window_with_flows(10, vec![edge, near_mid]);

        let result = rule.analyze(&window);
        assert!(result.triggered);
        assert_eq!(result.evidence["src_ip"], "10.0.0.8");
    }
}
