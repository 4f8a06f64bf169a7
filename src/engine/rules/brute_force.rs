//! Brute-force login detection.
//!
//! Rapid, small-payload connection attempts against an authentication
//! service port are consistent with automated credential stuffing.

use serde_json::json;

use crate::engine::models::{Evidence, RuleResult, Severity};
use crate::state::AggregatedWindow;

use super::Rule;

const AUTH_PORTS: &[u16] = &[22, 21, 23, 3389, 5900];

fn service_name(port: u16) -> &'static str {
    match port {
        21 => "FTP",
        22 => "SSH",
        23 => "Telnet",
        80 => "HTTP",
        443 => "HTTPS",
        3389 => "RDP",
        5900 => "VNC",
        8080 => "HTTP-alt",
        _ => "Unknown",
    }
}

/// Detects brute-force attempts against authentication services.
pub struct BruteForceRule {
    pub min_attempts_per_sec: f64,
    /// Low bar so fast tools are caught inside a single short window.
    pub min_total_attempts: u64,
    /// Auth exchanges are small; large payloads suggest real sessions.
    pub max_auth_payload_size: f64,
}

impl Default for BruteForceRule {
    fn default() -> Self {
        Self {
            min_attempts_per_sec: 5.0,
            min_total_attempts: 20,
            max_auth_payload_size: 256.0,
        }
    }
}

impl Rule for BruteForceRule {
    fn name(&self) -> &'static str {
        "brute_force"
    }

    fn severity(&self) -> Severity {
        Severity::High
    }

    fn analyze(&self, window: &AggregatedWindow) -> RuleResult {
        let candidates: Vec<_> = window
            .top_flows
            .iter()
            .filter(|flow| {
                AUTH_PORTS.contains(&flow.key.dst_port)
                    && flow.packets_per_second() >= self.min_attempts_per_sec
                    && flow.avg_payload_size() <= self.max_auth_payload_size
                    && flow.packet_count >= self.min_total_attempts
            })
            .collect();

        let worst = match candidates.iter().max_by_key(|flow| flow.packet_count) {
            Some(flow) => *flow,
            None => return RuleResult::not_triggered("no brute force detected"),
        };

        let service = service_name(worst.key.dst_port);
        let confidence =
            (worst.packet_count as f64 / (self.min_total_attempts as f64 * 5.0)).min(1.0);

        let mut evidence = Evidence::new();
        evidence.insert("src_ip".into(), json!(worst.key.src_ip.to_string()));
        evidence.insert("dst_ip".into(), json!(worst.key.dst_ip.to_string()));
        evidence.insert("dst_port".into(), json!(worst.key.dst_port));
        evidence.insert("service".into(), json!(service));
        evidence.insert("attempt_count".into(), json!(worst.packet_count));
        evidence.insert(
            "attempts_per_minute".into(),
            json!((worst.packets_per_second() * 60.0 * 10.0).round() / 10.0),
        );
        evidence.insert(
            "avg_payload_size".into(),
            json!((worst.avg_payload_size() * 10.0).round() / 10.0),
        );
        evidence.insert("window_size_seconds".into(), json!(window.window_size_seconds));

        RuleResult {
            triggered: true,
            confidence,
            evidence,
            description: format!(
                "Brute force on {service} (:{}) from {}: {} attempts at {:.1} pkt/s",
                worst.key.dst_port,
                worst.key.src_ip,
                worst.packet_count,
                worst.packets_per_second()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::rules::test_support::{tcp_flow, window_with_flows};
    use crate::model::FlagLabel;

    #[test]
    fn test_ssh_brute_force_fires() {
        let rule = BruteForceRule::default();
        // 100 small-payload attempts at 100/s against SSH
        let flow = tcp_flow("10.0.0.3", "192.168.0.2", 22, 100, 100.0, 100.0, &[FlagLabel::Syn]);
        let window = window_with_flows(1, vec![flow]);

        let result = rule.analyze(&window);
        assert!(result.triggered);
        assert_eq!(result.evidence["service"], "SSH");
        assert_eq!(result.evidence["attempt_count"], 100);
        assert_eq!(result.evidence["attempts_per_minute"], 6000.0);
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn test_non_auth_port_does_not_fire() {
        let rule = BruteForceRule::default();
        let flow = tcp_flow("10.0.0.3", "192.168.0.2", 8080, 100, 100.0, 100.0, &[FlagLabel::Syn]);
        let window = window_with_flows(1, vec![flow]);
        assert!(!rule.analyze(&window).triggered);
    }

    #[test]
    fn test_large_payloads_look_like_real_sessions() {
        let rule = BruteForceRule::default();
        let flow = tcp_flow("10.0.0.3", "192.168.0.2", 22, 100, 100.0, 1400.0, &[FlagLabel::Ack]);
        let window = window_with_flows(1, vec![flow]);
        assert!(!rule.analyze(&window).triggered);
    }

    #[test]
    fn test_slow_attempts_do_not_fire() {
        let rule = BruteForceRule::default();
        let flow = tcp_flow("10.0.0.3", "192.168.0.2", 22, 30, 1.0, 100.0, &[FlagLabel::Syn]);
        let window = window_with_flows(60, vec![flow]);
        assert!(!rule.analyze(&window).triggered);
    }

    #[test]
    fn test_worst_candidate_wins() {
        let rule = BruteForceRule::default();
        let flows = vec![
            tcp_flow("10.0.0.3", "192.168.0.2", 22, 30, 10.0, 100.0, &[FlagLabel::Syn]),
            tcp_flow("10.0.0.4", "192.168.0.2", 3389, 90, 30.0, 100.0, &[FlagLabel::Syn]),
        ];
        let window = window_with_flows(10, flows);

        let result = rule.analyze(&window);
        assert!(result.triggered);
        assert_eq!(result.evidence["src_ip"], "10.0.0.4");
        assert_eq!(result.evidence["service"], "RDP");
    }
}
