//! Static fallback explanations, one per detection rule.
//!
//! Used whenever the model server is unreachable, returns malformed
//! output, or the gatekeeper skips the call. Fallbacks are honest: they
//! carry `fallback_used=true` and low confidence so consumers can show
//! that AI enrichment was skipped.

use super::models::{AttackPhase, LlmConfidence, LlmExplanation};

fn fallback(
    summary: &str,
    severity_reasoning: &str,
    recommended_action: &str,
    ioc_tags: &[&str],
    attack_phase: AttackPhase,
) -> LlmExplanation {
    LlmExplanation {
        summary: summary.to_string(),
        severity_reasoning: severity_reasoning.to_string(),
        recommended_action: recommended_action.to_string(),
        ioc_tags: ioc_tags.iter().map(|tag| tag.to_string()).collect(),
        attack_phase,
        llm_confidence: LlmConfidence::Low,
        fallback_used: true,
    }
}

/// The static fallback for `rule_name`, or a generic default for unknown
/// rules.
pub fn get_fallback(rule_name: &str) -> LlmExplanation {
    match rule_name {
        "port_scan" => fallback(
            "A host performed a systematic scan of multiple destination ports, indicating \
             network reconnaissance activity.",
            "Port scanning is typically the first phase of an attack — mapping which services \
             are available before exploitation.",
            "Block the source IP at the firewall and investigate whether the scanning host is \
             authorised on this network.",
            &["port-scan", "reconnaissance", "automated-tool"],
            AttackPhase::Reconnaissance,
        ),
        "syn_flood" => fallback(
            "A high volume of TCP SYN packets with few or no SYN-ACK responses was detected — \
             characteristic of a SYN flood denial-of-service attack.",
            "SYN floods exhaust server connection tables, causing legitimate connections to be \
             rejected.",
            "Enable SYN cookies on the target host, apply rate limiting to incoming SYN \
             packets, and block the source IP if single-source.",
            &["syn-flood", "dos", "tcp-attack"],
            AttackPhase::InitialAccess,
        ),
        "brute_force" => fallback(
            "A large number of rapid connection attempts to an authentication service were \
             detected, consistent with automated credential stuffing or brute-force login \
             attempts.",
            "Successful brute force gives the attacker valid credentials, enabling further \
             access.",
            "Block the source IP, enable account lockout on the target service, and review \
             authentication logs for any successful logins.",
            &["brute-force", "credential-stuffing", "authentication"],
            AttackPhase::InitialAccess,
        ),
        "dns_tunneling" => fallback(
            "Abnormally high DNS query volume or large DNS payloads were detected from a \
             single host, which may indicate data exfiltration via DNS tunneling.",
            "DNS tunneling encodes data in DNS queries to bypass firewalls, a common covert \
             exfiltration technique.",
            "Inspect DNS queries from the source IP, block unusual DNS patterns at the \
             resolver, and check for data leaving the network.",
            &["dns-tunneling", "exfiltration", "covert-channel"],
            AttackPhase::Exfiltration,
        ),
        "beaconing" => fallback(
            "A flow with suspiciously regular, low-rate packets to an unusual port was \
             detected — a behavioral signature of malware C2 communication.",
            "Regular beaconing indicates an established C2 channel; the host may already be \
             compromised.",
            "Isolate the source host immediately, perform a malware scan, and block the \
             destination IP/port at the perimeter firewall.",
            &["beaconing", "c2", "malware", "persistence"],
            AttackPhase::C2,
        ),
        _ => fallback(
            "A network anomaly was detected by an automated rule.",
            "Severity assigned by rule confidence score.",
            "Review the evidence and investigate the source IP.",
            &["anomaly"],
            AttackPhase::Unknown,
        ),
    }
}
