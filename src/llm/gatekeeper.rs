//! Gatekeeper deciding whether an alert deserves an LLM call.
//!
//! Checks run in a fixed order: cache, severity, confidence, rate limit,
//! cooldown. All decisions are synchronous - no I/O.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use tracing::warn;

use crate::engine::{Alert, Severity};

use super::cache::ExplanationCache;

/// Why a call was admitted or skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateReason {
    Approved,
    CacheHit,
    LowSeverity,
    LowConfidence,
    RateLimited,
    Cooldown,
}

/// Guards the model server from unnecessary or excessive calls.
pub struct LlmGatekeeper {
    min_confidence: f64,
    max_calls_per_minute: usize,
    cooldown: Duration,
    /// Timestamps of recent approved calls (sliding 60 s window).
    call_times: VecDeque<Instant>,
    /// (src_ip, rule_name) -> last approved call.
    cooldowns: HashMap<String, Instant>,
}

impl LlmGatekeeper {
    pub fn new(min_confidence: f64, max_calls_per_minute: usize, cooldown_seconds: u64) -> Self {
        Self {
            min_confidence,
            max_calls_per_minute,
            cooldown: Duration::from_secs(cooldown_seconds),
            call_times: VecDeque::new(),
            cooldowns: HashMap::new(),
        }
    }

    /// Decide whether this alert should go to the model.
    ///
    /// An `Approved` verdict records the call time and stamps the
    /// per-source cooldown.
    pub fn should_call(&mut self, alert: &Alert, cache: &ExplanationCache) -> GateReason {
        if cache.contains(alert) {
            return GateReason::CacheHit;
        }

        if alert.severity < Severity::Medium {
            return GateReason::LowSeverity;
        }

        if alert.confidence < self.min_confidence {
            return GateReason::LowConfidence;
        }

        let now = Instant::now();

        // Slide the rate-limit window forward
        while let Some(oldest) = self.call_times.front() {
            if now.duration_since(*oldest) >= Duration::from_secs(60) {
                self.call_times.pop_front();
            } else {
                break;
            }
        }
        if self.call_times.len() >= self.max_calls_per_minute {
            warn!(limit = self.max_calls_per_minute, "LLM rate limit reached");
            return GateReason::RateLimited;
        }

        let cooldown_key = format!("{}:{}", alert.src_ip, alert.rule_name);
        if let Some(last_called) = self.cooldowns.get(&cooldown_key) {
            if now.duration_since(*last_called) < self.cooldown {
                return GateReason::Cooldown;
            }
        }

        self.call_times.push_back(now);
        self.cooldowns.insert(cooldown_key, now);
        GateReason::Approved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::models::{AttackPhase, LlmConfidence, LlmExplanation};
    use chrono::Utc;

    fn alert(rule: &str, src_ip: &str, severity: Severity, confidence: f64) -> Alert {
        Alert {
            alert_id: "test".into(),
            timestamp: Utc::now(),
            rule_name: rule.into(),
            severity,
            confidence,
            src_ip: src_ip.into(),
            dst_ip: "multiple".into(),
            description: String::new(),
            evidence: Default::default(),
            window_start: Utc::now(),
            window_end: Utc::now(),
            window_size_seconds: 1,
        }
    }

    fn explanation() -> LlmExplanation {
        LlmExplanation {
            summary: "cached".into(),
            severity_reasoning: "r".into(),
            recommended_action: "a".into(),
            ioc_tags: vec![],
            attack_phase: AttackPhase::Unknown,
            llm_confidence: LlmConfidence::Low,
            fallback_used: false,
        }
    }

    #[test]
    fn test_cache_hit_wins_over_everything() {
        let mut gate = LlmGatekeeper::new(0.5, 10, 30);
        let mut cache = ExplanationCache::new(10);
        let a = alert("port_scan", "10.0.0.1", Severity::High, 0.9);
        cache.put(&a, explanation());

        assert_eq!(gate.should_call(&a, &cache), GateReason::CacheHit);
    }

    #[test]
    fn test_low_severity_skipped() {
        let mut gate = LlmGatekeeper::new(0.5, 10, 30);
        let cache = ExplanationCache::new(10);
        let a = alert("port_scan", "10.0.0.1", Severity::Low, 0.9);
        assert_eq!(gate.should_call(&a, &cache), GateReason::LowSeverity);
    }

    #[test]
    fn test_low_confidence_skipped() {
        let mut gate = LlmGatekeeper::new(0.5, 10, 30);
        let cache = ExplanationCache::new(10);
        let a = alert("port_scan", "10.0.0.1", Severity::High, 0.4);
        assert_eq!(gate.should_call(&a, &cache), GateReason::LowConfidence);
    }

    #[test]
    fn test_approved_then_cooldown() {
        let mut gate = LlmGatekeeper::new(0.5, 10, 30);
        let cache = ExplanationCache::new(10);
        let a = alert("port_scan", "10.0.0.1", Severity::High, 0.82);

        assert_eq!(gate.should_call(&a, &cache), GateReason::Approved);
        assert_eq!(gate.should_call(&a, &cache), GateReason::Cooldown);

        // A different rule from the same source is its own cooldown slot
        let b = alert("syn_flood", "10.0.0.1", Severity::Critical, 0.9);
        assert_eq!(gate.should_call(&b, &cache), GateReason::Approved);
    }

    #[test]
    fn test_rate_limit_at_exact_capacity() {
        let mut gate = LlmGatekeeper::new(0.5, 3, 0);
        let cache = ExplanationCache::new(10);

        for i in 0..3 {
            let a = alert("port_scan", &format!("10.0.0.{i}"), Severity::High, 0.9);
            assert_eq!(gate.should_call(&a, &cache), GateReason::Approved);
        }
        // Exactly at max_calls_per_minute: the next call is rejected
        let a = alert("port_scan", "10.0.0.99", Severity::High, 0.9);
        assert_eq!(gate.should_call(&a, &cache), GateReason::RateLimited);
    }

    #[test]
    fn test_zero_cooldown_readmits() {
        let mut gate = LlmGatekeeper::new(0.5, 10, 0);
        let cache = ExplanationCache::new(10);
        let a = alert("port_scan", "10.0.0.1", Severity::High, 0.82);

        assert_eq!(gate.should_call(&a, &cache), GateReason::Approved);
        assert_eq!(gate.should_call(&a, &cache), GateReason::Approved);
    }
}
