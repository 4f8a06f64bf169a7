//! SHA256-keyed LRU cache for LLM explanations.
//!
//! The key is derived from rule, source, severity, and a 0.1-wide
//! confidence bucket: the same attack pattern from the same source maps to
//! the same explanation, so repeated alerts skip the model entirely.

use std::num::NonZeroUsize;

use lru::LruCache;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::engine::Alert;

use super::models::LlmExplanation;

const DEFAULT_CAPACITY: usize = 200;

/// LRU cache of explanations.
///
/// Owned by the enrichment consumer task - no locking needed.
pub struct ExplanationCache {
    cache: LruCache<String, LlmExplanation>,
    hits: u64,
    misses: u64,
}

impl Default for ExplanationCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ExplanationCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            cache: LruCache::new(capacity),
            hits: 0,
            misses: 0,
        }
    }

    /// Cache key from stable alert fields. Confidence is quantised to 0.1
    /// buckets to raise the hit rate; the digest is truncated to 16 hex
    /// chars.
    fn key(alert: &Alert) -> String {
        let conf_bucket = (alert.confidence * 10.0).round() / 10.0;
        let raw = format!(
            r#"{{"conf_bucket":{:.1},"rule":"{}","severity":"{}","src_ip":"{}"}}"#,
            conf_bucket, alert.rule_name, alert.severity, alert.src_ip
        );
        let digest = Sha256::digest(raw.as_bytes());
        hex::encode(digest)[..16].to_string()
    }

    /// Look up an explanation, promoting the entry on hit.
    pub fn get(&mut self, alert: &Alert) -> Option<LlmExplanation> {
        let key = Self::key(alert);
        match self.cache.get(&key) {
            Some(explanation) => {
                self.hits += 1;
                debug!(key = %key, hits = self.hits, misses = self.misses, "cache hit");
                Some(explanation.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Peek without touching the hit/miss counters or LRU order.
    pub fn contains(&self, alert: &Alert) -> bool {
        self.cache.contains(&Self::key(alert))
    }

    /// Store an explanation, evicting the LRU entry at capacity.
    pub fn put(&mut self, alert: &Alert, explanation: LlmExplanation) {
        self.cache.put(Self::key(alert), explanation);
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Exact hit rate; 0 when no lookups have happened.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Severity;
    use crate::llm::models::{AttackPhase, LlmConfidence};
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

    fn explanation(summary: &str) -> LlmExplanation {
        LlmExplanation {
            summary: summary.into(),
            severity_reasoning: "because".into(),
            recommended_action: "investigate".into(),
            ioc_tags: vec![],
            attack_phase: AttackPhase::Unknown,
            llm_confidence: LlmConfidence::Medium,
            fallback_used: false,
        }
    }

    #[test]
    fn test_miss_then_hit() {
        let mut cache = ExplanationCache::new(10);
        let a = alert("port_scan", "10.0.0.1", Severity::High, 0.82);

        assert!(cache.get(&a).is_none());
        cache.put(&a, explanation("scan"));
        assert_eq!(cache.get(&a).unwrap().summary, "scan");
        assert_eq!(cache.hit_rate(), 0.5);
    }

    #[test]
    fn test_hit_rate_zero_without_lookups() {
        let cache = ExplanationCache::new(10);
        assert_eq!(cache.hit_rate(), 0.0);
    }

    #[test]
    fn test_confidence_bucket_width() {
        let mut cache = ExplanationCache::new(10);
        let a = alert("port_scan", "10.0.0.1", Severity::High, 0.82);
        cache.put(&a, explanation("scan"));

        // A bump below the bucket width still hits
        let nearby = alert("port_scan", "10.0.0.1", Severity::High, 0.84);
        assert!(cache.get(&nearby).is_some());

        // A bump past the bucket boundary misses
        let distant = alert("port_scan", "10.0.0.1", Severity::High, 0.95);
        assert!(cache.get(&distant).is_none());
    }

    #[test]
    fn test_distinct_sources_have_distinct_keys() {
        let mut cache = ExplanationCache::new(10);
        cache.put(
            &alert("port_scan", "10.0.0.1", Severity::High, 0.8),
            explanation("one"),
        );
        assert!(cache
            .get(&alert("port_scan", "10.0.0.2", Severity::High, 0.8))
            .is_none());
    }

    #[test]
    fn test_lru_eviction_at_capacity() {
        let mut cache = ExplanationCache::new(2);
        let a = alert("port_scan", "10.0.0.1", Severity::High, 0.8);
        let b = alert("syn_flood", "10.0.0.2", Severity::Critical, 0.9);
        let c = alert("beaconing", "10.0.0.3", Severity::Critical, 0.7);

        cache.put(&a, explanation("a"));
        cache.put(&b, explanation("b"));
        // Touch `a` so `b` becomes least recently used
        assert!(cache.get(&a).is_some());
        cache.put(&c, explanation("c"));

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&b).is_none());
        assert!(cache.get(&a).is_some());
        assert!(cache.get(&c).is_some());
    }
}
