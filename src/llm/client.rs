//! Model-server client and the full enrichment pipeline.
//!
//! Talks to an Ollama-compatible chat endpoint. Every path through
//! `explain` terminates in an explanation: cache hit, model output, or a
//! static fallback - enrichment never surfaces an error to the pipeline.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::engine::{Alert, WindowContext};

use super::cache::ExplanationCache;
use super::fallbacks::get_fallback;
use super::gatekeeper::{GateReason, LlmGatekeeper};
use super::models::LlmExplanation;
use super::prompt::build_prompt;
use super::validator::validate_response_opt;

/// Hard deadline per model call.
const LLM_TIMEOUT: Duration = Duration::from_secs(8);
/// Shorter budget for the availability probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Enrichment counters, shared with the stats reporter.
#[derive(Debug, Default)]
pub struct LlmStats {
    pub calls_made: AtomicU64,
    pub cache_hits: AtomicU64,
    pub fallbacks_used: AtomicU64,
    pub timeouts: AtomicU64,
    pub parse_errors: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: Option<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    #[serde(default)]
    name: String,
}

/// Async model client with caching, gating, and fallback support.
///
/// Owned by the enrichment consumer task; the availability flag is sticky
/// after the first successful probe and cleared on network failure.
pub struct LlmClient {
    base_url: String,
    model: String,
    http: Client,
    cache: ExplanationCache,
    gatekeeper: LlmGatekeeper,
    /// None = not yet probed.
    available: Option<bool>,
    stats: Arc<LlmStats>,
}

impl LlmClient {
    pub fn new(
        base_url: &str,
        model: &str,
        cache_size: usize,
        min_confidence: f64,
        max_calls_per_minute: usize,
        cooldown_seconds: u64,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            http: Client::new(),
            cache: ExplanationCache::new(cache_size),
            gatekeeper: LlmGatekeeper::new(min_confidence, max_calls_per_minute, cooldown_seconds),
            available: None,
            stats: Arc::new(LlmStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<LlmStats> {
        Arc::clone(&self.stats)
    }

    pub fn cache_hit_rate(&self) -> f64 {
        self.cache.hit_rate()
    }

    /// Produce an explanation for this alert. Never fails.
    pub async fn explain(&mut self, alert: &Alert, context: &WindowContext) -> LlmExplanation {
        match self.gatekeeper.should_call(alert, &self.cache) {
            GateReason::CacheHit => {
                self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
                if let Some(cached) = self.cache.get(alert) {
                    return cached;
                }
                // The entry vanished between the gate check and the lookup;
                // treat it as any other skip
                self.stats.fallbacks_used.fetch_add(1, Ordering::Relaxed);
                return get_fallback(&alert.rule_name);
            }
            GateReason::Approved => {}
            reason => {
                self.stats.fallbacks_used.fetch_add(1, Ordering::Relaxed);
                debug!(
                    rule = %alert.rule_name,
                    src_ip = %alert.src_ip,
                    ?reason,
                    "LLM call skipped"
                );
                return get_fallback(&alert.rule_name);
            }
        }

        if !self.is_available(false).await {
            self.stats.fallbacks_used.fetch_add(1, Ordering::Relaxed);
            warn!(rule = %alert.rule_name, "model server unavailable, using fallback");
            return get_fallback(&alert.rule_name);
        }

        let (system_prompt, user_prompt) = build_prompt(alert, context);

        self.stats.calls_made.fetch_add(1, Ordering::Relaxed);
        let raw = match self.call_chat(&system_prompt, &user_prompt).await {
            Some(raw) => raw,
            None => {
                self.stats.fallbacks_used.fetch_add(1, Ordering::Relaxed);
                return get_fallback(&alert.rule_name);
            }
        };

        let explanation = match validate_response_opt(&raw) {
            Some(explanation) => explanation,
            None => {
                self.stats.parse_errors.fetch_add(1, Ordering::Relaxed);
                self.stats.fallbacks_used.fetch_add(1, Ordering::Relaxed);
                return get_fallback(&alert.rule_name);
            }
        };

        self.cache.put(alert, explanation.clone());
        info!(
            rule = %alert.rule_name,
            confidence = %explanation.llm_confidence,
            phase = %explanation.attack_phase,
            cache_rate = format!("{:.0}%", self.cache.hit_rate() * 100.0),
            "LLM enriched alert"
        );
        explanation
    }

    /// Probe the model server, returning the (possibly cached) verdict.
    pub async fn health_check(&mut self) -> bool {
        self.is_available(true).await
    }

    /// Availability is sticky after the first success until a network
    /// failure flips it back.
    async fn is_available(&mut self, force: bool) -> bool {
        if !force && self.available == Some(true) {
            return true;
        }

        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .http
            .get(&url)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .and_then(|resp| resp.error_for_status());

        match response {
            Ok(resp) => {
                // Best-effort model presence check: accept exact tag or any
                // tag sharing the prefix before ':'
                if let Ok(tags) = resp.json::<TagsResponse>().await {
                    let prefix = self.model.split(':').next().unwrap_or(&self.model);
                    let found = tags
                        .models
                        .iter()
                        .any(|m| m.name == self.model || m.name.starts_with(prefix));
                    if !found {
                        warn!(
                            model = %self.model,
                            "model server running but model tag not found"
                        );
                    }
                }
                self.available = Some(true);
                true
            }
            Err(err) => {
                if self.available != Some(false) {
                    info!(url = %self.base_url, error = %err, "model server not reachable");
                }
                self.available = Some(false);
                false
            }
        }
    }

    /// POST one chat completion. Returns the raw content or `None` on any
    /// transport or protocol failure.
    async fn call_chat(&mut self, system_prompt: &str, user_prompt: &str) -> Option<String> {
        let payload = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user",   "content": user_prompt},
            ],
            "stream": false,
            "options": {
                // Low temperature for consistent JSON output
                "temperature": 0.1,
                "num_predict": 300,
            },
        });

        let url = format!("{}/api/chat", self.base_url);
        let response = self
            .http
            .post(&url)
            .timeout(LLM_TIMEOUT)
            .json(&payload)
            .send()
            .await;

        let response = match response {
            Ok(resp) => resp,
            Err(err) => {
                if err.is_timeout() {
                    self.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                    warn!(timeout = ?LLM_TIMEOUT, "model call timed out");
                } else {
                    warn!(error = %err, "model call failed");
                }
                // Skip further calls until the next successful probe
                self.available = Some(false);
                return None;
            }
        };

        let response = match response.error_for_status() {
            Ok(resp) => resp,
            Err(err) => {
                warn!(error = %err, "model call returned an error status");
                return None;
            }
        };

        match response.json::<ChatResponse>().await {
            Ok(chat) => {
                let content = chat.message.map(|m| m.content).unwrap_or_default();
                if content.is_empty() {
                    None
                } else {
                    Some(content)
                }
            }
            Err(err) => {
                warn!(error = %err, "model response body was not valid JSON");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Severity;
    use chrono::Utc;

    fn client() -> LlmClient {
        // Points at a closed port so availability probes fail fast
        LlmClient::new("http://127.0.0.1:1", "phi3:3.8b", 50, 0.5, 10, 30)
    }

    fn alert(severity: Severity, confidence: f64) -> Alert {
        Alert {
            alert_id: "id".into(),
            timestamp: Utc::now(),
            rule_name: "port_scan".into(),
            severity,
            confidence,
            src_ip: "10.0.0.1".into(),
            dst_ip: "multiple".into(),
            description: "desc".into(),
            evidence: Default::default(),
            window_start: Utc::now(),
            window_end: Utc::now(),
            window_size_seconds: 1,
        }
    }

    #[tokio::test]
    async fn test_low_severity_uses_fallback_without_probing() {
        let mut client = client();
        let explanation = client.explain(&alert(Severity::Low, 0.9), &WindowContext::default()).await;
        assert!(explanation.fallback_used);
        assert_eq!(client.stats().fallbacks_used.load(Ordering::Relaxed), 1);
        assert_eq!(client.stats().calls_made.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_unreachable_server_falls_back() {
        let mut client = client();
        let explanation =
            client.explain(&alert(Severity::High, 0.82), &WindowContext::default()).await;
        assert!(explanation.fallback_used);
        // No HTTP call was counted because the probe failed
        assert_eq!(client.stats().calls_made.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_second_alert_within_cooldown_falls_back() {
        let mut client = client();
        let a = alert(Severity::High, 0.82);
        let _ = client.explain(&a, &WindowContext::default()).await;
        let explanation = client.explain(&a, &WindowContext::default()).await;
        assert!(explanation.fallback_used);
        assert_eq!(client.stats().fallbacks_used.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_health_check_unreachable() {
        let mut client = client();
        assert!(!client.health_check().await);
    }
}
