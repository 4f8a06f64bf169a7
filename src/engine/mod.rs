//! Rule-based detection engine.
//!
//! Evaluates every enabled rule against each sealed window, gates the
//! results (confidence threshold, whitelist, cooldown), and produces
//! alerts. Rule failures are contained here: a panicking rule yields a
//! non-triggered result, never a crashed pipeline.

pub mod gate;
pub mod models;
pub mod rules;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::state::AggregatedWindow;

pub use gate::{AlertGate, GateDecision};
pub use models::{Alert, Evidence, RuleResult, Severity, WindowContext};
pub use rules::Rule;

/// Soft per-rule timing budget; overruns are logged but the result is kept.
const RULE_BUDGET_MS: f64 = 50.0;

/// Engine counters, shared with the stats reporter.
#[derive(Debug, Default)]
pub struct EngineStats {
    pub windows_analyzed: AtomicU64,
    pub alerts_fired: AtomicU64,
    pub alerts_suppressed: AtomicU64,
    pub alerts_cooldown: AtomicU64,
    pub alerts_whitelisted: AtomicU64,
}

/// Rule-based detection over sealed windows.
pub struct DetectionEngine {
    rules: Vec<Box<dyn Rule>>,
    confidence_threshold: f64,
    gate: AlertGate,
    stats: Arc<EngineStats>,
}

impl DetectionEngine {
    pub fn new(
        confidence_threshold: f64,
        whitelist_ips: &[String],
        cooldown_seconds: u64,
    ) -> Self {
        Self::with_rules(
            rules::default_rules(),
            confidence_threshold,
            whitelist_ips,
            cooldown_seconds,
        )
    }

    pub fn with_rules(
        rules: Vec<Box<dyn Rule>>,
        confidence_threshold: f64,
        whitelist_ips: &[String],
        cooldown_seconds: u64,
    ) -> Self {
        let rules: Vec<Box<dyn Rule>> = rules.into_iter().filter(|rule| rule.enabled()).collect();
        let names: Vec<&str> = rules.iter().map(|rule| rule.name()).collect();
        info!(
            rules = ?names,
            confidence_threshold,
            cooldown_seconds,
            whitelist = whitelist_ips.len(),
            "detection engine loaded"
        );
        Self {
            rules,
            confidence_threshold,
            gate: AlertGate::new(whitelist_ips, cooldown_seconds),
            stats: Arc::new(EngineStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<EngineStats> {
        Arc::clone(&self.stats)
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|rule| rule.name()).collect()
    }

    /// Analyze one window, returning the alerts that survived gating.
    pub fn analyze(&mut self, window: &AggregatedWindow) -> Vec<Alert> {
        self.stats.windows_analyzed.fetch_add(1, Ordering::Relaxed);
        let mut alerts = Vec::new();

        for rule in &self.rules {
            let result = Self::safe_analyze(rule.as_ref(), window);
            if !result.triggered {
                continue;
            }

            if result.confidence < self.confidence_threshold {
                self.stats.alerts_suppressed.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            let alert = Self::make_alert(rule.as_ref(), result, window);

            match self.gate.check(&alert.rule_name, &alert.src_ip) {
                GateDecision::Whitelisted => {
                    self.stats.alerts_whitelisted.fetch_add(1, Ordering::Relaxed);
                    debug!(src_ip = %alert.src_ip, "alert suppressed, source whitelisted");
                    continue;
                }
                GateDecision::Cooldown => {
                    self.stats.alerts_cooldown.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        rule = %alert.rule_name,
                        src_ip = %alert.src_ip,
                        "alert suppressed by cooldown"
                    );
                    continue;
                }
                GateDecision::Admit => {}
            }

            self.stats.alerts_fired.fetch_add(1, Ordering::Relaxed);
            warn!(
                severity = %alert.severity,
                rule = %alert.rule_name,
                confidence = alert.confidence,
                src_ip = %alert.src_ip,
                "ALERT: {}",
                alert.description
            );
            alerts.push(alert);
        }

        alerts
    }

    /// Run one rule under the timing budget, containing panics.
    fn safe_analyze(rule: &dyn Rule, window: &AggregatedWindow) -> RuleResult {
        let started = Instant::now();
        let result = catch_unwind(AssertUnwindSafe(|| rule.analyze(window)));
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        if elapsed_ms > RULE_BUDGET_MS {
            warn!(rule = rule.name(), elapsed_ms, "rule exceeded timing budget");
        }
        match result {
            Ok(result) => result,
            Err(_) => {
                warn!(rule = rule.name(), "rule panicked during analyze");
                RuleResult::not_triggered(&format!("internal error in {} rule", rule.name()))
            }
        }
    }

    fn make_alert(rule: &dyn Rule, result: RuleResult, window: &AggregatedWindow) -> Alert {
        let src_ip = result
            .evidence
            .get("src_ip")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| {
                result
                    .evidence
                    .get("src_ips")
                    .and_then(|v| v.as_array())
                    .and_then(|ips| ips.first())
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "unknown".to_string());

        let dst_ip = result
            .evidence
            .get("dst_ip")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| "multiple".to_string());

        // A rule may override its default severity through evidence, as
        // long as the value parses to a valid level
        let severity = result
            .evidence
            .get("severity")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<Severity>().ok())
            .unwrap_or_else(|| rule.severity());

        Alert {
            alert_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            rule_name: rule.name().to_string(),
            severity,
            confidence: result.confidence,
            src_ip,
            dst_ip,
            description: result.description,
            evidence: result.evidence,
            window_start: window.window_start,
            window_end: window.window_end,
            window_size_seconds: window.window_size_seconds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::rules::test_support::window_with_flows;
    use serde_json::json;

    struct AlwaysFire {
        confidence: f64,
        evidence: Evidence,
    }

    impl AlwaysFire {
        fn boxed(confidence: f64) -> Box<dyn Rule> {
            let mut evidence = Evidence::new();
            evidence.insert("src_ip".into(), json!("1.2.3.4"));
            Box::new(Self { confidence, evidence })
        }
    }

    impl Rule for AlwaysFire {
        fn name(&self) -> &'static str {
            "always_fire"
        }
        fn severity(&self) -> Severity {
            Severity::High
        }
        fn analyze(&self, _window: &AggregatedWindow) -> RuleResult {
            RuleResult {
                triggered: true,
                confidence: self.confidence,
                evidence: self.evidence.clone(),
                description: "always fires".into(),
            }
        }
    }

    struct PanickingRule;

    impl Rule for PanickingRule {
        fn name(&self) -> &'static str {
            "panicking_rule"
        }
        fn severity(&self) -> Severity {
            Severity::Medium
        }
        fn analyze(&self, _window: &AggregatedWindow) -> RuleResult {
            panic!("intentional error in rule")
        }
    }

    struct DisabledRule;

    impl Rule for DisabledRule {
        fn name(&self) -> &'static str {
            "disabled_rule"
        }
        fn severity(&self) -> Severity {
            Severity::Low
        }
        fn enabled(&self) -> bool {
            false
        }
        fn analyze(&self, _window: &AggregatedWindow) -> RuleResult {
            RuleResult {
                triggered: true,
                confidence: 1.0,
                evidence: Evidence::new(),
                description: "should never run".into(),
            }
        }
    }

    #[test]
    fn test_all_five_builtin_rules_loaded() {
        let engine = DetectionEngine::new(0.3, &[], 30);
        let mut names = engine.rule_names();
        names.sort_unstable();
        assert_eq!(
            names,
            vec!["beaconing", "brute_force", "dns_tunneling", "port_scan", "syn_flood"]
        );
    }

    #[test]
    fn test_disabled_rules_filtered_out() {
        let engine =
            DetectionEngine::with_rules(vec![Box::new(DisabledRule)], 0.3, &[], 30);
        assert!(engine.rule_names().is_empty());
    }

    #[test]
    fn test_fires_and_counts() {
        let mut engine =
            DetectionEngine::with_rules(vec![AlwaysFire::boxed(0.8)], 0.3, &[], 30);
        let window = window_with_flows(1, vec![]);

        let alerts = engine.analyze(&window);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].rule_name, "always_fire");
        assert_eq!(alerts[0].src_ip, "1.2.3.4");
        assert_eq!(alerts[0].dst_ip, "multiple");
        assert_eq!(alerts[0].severity, Severity::High);
        assert!(!alerts[0].alert_id.is_empty());

        let stats = engine.stats();
        assert_eq!(stats.windows_analyzed.load(Ordering::Relaxed), 1);
        assert_eq!(stats.alerts_fired.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_low_confidence_suppressed() {
        let mut engine =
            DetectionEngine::with_rules(vec![AlwaysFire::boxed(0.1)], 0.3, &[], 30);
        let window = window_with_flows(1, vec![]);

        assert!(engine.analyze(&window).is_empty());
        assert_eq!(engine.stats().alerts_suppressed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_panicking_rule_is_contained() {
        let mut engine = DetectionEngine::with_rules(
            vec![Box::new(PanickingRule), AlwaysFire::boxed(0.8)],
            0.3,
            &[],
            30,
        );
        let window = window_with_flows(1, vec![]);

        // The panic is swallowed and the healthy rule still fires
        let alerts = engine.analyze(&window);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].rule_name, "always_fire");
    }

    #[test]
    fn test_whitelist_suppresses() {
        let mut engine = DetectionEngine::with_rules(
            vec![AlwaysFire::boxed(0.8)],
            0.3,
            &["1.2.3.4".to_string()],
            30,
        );
        let window = window_with_flows(1, vec![]);

        assert!(engine.analyze(&window).is_empty());
        assert_eq!(engine.stats().alerts_whitelisted.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_cooldown_suppresses_second_fire() {
        let mut engine =
            DetectionEngine::with_rules(vec![AlwaysFire::boxed(0.8)], 0.3, &[], 30);
        let window = window_with_flows(1, vec![]);

        assert_eq!(engine.analyze(&window).len(), 1);
        assert!(engine.analyze(&window).is_empty());
        assert_eq!(engine.stats().alerts_cooldown.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_severity_override_from_evidence() {
        struct OverrideRule;
        impl Rule for OverrideRule {
            fn name(&self) -> &'static str {
                "override_rule"
            }
            fn severity(&self) -> Severity {
                Severity::High
            }
            fn analyze(&self, _window: &AggregatedWindow) -> RuleResult {
                let mut evidence = Evidence::new();
                evidence.insert("src_ip".into(), json!("9.9.9.9"));
                evidence.insert("severity".into(), json!("MEDIUM"));
                RuleResult {
                    triggered: true,
                    confidence: 0.9,
                    evidence,
                    description: "override".into(),
                }
            }
        }

        let mut engine =
            DetectionEngine::with_rules(vec![Box::new(OverrideRule)], 0.3, &[], 30);
        let alerts = engine.analyze(&window_with_flows(1, vec![]));
        assert_eq!(alerts[0].severity, Severity::Medium);
    }

    #[test]
    fn test_invalid_severity_override_falls_back_to_default() {
        struct BadOverrideRule;
        impl Rule for BadOverrideRule {
            fn name(&self) -> &'static str {
                "bad_override"
            }
            fn severity(&self) -> Severity {
                Severity::High
            }
            fn analyze(&self, _window: &AggregatedWindow) -> RuleResult {
                let mut evidence = Evidence::new();
                evidence.insert("severity".into(), json!("APOCALYPTIC"));
                RuleResult {
                    triggered: true,
                    confidence: 0.9,
                    evidence,
                    description: "bad override".into(),
                }
            }
        }

        let mut engine =
            DetectionEngine::with_rules(vec![Box::new(BadOverrideRule)], 0.3, &[], 30);
        let alerts = engine.analyze(&window_with_flows(1, vec![]));
        assert_eq!(alerts[0].severity, Severity::High);
        assert_eq!(alerts[0].src_ip, "unknown");
    }

    #[test]
    fn test_src_ip_from_src_ips_list() {
        struct ListRule;
        impl Rule for ListRule {
            fn name(&self) -> &'static str {
                "list_rule"
            }
            fn severity(&self) -> Severity {
                Severity::High
            }
            fn analyze(&self, _window: &AggregatedWindow) -> RuleResult {
                let mut evidence = Evidence::new();
                evidence.insert("src_ips".into(), json!(["7.7.7.7", "8.8.8.8"]));
                RuleResult {
                    triggered: true,
                    confidence: 0.9,
                    evidence,
                    description: "list".into(),
                }
            }
        }

        let mut engine = DetectionEngine::with_rules(vec![Box::new(ListRule)], 0.3, &[], 30);
        let alerts = engine.analyze(&window_with_flows(1, vec![]));
        assert_eq!(alerts[0].src_ip, "7.7.7.7");
    }
}
