//! Alert admission gate: whitelist and per-source cooldown.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

/// Gate verdict for one candidate alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Admit,
    Whitelisted,
    Cooldown,
}

/// Suppresses alerts from whitelisted sources and repeated alerts from the
/// same (rule, source) pair inside the cooldown interval.
///
/// Owned by the detection consumer task; no locking needed.
pub struct AlertGate {
    whitelist: HashSet<String>,
    cooldowns: HashMap<String, Instant>,
    cooldown: Duration,
}

impl AlertGate {
    pub fn new(whitelist_ips: &[String], cooldown_seconds: u64) -> Self {
        Self {
            whitelist: whitelist_ips.iter().cloned().collect(),
            cooldowns: HashMap::new(),
            cooldown: Duration::from_secs(cooldown_seconds),
        }
    }

    /// Check an alert in policy order: whitelist first, then cooldown.
    /// An admitted alert stamps its cooldown slot.
    pub fn check(&mut self, rule_name: &str, src_ip: &str) -> GateDecision {
        if self.whitelist.contains(src_ip) {
            return GateDecision::Whitelisted;
        }

        let key = format!("{rule_name}:{src_ip}");
        let now = Instant::now();
        if let Some(last_fired) = self.cooldowns.get(&key) {
            if now.duration_since(*last_fired) < self.cooldown {
                return GateDecision::Cooldown;
            }
        }

        self.cooldowns.insert(key, now);
        GateDecision::Admit
    }
}
