//! Configuration for NetWatch.
//!
//! Loaded from a TOML file with per-field defaults, so a missing file or a
//! sparse one both work; the CLI can override the capture-facing options.

use std::path::Path;

use anyhow::{Context, Result};
use ipnetwork::IpNetwork;
use serde::Deserialize;

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub aggregation: AggregationConfig,
    pub detection: DetectionConfig,
    pub queues: QueueConfig,
    pub storage: StorageConfig,
    pub llm: LlmConfig,
    pub logging: LoggingConfig,
}

/// Capture settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Network interface to monitor.
    pub interface: String,

    /// Kernel-level BPF filter expression.
    pub bpf_filter: String,

    /// Monitored network in CIDR notation, used for direction
    /// classification.
    pub local_network: String,

    pub promiscuous: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interface: "eth0".to_string(),
            bpf_filter: "ip".to_string(),
            local_network: "192.168.0.0/16".to_string(),
            promiscuous: true,
        }
    }
}

/// Flow aggregation settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Seconds of silence before a flow expires. Kept above the beaconing
    /// rule's duration floor so long beacons survive to the trigger point.
    pub flow_ttl_seconds: i64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self { flow_ttl_seconds: 120 }
    }
}

/// Detection engine settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Rules below this confidence never produce alerts.
    pub confidence_threshold: f64,

    /// Source IPs that never trigger alerts.
    pub whitelist_ips: Vec<String>,

    /// Seconds before the same (rule, source) pair may alert again.
    pub alert_cooldown_seconds: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.3,
            whitelist_ips: Vec::new(),
            alert_cooldown_seconds: 30,
        }
    }
}

/// Pipeline queue capacities.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Absorbs packet bursts before aggregation.
    pub capture: usize,
    /// Aggregated windows; much lower volume.
    pub detection: usize,
    pub alert: usize,
    pub enriched: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capture: 10_000,
            detection: 1_000,
            alert: 500,
            enriched: 500,
        }
    }
}

/// Storage settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
    /// Stats table is pruned to this many newest rows after every insert.
    pub stats_snapshot_max_rows: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: "data/alerts.db".to_string(),
            stats_snapshot_max_rows: 2_000,
        }
    }
}

/// Model server settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub url: String,
    pub model: String,
    pub enabled: bool,
    /// Alerts below this confidence never reach the model.
    pub min_confidence: f64,
    pub max_calls_per_minute: usize,
    pub cooldown_seconds: u64,
    pub cache_size: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:11434".to_string(),
            model: "phi3:3.8b".to_string(),
            enabled: true,
            min_confidence: 0.5,
            max_calls_per_minute: 10,
            cooldown_seconds: 30,
            cache_size: 200,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: trace | debug | info | warn | error.
    pub level: String,

    /// Log format: "json" or "pretty".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read config file {:?}", path.as_ref()))?;
        toml::from_str(&content).context("failed to parse configuration")
    }

    /// Load from `path` when it exists, otherwise fall back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) if path.exists() => Self::from_file(path),
            Some(path) => {
                anyhow::bail!("config file {:?} does not exist", path)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parsed monitored network.
    pub fn local_network(&self) -> Result<IpNetwork> {
        self.capture
            .local_network
            .parse()
            .with_context(|| format!("invalid local network CIDR {:?}", self.capture.local_network))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.capture.interface.is_empty() {
            anyhow::bail!("capture interface cannot be empty");
        }
        self.local_network()?;

        if !(0.0..=1.0).contains(&self.detection.confidence_threshold) {
            anyhow::bail!(
                "confidence_threshold must be in [0, 1], got {}",
                self.detection.confidence_threshold
            );
        }
        if !(0.0..=1.0).contains(&self.llm.min_confidence) {
            anyhow::bail!(
                "llm.min_confidence must be in [0, 1], got {}",
                self.llm.min_confidence
            );
        }

        for (name, size) in [
            ("capture", self.queues.capture),
            ("detection", self.queues.detection),
            ("alert", self.queues.alert),
            ("enriched", self.queues.enriched),
        ] {
            if size == 0 {
                anyhow::bail!("{name} queue size must be positive");
            }
        }

        if self.aggregation.flow_ttl_seconds <= 0 {
            anyhow::bail!("flow_ttl_seconds must be positive");
        }

        Ok(())
    }
}
