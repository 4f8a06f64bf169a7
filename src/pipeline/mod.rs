//! Pipeline orchestration.
//!
//! Owns the bounded queues, starts the capture thread, and fans out the
//! cooperative consumer tasks. Shutdown is a broadcast: every loop
//! observes the same signal, the aggregator flushes its buckets, the
//! capture thread is joined, and storage closes last.

pub mod aggregator;
pub mod broadcasters;
pub mod detector;
pub mod enricher;
pub mod persister;
pub mod queue;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::broadcast::EventBroadcaster;
use crate::capture::PacketCapture;
use crate::config::Config;
use crate::db::Storage;
use crate::engine::DetectionEngine;
use crate::llm::LlmClient;
use crate::metrics::CaptureMetrics;
use crate::model::PacketMeta;
use crate::state::AggregatedWindow;

pub use aggregator::{Aggregator, AggregatorStats};
pub use detector::AlertJob;
pub use enricher::EnrichedAlert;
pub use queue::BoundedQueue;

/// The four inter-stage queues.
pub struct Queues {
    pub capture: Arc<BoundedQueue<PacketMeta>>,
    pub detection: Arc<BoundedQueue<AggregatedWindow>>,
    pub alert: Arc<BoundedQueue<AlertJob>>,
    pub enriched: Arc<BoundedQueue<EnrichedAlert>>,
}

impl Queues {
    fn new(config: &Config) -> Self {
        info!(
            capture = config.queues.capture,
            detection = config.queues.detection,
            alert = config.queues.alert,
            enriched = config.queues.enriched,
            "pipeline queues initialised"
        );
        Self {
            capture: Arc::new(BoundedQueue::new(config.queues.capture)),
            detection: Arc::new(BoundedQueue::new(config.queues.detection)),
            alert: Arc::new(BoundedQueue::new(config.queues.alert)),
            enriched: Arc::new(BoundedQueue::new(config.queues.enriched)),
        }
    }

    fn total_dropped(&self) -> u64 {
        self.capture.dropped()
            + self.detection.dropped()
            + self.alert.dropped()
            + self.enriched.dropped()
    }
}

/// Main pipeline orchestrator.
pub struct Pipeline {
    config: Config,
    queues: Queues,
    storage: Arc<Storage>,
    broadcaster: Arc<EventBroadcaster>,
    capture_metrics: Arc<CaptureMetrics>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Pipeline {
    /// Open storage (applying migrations - a failed migration aborts
    /// startup) and build the queues. Nothing is spawned yet.
    pub async fn new(config: Config) -> Result<Self> {
        let storage = Arc::new(
            Storage::open(&config.storage.db_path)
                .await
                .context("failed to initialise storage")?,
        );
        let queues = Queues::new(&config);
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            queues,
            storage,
            broadcaster: Arc::new(EventBroadcaster::new()),
            capture_metrics: Arc::new(CaptureMetrics::new()),
            shutdown_tx,
        })
    }

    pub fn broadcaster(&self) -> Arc<EventBroadcaster> {
        Arc::clone(&self.broadcaster)
    }

    pub fn storage(&self) -> Arc<Storage> {
        Arc::clone(&self.storage)
    }

    /// Signal shutdown to every consumer.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Run the whole pipeline until shutdown is signalled.
    pub async fn run(&self) -> Result<()> {
        let local_net = self.config.local_network()?;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        // Capture thread (blocking, talks to us only through the queue)
        let capture = Arc::new(PacketCapture::new(
            &self.config.capture.interface,
            &self.config.capture.bpf_filter,
            local_net,
            self.config.capture.promiscuous,
            Arc::clone(&self.queues.capture),
            Arc::clone(&self.capture_metrics),
        ));
        let capture_handle = capture.start_threaded()?;

        // Aggregator
        let (aggregator, flows_rx) = Aggregator::new(
            Arc::clone(&self.queues.capture),
            Arc::clone(&self.queues.detection),
            self.config.aggregation.flow_ttl_seconds,
        );
        let aggregator_stats = aggregator.stats();

        // Detection engine
        let engine = DetectionEngine::new(
            self.config.detection.confidence_threshold,
            &self.config.detection.whitelist_ips,
            self.config.detection.alert_cooldown_seconds,
        );
        let engine_stats = engine.stats();
        info!(rules = ?engine.rule_names(), "detection rules loaded");

        // Model client; the startup probe only logs
        let mut llm_client = LlmClient::new(
            &self.config.llm.url,
            &self.config.llm.model,
            self.config.llm.cache_size,
            self.config.llm.min_confidence,
            self.config.llm.max_calls_per_minute,
            self.config.llm.cooldown_seconds,
        );
        if self.config.llm.enabled {
            let healthy = llm_client.health_check().await;
            info!(
                url = %self.config.llm.url,
                model = %self.config.llm.model,
                healthy,
                "model server probed"
            );
        }

        let stats_sources = broadcasters::StatsSources {
            capture: Arc::clone(&self.capture_metrics),
            aggregator: Arc::clone(&aggregator_stats),
            engine: Arc::clone(&engine_stats),
            queue_drops: {
                let capture_q = Arc::clone(&self.queues.capture);
                let detection_q = Arc::clone(&self.queues.detection);
                let alert_q = Arc::clone(&self.queues.alert);
                let enriched_q = Arc::clone(&self.queues.enriched);
                Box::new(move || {
                    capture_q.dropped()
                        + detection_q.dropped()
                        + alert_q.dropped()
                        + enriched_q.dropped()
                })
            },
        };

        let tasks = vec![
            tokio::spawn(aggregator.run(self.shutdown_tx.subscribe())),
            tokio::spawn(detector::run(
                engine,
                Arc::clone(&self.queues.detection),
                Arc::clone(&self.queues.alert),
                self.shutdown_tx.subscribe(),
            )),
            tokio::spawn(enricher::run(
                llm_client,
                self.config.llm.enabled,
                Arc::clone(&self.queues.alert),
                Arc::clone(&self.queues.enriched),
                self.shutdown_tx.subscribe(),
            )),
            tokio::spawn(persister::run(
                Arc::clone(&self.storage),
                Arc::clone(&self.broadcaster),
                Arc::clone(&self.queues.enriched),
                self.shutdown_tx.subscribe(),
            )),
            tokio::spawn(broadcasters::flows_broadcaster(
                flows_rx,
                Arc::clone(&self.broadcaster),
                self.shutdown_tx.subscribe(),
            )),
            tokio::spawn(broadcasters::stats_broadcaster(
                stats_sources,
                Arc::clone(&self.storage),
                self.config.storage.stats_snapshot_max_rows,
                Arc::clone(&self.broadcaster),
                self.shutdown_tx.subscribe(),
            )),
        ];

        info!(
            iface = %self.config.capture.interface,
            filter = %self.config.capture.bpf_filter,
            "pipeline running"
        );

        // Wait for the shutdown signal, then wind everything down in order
        let _ = shutdown_rx.recv().await;
        info!("shutdown signal received");

        capture.stop();
        for task in tasks {
            if let Err(err) = task.await {
                error!(error = %err, "pipeline task failed to join");
            }
        }

        // Bounded by the capture read timeout
        let joined = tokio::task::spawn_blocking(move || capture_handle.join()).await;
        if joined.is_err() || matches!(joined, Ok(Err(_))) {
            error!("capture thread did not join cleanly");
        }

        self.storage.close().await;

        let dropped = self.queues.total_dropped();
        info!(
            packets = self.capture_metrics.packets_received.load(std::sync::atomic::Ordering::Relaxed),
            dropped,
            alerts = engine_stats.alerts_fired.load(std::sync::atomic::Ordering::Relaxed),
            "pipeline stopped"
        );
        Ok(())
    }
}
