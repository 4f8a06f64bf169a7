//! Periodic broadcasters: 1 Hz flow snapshots and 5 s stats ticks.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::{broadcast, watch};
use tracing::{error, info};

use crate::broadcast::EventBroadcaster;
use crate::db::{StatsSnapshot, Storage};
use crate::engine::EngineStats;
use crate::metrics::CaptureMetrics;
use crate::state::FlowSnapshot;

use super::aggregator::AggregatorStats;

const FLOWS_INTERVAL: Duration = Duration::from_secs(1);
const STATS_INTERVAL: Duration = Duration::from_secs(5);

/// Publish the live top-flows snapshot once a second.
pub async fn flows_broadcaster(
    flows_rx: watch::Receiver<Vec<FlowSnapshot>>,
    broadcaster: Arc<EventBroadcaster>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(FLOWS_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {
                if broadcaster.flow_subscriber_count() == 0 {
                    continue;
                }
                let flows = flows_rx.borrow().clone();
                broadcaster.publish_flows(json!({
                    "flows": flows,
                    "timestamp": Utc::now().timestamp_millis() as f64 / 1000.0,
                }));
            }
        }
    }
    info!("flows broadcaster exiting");
}

/// Counters feeding the periodic stats snapshot.
pub struct StatsSources {
    pub capture: Arc<CaptureMetrics>,
    pub aggregator: Arc<AggregatorStats>,
    pub engine: Arc<EngineStats>,
    /// Summed dropped counts of every pipeline queue.
    pub queue_drops: Box<dyn Fn() -> u64 + Send + Sync>,
}

impl StatsSources {
    pub fn snapshot(&self) -> StatsSnapshot {
        let dropped: u64 = (self.queue_drops)();
        StatsSnapshot {
            timestamp: Utc::now().timestamp_millis() as f64 / 1000.0,
            packets_seen: self.capture.packets_received.load(Ordering::Relaxed),
            packets_dropped: dropped,
            flows_active: self.aggregator.flows_active.load(Ordering::Relaxed),
            alerts_fired: self.engine.alerts_fired.load(Ordering::Relaxed),
            windows_analyzed: self.engine.windows_analyzed.load(Ordering::Relaxed),
        }
    }
}

/// Every five seconds: write a stats row and publish the same snapshot on
/// the stats channel.
pub async fn stats_broadcaster(
    sources: StatsSources,
    storage: Arc<Storage>,
    snapshot_max_rows: u32,
    broadcaster: Arc<EventBroadcaster>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(STATS_INTERVAL);
    // The first tick fires immediately; skip it so the first row is a real
    // five-second sample
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {
                let snapshot = sources.snapshot();
                if let Err(err) = storage.save_stats_snapshot(&snapshot, snapshot_max_rows).await {
                    error!(error = %err, "stats snapshot write failed");
                }
                match serde_json::to_value(&snapshot) {
                    Ok(payload) => { broadcaster.publish_stats(payload); }
                    Err(err) => error!(error = %err, "stats snapshot serialisation failed"),
                }
                info!(
                    packets = snapshot.packets_seen,
                    dropped = snapshot.packets_dropped,
                    flows = snapshot.flows_active,
                    alerts = snapshot.alerts_fired,
                    windows = snapshot.windows_analyzed,
                    "pipeline stats"
                );
            }
        }
    }
    info!("stats broadcaster exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_snapshot_reads_queue_drops() {
        let sources = StatsSources {
            capture: Arc::new(CaptureMetrics::new()),
            aggregator: Arc::new(AggregatorStats::default()),
            engine: Arc::new(EngineStats::default()),
            queue_drops: Box::new(|| 7),
        };
        sources.capture.packets_received.fetch_add(10, Ordering::Relaxed);

        let snapshot = sources.snapshot();
        assert_eq!(snapshot.packets_seen, 10);
        assert_eq!(snapshot.packets_dropped, 7);
    }

    #[tokio::test]
    async fn test_flows_broadcaster_publishes_for_subscribers() {
        let (flows_tx, flows_rx) = watch::channel(Vec::new());
        let broadcaster = Arc::new(EventBroadcaster::new());
        let mut subscriber = broadcaster.subscribe_flows();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = tokio::spawn(flows_broadcaster(
            flows_rx,
            Arc::clone(&broadcaster),
            shutdown_rx,
        ));

        let snapshot = FlowSnapshot {
            src_ip: "10.0.0.1".parse().unwrap(),
            dst_ip: "10.0.0.2".parse().unwrap(),
            src_port: 80,
            dst_port: 50000,
            protocol: crate::model::Protocol::Tcp,
            packets: 5,
            bytes: 500,
            pps: 1.0,
        };
        flows_tx.send(vec![snapshot]).unwrap();

        // The first tick can race the watch update and publish an empty
        // snapshot; wait for the first non-empty one
        let payload = loop {
            let payload = tokio::time::timeout(Duration::from_secs(5), subscriber.recv())
                .await
                .unwrap()
                .unwrap();
            if payload["flows"].as_array().is_some_and(|flows| !flows.is_empty()) {
                break payload;
            }
        };
        assert_eq!(payload["flows"][0]["packets"], 5);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
