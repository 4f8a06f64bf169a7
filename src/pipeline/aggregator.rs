//! Aggregation task: capture queue -> flow tracker + window buckets ->
//! detection queue.
//!
//! The single consumer of the capture queue, and the sole owner of the
//! flow tracker and the three window buckets. The 1-second receive timeout
//! doubles as the tick that drives periodic flow expiry during quiet
//! periods.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

use crate::model::PacketMeta;
use crate::state::{AggregatedWindow, FlowSnapshot, FlowTracker, TimeWindowBucket};

use super::queue::BoundedQueue;

const EXPIRY_INTERVAL: Duration = Duration::from_secs(30);
const RECV_TIMEOUT: Duration = Duration::from_secs(1);
const FLOW_PUBLISH_INTERVAL: Duration = Duration::from_secs(1);

/// Aggregation counters, shared with the stats reporter.
#[derive(Debug, Default)]
pub struct AggregatorStats {
    pub packets_processed: AtomicU64,
    pub flows_active: AtomicU64,
    pub flows_expired_total: AtomicU64,
    pub windows_emitted: AtomicU64,
}

/// Bridges the capture queue to the detection queue across the three
/// window horizons.
pub struct Aggregator {
    input: Arc<BoundedQueue<PacketMeta>>,
    output: Arc<BoundedQueue<AggregatedWindow>>,
    tracker: FlowTracker,
    /// Seal order for a packet that closes several horizons at once is
    /// fixed: 1 s, then 10 s, then 60 s.
    buckets: [TimeWindowBucket; 3],
    last_expiry_check: Instant,
    /// Expired-flow count accumulated between window seals.
    pending_expired: u64,
    stats: Arc<AggregatorStats>,
    flows_tx: watch::Sender<Vec<FlowSnapshot>>,
    last_flow_publish: Instant,
}

impl Aggregator {
    /// Returns the aggregator plus the receiver side of the live top-flows
    /// snapshot consumed by the flows broadcaster.
    pub fn new(
        input: Arc<BoundedQueue<PacketMeta>>,
        output: Arc<BoundedQueue<AggregatedWindow>>,
        flow_ttl_seconds: i64,
    ) -> (Self, watch::Receiver<Vec<FlowSnapshot>>) {
        let (flows_tx, flows_rx) = watch::channel(Vec::new());
        let aggregator = Self {
            input,
            output,
            tracker: FlowTracker::new(flow_ttl_seconds),
            buckets: [
                TimeWindowBucket::new(1),
                TimeWindowBucket::new(10),
                TimeWindowBucket::new(60),
            ],
            last_expiry_check: Instant::now(),
            pending_expired: 0,
            stats: Arc::new(AggregatorStats::default()),
            flows_tx,
            last_flow_publish: Instant::now(),
        };
        (aggregator, flows_rx)
    }

    pub fn stats(&self) -> Arc<AggregatorStats> {
        Arc::clone(&self.stats)
    }

    /// Main aggregation loop. Flushes all buckets on shutdown so partial
    /// windows are not silently lost.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!("aggregator started, watching 1s / 10s / 60s windows");
        let input = Arc::clone(&self.input);
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("aggregator shutting down, flushing buckets");
                    self.flush_all();
                    break;
                }
                packet = input.recv_timeout(RECV_TIMEOUT) => {
                    self.maybe_expire();
                    match packet {
                        Some(packet) => self.process_packet(&packet),
                        None => {
                            // Quiet period: elapsed windows close on the
                            // next real packet, idle windows carry no signal
                            self.stats
                                .flows_active
                                .store(self.tracker.active_count() as u64, Ordering::Relaxed);
                        }
                    }
                    self.maybe_publish_flows();
                }
            }
        }
        let stats = self.stats;
        info!(
            packets = stats.packets_processed.load(Ordering::Relaxed),
            windows = stats.windows_emitted.load(Ordering::Relaxed),
            "aggregator stopped"
        );
    }

    /// Run one packet through the tracker and all three buckets, emitting
    /// any sealed windows in horizon order.
    fn process_packet(&mut self, packet: &PacketMeta) {
        self.tracker.update(packet);
        self.stats.packets_processed.fetch_add(1, Ordering::Relaxed);
        self.stats
            .flows_active
            .store(self.tracker.active_count() as u64, Ordering::Relaxed);

        let flows_started = self.tracker.pop_new_flow_count();
        let flows_ended = std::mem::take(&mut self.pending_expired);

        // One snapshot per packet, shared across all horizons
        let top_flows = self.tracker.top_flows(10);

        for bucket in &mut self.buckets {
            if let Some(window) =
                bucket.add(packet, &top_flows, flows_started, flows_ended)
            {
                Self::emit(&self.output, &self.stats, window);
            }
        }
    }

    fn maybe_expire(&mut self) {
        if self.last_expiry_check.elapsed() < EXPIRY_INTERVAL {
            return;
        }
        let expired = self.tracker.expire_flows(None);
        self.pending_expired += expired.len() as u64;
        self.stats
            .flows_expired_total
            .fetch_add(expired.len() as u64, Ordering::Relaxed);
        self.last_expiry_check = Instant::now();
    }

    fn maybe_publish_flows(&mut self) {
        if self.last_flow_publish.elapsed() < FLOW_PUBLISH_INTERVAL {
            return;
        }
        let snapshot: Vec<FlowSnapshot> =
            self.tracker.top_flows(10).iter().map(FlowSnapshot::from).collect();
        let _ = self.flows_tx.send(snapshot);
        self.last_flow_publish = Instant::now();
    }

    fn flush_all(&mut self) {
        let top_flows = self.tracker.top_flows(10);
        for bucket in &mut self.buckets {
            let size = bucket.size_seconds();
            if let Some(window) = bucket.flush(&top_flows, 0, 0) {
                Self::emit(&self.output, &self.stats, window);
                info!(size, "flushed bucket on shutdown");
            }
        }
    }

    fn emit(
        output: &BoundedQueue<AggregatedWindow>,
        stats: &AggregatorStats,
        window: AggregatedWindow,
    ) {
        debug!(
            size = window.window_size_seconds,
            packets = window.total_packets,
            "emitting window"
        );
        output.push(window);
        stats.windows_emitted.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Direction, FlagLabel, Protocol};
    use chrono::Utc;
    use std::net::{IpAddr, Ipv4Addr};

    fn packet(src: u8, dst_port: u16) -> PacketMeta {
        PacketMeta {
            timestamp: Utc::now(),
            src_ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, src)),
            dst_ip: IpAddr::V4(Ipv4Addr::new(192, 168, 0, 1)),
            src_port: 50000,
            dst_port,
            protocol: Protocol::Tcp,
            flags: Some(FlagLabel::Syn),
            payload_size: 64,
            ttl: 64,
            direction: Direction::Inbound,
        }
    }

    fn make() -> (Aggregator, Arc<BoundedQueue<PacketMeta>>, Arc<BoundedQueue<AggregatedWindow>>) {
        let input = Arc::new(BoundedQueue::new(100));
        let output = Arc::new(BoundedQueue::new(100));
        let (aggregator, _flows_rx) = Aggregator::new(Arc::clone(&input), Arc::clone(&output), 60);
        (aggregator, input, output)
    }

    #[test]
    fn test_process_packet_updates_stats() {
        let (mut aggregator, _input, _output) = make();
        aggregator.process_packet(&packet(1, 80));
        aggregator.process_packet(&packet(2, 443));

        let stats = aggregator.stats();
        assert_eq!(stats.packets_processed.load(Ordering::Relaxed), 2);
        assert_eq!(stats.flows_active.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_seal_on_packet_after_horizon() {
        let (mut aggregator, _input, output) = make();
        aggregator.process_packet(&packet(1, 80));
        std::thread::sleep(Duration::from_millis(1100));
        // This packet closes the 1s bucket; 10s and 60s keep accumulating
        aggregator.process_packet(&packet(2, 443));

        let window = output.try_pop().expect("one sealed window");
        assert_eq!(window.window_size_seconds, 1);
        assert_eq!(window.total_packets, 1);
        assert!(output.try_pop().is_none());
    }

    #[tokio::test]
    async fn test_run_flushes_on_shutdown() {
        let (aggregator, input, output) = make();
        let stats = aggregator.stats();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = tokio::spawn(aggregator.run(shutdown_rx));

        input.push(packet(1, 80));
        input.push(packet(2, 443));
        tokio::time::sleep(Duration::from_millis(100)).await;

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();

        // All three buckets held the two packets; each flushed one window
        let mut sizes = Vec::new();
        while let Some(window) = output.try_pop() {
            assert_eq!(window.total_packets, 2);
            sizes.push(window.window_size_seconds);
        }
        assert_eq!(sizes, vec![1, 10, 60]);
        assert_eq!(stats.windows_emitted.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_window_carries_flow_churn() {
        let (mut aggregator, _input, output) = make();
        aggregator.process_packet(&packet(1, 80));
        aggregator.process_packet(&packet(2, 443));
        std::thread::sleep(Duration::from_millis(1100));
        aggregator.process_packet(&packet(3, 8080));

        let window = output.try_pop().unwrap();
        // Both earlier flows started inside the sealed window; the third
        // flow's start is popped with the sealing packet
        assert_eq!(window.flows_started, 1);
        assert!(window.top_flows.len() <= 10);
    }
}
