//! Fixed-duration time-window accumulation.
//!
//! One `TimeWindowBucket` per horizon (1 s / 10 s / 60 s). Boundary checks
//! use the monotonic clock so wall-clock jumps cannot shrink or stretch a
//! window; the emitted timestamps use wall-clock for human readability.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::model::{PacketMeta, Protocol};
use crate::state::flow::FlowRecord;

/// Maximum number of top-flow copies carried by a sealed window.
pub const TOP_FLOWS_PER_WINDOW: usize = 10;

/// Snapshot of traffic statistics over one elapsed window.
///
/// Immutable once sealed. No raw packets or full flow tables are stored -
/// memory is bounded by the top-flows cap, not by packet volume.
#[derive(Debug, Clone)]
pub struct AggregatedWindow {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    /// Duration in seconds: 1, 10, or 60.
    pub window_size_seconds: u32,
    pub total_packets: u64,
    pub total_bytes: u64,
    pub unique_src_ips: HashSet<IpAddr>,
    pub unique_dst_ips: HashSet<IpAddr>,
    pub unique_dst_ports: HashSet<u16>,
    pub protocol_counts: HashMap<Protocol, u64>,
    /// Top flows by packet count at window close, at most 10.
    pub top_flows: Vec<FlowRecord>,
    /// New flows first seen in this window.
    pub flows_started: u64,
    /// Flows that went inactive during this window.
    pub flows_ended: u64,
}

/// Accumulates per-packet statistics into a fixed-duration window.
///
/// Not thread-safe: owned and driven exclusively by the aggregator task.
pub struct TimeWindowBucket {
    size_seconds: u32,
    window_start_mono: Instant,
    window_start_wall: DateTime<Utc>,
    total_packets: u64,
    total_bytes: u64,
    unique_src_ips: HashSet<IpAddr>,
    unique_dst_ips: HashSet<IpAddr>,
    unique_dst_ports: HashSet<u16>,
    protocol_counts: HashMap<Protocol, u64>,
}

impl TimeWindowBucket {
    /// `size_seconds` must be one of the supported horizons (1, 10, 60).
    pub fn new(size_seconds: u32) -> Self {
        debug_assert!(matches!(size_seconds, 1 | 10 | 60));
        let mut bucket = Self {
            size_seconds,
            window_start_mono: Instant::now(),
            window_start_wall: Utc::now(),
            total_packets: 0,
            total_bytes: 0,
            unique_src_ips: HashSet::new(),
            unique_dst_ips: HashSet::new(),
            unique_dst_ports: HashSet::new(),
            protocol_counts: HashMap::new(),
        };
        bucket.reset();
        bucket
    }

    pub fn size_seconds(&self) -> u32 {
        self.size_seconds
    }

    /// Accumulate one packet into the current window.
    ///
    /// When the window duration has elapsed, the current totals are sealed
    /// into an `AggregatedWindow` (carrying the supplied top-flows snapshot
    /// and flow churn counts), a fresh window opens, and the triggering
    /// packet is accumulated into the fresh window.
    pub fn add(
        &mut self,
        packet: &PacketMeta,
        top_flows: &[FlowRecord],
        flows_started: u64,
        flows_ended: u64,
    ) -> Option<AggregatedWindow> {
        if self.window_start_mono.elapsed().as_secs_f64() >= self.size_seconds as f64 {
            let completed = self.seal(top_flows, flows_started, flows_ended);
            self.reset();
            self.accumulate(packet);
            return Some(completed);
        }

        self.accumulate(packet);
        None
    }

    /// Force the current window closed and return it.
    ///
    /// Returns `None` when the window holds no packets - idle windows carry
    /// no detection signal. Used on shutdown to drain partial windows.
    pub fn flush(
        &mut self,
        top_flows: &[FlowRecord],
        flows_started: u64,
        flows_ended: u64,
    ) -> Option<AggregatedWindow> {
        if self.total_packets == 0 {
            return None;
        }
        let window = self.seal(top_flows, flows_started, flows_ended);
        self.reset();
        Some(window)
    }

    fn reset(&mut self) {
        self.window_start_mono = Instant::now();
        self.window_start_wall = Utc::now();
        self.total_packets = 0;
        self.total_bytes = 0;
        self.unique_src_ips.clear();
        self.unique_dst_ips.clear();
        self.unique_dst_ports.clear();
        self.protocol_counts.clear();
    }

    fn accumulate(&mut self, packet: &PacketMeta) {
        self.total_packets += 1;
        self.total_bytes += packet.payload_size;
        self.unique_src_ips.insert(packet.src_ip);
        self.unique_dst_ips.insert(packet.dst_ip);
        if packet.dst_port != 0 {
            self.unique_dst_ports.insert(packet.dst_port);
        }
        *self.protocol_counts.entry(packet.protocol).or_insert(0) += 1;
    }

    fn seal(
        &self,
        top_flows: &[FlowRecord],
        flows_started: u64,
        flows_ended: u64,
    ) -> AggregatedWindow {
        let window = AggregatedWindow {
            window_start: self.window_start_wall,
            window_end: Utc::now(),
            window_size_seconds: self.size_seconds,
            total_packets: self.total_packets,
            total_bytes: self.total_bytes,
            unique_src_ips: self.unique_src_ips.clone(),
            unique_dst_ips: self.unique_dst_ips.clone(),
            unique_dst_ports: self.unique_dst_ports.clone(),
            protocol_counts: self.protocol_counts.clone(),
            top_flows: top_flows.iter().take(TOP_FLOWS_PER_WINDOW).cloned().collect(),
            flows_started,
            flows_ended,
        };
        debug!(
            size = self.size_seconds,
            packets = self.total_packets,
            bytes = self.total_bytes,
            "window sealed"
        );
        window
    }
}
