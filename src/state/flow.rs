//! Flow state management.
//!
//! Flows are keyed on a normalised 5-tuple so both directions of a
//! conversation map to the same record. Only derived counters are stored -
//! memory is O(1) per flow.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::model::{FlagLabel, PacketMeta, Protocol};

const MAX_FLOWS_DEFAULT: usize = 50_000;

/// Normalised 5-tuple key for flow tracking.
///
/// Normalisation rule: the side with the *lower* port is stored as src.
/// If ports are equal, the smaller IP address is src. This guarantees both
/// directions of a TCP connection map to the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: Protocol,
}

impl FlowKey {
    /// Build a normalised key from raw packet endpoints.
    pub fn normalised(
        src_ip: IpAddr,
        dst_ip: IpAddr,
        src_port: u16,
        dst_port: u16,
        protocol: Protocol,
    ) -> Self {
        let keep = if src_port < dst_port {
            true
        } else if dst_port < src_port {
            false
        } else {
            src_ip <= dst_ip
        };

        if keep {
            Self { src_ip, dst_ip, src_port, dst_port, protocol }
        } else {
            Self {
                src_ip: dst_ip,
                dst_ip: src_ip,
                src_port: dst_port,
                dst_port: src_port,
                protocol,
            }
        }
    }

    pub fn from_packet(packet: &PacketMeta) -> Self {
        Self::normalised(
            packet.src_ip,
            packet.dst_ip,
            packet.src_port,
            packet.dst_port,
            packet.protocol,
        )
    }

    /// String representation for logging.
    pub fn to_display_string(&self) -> String {
        format!(
            "{}:{} -> {}:{} [{}]",
            self.src_ip, self.src_port, self.dst_ip, self.dst_port, self.protocol
        )
    }
}

/// Per-flow statistics. No raw packets are stored.
#[derive(Debug, Clone)]
pub struct FlowRecord {
    pub key: FlowKey,
    /// Timestamp of the first packet on this flow.
    pub first_seen: DateTime<Utc>,
    /// Timestamp of the most recently observed packet.
    pub last_seen: DateTime<Utc>,
    pub packet_count: u64,
    pub byte_count: u64,
    /// All distinct TCP flag labels observed on this flow.
    pub flags_seen: HashSet<FlagLabel>,
    /// Running sum of payload sizes, feeds `avg_payload_size`.
    total_payload: u64,
    /// False once the tracker has expired this flow.
    pub is_active: bool,
}

impl FlowRecord {
    fn new(key: FlowKey, first_seen: DateTime<Utc>) -> Self {
        Self {
            key,
            first_seen,
            last_seen: first_seen,
            packet_count: 0,
            byte_count: 0,
            flags_seen: HashSet::new(),
            total_payload: 0,
            is_active: true,
        }
    }

    pub fn avg_payload_size(&self) -> f64 {
        if self.packet_count == 0 {
            return 0.0;
        }
        self.total_payload as f64 / self.packet_count as f64
    }

    /// Flow duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        (self.last_seen - self.first_seen).num_milliseconds() as f64 / 1000.0
    }

    /// Throughput in packets/second.
    ///
    /// Returns 0 when the flow duration is below 0.1 s to avoid near-zero
    /// division on freshly created flows.
    pub fn packets_per_second(&self) -> f64 {
        let duration = self.duration_secs();
        if duration < 0.1 {
            return 0.0;
        }
        self.packet_count as f64 / duration
    }
}

#[cfg(test)]
impl FlowRecord {
    /// Build a record with prescribed derived stats, bypassing the tracker.
    ///
    /// Mirrors what the tracker would produce for `packet_count` packets of
    /// `avg_payload` bytes spread over `packet_count / pps` seconds.
    pub(crate) fn synthetic(
        key: FlowKey,
        packet_count: u64,
        avg_payload: f64,
        pps: f64,
        flags: &[FlagLabel],
    ) -> Self {
        let now = Utc::now();
        let duration_ms = if pps > 0.0 {
            (packet_count as f64 / pps * 1000.0) as i64
        } else {
            0
        };
        let total_payload = (packet_count as f64 * avg_payload) as u64;
        Self {
            key,
            first_seen: now - chrono::Duration::milliseconds(duration_ms),
            last_seen: now,
            packet_count,
            byte_count: total_payload,
            flags_seen: flags.iter().copied().collect(),
            total_payload,
            is_active: true,
        }
    }
}

/// Wire-friendly copy of a flow record for the live flows channel.
#[derive(Debug, Clone, Serialize)]
pub struct FlowSnapshot {
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: Protocol,
    pub packets: u64,
    pub bytes: u64,
    pub pps: f64,
}

impl From<&FlowRecord> for FlowSnapshot {
    fn from(record: &FlowRecord) -> Self {
        Self {
            src_ip: record.key.src_ip,
            dst_ip: record.key.dst_ip,
            src_port: record.key.src_port,
            dst_port: record.key.dst_port,
            protocol: record.key.protocol,
            packets: record.packet_count,
            bytes: record.byte_count,
            pps: (record.packets_per_second() * 100.0).round() / 100.0,
        }
    }
}

/// Tracks live flow statistics keyed on normalised 5-tuples.
///
/// Not thread-safe by design: owned and mutated exclusively by the
/// aggregator task, so no locking is needed.
pub struct FlowTracker {
    flows: HashMap<FlowKey, FlowRecord>,
    max_flows: usize,
    ttl_seconds: i64,
    new_flow_count: u64,
}

impl FlowTracker {
    pub fn new(ttl_seconds: i64) -> Self {
        Self::with_capacity(MAX_FLOWS_DEFAULT, ttl_seconds)
    }

    pub fn with_capacity(max_flows: usize, ttl_seconds: i64) -> Self {
        debug!(max_flows, ttl_seconds, "FlowTracker initialised");
        Self {
            flows: HashMap::new(),
            max_flows,
            ttl_seconds,
            new_flow_count: 0,
        }
    }

    /// Update or create the record for this packet's flow.
    ///
    /// Returns a shared reference to the updated record, valid until the
    /// next mutating call on the tracker.
    pub fn update(&mut self, packet: &PacketMeta) -> &FlowRecord {
        let key = FlowKey::from_packet(packet);

        if let Some(record) = self.flows.get_mut(&key) {
            // Reactivate if it was previously expired but traffic resumed
            record.is_active = true;
        } else {
            self.flows.insert(key, FlowRecord::new(key, packet.timestamp));
            self.new_flow_count += 1;
            debug!(flow = %key.to_display_string(), active = self.flows.len(), "new flow");
            if self.flows.len() > self.max_flows {
                self.evict_oldest();
            }
        }

        // Re-insert in the edge case where the cap eviction picked the
        // brand-new key (a packet carrying an old timestamp).
        let record = self
            .flows
            .entry(key)
            .or_insert_with(|| FlowRecord::new(key, packet.timestamp));
        record.last_seen = packet.timestamp;
        record.packet_count += 1;
        record.byte_count += packet.payload_size;
        record.total_payload += packet.payload_size;
        if let Some(flag) = packet.flags {
            record.flags_seen.insert(flag);
        }
        &*record
    }

    /// Remove flows whose `last_seen` is older than the TTL.
    ///
    /// Each removed record is marked inactive and returned so the caller can
    /// count it toward the outgoing window's `flows_ended`.
    pub fn expire_flows(&mut self, ttl_override: Option<i64>) -> Vec<FlowRecord> {
        let ttl = ttl_override.unwrap_or(self.ttl_seconds);
        let cutoff = Utc::now() - chrono::Duration::seconds(ttl);

        let expired_keys: Vec<FlowKey> = self
            .flows
            .iter()
            .filter(|(_, record)| record.last_seen < cutoff)
            .map(|(key, _)| *key)
            .collect();

        let mut expired = Vec::with_capacity(expired_keys.len());
        for key in expired_keys {
            if let Some(mut record) = self.flows.remove(&key) {
                record.is_active = false;
                expired.push(record);
            }
        }

        if !expired.is_empty() {
            info!(
                expired = expired.len(),
                ttl,
                remaining = self.flows.len(),
                "expired flows"
            );
        }
        expired
    }

    /// Top-N flows by packet count, as owned copies.
    ///
    /// Callers may hold the returned records without observing later tracker
    /// mutations.
    pub fn top_flows(&self, n: usize) -> Vec<FlowRecord> {
        let mut sorted: Vec<&FlowRecord> = self.flows.values().collect();
        sorted.sort_by(|a, b| b.packet_count.cmp(&a.packet_count));
        sorted.into_iter().take(n).cloned().collect()
    }

    /// Return and reset the count of flows created since the last call.
    pub fn pop_new_flow_count(&mut self) -> u64 {
        std::mem::take(&mut self.new_flow_count)
    }

    pub fn active_count(&self) -> usize {
        self.flows.len()
    }

    fn evict_oldest(&mut self) {
        let excess = self.flows.len().saturating_sub(self.max_flows);
        if excess == 0 {
            return;
        }
        let mut by_age: Vec<(FlowKey, DateTime<Utc>)> = self
            .flows
            .iter()
            .map(|(key, record)| (*key, record.last_seen))
            .collect();
        by_age.sort_by_key(|(_, last_seen)| *last_seen);
        for (key, _) in by_age.into_iter().take(excess) {
            self.flows.remove(&key);
        }
        warn!(evicted = excess, "evicted oldest flows to stay within cap");
    }
}
