//! Atomic counters for the capture layer.
//!
//! Shared between the blocking capture thread and the async stats reporter,
//! so everything here is lock-free.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by the capture thread on every frame.
#[derive(Debug, Default)]
pub struct CaptureMetrics {
    /// Raw frames handed to us by the kernel filter.
    pub packets_received: AtomicU64,
    /// Frames that produced a valid `PacketMeta`.
    pub packets_parsed: AtomicU64,
    /// Frames that failed to decode.
    pub parse_errors: AtomicU64,
    /// Frames without an IPv4 layer (ARP, IPv6, etc.).
    pub non_ip: AtomicU64,
}

impl CaptureMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CaptureMetricsSnapshot {
        CaptureMetricsSnapshot {
            packets_received: self.packets_received.load(Ordering::Relaxed),
            packets_parsed: self.packets_parsed.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            non_ip: self.non_ip.load(Ordering::Relaxed),
        }
    }
}

/// Non-atomic copy of the capture counters.
#[derive(Debug, Clone, Copy)]
pub struct CaptureMetricsSnapshot {
    pub packets_received: u64,
    pub packets_parsed: u64,
    pub parse_errors: u64,
    pub non_ip: u64,
}
