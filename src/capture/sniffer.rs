//! Live packet capture on a dedicated OS thread.
//!
//! The capture handle blocks in the kernel, so it owns its own thread and
//! talks to the async pipeline exclusively through the non-blocking
//! drop-oldest queue. The BPF program is compiled and installed on the
//! handle before the first frame is read.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{bail, Context, Result};
use ipnetwork::IpNetwork;
use pcap::{Active, Capture};
use tracing::{debug, error, info, warn};

use crate::metrics::CaptureMetrics;
use crate::model::PacketMeta;
use crate::pipeline::queue::BoundedQueue;

use super::parser::parse_frame;

/// Kernel read timeout; bounds how long `stop()` can take to be observed.
const READ_TIMEOUT_MS: i32 = 100;
const SNAP_LENGTH: i32 = 65_535;

/// Packet capture bridging one network interface into the capture queue.
pub struct PacketCapture {
    iface: String,
    bpf_filter: String,
    local_net: IpNetwork,
    promiscuous: bool,
    queue: Arc<BoundedQueue<PacketMeta>>,
    metrics: Arc<CaptureMetrics>,
    running: Arc<AtomicBool>,
}

impl PacketCapture {
    pub fn new(
        iface: &str,
        bpf_filter: &str,
        local_net: IpNetwork,
        promiscuous: bool,
        queue: Arc<BoundedQueue<PacketMeta>>,
        metrics: Arc<CaptureMetrics>,
    ) -> Self {
        Self {
            iface: iface.to_string(),
            bpf_filter: bpf_filter.to_string(),
            local_net,
            promiscuous,
            queue,
            metrics,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Signal the capture loop to exit.
    ///
    /// The thread observes the flag within one kernel read timeout, so a
    /// subsequent `join` is bounded.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Open the capture handle and install the kernel filter.
    fn open(&self) -> Result<Capture<Active>> {
        let mut capture = Capture::from_device(self.iface.as_str())
            .with_context(|| format!("interface '{}' not found", self.iface))?
            .promisc(self.promiscuous)
            .snaplen(SNAP_LENGTH)
            .timeout(READ_TIMEOUT_MS)
            .open()
            .with_context(|| format!("failed to open capture on '{}'", self.iface))?;

        capture
            .filter(&self.bpf_filter, true)
            .with_context(|| format!("invalid BPF filter {:?}", self.bpf_filter))?;

        Ok(capture)
    }

    /// Blocking capture loop. Runs until `stop()` is called.
    fn run(&self, mut capture: Capture<Active>) {
        info!(
            iface = %self.iface,
            filter = %self.bpf_filter,
            local_net = %self.local_net,
            "capture started"
        );

        while self.running.load(Ordering::SeqCst) {
            match capture.next_packet() {
                Ok(frame) => {
                    self.metrics.packets_received.fetch_add(1, Ordering::Relaxed);
                    match parse_frame(frame.data, &self.local_net) {
                        Ok(Some(meta)) => {
                            self.metrics.packets_parsed.fetch_add(1, Ordering::Relaxed);
                            // Never blocks: the queue drops its oldest entry
                            // under overload.
                            self.queue.push(meta);
                        }
                        Ok(None) => {
                            self.metrics.non_ip.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(err) => {
                            self.metrics.parse_errors.fetch_add(1, Ordering::Relaxed);
                            debug!(error = %err, "frame parse error");
                        }
                    }
                }
                Err(pcap::Error::TimeoutExpired) => {
                    // Expected: gives us a chance to observe the stop flag
                }
                Err(err) => {
                    error!(error = %err, "error receiving packet");
                }
            }
        }

        let snapshot = self.metrics.snapshot();
        info!(
            iface = %self.iface,
            received = snapshot.packets_received,
            parsed = snapshot.packets_parsed,
            parse_errors = snapshot.parse_errors,
            non_ip = snapshot.non_ip,
            "capture stopped"
        );
    }

    /// Start the capture loop in its own OS thread.
    ///
    /// The handle is opened on the calling thread so configuration errors
    /// (missing interface, bad filter) surface before the thread spawns.
    pub fn start_threaded(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        if self.running.swap(true, Ordering::SeqCst) {
            bail!("capture already running on interface {}", self.iface);
        }

        let capture = match self.open() {
            Ok(capture) => capture,
            Err(err) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(err);
            }
        };

        let this = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name(format!("capture-{}", self.iface))
            .spawn(move || this.run(capture))
            .context("failed to spawn capture thread")?;

        Ok(handle)
    }
}

impl Drop for PacketCapture {
    fn drop(&mut self) {
        if self.is_running() {
            warn!(iface = %self.iface, "capture dropped while running, stopping");
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capture() -> Arc<PacketCapture> {
        Arc::new(PacketCapture::new(
            "nonexistent0",
            "ip",
            "192.168.0.0/16".parse().unwrap(),
            true,
            Arc::new(BoundedQueue::new(16)),
            Arc::new(CaptureMetrics::new()),
        ))
    }

    #[test]
    fn test_start_on_missing_interface_fails_and_resets() {
        let capture = capture();
        assert!(capture.start_threaded().is_err());
        // Failure path clears the running flag so a retry is possible
        assert!(!capture.is_running());
    }

    #[test]
    fn test_stop_clears_running_flag() {
        let capture = capture();
        capture.stop();
        assert!(!capture.is_running());
    }
}
