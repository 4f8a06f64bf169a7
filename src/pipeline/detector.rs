//! Detection consumer: detection queue -> engine -> alert queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::info;

use crate::engine::{Alert, DetectionEngine, WindowContext};
use crate::state::AggregatedWindow;

use super::queue::BoundedQueue;

const RECV_TIMEOUT: Duration = Duration::from_millis(500);

/// A gated alert plus the window context the enricher feeds to the prompt
/// builder.
#[derive(Debug, Clone)]
pub struct AlertJob {
    pub alert: Alert,
    pub context: WindowContext,
}

fn context_for(window: &AggregatedWindow) -> WindowContext {
    WindowContext {
        total_packets: window.total_packets,
        unique_src_count: window.unique_src_ips.len(),
        unique_dst_ports_count: window.unique_dst_ports.len(),
        protocol_counts: window
            .protocol_counts
            .iter()
            .map(|(protocol, count)| (protocol.as_str().to_string(), *count))
            .collect(),
    }
}

/// Analyze sealed windows until shutdown. Alerts from one window are
/// enqueued before the next window is dequeued, preserving window order.
pub async fn run(
    mut engine: DetectionEngine,
    input: Arc<BoundedQueue<AggregatedWindow>>,
    output: Arc<BoundedQueue<AlertJob>>,
    mut shutdown: broadcast::Receiver<()>,
) {
    info!("detection consumer started");
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            window = input.recv_timeout(RECV_TIMEOUT) => {
                let Some(window) = window else { continue };
                let context = context_for(&window);
                for alert in engine.analyze(&window) {
                    output.push(AlertJob { alert, context: context.clone() });
                }
            }
        }
    }
    info!("detection consumer exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::rules::test_support::{tcp_flow, window_with_flows};
    use crate::model::FlagLabel;

    #[tokio::test]
    async fn test_windows_become_alert_jobs() {
        let input = Arc::new(BoundedQueue::new(10));
        let output: Arc<BoundedQueue<AlertJob>> = Arc::new(BoundedQueue::new(10));
        let engine = DetectionEngine::new(0.3, &[], 30);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = tokio::spawn(run(
            engine,
            Arc::clone(&input),
            Arc::clone(&output),
            shutdown_rx,
        ));

        // A clear SYN flood in a 1s window
        let flow = tcp_flow("10.0.0.2", "192.168.0.1", 80, 200, 200.0, 0.0, &[FlagLabel::Syn]);
        input.push(window_with_flows(1, vec![flow]));

        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();

        let job = output.try_pop().expect("one alert job");
        assert_eq!(job.alert.rule_name, "syn_flood");
        assert_eq!(job.context.total_packets, 200);
    }
}
