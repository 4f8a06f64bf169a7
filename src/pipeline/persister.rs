//! Persist consumer: enriched queue -> storage + broadcast sink.
//!
//! Storage failures are logged and dropped; the pipeline never stalls on a
//! write.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::broadcast::EventBroadcaster;
use crate::db::Storage;
use crate::engine::Severity;

use super::enricher::EnrichedAlert;
use super::queue::BoundedQueue;

const RECV_TIMEOUT: Duration = Duration::from_millis(500);

const ANSI_RESET: &str = "\x1b[0m";

fn severity_colour(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "\x1b[91m",
        Severity::High => "\x1b[93m",
        Severity::Medium => "\x1b[96m",
        Severity::Low => "\x1b[97m",
    }
}

/// Operator-facing one-liner for each admitted alert.
fn print_alert(enriched: &EnrichedAlert) {
    let colour = severity_colour(enriched.alert.severity);
    let llm_line = if enriched.explanation.fallback_used {
        String::new()
    } else {
        let summary: String = enriched.explanation.summary.chars().take(100).collect();
        format!("\n  {colour}{summary}{ANSI_RESET}")
    };
    println!(
        "\n{colour}[ALERT {}]{ANSI_RESET} rule={} conf={:.2} src={}\n  {colour}{}{ANSI_RESET}{llm_line}\n  id={}\n",
        enriched.alert.severity,
        enriched.alert.rule_name,
        enriched.alert.confidence,
        enriched.alert.src_ip,
        enriched.alert.description,
        &enriched.alert.alert_id[..enriched.alert.alert_id.len().min(8)],
    );
}

/// Persist and broadcast enriched alerts until shutdown.
pub async fn run(
    storage: Arc<Storage>,
    broadcaster: Arc<EventBroadcaster>,
    input: Arc<BoundedQueue<EnrichedAlert>>,
    mut shutdown: broadcast::Receiver<()>,
) {
    info!("persist consumer started");
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            enriched = input.recv_timeout(RECV_TIMEOUT) => {
                let Some(enriched) = enriched else { continue };

                // Base alert first, then the LLM column
                if let Err(err) = storage.save_alert(&enriched.alert).await {
                    error!(error = %err, alert_id = %enriched.alert.alert_id, "alert write failed");
                } else if let Err(err) = storage
                    .update_alert_llm(&enriched.alert.alert_id, &enriched.explanation)
                    .await
                {
                    error!(error = %err, alert_id = %enriched.alert.alert_id, "LLM write failed");
                }

                let payload = match serde_json::to_value(&enriched.alert) {
                    Ok(mut alert_json) => {
                        if let Some(object) = alert_json.as_object_mut() {
                            object.insert(
                                "llm_explanation".into(),
                                json!(enriched.explanation),
                            );
                        }
                        alert_json
                    }
                    Err(_) => json!({"alert_id": enriched.alert.alert_id}),
                };
                broadcaster.publish_alert(payload);

                print_alert(&enriched);
            }
        }
    }
    info!("persist consumer exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Alert;
    use crate::llm::get_fallback;
    use chrono::Utc;

    fn enriched(id: &str) -> EnrichedAlert {
        EnrichedAlert {
            alert: Alert {
                alert_id: id.into(),
                timestamp: Utc::now(),
                rule_name: "port_scan".into(),
                severity: Severity::High,
                confidence: 0.8,
                src_ip: "10.0.0.1".into(),
                dst_ip: "multiple".into(),
                description: "scan".into(),
                evidence: Default::default(),
                window_start: Utc::now(),
                window_end: Utc::now(),
                window_size_seconds: 1,
            },
            explanation: get_fallback("port_scan"),
            enriched_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_persists_and_broadcasts() {
        let storage = Arc::new(Storage::open_in_memory().await.unwrap());
        let broadcaster = Arc::new(EventBroadcaster::new());
        let mut alerts_rx = broadcaster.subscribe_alerts();
        let input = Arc::new(BoundedQueue::new(10));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = tokio::spawn(run(
            Arc::clone(&storage),
            Arc::clone(&broadcaster),
            Arc::clone(&input),
            shutdown_rx,
        ));

        input.push(enriched("a-1"));
        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();

        let stored = storage.get_alert_by_id("a-1").await.unwrap().unwrap();
        assert!(stored.llm_explanation.is_some());

        let payload = alerts_rx.recv().await.unwrap();
        assert_eq!(payload["alert_id"], "a-1");
        assert!(payload["llm_explanation"]["fallback_used"].as_bool().unwrap());
    }
}
