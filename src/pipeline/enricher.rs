//! Enrichment consumer: alert queue -> LLM client -> enriched queue.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::info;

use crate::engine::Alert;
use crate::llm::{get_fallback, LlmClient, LlmExplanation};

use super::detector::AlertJob;
use super::queue::BoundedQueue;

const RECV_TIMEOUT: Duration = Duration::from_millis(500);

/// Alert plus its explanation, ready for persistence and broadcast.
#[derive(Debug, Clone)]
pub struct EnrichedAlert {
    pub alert: Alert,
    pub explanation: LlmExplanation,
    pub enriched_at: DateTime<Utc>,
}

/// Enrich alerts until shutdown.
///
/// When enrichment is disabled every alert gets its rule fallback
/// instantly; either way alerts are never delayed beyond the model
/// client's hard deadline and never dropped for an enrichment failure.
pub async fn run(
    mut client: LlmClient,
    llm_enabled: bool,
    input: Arc<BoundedQueue<AlertJob>>,
    output: Arc<BoundedQueue<EnrichedAlert>>,
    mut shutdown: broadcast::Receiver<()>,
) {
    info!(enabled = llm_enabled, "enrichment consumer started");
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            job = input.recv_timeout(RECV_TIMEOUT) => {
                let Some(job) = job else { continue };
                let explanation = if llm_enabled {
                    client.explain(&job.alert, &job.context).await
                } else {
                    get_fallback(&job.alert.rule_name)
                };
                output.push(EnrichedAlert {
                    alert: job.alert,
                    explanation,
                    enriched_at: Utc::now(),
                });
            }
        }
    }
    info!("enrichment consumer exiting");
}
