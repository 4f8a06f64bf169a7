//! In-process broadcast sink for live events.
//!
//! Three logical channels - `alerts`, `flows`, `stats` - that an API or
//! WebSocket layer subscribes to. Lagging subscribers lose the oldest
//! messages, mirroring the pipeline's drop-oldest overload policy; the
//! pipeline itself never blocks on a slow reader.

use serde_json::Value;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

/// Fan-out hub for enriched alerts, flow snapshots, and stats ticks.
#[derive(Debug)]
pub struct EventBroadcaster {
    alerts: broadcast::Sender<Value>,
    flows: broadcast::Sender<Value>,
    stats: broadcast::Sender<Value>,
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBroadcaster {
    pub fn new() -> Self {
        let (alerts, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (flows, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (stats, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { alerts, flows, stats }
    }

    /// Publish one enriched alert. Returns how many subscribers saw it.
    pub fn publish_alert(&self, payload: Value) -> usize {
        self.alerts.send(payload).unwrap_or(0)
    }

    pub fn publish_flows(&self, payload: Value) -> usize {
        self.flows.send(payload).unwrap_or(0)
    }

    pub fn publish_stats(&self, payload: Value) -> usize {
        self.stats.send(payload).unwrap_or(0)
    }

    pub fn subscribe_alerts(&self) -> broadcast::Receiver<Value> {
        self.alerts.subscribe()
    }

    pub fn subscribe_flows(&self) -> broadcast::Receiver<Value> {
        self.flows.subscribe()
    }

    pub fn subscribe_stats(&self) -> broadcast::Receiver<Value> {
        self.stats.subscribe()
    }

    pub fn alert_subscriber_count(&self) -> usize {
        self.alerts.receiver_count()
    }

    pub fn flow_subscriber_count(&self) -> usize {
        self.flows.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_subscribers_receive_published_events() {
        let hub = EventBroadcaster::new();
        let mut alerts = hub.subscribe_alerts();

        let seen = hub.publish_alert(json!({"rule_name": "port_scan"}));
        assert_eq!(seen, 1);

        let received = alerts.recv().await.unwrap();
        assert_eq!(received["rule_name"], "port_scan");
    }

    #[test]
    fn test_publish_without_subscribers_is_fine() {
        let hub = EventBroadcaster::new();
        assert_eq!(hub.publish_stats(json!({"packets_seen": 1})), 0);
    }

    #[tokio::test]
    async fn test_channels_are_independent() {
        let hub = EventBroadcaster::new();
        let mut flows = hub.subscribe_flows();

        hub.publish_alert(json!({"x": 1}));
        hub.publish_flows(json!({"flows": []}));

        let received = flows.recv().await.unwrap();
        assert!(received.get("flows").is_some());
    }
}
