//! Shared data types for every stage of the pipeline.
//!
//! Defining the inter-stage contracts in one place keeps the capture,
//! aggregation, detection, and enrichment layers decoupled from each other.

use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Transport protocol classification of a captured packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Tcp,
    Udp,
    /// UDP traffic on port 53 (either side), classified before generic UDP.
    Dns,
    Icmp,
    Other,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
            Protocol::Dns => "DNS",
            Protocol::Icmp => "ICMP",
            Protocol::Other => "OTHER",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Human-readable label for the security-relevant TCP flag combinations.
///
/// ACK is labelled only when it is the sole flag set; combinations carrying
/// data (PSH, URG) are left unlabelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FlagLabel {
    #[serde(rename = "SYN")]
    Syn,
    #[serde(rename = "SYN-ACK")]
    SynAck,
    #[serde(rename = "ACK")]
    Ack,
    #[serde(rename = "FIN")]
    Fin,
    #[serde(rename = "RST")]
    Rst,
}

impl FlagLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlagLabel::Syn => "SYN",
            FlagLabel::SynAck => "SYN-ACK",
            FlagLabel::Ack => "ACK",
            FlagLabel::Fin => "FIN",
            FlagLabel::Rst => "RST",
        }
    }
}

impl fmt::Display for FlagLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Traffic direction relative to the monitored network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
    Lateral,
}

/// Parsed representation of a single captured packet.
///
/// Produced by the capture thread, consumed by the aggregator. The raw frame
/// is released as soon as this is built - nothing downstream holds packet
/// payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketMeta {
    /// Wall-clock capture timestamp.
    pub timestamp: DateTime<Utc>,
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    /// Source port, 0 for ICMP.
    pub src_port: u16,
    /// Destination port, 0 for ICMP.
    pub dst_port: u16,
    pub protocol: Protocol,
    /// TCP flag label, `None` for non-TCP or unlabelled combinations.
    pub flags: Option<FlagLabel>,
    /// Layer-4 payload in bytes.
    pub payload_size: u64,
    pub ttl: u8,
    pub direction: Direction,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_labels() {
        assert_eq!(Protocol::Tcp.as_str(), "TCP");
        assert_eq!(Protocol::Dns.to_string(), "DNS");
        assert_eq!(
            serde_json::to_string(&Protocol::Other).unwrap(),
            "\"OTHER\""
        );
    }

    #[test]
    fn test_flag_label_serialization() {
        assert_eq!(
            serde_json::to_string(&FlagLabel::SynAck).unwrap(),
            "\"SYN-ACK\""
        );
        let parsed: FlagLabel = serde_json::from_str("\"SYN\"").unwrap();
        assert_eq!(parsed, FlagLabel::Syn);
    }

    #[test]
    fn test_direction_serialization() {
        assert_eq!(
            serde_json::to_string(&Direction::Lateral).unwrap(),
            "\"lateral\""
        );
    }
}
