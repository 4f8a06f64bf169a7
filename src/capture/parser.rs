//! Raw frame decoding into `PacketMeta`.
//!
//! Runs on the capture thread - synchronous and fast, no I/O. The frame
//! bytes are released as soon as the metadata is extracted.
//!
//! Direction classification relative to the monitored network:
//!   - `outbound`: src is local, dst is not
//!   - `inbound`:  dst is local, src is not
//!   - `lateral`:  both local, or neither (transit / tunnelled traffic)

use std::net::IpAddr;

use anyhow::{Context, Result};
use chrono::Utc;
use etherparse::{NetSlice, SlicedPacket, TransportSlice};
use ipnetwork::IpNetwork;

use crate::model::{Direction, FlagLabel, PacketMeta, Protocol};

const DNS_PORT: u16 = 53;

/// Map the TCP flag bits onto a security-relevant label.
///
/// ACK is labelled only when it is the sole flag set; PSH/URG combinations
/// carry data and stay unlabelled.
fn label_tcp_flags(syn: bool, ack: bool, fin: bool, rst: bool, psh: bool, urg: bool) -> Option<FlagLabel> {
    if syn && ack {
        Some(FlagLabel::SynAck)
    } else if syn {
        Some(FlagLabel::Syn)
    } else if rst {
        Some(FlagLabel::Rst)
    } else if fin {
        Some(FlagLabel::Fin)
    } else if ack && !psh && !urg {
        Some(FlagLabel::Ack)
    } else {
        None
    }
}

fn classify_direction(src_ip: IpAddr, dst_ip: IpAddr, local_net: &IpNetwork) -> Direction {
    let src_local = local_net.contains(src_ip);
    let dst_local = local_net.contains(dst_ip);

    if src_local && dst_local {
        Direction::Lateral
    } else if src_local {
        Direction::Outbound
    } else if dst_local {
        Direction::Inbound
    } else {
        Direction::Lateral
    }
}

/// Parse a raw link-layer frame into a `PacketMeta`.
///
/// Returns `Ok(None)` for frames without an IPv4 layer (ARP, IPv6, raw
/// Ethernet) so the caller can count them separately from decode errors.
pub fn parse_frame(data: &[u8], local_net: &IpNetwork) -> Result<Option<PacketMeta>> {
    let sliced = SlicedPacket::from_ethernet(data).context("frame decode failed")?;

    let ipv4 = match &sliced.net {
        Some(NetSlice::Ipv4(ipv4)) => ipv4,
        _ => return Ok(None),
    };

    let header = ipv4.header();
    let src_ip = IpAddr::V4(header.source_addr());
    let dst_ip = IpAddr::V4(header.destination_addr());
    let ttl = header.ttl();

    let mut src_port: u16 = 0;
    let mut dst_port: u16 = 0;
    let mut flags: Option<FlagLabel> = None;
    let payload_size: u64;
    let protocol: Protocol;

    match &sliced.transport {
        Some(TransportSlice::Tcp(tcp)) => {
            src_port = tcp.source_port();
            dst_port = tcp.destination_port();
            flags = label_tcp_flags(tcp.syn(), tcp.ack(), tcp.fin(), tcp.rst(), tcp.psh(), tcp.urg());
            payload_size = tcp.payload().len() as u64;
            protocol = Protocol::Tcp;
        }
        Some(TransportSlice::Udp(udp)) => {
            src_port = udp.source_port();
            dst_port = udp.destination_port();
            payload_size = udp.payload().len() as u64;
            // Classify DNS before generic UDP
            protocol = if src_port == DNS_PORT || dst_port == DNS_PORT {
                Protocol::Dns
            } else {
                Protocol::Udp
            };
        }
        Some(TransportSlice::Icmpv4(icmp)) => {
            payload_size = icmp.payload().len() as u64;
            protocol = Protocol::Icmp;
        }
        _ => {
            payload_size = ipv4.payload().payload.len() as u64;
            protocol = Protocol::Other;
        }
    }

    let direction = classify_direction(src_ip, dst_ip, local_net);

    Ok(Some(PacketMeta {
        timestamp: Utc::now(),
        src_ip,
        dst_ip,
        src_port,
        dst_port,
        protocol,
        flags,
        payload_size,
        ttl,
        direction,
    }))
}
