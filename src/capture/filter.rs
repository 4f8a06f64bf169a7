//! BPF (Berkeley Packet Filter) expression builder.
//!
//! The expression is compiled and installed at kernel level by the capture
//! handle, so rejected frames never cross into userland - the first and
//! cheapest line of filtering.

use tracing::{debug, warn};

/// Protocol keywords libpcap understands.
const VALID_PROTOCOLS: &[&str] = &["tcp", "udp", "icmp", "arp", "ip", "ip6", "dns"];

/// Build a BPF filter string from high-level options.
///
/// When `protocols` is non-empty only those protocols are captured,
/// otherwise `base` is used (default `ip`). Hosts in `exclude_ips` are
/// excluded with a trailing `and not (host …)` clause.
///
/// ```
/// use netwatch::capture::filter::build_bpf_filter;
///
/// assert_eq!(build_bpf_filter(&[], &[], "ip"), "ip");
/// assert_eq!(
///     build_bpf_filter(&["tcp".into(), "udp".into()], &[], "ip"),
///     "(tcp or udp)"
/// );
/// assert_eq!(
///     build_bpf_filter(&[], &["10.0.0.1".into()], "ip"),
///     "ip and not (host 10.0.0.1)"
/// );
/// ```
pub fn build_bpf_filter(protocols: &[String], exclude_ips: &[String], base: &str) -> String {
    let mut parts: Vec<String> = Vec::new();

    if !protocols.is_empty() {
        let mut validated: Vec<String> = Vec::new();
        for proto in protocols {
            let lower = proto.to_lowercase();
            if !VALID_PROTOCOLS.contains(&lower.as_str()) {
                warn!(protocol = %proto, "unknown protocol for BPF filter, skipping");
                continue;
            }
            // libpcap has no 'dns' keyword; match on port 53 instead
            if lower == "dns" {
                validated.push("port 53".to_string());
            } else {
                validated.push(lower);
            }
        }
        if !validated.is_empty() {
            parts.push(format!("({})", validated.join(" or ")));
        }
    } else {
        parts.push(base.to_string());
    }

    if !exclude_ips.is_empty() {
        let hosts: Vec<String> = exclude_ips.iter().map(|ip| format!("host {ip}")).collect();
        parts.push(format!("not ({})", hosts.join(" or ")));
    }

    let bpf = if parts.is_empty() {
        base.to_string()
    } else {
        parts.join(" and ")
    };
    debug!(filter = %bpf, "built BPF filter");
    bpf
}
