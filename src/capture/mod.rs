//! Packet capture: kernel filter, frame decoding, capture thread.

pub mod filter;
pub mod parser;
pub mod sniffer;

pub use filter::build_bpf_filter;
pub use parser::parse_frame;
pub use sniffer::PacketCapture;
