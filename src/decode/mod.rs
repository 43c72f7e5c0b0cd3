//! Frame decoding module
//!
//! Turns raw Ethernet frames into decoded packet records: Ethernet header,
//! IPv4 header, and TCP/UDP/ICMP transport headers.

pub mod ethernet;
pub mod ipv4;
pub mod transport;

use anyhow::Result;

use crate::capture::packet::{Direction, PacketRecord};
use crate::capture::socket::PacketType;

pub use ethernet::parse_ethernet;
pub use ipv4::parse_ipv4;
pub use transport::parse_transport;

/// Why a well-formed frame was not turned into a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Neither host-bound nor host-sent (broadcast, other-host, ...)
    PacketType,
    /// Non-IP ethertype (ARP, LLDP, ...)
    Ethertype(u16),
    /// IPv6 is identified but not decoded
    Ipv6,
    /// L4 protocol outside TCP/UDP/ICMP
    UnsupportedL4(u8),
}

/// Outcome of decoding one frame
#[derive(Debug)]
pub enum DecodeOutcome {
    Record(PacketRecord),
    Skipped(SkipReason),
}

/// Parse a complete frame from raw bytes.
///
/// Malformed headers are errors; frames the pipeline deliberately ignores
/// come back as `Skipped` with the reason.
pub fn parse_packet(ts_ns: u64, pkt_type: PacketType, data: &[u8]) -> Result<DecodeOutcome> {
    let direction = match pkt_type {
        PacketType::Host => Direction::Inbound,
        PacketType::Outgoing => Direction::Outbound,
        PacketType::Other => return Ok(DecodeOutcome::Skipped(SkipReason::PacketType)),
    };

    let (ethertype, offset) = ethernet::parse_ethernet(data)?;

    match ethertype {
        ethernet::ETHERTYPE_IPV4 => {}
        ethernet::ETHERTYPE_IPV6 => return Ok(DecodeOutcome::Skipped(SkipReason::Ipv6)),
        other => return Ok(DecodeOutcome::Skipped(SkipReason::Ethertype(other))),
    }

    let ip = ipv4::parse_ipv4(&data[offset..])?;

    let l4 = match transport::parse_transport(ip.protocol, &data[offset + ip.header_length..])? {
        Some(l4) => l4,
        None => return Ok(DecodeOutcome::Skipped(SkipReason::UnsupportedL4(ip.protocol))),
    };

    Ok(DecodeOutcome::Record(PacketRecord {
        ts_ns,
        direction,
        ip_ver: 4,
        proto: ip.protocol,
        src: ip.src_ip,
        dst: ip.dst_ip,
        length: ip.total_length,
        ttl: ip.ttl,
        l4,
    }))
}
