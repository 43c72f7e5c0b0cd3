//! Decoded packet records emitted by the reader

use std::fmt;
use std::net::Ipv4Addr;
use serde::{Deserialize, Serialize};

/// Port value for L4 protocols without port numbers (ICMP, IGMP)
pub const NO_PORT: i32 = -1;

/// Capture direction, derived from the link-layer packet type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Host-bound (PACKET_HOST)
    Inbound,
    /// Host-sent (PACKET_OUTGOING)
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Inbound => write!(f, "inbound"),
            Direction::Outbound => write!(f, "outbound"),
        }
    }
}

/// TCP flags
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct TcpFlags {
    pub fin: bool,
    pub syn: bool,
    pub rst: bool,
    pub psh: bool,
    pub ack: bool,
    pub urg: bool,
}

impl TcpFlags {
    /// Parse TCP flags from the flags byte
    pub fn from_byte(flags: u8) -> Self {
        Self {
            fin: flags & 0x01 != 0,
            syn: flags & 0x02 != 0,
            rst: flags & 0x04 != 0,
            psh: flags & 0x08 != 0,
            ack: flags & 0x10 != 0,
            urg: flags & 0x20 != 0,
        }
    }

    /// Convert flags back to a byte
    pub fn to_byte(&self) -> u8 {
        let mut flags = 0u8;
        if self.fin { flags |= 0x01; }
        if self.syn { flags |= 0x02; }
        if self.rst { flags |= 0x04; }
        if self.psh { flags |= 0x08; }
        if self.ack { flags |= 0x10; }
        if self.urg { flags |= 0x20; }
        flags
    }

    /// Check if this is a SYN-only packet (connection initiation)
    pub fn is_syn_only(&self) -> bool {
        self.syn && !self.ack
    }
}

impl fmt::Display for TcpFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut flags = String::new();
        if self.syn { flags.push('S'); }
        if self.ack { flags.push('A'); }
        if self.fin { flags.push('F'); }
        if self.rst { flags.push('R'); }
        if self.psh { flags.push('P'); }
        if self.urg { flags.push('U'); }
        if flags.is_empty() {
            flags.push_str("none");
        }
        write!(f, "[{}]", flags)
    }
}

/// Transport header, tagged by IP protocol
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum L4Header {
    Tcp { src_port: u16, dst_port: u16, flags: TcpFlags },
    Udp { src_port: u16, dst_port: u16, length: u16 },
    Icmp { msg_type: u8, code: u8 },
    Other,
}

impl L4Header {
    /// Source port, or the sentinel for portless protocols
    pub fn src_port(&self) -> i32 {
        match self {
            L4Header::Tcp { src_port, .. } | L4Header::Udp { src_port, .. } => *src_port as i32,
            _ => NO_PORT,
        }
    }

    /// Destination port, or the sentinel for portless protocols
    pub fn dst_port(&self) -> i32 {
        match self {
            L4Header::Tcp { dst_port, .. } | L4Header::Udp { dst_port, .. } => *dst_port as i32,
            _ => NO_PORT,
        }
    }

    pub fn tcp_flags(&self) -> Option<TcpFlags> {
        match self {
            L4Header::Tcp { flags, .. } => Some(*flags),
            _ => None,
        }
    }

    /// Idle timeout for a flow of this transport, in seconds
    pub fn idle_timeout_secs(&self) -> u64 {
        match self {
            L4Header::Tcp { .. } => 600,
            L4Header::Udp { .. } => 120,
            L4Header::Icmp { .. } => 30,
            L4Header::Other => 60,
        }
    }
}

/// Decoded packet record, emitted by the reader into the packet queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketRecord {
    /// Monotonic capture timestamp (nanoseconds)
    pub ts_ns: u64,

    /// Capture direction
    pub direction: Direction,

    /// IP version (4; 6 is identified but not decoded)
    pub ip_ver: u8,

    /// IP protocol number (6 = TCP, 17 = UDP, 1 = ICMP, etc.)
    pub proto: u8,

    /// Source address
    pub src: Ipv4Addr,

    /// Destination address
    pub dst: Ipv4Addr,

    /// Total IP packet length in bytes
    pub length: u16,

    /// Time To Live
    pub ttl: u8,

    /// Transport header
    pub l4: L4Header,
}

/// Map an IP protocol number to its name
pub fn l4proto_name(proto: u8) -> &'static str {
    match proto {
        1 => "ICMP",
        2 => "IGMP",
        6 => "TCP",
        17 => "UDP",
        _ => "Unknown",
    }
}
