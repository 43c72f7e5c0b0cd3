//! Connection keys and entries

use std::fmt;
use std::net::Ipv4Addr;
use serde::Serialize;

use crate::anomaly::Category;
use crate::aud::AclKey;
use crate::capture::packet::{Direction, PacketRecord};
use crate::clock::NANOS_PER_SEC;
use super::series::{TimeSeries, DIR_FWD, DIR_REV};

/// Canonical 5-tuple identifying a bidirectional flow.
///
/// The endpoint with the higher port number takes the A-slot; on equal
/// ports the greater address does. Both directions of a conversation
/// therefore map to the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ConnKey {
    pub proto: u8,
    pub addr_a: Ipv4Addr,
    pub addr_b: Ipv4Addr,
    pub port_a: i32,
    pub port_b: i32,
}

impl ConnKey {
    /// Build the canonical key for a (src, dst) endpoint pair
    pub fn canonical(proto: u8, src: Ipv4Addr, dst: Ipv4Addr, sport: i32, dport: i32) -> Self {
        let swap = match sport.cmp(&dport) {
            std::cmp::Ordering::Less => true,
            std::cmp::Ordering::Greater => false,
            std::cmp::Ordering::Equal => src < dst,
        };

        if swap {
            Self { proto, addr_a: dst, addr_b: src, port_a: dport, port_b: sport }
        } else {
            Self { proto, addr_a: src, addr_b: dst, port_a: sport, port_b: dport }
        }
    }

    /// Key for a decoded packet
    pub fn from_packet(pkt: &PacketRecord) -> Self {
        Self::canonical(pkt.proto, pkt.src, pkt.dst, pkt.l4.src_port(), pkt.l4.dst_port())
    }
}

impl fmt::Display for ConnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} <-> {}:{} [proto {}]",
            self.addr_a, self.port_a, self.addr_b, self.port_b, self.proto
        )
    }
}

/// One live bidirectional flow
#[derive(Debug, Clone)]
pub struct ConnEntry {
    pub key: ConnKey,
    pub created_ns: u64,
    pub last_updated_ns: u64,

    /// Idle timeout, fixed at creation from the transport
    pub timeout_secs: u64,

    /// Direction of the first observed packet
    pub acl_direction: Direction,
    /// Remote endpoint address
    pub acl_addr: Ipv4Addr,
    /// This host's address in the flow
    pub local_ip: Ipv4Addr,
    /// Destination port of the first observed packet
    pub svc_port: i32,
    pub ip_ver: u8,

    /// True until the flow has been seen by the detectors
    pub new: bool,
    pub marked_for_deletion: bool,

    pub data: TimeSeries,
    pub category: Category,
}

impl ConnEntry {
    /// Create an entry from the flow's first packet. Direction attribution,
    /// timeout, and local address are assigned here and never change.
    pub fn new(key: ConnKey, pkt: &PacketRecord) -> Self {
        let (acl_addr, local_ip) = match pkt.direction {
            Direction::Inbound => (pkt.src, pkt.dst),
            Direction::Outbound => (pkt.dst, pkt.src),
        };

        Self {
            key,
            created_ns: pkt.ts_ns,
            last_updated_ns: pkt.ts_ns,
            timeout_secs: pkt.l4.idle_timeout_secs(),
            acl_direction: pkt.direction,
            acl_addr,
            local_ip,
            svc_port: pkt.l4.dst_port(),
            ip_ver: pkt.ip_ver,
            new: true,
            marked_for_deletion: false,
            data: TimeSeries::new(pkt.ts_ns),
            category: Category::Undefined,
        }
    }

    /// Whether the flow has seen traffic within its idle timeout
    pub fn active(&self, now_ns: u64) -> bool {
        now_ns.saturating_sub(self.last_updated_ns) < self.timeout_secs * NANOS_PER_SEC
    }

    /// Append one packet sample
    pub fn append(&mut self, pkt: &PacketRecord) {
        let direction = if pkt.direction == self.acl_direction { DIR_FWD } else { DIR_REV };
        self.data.add(pkt.ts_ns, pkt.length, direction);
        self.last_updated_ns = pkt.ts_ns;
    }

    /// The conversation class this flow belongs to
    pub fn acl_key(&self) -> AclKey {
        AclKey {
            ip_ver: self.ip_ver,
            direction: self.acl_direction,
            proto: self.key.proto,
            addr: self.acl_addr,
            svc_port: self.svc_port,
        }
    }

    /// Diagnostic summary
    pub fn summary(&self, now_ns: u64) -> serde_json::Value {
        serde_json::json!({
            "key": self.key.to_string(),
            "created_ns": self.created_ns,
            "acl_direction": self.acl_direction.to_string(),
            "category": self.category.to_string(),
            "active": self.active(now_ns),
            "samples": self.data.len(),
        })
    }
}
