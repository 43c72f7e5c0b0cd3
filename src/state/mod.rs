//! Connection table
//!
//! Owns all live flow state. Written only by the controller task: packets
//! are appended as they drain from the queue, and idle flows are evicted
//! on the periodic tick.

pub mod conn;
pub mod series;

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use tracing::trace;

use crate::aud::AclKey;
use crate::capture::packet::PacketRecord;

pub use conn::{ConnEntry, ConnKey};
pub use series::{Bucket, TimeSeries, OPENING_SAMPLES};

type FlowId = u64;

/// Table statistics
#[derive(Debug, Clone, Copy, Default)]
pub struct TableStats {
    /// Packets appended to a flow
    pub recorded: u64,
    /// Packets dropped by the loopback/local/self filters
    pub filtered: u64,
    /// Aborted record operations (lookup invariant violated)
    pub record_errors: u64,
}

/// Live flow table keyed by canonical 5-tuple
pub struct ConnectionTable {
    local_ips: HashSet<Ipv4Addr>,
    lookup: HashMap<ConnKey, FlowId>,
    flows: HashMap<FlowId, ConnEntry>,
    next_id: FlowId,
    stats: TableStats,
}

impl ConnectionTable {
    pub fn new(local_ips: HashSet<Ipv4Addr>) -> Self {
        Self {
            local_ips,
            lookup: HashMap::new(),
            flows: HashMap::new(),
            next_id: 0,
            stats: TableStats::default(),
        }
    }

    pub fn local_ips(&self) -> &HashSet<Ipv4Addr> {
        &self.local_ips
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    pub fn stats(&self) -> TableStats {
        self.stats
    }

    /// Record one packet: filter, find or create the flow, append the sample.
    pub fn record(&mut self, pkt: &PacketRecord) {
        if pkt.src.is_loopback() || pkt.dst.is_loopback() || pkt.src == pkt.dst {
            self.stats.filtered += 1;
            return;
        }

        if !(self.local_ips.contains(&pkt.src) || self.local_ips.contains(&pkt.dst)) {
            self.stats.filtered += 1;
            return;
        }

        let key = ConnKey::from_packet(pkt);

        let id = match self.lookup.get(&key) {
            Some(&id) => id,
            None => {
                let id = self.next_id;
                self.next_id += 1;
                self.flows.insert(id, ConnEntry::new(key.clone(), pkt));
                self.lookup.insert(key, id);
                trace!("New flow {}", self.flows[&id].key);
                id
            }
        };

        // Presence was just established; a miss here is an invariant
        // violation, so the record operation is aborted and counted.
        let Some(entry) = self.flows.get_mut(&id) else {
            self.stats.record_errors += 1;
            return;
        };

        entry.append(pkt);
        self.stats.recorded += 1;
    }

    /// Evict idle flows from the lookup, then drop all entries the
    /// aggregation pass marked for deletion.
    pub fn trim(&mut self, now_ns: u64) {
        let flows = &self.flows;
        self.lookup
            .retain(|_, id| flows.get(id).is_some_and(|entry| entry.active(now_ns)));

        self.flows.retain(|_, entry| !entry.marked_for_deletion);
    }

    /// ACL keys of all current flows
    pub fn acl_keys(&self) -> HashSet<AclKey> {
        self.flows
            .values()
            .filter(|entry| entry.key.addr_a != entry.key.addr_b)
            .map(|entry| entry.acl_key())
            .collect()
    }

    /// Flows belonging to one ACL key
    pub fn flows_by_acl_key<'a>(&'a self, key: &'a AclKey) -> impl Iterator<Item = &'a ConnEntry> {
        self.flows.values().filter(move |entry| entry.acl_key() == *key)
    }

    /// Mutable variant used by the aggregation pass
    pub fn flows_by_acl_key_mut<'a>(
        &'a mut self,
        key: &'a AclKey,
    ) -> impl Iterator<Item = &'a mut ConnEntry> {
        self.flows.values_mut().filter(move |entry| entry.acl_key() == *key)
    }

    /// Diagnostic dump of all flows
    pub fn summary(&self, now_ns: u64) -> serde_json::Value {
        let conns: Vec<_> = self.flows.values().map(|entry| entry.summary(now_ns)).collect();
        serde_json::json!({
            "count": conns.len(),
            "conns": conns,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::packet::{Direction, L4Header, PacketRecord, TcpFlags};
    use crate::clock::NANOS_PER_SEC;

    fn local() -> Ipv4Addr {
        Ipv4Addr::new(192, 168, 1, 10)
    }

    fn table() -> ConnectionTable {
        ConnectionTable::new(HashSet::from([local()]))
    }

    fn tcp_packet(
        direction: Direction,
        src: Ipv4Addr,
        dst: Ipv4Addr,
        sport: u16,
        dport: u16,
        ts_ns: u64,
    ) -> PacketRecord {
        PacketRecord {
            ts_ns,
            direction,
            ip_ver: 4,
            proto: 6,
            src,
            dst,
            length: 60,
            ttl: 64,
            l4: L4Header::Tcp { src_port: sport, dst_port: dport, flags: TcpFlags::default() },
        }
    }

    fn udp_packet(
        direction: Direction,
        src: Ipv4Addr,
        dst: Ipv4Addr,
        sport: u16,
        dport: u16,
        ts_ns: u64,
    ) -> PacketRecord {
        PacketRecord {
            ts_ns,
            direction,
            ip_ver: 4,
            proto: 17,
            src,
            dst,
            length: 76,
            ttl: 64,
            l4: L4Header::Udp { src_port: sport, dst_port: dport, length: 56 },
        }
    }

    #[test]
    fn test_both_directions_share_one_entry() {
        let mut table = table();
        let remote = Ipv4Addr::new(10, 0, 0, 5);

        table.record(&tcp_packet(Direction::Outbound, local(), remote, 12345, 443, 1000));
        table.record(&tcp_packet(Direction::Inbound, remote, local(), 443, 12345, 2000));

        assert_eq!(table.len(), 1);
        assert_eq!(table.stats().recorded, 2);
    }

    #[test]
    fn test_filters() {
        let mut table = table();
        let remote = Ipv4Addr::new(10, 0, 0, 5);
        let other = Ipv4Addr::new(10, 0, 0, 6);
        let loopback = Ipv4Addr::new(127, 0, 0, 1);

        // Loopback
        table.record(&tcp_packet(Direction::Outbound, loopback, remote, 1000, 80, 0));
        // Self-to-self
        table.record(&tcp_packet(Direction::Outbound, local(), local(), 1000, 80, 0));
        // Neither endpoint local
        table.record(&tcp_packet(Direction::Outbound, remote, other, 1000, 80, 0));

        assert!(table.is_empty());
        assert_eq!(table.stats().filtered, 3);
    }

    #[test]
    fn test_idle_eviction() {
        let mut table = table();
        let remote = Ipv4Addr::new(10, 0, 0, 5);

        table.record(&udp_packet(Direction::Outbound, local(), remote, 40000, 53, 0));
        assert_eq!(table.len(), 1);

        // 125 s later the UDP entry (120 s timeout) is no longer active
        let now = 125 * NANOS_PER_SEC;
        table.trim(now);

        // Gone from the lookup: a new packet creates a fresh flow
        table.record(&udp_packet(Direction::Outbound, local(), remote, 40000, 53, now));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_trim_drops_marked_entries() {
        let mut table = table();
        let remote = Ipv4Addr::new(10, 0, 0, 5);

        table.record(&udp_packet(Direction::Outbound, local(), remote, 40000, 53, 0));

        for entry in table.flows.values_mut() {
            entry.marked_for_deletion = true;
        }

        table.trim(0);
        assert!(table.is_empty());
        assert!(table.lookup.is_empty());
    }

    #[test]
    fn test_lookup_active_after_trim() {
        let mut table = table();
        let remote = Ipv4Addr::new(10, 0, 0, 5);

        table.record(&udp_packet(Direction::Outbound, local(), remote, 40000, 53, 0));
        table.record(&tcp_packet(Direction::Outbound, local(), remote, 50000, 443, 0));

        let now = 125 * NANOS_PER_SEC;
        table.trim(now);

        // UDP timed out, TCP (600 s) survives in the lookup
        for id in table.lookup.values() {
            assert!(table.flows[id].active(now));
        }
        assert_eq!(table.lookup.len(), 1);
    }

    #[test]
    fn test_acl_keys() {
        let mut table = table();

        table.record(&tcp_packet(Direction::Outbound, local(), Ipv4Addr::new(10, 0, 0, 5), 50000, 443, 0));
        table.record(&tcp_packet(Direction::Outbound, local(), Ipv4Addr::new(10, 0, 0, 6), 50001, 443, 0));

        let keys = table.acl_keys();
        assert_eq!(keys.len(), 2);

        for key in &keys {
            assert_eq!(table.flows_by_acl_key(key).count(), 1);
        }
    }
}
