//! Access Usage Description registry
//!
//! Groups flows by ACL key and accumulates per-class aggregate features.
//! The set of records is the device's learned communication profile; a key
//! seen for the first time is by definition a novel flow.

use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;
use serde::Serialize;

use crate::anomaly::{AnomalyEngine, Category};
use crate::capture::packet::Direction;
use crate::state::ConnectionTable;

/// Conversation class: who the device talks to, how, and on which service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct AclKey {
    pub ip_ver: u8,
    pub direction: Direction,
    pub proto: u8,
    pub addr: Ipv4Addr,
    pub svc_port: i32,
}

impl fmt::Display for AclKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ipv{} {} proto={} addr={} svc_port={}",
            self.ip_ver, self.direction, self.proto, self.addr, self.svc_port
        )
    }
}

/// Per-flow summaries accumulated for one ACL key
#[derive(Debug, Default)]
pub struct TimeSeriesAggregator {
    samples: u64,
    fwd_totals: Vec<u64>,
    rev_totals: Vec<u64>,
    peps: Vec<String>,
}

impl TimeSeriesAggregator {
    pub fn len(&self) -> u64 {
        self.samples
    }

    pub fn is_empty(&self) -> bool {
        self.samples == 0
    }

    /// Fold one completed flow into the aggregate
    pub fn add(&mut self, totals: (u64, u64), pep: String) {
        let (fwd, rev) = totals;
        self.fwd_totals.push(fwd);
        self.rev_totals.push(rev);
        self.peps.push(pep);
        self.samples += 1;
    }

    /// Histogram of packet exchange patterns
    pub fn pep_distribution(&self) -> HashMap<&str, usize> {
        let mut dist = HashMap::new();
        for pep in &self.peps {
            *dist.entry(pep.as_str()).or_insert(0) += 1;
        }
        dist
    }

    /// Whether the given pattern has been seen for this key before
    pub fn pep_known(&self, pep: &str) -> bool {
        self.peps.iter().any(|p| p == pep)
    }

    pub fn as_json(&self) -> serde_json::Value {
        let dist: HashMap<String, usize> = self
            .pep_distribution()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();

        serde_json::json!({
            "samples": self.samples,
            "pep_dist": dist,
            "total_bytes": {
                "fwd": self.fwd_totals,
                "rev": self.rev_totals,
            }
        })
    }
}

/// Learned state for one ACL key
pub struct AudRecord {
    last_updated_ns: u64,
    /// Remote AS label; resolution is an external concern, so records carry
    /// a placeholder until a resolver fills it in
    remote_as: Option<String>,
    flow_counter: u64,
    aggregator: TimeSeriesAggregator,
}

impl AudRecord {
    fn new() -> Self {
        Self {
            last_updated_ns: 0,
            remote_as: None,
            flow_counter: 0,
            aggregator: TimeSeriesAggregator::default(),
        }
    }

    pub fn aggregator(&self) -> &TimeSeriesAggregator {
        &self.aggregator
    }

    pub fn as_json(&self) -> serde_json::Value {
        serde_json::json!({
            "last_updated_ns": self.last_updated_ns,
            "remote_as": self.remote_as.as_deref().unwrap_or("unresolved"),
            "flow_counter": self.flow_counter,
            "aggregator": self.aggregator.as_json(),
        })
    }
}

/// Registry of AUD records keyed by ACL key
pub struct AudRegistry {
    records: HashMap<AclKey, AudRecord>,
    global_flow_counter: u64,
}

impl AudRegistry {
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
            global_flow_counter: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, key: &AclKey) -> bool {
        self.records.contains_key(key)
    }

    pub fn record(&self, key: &AclKey) -> Option<&AudRecord> {
        self.records.get(key)
    }

    /// One aggregation pass over the connection table.
    ///
    /// Allocates a record on first sight of an ACL key (the novel-flow
    /// trigger), hands new flows to the frequency detector, and folds
    /// completed flows into the per-key aggregate.
    pub fn update(
        &mut self,
        table: &mut ConnectionTable,
        engine: &mut AnomalyEngine,
        learning: bool,
        now_ns: u64,
    ) {
        for key in table.acl_keys() {
            if !self.records.contains_key(&key) {
                self.records.insert(key.clone(), AudRecord::new());
                engine.emit_novel(&key);

                for entry in table.flows_by_acl_key_mut(&key) {
                    if entry.category == Category::Undefined {
                        entry.category = Category::NovelFlow;
                    }
                }
            }

            let Some(record) = self.records.get_mut(&key) else { continue };

            for entry in table.flows_by_acl_key_mut(&key) {
                if entry.new {
                    self.global_flow_counter += 1;
                    record.flow_counter += 1;
                    engine.observe_new_flow(&key, entry.created_ns);
                    entry.new = false;
                }

                if entry.active(now_ns) {
                    // Partial flows never pollute the aggregate
                    continue;
                }

                let pep = entry.data.pep();

                if !learning && !record.aggregator.is_empty() && !record.aggregator.pep_known(&pep) {
                    engine.emit_pattern_mismatch(&key);
                    entry.category = Category::PatternMismatch;
                }

                record.aggregator.add(entry.data.total_bytes(), pep);
                record.last_updated_ns = now_ns;
                entry.marked_for_deletion = true;
            }
        }
    }

    /// Diagnostic dump with per-key prevalence
    pub fn as_json(&self) -> serde_json::Value {
        let records: Vec<_> = self
            .records
            .iter()
            .map(|(key, record)| {
                let prevalence = if self.global_flow_counter > 0 {
                    record.flow_counter as f64 / self.global_flow_counter as f64
                } else {
                    0.0
                };
                serde_json::json!({
                    "acl_key": key.to_string(),
                    "prevalence": prevalence,
                    "data": record.as_json(),
                })
            })
            .collect();

        serde_json::json!({
            "global_flow_counter": self.global_flow_counter,
            "aud_records": records,
        })
    }
}

impl Default for AudRegistry {
    fn default() -> Self {
        Self::new()
    }
}
