//! Frequent-flow detection
//!
//! Counts new flows per frequency key over a sliding window. The key drops
//! the remote address so many peers hitting the same service collapse into
//! one counter.

use std::collections::HashMap;

use crate::aud::AclKey;
use crate::capture::packet::Direction;
use crate::clock::NANOS_PER_SEC;

/// Grouping key for rate-based detection: an ACL key minus the remote address
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FreqKey {
    pub ip_ver: u8,
    pub direction: Direction,
    pub proto: u8,
    pub svc_port: i32,
}

impl From<&AclKey> for FreqKey {
    fn from(key: &AclKey) -> Self {
        Self {
            ip_ver: key.ip_ver,
            direction: key.direction,
            proto: key.proto,
            svc_port: key.svc_port,
        }
    }
}

/// A counter that crossed the threshold
#[derive(Debug, Clone)]
pub struct FreqAlert {
    pub key: FreqKey,
    /// ACL key of the latest flow that fed the counter
    pub acl: AclKey,
    pub score: f64,
}

struct FreqCounter {
    created_ns: Vec<u64>,
    last_acl: AclKey,
}

/// Sliding-window flow-rate detector
pub struct FrequencyDetector {
    window_ns: u64,
    threshold: usize,
    counters: HashMap<FreqKey, FreqCounter>,
}

impl FrequencyDetector {
    pub fn new(window_secs: u64, threshold: usize) -> Self {
        Self {
            window_ns: window_secs * NANOS_PER_SEC,
            threshold,
            counters: HashMap::new(),
        }
    }

    /// Account one newly observed flow
    pub fn observe(&mut self, acl: &AclKey, created_ns: u64) {
        let counter = self
            .counters
            .entry(FreqKey::from(acl))
            .or_insert_with(|| FreqCounter {
                created_ns: Vec::new(),
                last_acl: acl.clone(),
            });

        counter.created_ns.push(created_ns);
        counter.last_acl = acl.clone();
    }

    /// Age out old data points and report every counter above threshold.
    /// Counters are not cleared on alert; their data points age out of the
    /// window naturally.
    pub fn evaluate(&mut self, now_ns: u64) -> Vec<FreqAlert> {
        let mut alerts = Vec::new();
        let horizon = now_ns.saturating_sub(self.window_ns);
        let threshold = self.threshold;

        self.counters.retain(|key, counter| {
            counter.created_ns.retain(|&ts| ts > horizon);

            if counter.created_ns.len() > threshold {
                let score = counter.created_ns.len() as f64 / threshold as f64;
                alerts.push(FreqAlert {
                    key: key.clone(),
                    acl: counter.last_acl.clone(),
                    score: round3(score),
                });
            }

            !counter.created_ns.is_empty()
        });

        alerts
    }

    pub fn tracked_keys(&self) -> usize {
        self.counters.len()
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
