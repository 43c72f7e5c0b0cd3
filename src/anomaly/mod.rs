//! Anomaly engine
//!
//! Holds the detectors and the bounded ring of recent anomalies. Novel
//! flows are reported by the registry on first sight of an ACL key; the
//! frequency detector runs on every controller tick.

pub mod freq;

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::aud::AclKey;
use crate::capture::packet::{l4proto_name, Direction};
use crate::config::DetectorConfig;
use crate::notify::NotifyLog;

pub use freq::{FreqAlert, FreqKey, FrequencyDetector};

/// Anomaly category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Category {
    Undefined,
    NovelFlow,
    FrequentFlow,
    PatternMismatch,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Category::Undefined => "Undefined",
            Category::NovelFlow => "NovelFlow",
            Category::FrequentFlow => "FrequentFlow",
            Category::PatternMismatch => "PatternMismatch",
        };
        write!(f, "{}", name)
    }
}

/// Anomaly severity. No assignment policy is defined yet, so emitted
/// anomalies carry `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    Unknown,
    Benign,
    Suspicious,
    Alarming,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Unknown => "Unknown",
            Severity::Benign => "Benign",
            Severity::Suspicious => "Suspicious",
            Severity::Alarming => "Alarming",
        };
        write!(f, "{}", name)
    }
}

/// One emitted anomaly
#[derive(Debug, Clone)]
pub struct Anomaly {
    pub uuid: Uuid,
    pub time: DateTime<Utc>,
    pub category: Category,
    pub severity: Severity,
    pub score: f64,
    /// ACL key of the originating flow
    pub acl: AclKey,
}

impl Anomaly {
    pub fn new(category: Category, score: f64, acl: AclKey) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            time: Utc::now(),
            category,
            severity: Severity::Unknown,
            score,
            acl,
        }
    }

    /// JSON form used in the publish envelope and the status snapshot
    pub fn as_json(&self) -> serde_json::Value {
        let proto = if self.acl.svc_port >= 0 {
            format!("{}:{}", l4proto_name(self.acl.proto), self.acl.svc_port)
        } else {
            l4proto_name(self.acl.proto).to_string()
        };

        serde_json::json!({
            "uuid": self.uuid.to_string(),
            "time": self.time.format("%Y-%m-%d %H:%M:%S").to_string(),
            "category": self.category.to_string(),
            "severity": self.severity.to_string(),
            "score": format!("{:.3}", self.score),
            "details": {
                "direction": self.acl.direction.to_string(),
                "proto": proto,
                "addr": self.acl.addr.to_string(),
                "ip_ver": self.acl.ip_ver,
            }
        })
    }
}

/// Classified errors for the mark-benign control operation
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("anomaly UUID not found")]
    NotFound,
    #[error("malformed anomaly UUID: {0}")]
    MalformedUuid(#[from] uuid::Error),
}

/// Bounded FIFO of recent anomalies, shared with the control surface
pub struct AnomalyRing {
    anomalies: VecDeque<Anomaly>,
    capacity: usize,
}

impl AnomalyRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            anomalies: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append, evicting the oldest entry when full
    pub fn push(&mut self, anomaly: Anomaly) {
        if self.anomalies.len() == self.capacity {
            self.anomalies.pop_front();
        }
        self.anomalies.push_back(anomaly);
    }

    pub fn len(&self) -> usize {
        self.anomalies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anomalies.is_empty()
    }

    /// JSON snapshot for `/status`
    pub fn snapshot(&self) -> Vec<serde_json::Value> {
        self.anomalies.iter().map(Anomaly::as_json).collect()
    }

    /// Remove one anomaly by UUID, or everything for the literal `all`
    pub fn mark_benign(&mut self, target: &str) -> Result<(), ControlError> {
        if target == "all" {
            self.anomalies.clear();
            return Ok(());
        }

        let uuid = Uuid::parse_str(target)?;

        match self.anomalies.iter().position(|a| a.uuid == uuid) {
            Some(idx) => {
                self.anomalies.remove(idx);
                Ok(())
            }
            None => Err(ControlError::NotFound),
        }
    }
}

/// Detector front end: owns the frequency detector, writes the ring, and
/// forwards every emitted anomaly to the publisher.
pub struct AnomalyEngine {
    ring: Arc<Mutex<AnomalyRing>>,
    freq: FrequencyDetector,
    publish_tx: Option<mpsc::Sender<Anomaly>>,
    notify: NotifyLog,
}

impl AnomalyEngine {
    pub fn new(
        config: &DetectorConfig,
        ring: Arc<Mutex<AnomalyRing>>,
        publish_tx: Option<mpsc::Sender<Anomaly>>,
        notify: NotifyLog,
    ) -> Self {
        Self {
            ring,
            freq: FrequencyDetector::new(config.freq_window_secs, config.freq_threshold),
            publish_tx,
            notify,
        }
    }

    pub fn ring(&self) -> Arc<Mutex<AnomalyRing>> {
        Arc::clone(&self.ring)
    }

    /// Feed one newly observed flow into the frequency detector
    pub fn observe_new_flow(&mut self, acl: &AclKey, created_ns: u64) {
        self.freq.observe(acl, created_ns);
    }

    /// Report the first sighting of an ACL key
    pub fn emit_novel(&mut self, acl: &AclKey) {
        let (a, b) = match acl.direction {
            Direction::Outbound => ("FROM", "to"),
            Direction::Inbound => ("TO", "from"),
        };
        self.notify.notify(&format!(
            "Unknown flow {} device {} {}, svc_port={}, protocol={} --> Queued for anomaly verdict",
            a, b, acl.addr, acl.svc_port, l4proto_name(acl.proto)
        ));

        self.emit(Anomaly::new(Category::NovelFlow, 0.0, acl.clone()));
    }

    /// Report a completed flow whose exchange pattern has no prior weight
    pub fn emit_pattern_mismatch(&mut self, acl: &AclKey) {
        self.emit(Anomaly::new(Category::PatternMismatch, 1.0, acl.clone()));
    }

    /// Run the frequency detector pass
    pub fn evaluate(&mut self, now_ns: u64) {
        for alert in self.freq.evaluate(now_ns) {
            debug!(
                "Frequent flow: proto={} svc_port={} score={}",
                l4proto_name(alert.key.proto),
                alert.key.svc_port,
                alert.score
            );
            self.emit(Anomaly::new(Category::FrequentFlow, alert.score, alert.acl));
        }
    }

    fn emit(&self, anomaly: Anomaly) {
        if let Some(tx) = &self.publish_tx {
            if tx.try_send(anomaly.clone()).is_err() {
                debug!("Publish channel full, anomaly not forwarded");
            }
        }

        self.ring.lock().push(anomaly);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::packet::Direction;
    use std::net::Ipv4Addr;

    fn acl(last_octet: u8) -> AclKey {
        AclKey {
            ip_ver: 4,
            direction: Direction::Outbound,
            proto: 6,
            addr: Ipv4Addr::new(10, 0, 0, last_octet),
            svc_port: 443,
        }
    }

    fn engine(ring_capacity: usize) -> AnomalyEngine {
        let config = DetectorConfig {
            freq_window_secs: 30,
            freq_threshold: 30,
            ring_capacity,
        };
        let ring = Arc::new(Mutex::new(AnomalyRing::new(ring_capacity)));
        AnomalyEngine::new(&config, ring, None, NotifyLog::new())
    }

    #[test]
    fn test_anomaly_json_shape() {
        let anomaly = Anomaly::new(Category::FrequentFlow, 1.0333, acl(5));
        let json = anomaly.as_json();

        assert_eq!(json["category"], "FrequentFlow");
        assert_eq!(json["severity"], "Unknown");
        assert_eq!(json["score"], "1.033");
        assert_eq!(json["details"]["proto"], "TCP:443");
        assert_eq!(json["details"]["addr"], "10.0.0.5");
        assert_eq!(json["details"]["direction"], "outbound");
        assert_eq!(json["details"]["ip_ver"], 4);
    }

    #[test]
    fn test_ring_eviction() {
        let mut ring = AnomalyRing::new(100);
        for i in 0..150 {
            ring.push(Anomaly::new(Category::NovelFlow, 0.0, acl((i % 256) as u8)));
        }

        assert_eq!(ring.len(), 100);
    }

    #[test]
    fn test_mark_benign() {
        let mut ring = AnomalyRing::new(10);
        let anomaly = Anomaly::new(Category::NovelFlow, 0.0, acl(1));
        let uuid = anomaly.uuid.to_string();
        ring.push(anomaly);

        assert!(ring.mark_benign(&uuid).is_ok());
        assert!(ring.is_empty());

        // Second removal of the same UUID is a classified error
        match ring.mark_benign(&uuid) {
            Err(ControlError::NotFound) => {}
            other => panic!("expected NotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_mark_benign_all() {
        let mut ring = AnomalyRing::new(10);
        for i in 0..5 {
            ring.push(Anomaly::new(Category::NovelFlow, 0.0, acl(i)));
        }

        assert!(ring.mark_benign("all").is_ok());
        assert!(ring.is_empty());
    }

    #[test]
    fn test_mark_benign_malformed_uuid() {
        let mut ring = AnomalyRing::new(10);
        ring.push(Anomaly::new(Category::NovelFlow, 0.0, acl(1)));

        match ring.mark_benign("not-a-uuid") {
            Err(ControlError::MalformedUuid(_)) => {}
            other => panic!("expected MalformedUuid, got {:?}", other),
        }
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn test_engine_emits_novel_to_ring_and_log() {
        let mut engine = engine(10);
        let notify = engine.notify.clone();
        engine.emit_novel(&acl(7));

        assert_eq!(engine.ring.lock().len(), 1);
        assert!(notify.tail().contains("Unknown flow FROM device to 10.0.0.7"));
    }

    #[test]
    fn test_engine_frequency_pass() {
        let mut engine = engine(100);
        let sec = crate::clock::NANOS_PER_SEC;

        for i in 0..31u8 {
            let key = AclKey {
                ip_ver: 4,
                direction: Direction::Outbound,
                proto: 6,
                addr: Ipv4Addr::new(10, 0, 1, i),
                svc_port: 8080,
            };
            engine.observe_new_flow(&key, sec);
        }

        engine.evaluate(2 * sec);

        let ring = engine.ring.lock();
        assert_eq!(ring.len(), 1);
        let json = ring.snapshot().pop().unwrap();
        assert_eq!(json["category"], "FrequentFlow");
        assert_eq!(json["score"], "1.033");
    }
}
