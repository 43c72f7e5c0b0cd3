//! Bounded SPSC queue between the packet reader and the controller
//!
//! Overflow policy is drop-oldest: a monitoring pipeline must not stall the
//! reader, so the newest record displaces the oldest and a counter records
//! the loss.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};

use super::packet::PacketRecord;

/// Queue statistics
#[derive(Debug, Default)]
pub struct QueueStats {
    /// Records pushed by the reader
    pub pushed: AtomicU64,
    /// Records evicted to make room for newer ones
    pub dropped: AtomicU64,
}

impl QueueStats {
    pub fn snapshot(&self) -> QueueStatsSnapshot {
        QueueStatsSnapshot {
            pushed: self.pushed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of queue statistics (non-atomic copy)
#[derive(Debug, Clone)]
pub struct QueueStatsSnapshot {
    pub pushed: u64,
    pub dropped: u64,
}

/// Bounded single-producer / single-consumer packet queue
pub struct PacketQueue {
    inner: ArrayQueue<PacketRecord>,
    stats: QueueStats,
}

impl PacketQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: ArrayQueue::new(capacity),
            stats: QueueStats::default(),
        }
    }

    /// Push a record, evicting the oldest one if the queue is full
    pub fn push(&self, record: PacketRecord) {
        self.stats.pushed.fetch_add(1, Ordering::Relaxed);
        if self.inner.force_push(record).is_some() {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Pop the oldest record, if any
    pub fn pop(&self) -> Option<PacketRecord> {
        self.inner.pop()
    }

    /// Discard everything currently queued. Used once at startup so a burst
    /// of frames captured before the controller is ready is not replayed.
    pub fn clear(&self) -> usize {
        let mut discarded = 0;
        while self.inner.pop().is_some() {
            discarded += 1;
        }
        discarded
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn stats(&self) -> QueueStatsSnapshot {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::packet::{Direction, L4Header, PacketRecord};
    use std::net::Ipv4Addr;

    fn record(ts_ns: u64) -> PacketRecord {
        PacketRecord {
            ts_ns,
            direction: Direction::Outbound,
            ip_ver: 4,
            proto: 17,
            src: Ipv4Addr::new(192, 168, 1, 10),
            dst: Ipv4Addr::new(8, 8, 8, 8),
            length: 76,
            ttl: 64,
            l4: L4Header::Udp { src_port: 40000, dst_port: 53, length: 56 },
        }
    }

    #[test]
    fn test_fifo_order() {
        let queue = PacketQueue::new(8);
        for i in 0..4 {
            queue.push(record(i));
        }

        for i in 0..4 {
            assert_eq!(queue.pop().unwrap().ts_ns, i);
        }
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_drop_oldest_on_overflow() {
        let queue = PacketQueue::new(4);
        for i in 0..6 {
            queue.push(record(i));
        }

        let stats = queue.stats();
        assert_eq!(stats.pushed, 6);
        assert_eq!(stats.dropped, 2);

        // Oldest two records were evicted
        assert_eq!(queue.pop().unwrap().ts_ns, 2);
        assert_eq!(queue.pop().unwrap().ts_ns, 3);
        assert_eq!(queue.pop().unwrap().ts_ns, 4);
        assert_eq!(queue.pop().unwrap().ts_ns, 5);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_clear() {
        let queue = PacketQueue::new(8);
        for i in 0..5 {
            queue.push(record(i));
        }

        assert_eq!(queue.clear(), 5);
        assert!(queue.is_empty());
    }
}
