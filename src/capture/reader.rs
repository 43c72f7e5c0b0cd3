//! Packet reader
//!
//! Reads frames from the raw socket on a dedicated thread, decodes them,
//! and pushes records into the bounded packet queue.

use anyhow::{bail, Context, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::decode::{self, DecodeOutcome, SkipReason};
use super::queue::PacketQueue;
use super::socket::RawSocket;

/// Reader statistics
#[derive(Debug, Default)]
pub struct ReaderStats {
    /// Frames read from the socket
    pub frames_read: AtomicU64,
    /// Records emitted into the queue
    pub records_emitted: AtomicU64,
    /// Frames skipped (packet type, ethertype, untracked L4)
    pub frames_skipped: AtomicU64,
    /// Malformed headers
    pub parse_errors: AtomicU64,
}

impl ReaderStats {
    pub fn snapshot(&self) -> ReaderStatsSnapshot {
        ReaderStatsSnapshot {
            frames_read: self.frames_read.load(Ordering::Relaxed),
            records_emitted: self.records_emitted.load(Ordering::Relaxed),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of reader statistics (non-atomic copy)
#[derive(Debug, Clone)]
pub struct ReaderStatsSnapshot {
    pub frames_read: u64,
    pub records_emitted: u64,
    pub frames_skipped: u64,
    pub parse_errors: u64,
}

/// Raw packet reader
pub struct PacketReader {
    queue: Arc<PacketQueue>,
    clock: Clock,
    snap_length: usize,
    recv_timeout: Duration,
    stats: Arc<ReaderStats>,
    running: Arc<AtomicBool>,
}

impl PacketReader {
    pub fn new(
        queue: Arc<PacketQueue>,
        clock: Clock,
        snap_length: usize,
        recv_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            clock,
            snap_length,
            recv_timeout,
            stats: Arc::new(ReaderStats::default()),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn stats(&self) -> Arc<ReaderStats> {
        Arc::clone(&self.stats)
    }

    /// Stop the read loop; it exits within one receive timeout
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Open the raw socket and start the read loop on a new thread.
    ///
    /// Socket open failure is fatal and returned to the caller before any
    /// thread is spawned.
    pub fn start(&self) -> Result<std::thread::JoinHandle<()>> {
        if self.running.swap(true, Ordering::SeqCst) {
            bail!("Packet reader already running");
        }

        let socket = RawSocket::open(self.recv_timeout)
            .with_context(|| "Failed to start packet reader")?;

        info!("Packet reader started (snap length {})", self.snap_length);

        let queue = Arc::clone(&self.queue);
        let clock = self.clock.clone();
        let stats = Arc::clone(&self.stats);
        let running = Arc::clone(&self.running);
        let snap_length = self.snap_length;

        let handle = std::thread::spawn(move || {
            read_loop(socket, queue, clock, stats, running, snap_length);
        });

        Ok(handle)
    }
}

fn read_loop(
    socket: RawSocket,
    queue: Arc<PacketQueue>,
    clock: Clock,
    stats: Arc<ReaderStats>,
    running: Arc<AtomicBool>,
    snap_length: usize,
) {
    let mut buf = vec![0u8; snap_length];
    let mut ipv6_logged = false;

    while running.load(Ordering::SeqCst) {
        let (len, pkt_type) = match socket.recv(&mut buf) {
            Ok(Some(frame)) => frame,
            Ok(None) => continue, // receive timeout
            Err(e) => {
                error!("Error receiving packet: {}", e);
                continue;
            }
        };

        stats.frames_read.fetch_add(1, Ordering::Relaxed);
        let ts_ns = clock.now_ns();

        match decode::parse_packet(ts_ns, pkt_type, &buf[..len]) {
            Ok(DecodeOutcome::Record(record)) => {
                stats.records_emitted.fetch_add(1, Ordering::Relaxed);
                queue.push(record);
            }
            Ok(DecodeOutcome::Skipped(reason)) => {
                stats.frames_skipped.fetch_add(1, Ordering::Relaxed);
                if reason == SkipReason::Ipv6 && !ipv6_logged {
                    ipv6_logged = true;
                    warn!("IPv6 traffic observed; IPv6 parsing is not supported");
                }
            }
            Err(e) => {
                stats.parse_errors.fetch_add(1, Ordering::Relaxed);
                debug!("Failed to parse frame: {}", e);
            }
        }
    }

    info!("Packet reader stopped");
}
