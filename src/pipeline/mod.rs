//! Pipeline controller
//!
//! Owns the connection table, the AUD registry, and the anomaly engine.
//! Drains the packet queue every poll interval and runs the aggregation
//! tick every update interval. All flow state is mutated only here; the
//! control surface reaches it through the command channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info};

use crate::anomaly::AnomalyEngine;
use crate::aud::AudRegistry;
use crate::capture::queue::PacketQueue;
use crate::clock::Clock;
use crate::config::PipelineConfig;
use crate::state::ConnectionTable;

/// Requests from the control surface into the controller task
pub enum ControlCommand {
    /// Full internal dump (AUD records + connection list)
    Diag(oneshot::Sender<serde_json::Value>),
    /// Current flow dump
    ConnList(oneshot::Sender<serde_json::Value>),
    /// Run an update tick now
    ForceUpdate(oneshot::Sender<()>),
}

/// Main pipeline loop
pub struct Controller {
    queue: Arc<PacketQueue>,
    clock: Clock,
    table: ConnectionTable,
    registry: AudRegistry,
    engine: AnomalyEngine,
    learning: Arc<AtomicBool>,
    update_interval: Duration,
    poll_interval: Duration,
    cmd_rx: mpsc::Receiver<ControlCommand>,
    shutdown: broadcast::Receiver<()>,
}

impl Controller {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &PipelineConfig,
        queue: Arc<PacketQueue>,
        clock: Clock,
        table: ConnectionTable,
        registry: AudRegistry,
        engine: AnomalyEngine,
        learning: Arc<AtomicBool>,
        cmd_rx: mpsc::Receiver<ControlCommand>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            queue,
            clock,
            table,
            registry,
            engine,
            learning,
            update_interval: Duration::from_secs(config.update_interval_secs),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            cmd_rx,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        // Frames captured before the pipeline is ready are stale
        let discarded = self.queue.clear();
        if discarded > 0 {
            debug!("Discarded {} stale records at startup", discarded);
        }

        let interval_ns = self.update_interval.as_nanos() as u64;
        let mut next_tick_ns = self.clock.now_ns() + interval_ns;

        info!(
            "Controller started (update interval {:?}, poll interval {:?})",
            self.update_interval, self.poll_interval
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!("Controller received shutdown signal");
                    break;
                }
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd),
                        None => break,
                    }
                }
                _ = tokio::time::sleep(self.poll_interval) => {
                    self.drain_queue();

                    let now_ns = self.clock.now_ns();
                    if now_ns >= next_tick_ns {
                        self.tick(now_ns);
                        next_tick_ns = now_ns + interval_ns;
                    }
                }
            }
        }

        let stats = self.table.stats();
        info!(
            "Controller stopped: flows={}, recorded={}, filtered={}",
            self.table.len(),
            stats.recorded,
            stats.filtered
        );
    }

    /// Move everything currently queued into the connection table
    fn drain_queue(&mut self) {
        while let Some(record) = self.queue.pop() {
            self.table.record(&record);
        }
    }

    /// One AUD update: aggregate, run detectors, evict
    fn tick(&mut self, now_ns: u64) {
        let learning = self.learning.load(Ordering::Relaxed);

        self.registry.update(&mut self.table, &mut self.engine, learning, now_ns);
        self.engine.evaluate(now_ns);
        self.table.trim(now_ns);

        debug!(
            flows = self.table.len(),
            records = self.registry.len(),
            "AUD update tick"
        );
    }

    fn handle_command(&mut self, cmd: ControlCommand) {
        let now_ns = self.clock.now_ns();

        match cmd {
            ControlCommand::Diag(reply) => {
                let dump = serde_json::json!({
                    "aud": self.registry.as_json(),
                    "connlist": self.table.summary(now_ns),
                });
                let _ = reply.send(dump);
            }
            ControlCommand::ConnList(reply) => {
                let _ = reply.send(self.table.summary(now_ns));
            }
            ControlCommand::ForceUpdate(reply) => {
                self.drain_queue();
                self.tick(self.clock.now_ns());
                let _ = reply.send(());
            }
        }
    }
}
