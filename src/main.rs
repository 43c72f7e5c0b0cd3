//! AUD Manager - Flow Profiling and Anomaly Detection
//!
//! Captures traffic on the host interface, learns per-device Access Usage
//! Descriptions, and publishes anomalies downstream.

use anyhow::{Context, Result};
use clap::Parser;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use aud_manager::anomaly::{AnomalyEngine, AnomalyRing};
use aud_manager::api::{self, ApiState};
use aud_manager::aud::AudRegistry;
use aud_manager::capture::{primary_local_ip, print_interfaces, PacketQueue, PacketReader};
use aud_manager::clock::Clock;
use aud_manager::config::Config;
use aud_manager::notify::NotifyLog;
use aud_manager::pipeline::Controller;
use aud_manager::publish::Publisher;
use aud_manager::state::ConnectionTable;

/// AUD Manager - per-device traffic profiling and anomaly detection
#[derive(Parser, Debug)]
#[command(name = "aud-manager")]
#[command(version)]
#[command(about = "Learns device communication profiles and flags deviating flows", long_about = None)]
struct Args {
    /// Path to configuration file (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// List available network interfaces
    #[arg(long)]
    list_interfaces: bool,

    /// Run in debug mode (verbose logging)
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.list_interfaces {
        print_interfaces();
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => Config::default(),
    };

    config.validate()?;

    let _log_guard = setup_logging(&config, args.debug)?;

    info!("AUD manager starting...");
    info!("Publish endpoint: {}", config.publish.url);
    info!("Control surface: {}", config.api.listen);

    // Local identity: one probed primary address plus configured extras
    let primary_ip = primary_local_ip()
        .with_context(|| "Failed to discover the primary local IPv4 address")?;

    let mut local_ips: HashSet<_> = config.network.local_ips.iter().copied().collect();
    local_ips.insert(primary_ip);
    info!("Local IPs: {:?}", local_ips);

    let clock = Clock::new();
    let queue = Arc::new(PacketQueue::new(config.capture.queue_capacity));

    // Socket open failure is fatal here, before anything else starts
    let reader = PacketReader::new(
        Arc::clone(&queue),
        clock.clone(),
        config.capture.snap_length,
        Duration::from_millis(config.capture.recv_timeout_ms),
    );
    let reader_handle = reader.start()?;

    let notify = NotifyLog::new();
    notify.notify("AUD manager started");

    let learning = Arc::new(AtomicBool::new(true));
    let ring = Arc::new(Mutex::new(AnomalyRing::new(config.detector.ring_capacity)));

    let (publish_tx, publish_handle) = Publisher::spawn(config.publish.clone(), primary_ip);

    let engine = AnomalyEngine::new(
        &config.detector,
        Arc::clone(&ring),
        Some(publish_tx),
        notify.clone(),
    );

    let (cmd_tx, cmd_rx) = mpsc::channel(16);
    let (shutdown_tx, _) = broadcast::channel(1);

    let controller = Controller::new(
        &config.pipeline,
        Arc::clone(&queue),
        clock.clone(),
        ConnectionTable::new(local_ips.iter().copied().collect()),
        AudRegistry::new(),
        engine,
        Arc::clone(&learning),
        cmd_rx,
        shutdown_tx.subscribe(),
    );
    let controller_handle = tokio::spawn(controller.run());

    let api_state = ApiState {
        cmd_tx,
        ring,
        notify: notify.clone(),
        learning: Arc::clone(&learning),
        local_ips: local_ips.iter().copied().collect(),
        started_at: Utc::now(),
    };
    let api_listen = config.api.listen.clone();
    let api_shutdown = shutdown_tx.subscribe();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = api::serve(&api_listen, api_state, api_shutdown).await {
            error!("Control surface error: {}", e);
        }
    });

    // Signal handling
    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    let shutdown_signal = shutdown_tx.clone();

    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        let _ = shutdown_signal.send(());
        r.store(false, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    while running.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    // Cleanup
    info!("Shutting down...");
    learning.store(false, Ordering::Relaxed);
    notify.notify("AUD manager stopped");

    reader.stop();
    let _ = controller_handle.await;
    let _ = publish_handle.await;
    let _ = api_handle.await;

    if reader_handle.join().is_err() {
        error!("Packet reader thread panicked");
    }

    let reader_stats = reader.stats().snapshot();
    let queue_stats = queue.stats();
    info!(
        "Final stats: frames={}, records={}, skipped={}, parse_errors={}, queue_dropped={}",
        reader_stats.frames_read,
        reader_stats.records_emitted,
        reader_stats.frames_skipped,
        reader_stats.parse_errors,
        queue_stats.dropped
    );

    info!("AUD manager stopped");
    Ok(())
}

/// Setup logging based on configuration
fn setup_logging(
    config: &Config,
    debug: bool,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let level = if debug {
        Level::DEBUG
    } else {
        match config.logging.level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" | "warning" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("aud_manager={}", level).parse().unwrap())
        .add_directive("reqwest=warn".parse().unwrap())
        .add_directive("tungstenite=warn".parse().unwrap());

    let (file_layer, guard) = match &config.logging.file {
        Some(path) => {
            let path = std::path::Path::new(path);
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("aud-manager.log");

            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);

            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        None => (None, None),
    };

    let subscriber = tracing_subscriber::registry().with(filter).with(file_layer);

    if config.logging.format == "json" {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer().with_target(true)).init();
    }

    Ok(guard)
}
