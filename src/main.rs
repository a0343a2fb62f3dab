//! live-channel daemon.
//!
//! Runs one channel against the configured push/poll endpoints until
//! SIGINT/SIGTERM, logging every event it delivers.
//!
//! ```text
//!        push (WebSocket)                    poll (HTTP GET)
//!              │                                    │
//!              ▼                                    ▼
//!   ┌──────────────────────────────────────────────────────────┐
//!   │                     ChannelManager                        │
//!   │   actor ── state machine ── reconnect backoff ── poller   │
//!   │     │                                                     │
//!   │     ├── resilience: retries + per-class circuit breakers  │
//!   │     ├── telemetry: sampled buffer → reporter              │
//!   │     └── recovery: capped remediation per category         │
//!   └──────────────────────────┬───────────────────────────────┘
//!                              ▼
//!                   ChannelEvent handlers (log)
//! ```

use std::path::PathBuf;

use clap::Parser;

use live_channel::channel::ChannelEvent;
use live_channel::config::loader::{load_config, load_from_env};
use live_channel::config::watcher::{diff_reload, ConfigWatcher};
use live_channel::lifecycle::signals::wait_for_termination;
use live_channel::lifecycle::startup::build_manager;
use live_channel::observability::{logging, metrics};
use live_channel::{ChannelConfig, ChannelManager, EventKind};

#[derive(Parser)]
#[command(name = "live-channel")]
#[command(about = "Resilient push/poll live-data channel", long_about = None)]
struct Args {
    /// TOML configuration file; defaults plus environment overrides when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => load_from_env()?,
    };

    logging::init_logging(&config.observability);
    tracing::info!("live-channel v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let manager = build_manager(&config)?;
    log_events(&manager);
    manager.connect();

    tokio::select! {
        _ = wait_for_termination() => {}
        _ = watch_config(args.config, config, &manager) => {}
    }

    tracing::info!("Shutting down");
    manager.shutdown().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

fn log_events(manager: &ChannelManager) {
    manager.on(EventKind::StateChanged, |event| {
        if let ChannelEvent::StateChanged { from, to } = event {
            if to.is_degraded() {
                tracing::warn!(from = %from, to = %to, "Channel state, push unavailable");
            } else {
                tracing::info!(from = %from, to = %to, "Channel state");
            }
        }
    });
    manager.on(EventKind::Data, |event| {
        if let ChannelEvent::Data(snapshot) = event {
            tracing::info!(
                source = ?snapshot.source,
                sequence = snapshot.sequence,
                payload = %snapshot.payload,
                "Snapshot"
            );
        }
    });
    manager.on(EventKind::Message, |event| {
        if let ChannelEvent::Message(frame) = event {
            tracing::debug!(kind = %frame.kind, "Message");
        }
    });
    manager.on(EventKind::Error, |event| {
        if let ChannelEvent::Error(notice) = event {
            tracing::warn!(context = ?notice.context, message = %notice.message, "Channel notice");
        }
    });
}

/// Apply hot-reloadable settings until the watcher stops. Never returns without a file.
async fn watch_config(path: Option<PathBuf>, mut current: ChannelConfig, manager: &ChannelManager) {
    let Some(path) = path else {
        return std::future::pending().await;
    };

    let (watcher, mut updates) = ConfigWatcher::new(&path);
    let _guard = match watcher.run() {
        Ok(guard) => guard,
        Err(e) => {
            tracing::warn!(error = %e, "Config hot reload disabled");
            return std::future::pending().await;
        }
    };

    while let Some(reloaded) = updates.recv().await {
        let (live, needs_restart) = diff_reload(&current, &reloaded);
        if live.sample_rate != manager.telemetry().sample_rate() {
            manager.telemetry().set_sample_rate(live.sample_rate);
        }
        if needs_restart {
            tracing::warn!("Configuration changed beyond telemetry.sample_rate; restart to apply");
        }
        // everything else keeps comparing against what is actually running
        current.telemetry.sample_rate = live.sample_rate;
    }
    std::future::pending().await
}
