//! Configuration file watcher for hot reload.

use std::path::{Path, PathBuf};
use std::time::Duration;
use notify::{Watcher, RecursiveMode, Event, RecommendedWatcher, Config};
use tokio::sync::mpsc;
use crate::config::loader::load_config;
use crate::config::schema::ChannelConfig;

/// A watcher that monitors the configuration file for changes.
///
/// Only validated configurations are forwarded; a broken edit keeps the
/// running configuration in place.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<ChannelConfig>,
}

impl ConfigWatcher {
    /// Create a new ConfigWatcher.
    ///
    /// Returns the watcher and a receiver for configuration updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<ChannelConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (Self {
            path: path.to_path_buf(),
            update_tx,
        }, update_rx)
    }

    /// Start watching the file. The returned watcher must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx.clone();
        let path = self.path.clone();

        let mut watcher = RecommendedWatcher::new(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() {
                        tracing::info!(path = ?path, "Config file change detected, reloading");
                        match load_config(&path) {
                            Ok(new_config) => {
                                let _ = tx.send(new_config);
                            }
                            Err(e) => {
                                tracing::error!(error = %e, "Failed to reload config, keeping current configuration");
                            }
                        }
                    }
                }
                Err(e) => tracing::error!(error = ?e, "Watch error"),
            }
        }, Config::default().with_poll_interval(Duration::from_secs(2)))?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Config watcher started");
        Ok(watcher)
    }
}

/// Settings that can change without rebuilding the channel.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveSettings {
    pub sample_rate: f64,
}

/// Compare a reloaded config against the running one.
///
/// Returns the live-applicable settings and whether anything else changed
/// (which only takes effect after a restart).
pub fn diff_reload(current: &ChannelConfig, reloaded: &ChannelConfig) -> (LiveSettings, bool) {
    let live = LiveSettings {
        sample_rate: reloaded.telemetry.sample_rate,
    };

    let mut normalized = reloaded.clone();
    normalized.telemetry.sample_rate = current.telemetry.sample_rate;
    (live, normalized != *current)
}
