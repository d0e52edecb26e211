//! Configuration file watcher for hot reload.
//!
//! Only files that load and validate are forwarded. A broken edit is logged
//! and the handler keeps running on the configuration it already has.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::ServerConfig;
use crate::observability::metrics;

/// What one file event led to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// Not a content change (access, removal, metadata).
    Ignored,
    /// A validated configuration was sent to the receiver.
    Forwarded,
    /// The file failed to load or validate.
    Rejected,
    /// The receiver is gone.
    Closed,
}

/// Watches one connector configuration file.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<ServerConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and the receiver that validated configurations
    /// arrive on.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<ServerConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reload the file for one watch event.
    pub fn handle_event(&self, event: notify::Result<Event>) -> ReloadOutcome {
        match event {
            Ok(event) if is_content_change(&event.kind) => self.reload(),
            Ok(_) => ReloadOutcome::Ignored,
            Err(e) => {
                tracing::error!(path = ?self.path, error = ?e, "Config watch error");
                ReloadOutcome::Ignored
            }
        }
    }

    /// Load and validate the file, forwarding it on success.
    pub fn reload(&self) -> ReloadOutcome {
        tracing::info!(path = ?self.path, "Config file change detected, reloading");
        match load_config(&self.path) {
            Ok(config) => {
                metrics::record_config_reload("applied");
                if self.update_tx.send(config).is_err() {
                    tracing::debug!(path = ?self.path, "Config receiver dropped, reload discarded");
                    return ReloadOutcome::Closed;
                }
                ReloadOutcome::Forwarded
            }
            Err(e) => {
                metrics::record_config_reload("rejected");
                tracing::error!(
                    path = ?self.path,
                    error = %e,
                    "Failed to reload config, keeping current configuration"
                );
                ReloadOutcome::Rejected
            }
        }
    }

    /// Start watching the file. Dropping the returned watcher stops it.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let path = self.path.clone();
        let mut watcher = RecommendedWatcher::new(
            move |event: notify::Result<Event>| {
                self.handle_event(event);
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;
        watcher.watch(&path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?path, "Config watcher started");
        Ok(watcher)
    }
}

fn is_content_change(kind: &EventKind) -> bool {
    kind.is_modify() || kind.is_create()
}
