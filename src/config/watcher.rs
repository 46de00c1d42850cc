//! Configuration file watcher for hot reload.
//!
//! # Responsibilities
//! - Watch the directory holding the config file, so editors that replace the
//!   file by rename are still seen
//! - Reload only when the file content actually changed
//! - Publish every valid new version; invalid versions leave the current one active
//!
//! # Design Decisions
//! - One write usually fires several notify events; the last published text
//!   is kept and identical reloads are dropped

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::{parse_config, ConfigError};
use crate::config::schema::DispatchConfig;

/// Watches one configuration file and sends each valid new version.
pub struct ConfigWatcher {
    path: PathBuf,
    last: Arc<Mutex<Option<String>>>,
    update_tx: mpsc::UnboundedSender<DispatchConfig>,
}

impl ConfigWatcher {
    /// Create a watcher for `path` and the receiver of its updates.
    ///
    /// The content present now counts as already applied.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<DispatchConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let current = fs::read_to_string(path).ok();

        (
            Self {
                path: path.to_path_buf(),
                last: Arc::new(Mutex::new(current)),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching. Updates flow for as long as the returned handle is alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let directory = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name = self.path.file_name().map(ToOwned::to_owned);
        let path = self.path.clone();
        let last = self.last.clone();
        let tx = self.update_tx;

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let relevant = (event.kind.is_modify() || event.kind.is_create())
                        && event.paths.iter().any(|p| p.file_name() == file_name.as_deref());
                    if !relevant {
                        return;
                    }
                    match reload(&path, &last) {
                        Ok(Some(config)) => {
                            tracing::info!(path = ?path, apis = config.apis.len(), "Config reloaded");
                            if tx.send(config).is_err() {
                                tracing::debug!("Config update receiver dropped");
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            tracing::error!(
                                path = ?path,
                                error = %e,
                                "Failed to reload config, keeping current configuration"
                            );
                        }
                    }
                }
                Err(e) => tracing::error!(error = ?e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&directory, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Config watcher started");
        Ok(watcher)
    }
}

/// Read `path`; `None` when its content matches the last published text.
fn reload(path: &Path, last: &Mutex<Option<String>>) -> Result<Option<DispatchConfig>, ConfigError> {
    let content = fs::read_to_string(path)?;
    let mut last = last.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if last.as_deref() == Some(content.as_str()) {
        return Ok(None);
    }
    // Remember invalid text too, so repeated events for it log once.
    *last = Some(content.clone());
    parse_config(&content).map(Some)
}
