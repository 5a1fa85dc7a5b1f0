//! Directory-backed plugin registry
//!
//! Each refresh builds a complete new name → client map and swaps it in
//! under the write lock; readers see either the old or the new snapshot,
//! never a partial one. The registry only reads the directory.

use std::collections::{BTreeMap, HashMap};
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use libplinth_rpc::{Client, Endpoint, PluginName};
use tokio::sync::{watch, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::error::DiscoveryError;
use crate::DEFAULT_PROBE_TIMEOUT_MS;

/// Registry of plugins published in one directory
#[derive(Debug)]
pub struct Registry {
    dir: PathBuf,
    probe_timeout: Option<Duration>,
    call_timeout: Option<Duration>,
    plugins: RwLock<HashMap<String, Client>>,
}

impl Registry {
    /// Open a registry over `dir`. The snapshot starts empty until the
    /// first [`Registry::refresh`].
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, DiscoveryError> {
        let dir = dir.into();
        let metadata = std::fs::metadata(&dir).map_err(|source| DiscoveryError::Directory {
            dir: dir.clone(),
            source,
        })?;
        if !metadata.is_dir() {
            return Err(DiscoveryError::NotADirectory(dir));
        }

        Ok(Self {
            dir,
            probe_timeout: Some(Duration::from_millis(DEFAULT_PROBE_TIMEOUT_MS)),
            call_timeout: None,
            plugins: RwLock::new(HashMap::new()),
        })
    }

    /// Timeout of the connect probe run on every entry during refresh;
    /// `None` publishes entries without probing them
    pub fn with_probe_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Deadline given to every client the registry hands out
    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Rescan the directory and replace the snapshot. Returns the number of
    /// plugins found. Bad entries are skipped; an unreadable directory
    /// leaves the previous snapshot in place.
    pub async fn refresh(&self) -> Result<usize, DiscoveryError> {
        let dir_error = |source| DiscoveryError::Directory {
            dir: self.dir.clone(),
            source,
        };

        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(dir_error)?;
        let mut pending = JoinSet::new();
        let mut order = 0usize;

        while let Some(entry) = entries.next_entry().await.map_err(dir_error)? {
            let path = entry.path();
            let Some(name) = plugin_name(&path) else {
                continue;
            };

            let (probe_timeout, call_timeout) = (self.probe_timeout, self.call_timeout);
            pending.spawn(async move {
                let outcome = discover(&path, probe_timeout, call_timeout).await;
                (order, name, outcome)
            });
            order += 1;
        }

        let mut discovered = Vec::with_capacity(order);
        while let Some(joined) = pending.join_next().await {
            match joined {
                Ok(result) => discovered.push(result),
                Err(e) => warn!("Discovery task failed: {}", e),
            }
        }
        // Merge in directory order; the last entry wins a name collision
        discovered.sort_by_key(|(order, _, _)| *order);

        let mut found: HashMap<String, Client> = HashMap::new();
        for (_, name, outcome) in discovered {
            match outcome {
                Ok(Some(client)) => {
                    if let Some(previous) = found.insert(name.clone(), client) {
                        debug!(name = %name, replaced = %previous.endpoint(), "Duplicate plugin name");
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("{}", e),
            }
        }

        let count = found.len();
        *self.plugins.write().await = found;
        debug!(dir = %self.dir.display(), plugins = count, "Refreshed plugin registry");
        Ok(count)
    }

    /// Client for a published plugin. A name such as `group/workers` is
    /// looked up by its `group` part.
    pub async fn plugin_by_name(&self, name: &str) -> Result<Client, DiscoveryError> {
        let name = PluginName::new(name);
        self.plugins
            .read()
            .await
            .get(name.lookup())
            .cloned()
            .ok_or_else(|| DiscoveryError::NotFound(name.to_string()))
    }

    /// Snapshot of every published plugin, sorted by name
    pub async fn list(&self) -> BTreeMap<String, Client> {
        self.plugins
            .read()
            .await
            .iter()
            .map(|(name, client)| (name.clone(), client.clone()))
            .collect()
    }

    /// Refresh every `interval` until `stop` turns true or its sender is
    /// dropped. A zero interval is rejected.
    pub fn spawn_refresher(
        self: Arc<Self>,
        interval: Duration,
        mut stop: watch::Receiver<bool>,
    ) -> Result<JoinHandle<()>, DiscoveryError> {
        if interval.is_zero() {
            return Err(DiscoveryError::ZeroInterval);
        }

        Ok(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.refresh().await {
                            warn!("Plugin registry refresh failed: {}", e);
                        }
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
        }))
    }
}

/// Build a client for one directory entry; `None` for directories
async fn discover(
    path: &Path,
    probe_timeout: Option<Duration>,
    call_timeout: Option<Duration>,
) -> Result<Option<Client>, DiscoveryError> {
    let entry_error = |reason: String| DiscoveryError::Entry {
        path: path.to_path_buf(),
        reason,
    };

    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| entry_error(e.to_string()))?;
    let file_type = metadata.file_type();

    let endpoint = if file_type.is_dir() {
        return Ok(None);
    } else if file_type.is_socket() {
        Endpoint::unix(path)
    } else if file_type.is_file() {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| entry_error(e.to_string()))?;
        Endpoint::parse(contents.trim()).map_err(|e| entry_error(e.to_string()))?
    } else {
        return Err(entry_error("neither a socket nor a regular file".to_string()));
    };

    let mut client = Client::from_endpoint(endpoint);
    if let Some(timeout) = probe_timeout {
        client
            .clone()
            .with_timeout(timeout)
            .probe()
            .await
            .map_err(|e| entry_error(format!("liveness probe failed: {}", e)))?;
    }
    if let Some(timeout) = call_timeout {
        client = client.with_timeout(timeout);
    }
    Ok(Some(client))
}

/// Name a directory entry publishes: the file name with exactly one
/// trailing extension removed. Hidden files publish nothing.
pub fn plugin_name(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    if stem.is_empty() || stem.starts_with('.') {
        return None;
    }
    Some(stem.to_string())
}
