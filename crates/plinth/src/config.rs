//! Configuration resolution
//!
//! Built-in defaults, then the TOML file, then `PLINTH_*` environment
//! variables, then command-line flags. Later sources win.

use std::path::{Path, PathBuf};
use std::time::Duration;

use libplinth_discovery::DEFAULT_PROBE_TIMEOUT_MS;
use libplinth_leader::DEFAULT_POLL_INTERVAL_MS;
use serde::{Deserialize, Serialize};

use crate::cli::Cli;
use crate::error::CliError;

pub const PLUGIN_DIR_ENV: &str = "PLINTH_PLUGIN_DIR";
pub const LEADER_FILE_ENV: &str = "PLINTH_LEADER_FILE";

/// Contents of `~/.plinth/config.toml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leader_file: Option<PathBuf>,
    /// Identity this host claims and probes with
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_interval_ms: Option<u64>,
    /// Liveness probe timeout during discovery, 0 disables the probe
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probe_timeout_ms: Option<u64>,
    /// Deadline for plugin calls, 0 means none
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_timeout_ms: Option<u64>,
}

/// Fully resolved settings
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub plugin_dir: PathBuf,
    pub leader_file: PathBuf,
    pub identity: String,
    pub poll_interval: Duration,
    pub probe_timeout: Option<Duration>,
    pub call_timeout: Option<Duration>,
}

impl Config {
    /// Resolve configuration for this invocation
    pub fn resolve(cli: &Cli) -> Result<Self, CliError> {
        let file = match &cli.config {
            Some(path) => Some(load_file_config(path)?),
            None => match default_config_path() {
                Some(path) if path.exists() => Some(load_file_config(&path)?),
                _ => None,
            },
        };

        let mut config = Self::from_sources(file.unwrap_or_default(), |key| std::env::var(key).ok());
        if let Some(dir) = &cli.plugin_dir {
            config.plugin_dir = dir.clone();
        }
        if let Some(file) = &cli.leader_file {
            config.leader_file = file.clone();
        }
        Ok(config)
    }

    /// Layer the file and environment over the defaults
    pub fn from_sources(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Self {
        let env_path = |key: &str| env(key).filter(|v| !v.is_empty()).map(PathBuf::from);

        Self {
            plugin_dir: env_path(PLUGIN_DIR_ENV)
                .or(file.plugin_dir)
                .unwrap_or_else(default_plugin_dir),
            leader_file: env_path(LEADER_FILE_ENV)
                .or(file.leader_file)
                .unwrap_or_else(default_leader_file),
            identity: file.identity.unwrap_or_else(get_host_id),
            poll_interval: Duration::from_millis(
                file.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            ),
            probe_timeout: millis_or_none(file.probe_timeout_ms.unwrap_or(DEFAULT_PROBE_TIMEOUT_MS)),
            call_timeout: file.call_timeout_ms.and_then(millis_or_none),
        }
    }
}

fn millis_or_none(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

/// Load a config file; an explicitly named file must exist
pub fn load_file_config(path: &Path) -> Result<FileConfig, CliError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        CliError::Config(format!("cannot read {}: {}", path.display(), e))
    })?;
    let config: FileConfig = toml::from_str(&content)?;
    Ok(config)
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .filter(|h| !h.is_empty())
        .map(PathBuf::from)
}

fn default_config_path() -> Option<PathBuf> {
    home_dir().map(|h| h.join(".plinth").join("config.toml"))
}

/// `~/.plinth/plugins`, or a per-user directory under /tmp without a home
pub fn default_plugin_dir() -> PathBuf {
    if let Some(home) = home_dir() {
        return home.join(".plinth").join("plugins");
    }

    #[cfg(unix)]
    {
        let uid = unsafe { libc::getuid() };
        PathBuf::from(format!("/tmp/plinth-{}/plugins", uid))
    }

    #[cfg(not(unix))]
    {
        PathBuf::from("/tmp/plinth/plugins")
    }
}

pub fn default_leader_file() -> PathBuf {
    match home_dir() {
        Some(home) => home.join(".plinth").join("leader"),
        None => default_plugin_dir().with_file_name("leader"),
    }
}

/// Hostname, falling back to a random UUID
pub fn get_host_id() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}
