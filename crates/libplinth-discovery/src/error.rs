//! Discovery error types

use std::path::PathBuf;

use libplinth_rpc::RpcError;
use thiserror::Error;

/// Errors that can occur during discovery
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// Plugin directory cannot be read
    #[error("Plugin directory {dir} is not readable: {source}")]
    Directory {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Plugin directory path is not a directory
    #[error("Plugin directory {0} is not a directory")]
    NotADirectory(PathBuf),

    /// No plugin published under the name
    #[error("Plugin not found: {0}")]
    NotFound(String),

    /// A directory entry could not be turned into an endpoint
    #[error("Skipping {path}: {reason}")]
    Entry { path: PathBuf, reason: String },

    /// Refresh interval must be positive
    #[error("Refresh interval must be greater than zero")]
    ZeroInterval,

    /// RPC error
    #[error(transparent)]
    Rpc(#[from] RpcError),
}
