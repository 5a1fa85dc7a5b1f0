use libplinth_discovery::DiscoveryError;
use libplinth_leader::LeaderError;
use libplinth_rpc::RpcError;
use thiserror::Error;

/// Errors surfaced by the plinth command line
#[derive(Debug, Error)]
pub enum CliError {
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Leader(#[from] LeaderError),
}

impl CliError {
    /// Error code for JSON output
    pub fn error_code(&self) -> &'static str {
        match self {
            CliError::InvalidArgs(_) => "invalid_args",
            CliError::Config(_) | CliError::TomlParse(_) => "config_error",
            CliError::Io(_) => "io_error",
            CliError::Json(_) => "invalid_args",
            CliError::Rpc(RpcError::Remote { .. }) => "remote_error",
            CliError::Rpc(e) if e.is_transport() => "transport_error",
            CliError::Rpc(_) => "rpc_error",
            CliError::Discovery(DiscoveryError::NotFound(_)) => "not_found",
            CliError::Discovery(_) => "discovery_error",
            CliError::Leader(_) => "leader_error",
        }
    }

    /// Process exit code
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::InvalidArgs(_) | CliError::Json(_) => 2,
            CliError::Config(_) | CliError::TomlParse(_) => 2,
            CliError::Discovery(DiscoveryError::NotFound(_)) => 3,
            CliError::Rpc(RpcError::Remote { .. }) => 4,
            CliError::Io(_) => 5,
            CliError::Rpc(_) => 6,
            _ => 1,
        }
    }
}
