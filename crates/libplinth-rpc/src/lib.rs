//! RPC transport for plinth plugins
//!
//! This crate provides:
//! - Endpoint addressing (`unix://` and `tcp://` address strings)
//! - Wire message types (newline-delimited JSON requests and responses)
//! - RPC client for calling a plugin
//! - RPC server with a race-free shutdown sequence and crumb-file bookkeeping
//! - Plugin-kind dispatch (instance, flavor, group, application, metadata)

pub mod client;
pub mod endpoint;
pub mod error;
pub mod messages;
pub mod name;
pub mod plugin;
pub mod server;
pub mod shutdown;
mod transport;

pub use client::Client;
pub use endpoint::{Endpoint, ListenAddr, Scheme};
pub use error::RpcError;
pub use messages::{ErrorPayload, Request, Response};
pub use name::PluginName;
pub use server::{Cleanup, Handler, RunningServer, Server, ServerState, StopHandle};
pub use shutdown::{forward_signals, TerminationSignals};

/// Current RPC schema version, reported by the handshake
pub const RPC_SCHEMA_VERSION: u32 = 1;

/// Method answered by every server built on [`plugin::Dispatcher`]
pub const IMPLEMENTS_METHOD: &str = "Plugin.Implements";

/// File mode applied to unix sockets so same-host peers can connect
pub const SOCKET_MODE: u32 = 0o777;
