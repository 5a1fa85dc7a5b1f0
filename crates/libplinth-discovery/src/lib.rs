//! Plugin discovery for plinth
//!
//! Plugins publish themselves in a shared directory:
//! - a unix socket file `<name>[.ext]`, or
//! - a regular file `<name>[.ext]` holding an address such as
//!   `tcp://127.0.0.1:24864` (the crumb written by a tcp server)
//!
//! A [`Registry`] scans that directory and answers name lookups with a
//! ready-to-use [`libplinth_rpc::Client`].

pub mod error;
pub mod registry;

pub use error::DiscoveryError;
pub use registry::{plugin_name, Registry};

/// Default timeout of the connect probe applied during refresh
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 500;
