use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "plinth", about = "Plugin discovery, RPC and leader detection", version)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress human-readable output
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Configuration file (default: ~/.plinth/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the plugin discovery directory
    #[arg(long, global = true)]
    pub plugin_dir: Option<PathBuf>,

    /// Override the shared leader file
    #[arg(long, global = true)]
    pub leader_file: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Discover and call plugins
    Plugin {
        #[command(subcommand)]
        cmd: PluginCommand,
    },

    /// Run a built-in plugin until signalled
    Serve {
        #[command(subcommand)]
        cmd: ServeCommand,
    },

    /// Leader detection against the shared leader file
    Leader {
        #[command(subcommand)]
        cmd: LeaderCommand,
    },
}

#[derive(Subcommand, Clone)]
pub enum PluginCommand {
    /// List plugins published in the plugin directory
    Ls,

    /// Call a method on a plugin and print the result
    Call {
        /// Plugin name (a `name/type` form is looked up by `name`)
        name: String,

        /// Method, e.g. Metadata.Get
        method: String,

        /// JSON parameters
        #[arg(long, default_value = "null")]
        params: String,
    },

    /// Show the interfaces a plugin implements
    Implements {
        /// Plugin name
        name: String,
    },
}

#[derive(Subcommand, Clone)]
pub enum ServeCommand {
    /// In-memory metadata plugin
    Metadata {
        /// Name to publish under
        #[arg(long)]
        name: String,

        /// Listen address (default: unix://<plugin-dir>/<name>.sock)
        #[arg(long)]
        listen: Option<String>,

        /// Initial entries as path=value; values parse as JSON, else as strings
        #[arg(long = "set", value_name = "PATH=VALUE")]
        entries: Vec<String>,
    },
}

#[derive(Subcommand, Clone)]
pub enum LeaderCommand {
    /// Probe leadership once
    Status {
        /// Identity to test (default: configured identity)
        #[arg(long)]
        identity: Option<String>,
    },

    /// Stream leadership events until interrupted
    Watch {
        /// Identity to test (default: configured identity)
        #[arg(long)]
        identity: Option<String>,

        /// Poll interval in milliseconds (default: configured interval)
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Exit after this many events
        #[arg(long)]
        count: Option<usize>,
    },

    /// Write an identity into the leader file
    Claim {
        /// Identity to record (default: configured identity)
        #[arg(long)]
        identity: Option<String>,
    },
}
