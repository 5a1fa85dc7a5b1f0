//! Serve a built-in plugin until a termination signal arrives

use std::io::Write;
use std::sync::Arc;

use libplinth_rpc::plugin::{Dispatcher, MemoryMetadata, Service};
use libplinth_rpc::{Server, TerminationSignals};
use serde_json::{json, Value};
use tracing::info;

use crate::cli::{Cli, ServeCommand};
use crate::config::Config;
use crate::error::CliError;
use crate::output::{output_json, print_human};

pub async fn run(cli: &Cli, config: &Config, cmd: ServeCommand) -> Result<(), CliError> {
    match cmd {
        ServeCommand::Metadata {
            name,
            listen,
            entries,
        } => metadata(cli, config, &name, listen, &entries).await,
    }
}

async fn metadata(
    cli: &Cli,
    config: &Config,
    name: &str,
    listen: Option<String>,
    entries: &[String],
) -> Result<(), CliError> {
    if name.is_empty() || name.contains('/') || name.starts_with('.') {
        return Err(CliError::InvalidArgs(format!("invalid plugin name: {:?}", name)));
    }

    let store = MemoryMetadata::new();
    for entry in entries {
        let (path, value) = parse_entry(entry)?;
        store.set(path, value);
    }

    let listen = match listen {
        Some(listen) => listen,
        None => default_listen(config, name)?,
    };

    // Signals raised while binding are held until attached
    let signals = TerminationSignals::install()?;
    let dispatcher = Dispatcher::new().with(Service::Metadata(Arc::new(store)));
    let server = Server::start(&listen, Arc::new(dispatcher), vec![]).await?;
    let forwarder = signals.attach(server.stop_handle());
    info!(name = %name, endpoint = %server.endpoint(), "Metadata plugin running");

    if cli.json {
        output_json(
            cli,
            json!({
                "name": name,
                "endpoint": server.endpoint().to_string(),
                "crumb": server.crumb().map(|c| c.display().to_string()),
            }),
        )?;
    } else {
        print_human(cli, &format!("Serving {} at {}", name, server.endpoint()));
    }
    std::io::stdout().flush()?;

    let result = server.stopped().await;
    forwarder.abort();
    result?;

    print_human(cli, "Stopped");
    Ok(())
}

/// `unix://<plugin-dir>/<name>.sock`, creating the directory if needed
fn default_listen(config: &Config, name: &str) -> Result<String, CliError> {
    std::fs::create_dir_all(&config.plugin_dir)?;
    let dir = std::fs::canonicalize(&config.plugin_dir)?;
    Ok(format!("unix://{}", dir.join(format!("{}.sock", name)).display()))
}

/// Parse `path=value`; the value is JSON when it parses as JSON
fn parse_entry(entry: &str) -> Result<(&str, Value), CliError> {
    let (path, raw) = entry
        .split_once('=')
        .ok_or_else(|| CliError::InvalidArgs(format!("expected PATH=VALUE, got {:?}", entry)))?;
    if path.trim_matches('/').is_empty() {
        return Err(CliError::InvalidArgs(format!("empty path in {:?}", entry)));
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((path, value))
}
