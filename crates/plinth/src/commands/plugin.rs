//! Plugin discovery and call commands

use comfy_table::{presets::UTF8_FULL, Table};
use libplinth_discovery::Registry;
use serde_json::{json, Value};

use crate::cli::{Cli, PluginCommand};
use crate::config::Config;
use crate::error::CliError;
use crate::output::{output_json, print_human};

pub async fn run(cli: &Cli, config: &Config, cmd: PluginCommand) -> Result<(), CliError> {
    let registry = open_registry(config).await?;
    match cmd {
        PluginCommand::Ls => list(cli, &registry).await,
        PluginCommand::Call {
            name,
            method,
            params,
        } => call(cli, &registry, &name, &method, &params).await,
        PluginCommand::Implements { name } => implements(cli, &registry, &name).await,
    }
}

async fn open_registry(config: &Config) -> Result<Registry, CliError> {
    let registry = Registry::open(&config.plugin_dir)?
        .with_probe_timeout(config.probe_timeout)
        .with_call_timeout(config.call_timeout);
    registry.refresh().await?;
    Ok(registry)
}

async fn list(cli: &Cli, registry: &Registry) -> Result<(), CliError> {
    let plugins = registry.list().await;

    if cli.json {
        let plugins: Vec<Value> = plugins
            .iter()
            .map(|(name, client)| json!({ "name": name, "endpoint": client.endpoint().to_string() }))
            .collect();
        return output_json(cli, json!({ "plugins": plugins }));
    }
    if cli.quiet {
        return Ok(());
    }

    if plugins.is_empty() {
        println!("No plugins found in {}", registry.dir().display());
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec!["Name", "Endpoint"]);
    for (name, client) in &plugins {
        table.add_row(vec![name.clone(), client.endpoint().to_string()]);
    }
    println!("{table}");
    Ok(())
}

async fn call(
    cli: &Cli,
    registry: &Registry,
    name: &str,
    method: &str,
    params: &str,
) -> Result<(), CliError> {
    let params: Value = serde_json::from_str(params)
        .map_err(|e| CliError::InvalidArgs(format!("--params is not valid JSON: {}", e)))?;

    let client = registry.plugin_by_name(name).await?;
    let result = client.call_raw(method, params).await?;

    if cli.json {
        return output_json(cli, json!({ "plugin": name, "method": method, "result": result }));
    }
    print_human(cli, &serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn implements(cli: &Cli, registry: &Registry, name: &str) -> Result<(), CliError> {
    let client = registry.plugin_by_name(name).await?;
    let spis = client.implements().await?;

    if cli.json {
        return output_json(cli, json!({ "plugin": name, "implements": spis }));
    }
    for spi in &spis {
        print_human(cli, &format!("{}/{}", spi.kind, spi.version));
    }
    Ok(())
}
