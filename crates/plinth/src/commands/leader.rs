//! Leader file commands

use std::sync::Arc;
use std::time::Duration;

use libplinth_leader::{claim as claim_leader, current_leader, Detector, Event, FileProbe, Probe};
use serde_json::json;

use crate::cli::{Cli, LeaderCommand};
use crate::config::Config;
use crate::error::CliError;
use crate::output::{output_json, output_json_line, print_human};

pub async fn run(cli: &Cli, config: &Config, cmd: LeaderCommand) -> Result<(), CliError> {
    match cmd {
        LeaderCommand::Status { identity } => status(cli, config, identity),
        LeaderCommand::Watch {
            identity,
            interval_ms,
            count,
        } => watch(cli, config, identity, interval_ms, count).await,
        LeaderCommand::Claim { identity } => claim(cli, config, identity),
    }
}

fn probe_for(config: &Config, identity: Option<String>) -> FileProbe {
    FileProbe::new(
        &config.leader_file,
        identity.unwrap_or_else(|| config.identity.clone()),
    )
}

fn event_json(probe: &FileProbe, event: &Event) -> serde_json::Value {
    json!({
        "identity": probe.identity(),
        "status": event.status,
        "error": event.error.as_ref().map(|e| e.to_string()),
    })
}

fn status(cli: &Cli, config: &Config, identity: Option<String>) -> Result<(), CliError> {
    let probe = probe_for(config, identity);
    let event = Event::from_probe(probe.is_leader());
    let holder = current_leader(probe.path()).ok().flatten();

    if cli.json {
        let mut data = event_json(&probe, &event);
        data["leader"] = json!(holder);
        data["leader_file"] = json!(probe.path().display().to_string());
        return output_json(cli, data);
    }

    print_human(cli, &format!("{} is {}", probe.identity(), event.status));
    match (&event.error, holder) {
        (Some(e), _) => print_human(cli, &format!("  {}", e)),
        (None, Some(holder)) => print_human(cli, &format!("  current leader: {}", holder)),
        (None, None) => {}
    }
    Ok(())
}

async fn watch(
    cli: &Cli,
    config: &Config,
    identity: Option<String>,
    interval_ms: Option<u64>,
    count: Option<usize>,
) -> Result<(), CliError> {
    let probe = probe_for(config, identity);
    let interval = interval_ms
        .map(Duration::from_millis)
        .unwrap_or(config.poll_interval);
    if interval.is_zero() {
        return Err(CliError::InvalidArgs("--interval-ms must be positive".to_string()));
    }

    let detector = Detector::new(interval, Arc::new(probe.clone()));
    let events = detector.start()?;
    let mut seen = 0usize;

    loop {
        if count.is_some_and(|limit| seen >= limit) {
            break;
        }
        let event = tokio::select! {
            event = events.recv() => event,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(event) = event else {
            break;
        };
        seen += 1;

        if cli.json {
            output_json_line(&event_json(&probe, &event))?;
        } else {
            match &event.error {
                Some(e) => print_human(cli, &format!("{} ({})", event.status, e)),
                None => print_human(cli, event.status.as_str()),
            }
        }
    }

    detector.stop().await;
    Ok(())
}

fn claim(cli: &Cli, config: &Config, identity: Option<String>) -> Result<(), CliError> {
    let identity = identity.unwrap_or_else(|| config.identity.clone());
    if identity.trim().is_empty() {
        return Err(CliError::InvalidArgs("identity must not be empty".to_string()));
    }
    claim_leader(&config.leader_file, &identity)?;

    if cli.json {
        return output_json(
            cli,
            json!({
                "identity": identity.trim(),
                "leader_file": config.leader_file.display().to_string(),
            }),
        );
    }
    print_human(
        cli,
        &format!("{} now holds {}", identity.trim(), config.leader_file.display()),
    );
    Ok(())
}
