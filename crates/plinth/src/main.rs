//! plinth - command-line front end for plinth plugins
//!
//! The binary is the process boundary: it resolves configuration, installs
//! logging and forwards OS signals. The libraries do none of that.

mod cli;
mod commands;
mod config;
mod error;
mod output;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cli::{Cli, Command};
use config::Config;
use error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays parseable
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run_command(&cli).await {
        output::output_error(&cli, &e);
        std::process::exit(e.exit_code());
    }
}

async fn run_command(cli: &Cli) -> Result<(), CliError> {
    let config = Config::resolve(cli)?;
    tracing::debug!(
        plugin_dir = %config.plugin_dir.display(),
        leader_file = %config.leader_file.display(),
        "Resolved configuration"
    );

    match &cli.command {
        Command::Plugin { cmd } => commands::plugin::run(cli, &config, cmd.clone()).await,
        Command::Serve { cmd } => commands::serve::run(cli, &config, cmd.clone()).await,
        Command::Leader { cmd } => commands::leader::run(cli, &config, cmd.clone()).await,
    }
}
