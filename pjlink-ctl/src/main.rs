//! PJLink command line client
//!
//! Connects to a projector, sends the given commands, prints status and
//! connection changes for a while and finishes with the status table.
//!
//! Usage: cargo run -p pjlink-ctl -- --host 192.168.1.50 "%1POWR 1"

use anyhow::{bail, Context, Result};
use clap::Parser;
use pjlink_lib::{
    start_projector_task, ConnectionStatus, Parameter, ProjectorConfig, SessionEvent,
};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(name = "pjlink-ctl")]
#[command(about = "Query and control a PJLink projector")]
struct Args {
    /// Projector IP address
    #[arg(long, required_unless_present = "config")]
    host: Option<String>,

    /// TCP port (overrides the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// PJLink password (overrides the config file)
    #[arg(long)]
    password: Option<String>,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Seconds to watch for replies before printing the status table
    #[arg(short, long, default_value = "3")]
    duration: u64,

    /// Print the final status as JSON
    #[arg(short, long)]
    json: bool,

    /// Print every status update
    #[arg(short, long)]
    verbose: bool,

    /// Commands to send, e.g. "%1POWR 1" or "%1INPT 31"
    commands: Vec<String>,
}

fn load_config(args: &Args) -> Result<ProjectorConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {path}"))?;
            ProjectorConfig::from_json(&json).with_context(|| format!("Invalid config {path}"))?
        }
        None => ProjectorConfig::new(args.host.clone().unwrap_or_default()),
    };

    if let Some(host) = &args.host {
        config.host.clone_from(host);
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if args.password.is_some() {
        config.password.clone_from(&args.password);
    }
    config.validate()?;
    Ok(config)
}

fn print_table(parameters: &[Parameter]) {
    println!("\n=== Projector Status ===");
    for parameter in parameters {
        let value = parameter.value.as_deref().unwrap_or("-");
        let label = if parameter.label.is_empty() {
            parameter.key.as_str()
        } else {
            parameter.label
        };
        println!("{:<24} {:<8} {value}", label, parameter.key);
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    env_logger::Builder::new()
        .filter_level(config.log_level.as_level_filter())
        .parse_default_env()
        .init();

    println!("Connecting to {}:{}...", config.host, config.port);
    let (events_tx, events_rx) = mpsc::channel();
    let handle = start_projector_task(&config, events_tx).context("Failed to start")?;

    for command in &args.commands {
        handle.request_command(command.as_str());
    }

    let deadline = Instant::now() + Duration::from_secs(args.duration);
    let mut auth_failed = false;
    while let Some(left) = deadline.checked_duration_since(Instant::now()) {
        match events_rx.recv_timeout(left) {
            Ok(SessionEvent::StatusChanged { key, value }) => {
                if args.verbose {
                    println!("  {key} = {value}");
                }
            }
            Ok(SessionEvent::ConnectionChanged { status, detail }) => {
                println!("  [{status}] {detail}");
                if status == ConnectionStatus::AuthFailed {
                    auth_failed = true;
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => break,
            Err(RecvTimeoutError::Disconnected) => bail!("Projector task stopped"),
        }
    }

    let parameters = handle.snapshot(SNAPSHOT_TIMEOUT)?;
    handle.shutdown();

    if auth_failed {
        bail!("Projector rejected the password");
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&parameters)?);
    } else {
        print_table(&parameters);
    }

    Ok(())
}
