//! Mock PJLink projector for testing without hardware
//!
//! Usage: cargo run -p pjlink-mock-projector -- --password secret
//! Then point pjlink-ctl at 127.0.0.1

use anyhow::{Context, Result};
use clap::Parser;
use log::LevelFilter;
use pjlink_lib::emulator::{DeviceState, ProjectorEmulator};
use pjlink_lib::DEFAULT_PORT;
use std::net::TcpListener;

#[derive(Parser, Debug)]
#[command(name = "pjlink-mock-projector")]
#[command(about = "Emulated PJLink projector")]
struct Args {
    /// Address to listen on
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// TCP port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Require this password (no authentication when absent)
    #[arg(long)]
    password: Option<String>,

    /// PJLink class to report
    #[arg(short, long, default_value = "2", value_parser = clap::value_parser!(u8).range(1..=2))]
    class: u8,

    /// Projector name reported by %1NAME
    #[arg(short, long)]
    name: Option<String>,

    /// Start with the projector powered on
    #[arg(long)]
    powered: bool,

    /// Log every command and reply
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    let mut device = DeviceState {
        class: args.class,
        ..DeviceState::default()
    };
    if let Some(name) = args.name {
        device.name = name;
    }
    if args.powered {
        device.power = pjlink_lib::PowerState::On;
    }

    let emulator = ProjectorEmulator::new(device, args.password);
    let address = format!("{}:{}", args.bind, args.port);
    let listener =
        TcpListener::bind(&address).with_context(|| format!("Failed to bind {address}"))?;

    emulator.run(&listener).context("Listener failed")
}
