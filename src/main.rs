//! Salus - a poller and controller for Salus iT500 cloud thermostats.
//!
//! The Salus iT500 thermostat is only reachable through the Salus cloud. This
//! program logs in the cloud, keeps the session token alive, polls the device
//! state and sends control commands.
//!
//! # Configuration
//!
//! Create a `config.yaml` file with your settings:
//!
//! ```yaml
//! account:
//!   username: "me@example.com"
//!   password: "your-password"
//!   device_id: "12345"
//!
//! gateway:
//!   backend: api
//!   polling_interval: 60
//! ```
//!
//! # Environment Variable Overrides
//!
//! Override any configuration value using environment variables with the `SALUS_` prefix:
//!
//! ```bash
//! export SALUS_ACCOUNT__PASSWORD="your-password"
//! export SALUS_GATEWAY__BACKEND="web"
//! ```
//!
//! # Usage
//!
//! ```bash
//! salus --config config.yaml watch
//! salus --config config.yaml state
//! salus --config config.yaml set-temperature 21.5
//! salus --config config.yaml hot-water off
//! ```
//!
//! # Architecture
//!
//! - [`client`] - Salus cloud clients (mobile application API and web portal)
//! - [`config`] - YAML configuration with environment variable overrides
//! - [`coordinator`] - State refresh, listeners and the polling task
//! - [`state`] - Normalized thermostat state
//!
//! # Environment Variables
//!
//! - `RUST_LOG` - Controls logging level (default: `info`)

use std::{process::ExitCode, sync::Arc};

use clap::{Parser, Subcommand, ValueEnum};
use env_logger::Env;
use log::{error, info};
use tokio::sync::Mutex;

use crate::{
    client::{SalusClient, create_client_from},
    config::Config,
    coordinator::{Coordinator, start_polling_task},
    state::{HvacMode, TemperatureSpan},
};

mod client;
mod config;
mod coordinator;
mod state;

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the YAML configuration file.
    ///
    /// See the [`config`] module for the expected format.
    #[arg(short, long)]
    config: String,

    #[command(subcommand)]
    command: Command,
}

/// Hot water switch position.
#[derive(Clone, Copy, Debug, ValueEnum)]
enum Switch {
    On,
    Off,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll the thermostat and log every refreshed state
    Watch,
    /// Print the current state
    State,
    /// Set the target temperature in °C
    SetTemperature { temperature: f64 },
    /// Set the heating mode
    SetMode {
        #[arg(value_enum)]
        mode: HvacMode,
    },
    /// Switch the heating on
    TurnOn,
    /// Switch the heating off
    TurnOff,
    /// Enable or disable hot water
    HotWater {
        #[arg(value_enum)]
        switch: Switch,
    },
    /// Set the freeze protection temperature in °C
    Frost { temperature: f64 },
    /// Set the room sensor offset in °C
    Offset {
        #[arg(allow_negative_numbers = true)]
        offset: f64,
    },
    /// Set the switching hysteresis in °C
    Span {
        #[arg(value_enum)]
        span: TemperatureSpan,
    },
}

/// Runs the command against the thermostat.
///
/// `watch` runs until the process is terminated, every other command performs
/// one operation and prints the resulting state.
async fn run(
    command: Command,
    mut coordinator: Coordinator<SalusClient>,
    polling_interval: u64,
) -> Result<(), anyhow::Error> {
    match command {
        Command::Watch => {
            coordinator.subscribe(|state| info!("thermostat state: {}", state));
            let coordinator = Arc::new(Mutex::new(coordinator));
            start_polling_task(coordinator, polling_interval).await?;
            return Ok(());
        }
        Command::State => {
            coordinator.refresh().await?;
        }
        Command::SetTemperature { temperature } => coordinator.set_temperature(temperature).await?,
        Command::SetMode { mode } => coordinator.set_hvac_mode(mode).await?,
        Command::TurnOn => coordinator.turn_on().await?,
        Command::TurnOff => coordinator.turn_off().await?,
        Command::HotWater { switch } => {
            coordinator
                .set_hot_water(matches!(switch, Switch::On))
                .await?
        }
        Command::Frost { temperature } => {
            coordinator
                .set_freeze_protection_temperature(temperature)
                .await?
        }
        Command::Offset { offset } => coordinator.set_temperature_offset(offset).await?,
        Command::Span { span } => coordinator.set_temperature_span(span).await?,
    }

    if let Some(state) = coordinator.data() {
        println!("{}", state);
    }
    Ok(())
}

/// Main entry point.
///
/// 1. **Logging Setup**: `info` level by default, overridden by `RUST_LOG`
/// 2. **Argument Parsing**: with `clap`
/// 3. **Configuration Loading**: YAML file plus `SALUS_` environment overrides
/// 4. **Client Creation**: mobile application API or web portal client
/// 5. **Execution**: either the polling loop (`watch`) or a one-shot command
#[tokio::main]
async fn main() -> ExitCode {
    // Put logger at info level by default
    let env = Env::default().filter_or("RUST_LOG", "info");
    env_logger::init_from_env(env);

    info!("Starting salus {}...", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load config file: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let client = match create_client_from(&config) {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to create the salus client: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let coordinator = Coordinator::new(client);

    match run(args.command, coordinator, config.gateway.polling_interval).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
