// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! rfcomm-bridge command-line entry point.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rfcomm_bridge::bluetooth::{select_device, BluetoothPlatform, BluezPlatform};
use rfcomm_bridge::bridge::Bridge;
use rfcomm_bridge::config::{Config, ConfigOverrides};
use rfcomm_bridge::events::{self, EventProcessor};
use rfcomm_bridge::shutdown::{self, ShutdownCoordinator, ShutdownReason};
use rfcomm_bridge::state::BridgeState;
use rfcomm_bridge::BridgeError;

/// How long to wait for the accept loop to close its socket after shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "rfcomm-bridge", version, about = "Relay a Bluetooth serial link to TCP clients")]
struct Cli {
    /// Configuration file (default: ~/.config/rfcomm-bridge/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the bridge (default)
    Run(RunArgs),
    /// List paired devices and show which one would be selected
    Devices,
}

#[derive(Args, Default)]
struct RunArgs {
    /// TCP bind host
    #[arg(long)]
    host: Option<String>,

    /// TCP bind port
    #[arg(short, long)]
    port: Option<u16>,

    /// Accepted device-name substring; repeat to give several
    #[arg(short, long = "device")]
    devices: Vec<String>,

    /// Connect to this Bluetooth address directly
    #[arg(short, long)]
    address: Option<String>,

    /// Maximum concurrent TCP clients
    #[arg(long)]
    max_clients: Option<usize>,
}

impl RunArgs {
    fn overrides(self) -> ConfigOverrides {
        ConfigOverrides {
            host: self.host,
            port: self.port,
            device_names: self.devices,
            address: self.address,
            max_clients: self.max_clients,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let directive = if cli.verbose {
        "rfcomm_bridge=debug"
    } else {
        "rfcomm_bridge=info"
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(directive.parse()?))
        .init();

    info!("Starting rfcomm-bridge v{}...", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let command = cli.command.unwrap_or(Command::Run(RunArgs::default()));
    let list_only = match command {
        Command::Run(args) => {
            config.apply_overrides(args.overrides());
            false
        }
        Command::Devices => true,
    };
    config.validate()?;
    info!("Configuration loaded: {}", config.describe());

    let platform = BluezPlatform::new(
        config.bluetooth.adapter.as_deref(),
        config.bluetooth.rfcomm_channel,
    )
    .await?;

    let state = BridgeState::new();
    let (events, event_rx) = events::channel();
    let status_log = tokio::spawn(EventProcessor::new(state.clone()).run(event_rx));

    let coordinator = ShutdownCoordinator::new(events.clone());
    let bridge = Bridge::new(config, platform, coordinator.clone(), events, state.clone());

    let result = if list_only {
        list_devices(&bridge).await
    } else {
        run_bridge(&bridge, &coordinator).await
    };

    // Let the status log catch up; relay tasks may still hold senders.
    drop(bridge);
    drop(coordinator);
    let _ = tokio::time::timeout(Duration::from_millis(200), status_log).await;

    if !list_only {
        info!("{}", state.summary());
    }
    info!("rfcomm-bridge stopped");
    result
}

/// Run until a termination signal arrives or setup fails.
async fn run_bridge<P: BluetoothPlatform>(
    bridge: &Bridge<P>,
    coordinator: &ShutdownCoordinator,
) -> Result<()> {
    let run = bridge.run();
    tokio::pin!(run);

    tokio::select! {
        res = &mut run => {
            if let Err(e) = res {
                coordinator.shutdown(ShutdownReason::SetupFailed);
                return Err(e.into());
            }
            Ok(())
        }
        reason = shutdown::wait_for_signal() => {
            coordinator.shutdown(reason?);
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut run).await {
                Ok(Ok(())) | Ok(Err(BridgeError::Cancelled)) => Ok(()),
                Ok(Err(e)) => Err(e.into()),
                Err(_) => {
                    warn!("Listener did not close within {:?}", SHUTDOWN_GRACE);
                    Ok(())
                }
            }
        }
    }
}

/// Print paired devices and the selector's pick.
async fn list_devices<P: BluetoothPlatform>(bridge: &Bridge<P>) -> Result<()> {
    let devices = bridge.survey().await?;
    let patterns = &bridge.config().bluetooth.device_names;

    if devices.is_empty() {
        println!("No paired devices");
    }
    for device in &devices {
        println!("{}  {}", device.address, device.name);
    }

    match select_device(&devices, patterns) {
        Some(selected) => println!(
            "Would connect to {} ({}), matched '{}'",
            selected.device.name,
            selected.address(),
            selected.pattern
        ),
        None => println!("No paired device matches {:?}", patterns),
    }

    Ok(())
}
