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

//! Bridge setup: select the peripheral, connect, bind, then serve clients.

mod listener;
mod relay;

pub use listener::{local_ip_address, RelayListener};
pub use relay::{Direction, RelayContext, RelayEnd, RelayPair};

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::bluetooth::{select_device, BluetoothChannel, BluetoothPlatform, PeripheralDescriptor};
use crate::config::Config;
use crate::error::{BridgeError, Result};
use crate::events::{BridgeEvent, EventSender};
use crate::shutdown::ShutdownCoordinator;
use crate::state::BridgeState;

/// One bridge run over a Bluetooth platform.
pub struct Bridge<P> {
    config: Config,
    platform: P,
    coordinator: Arc<ShutdownCoordinator>,
    events: EventSender,
    state: Arc<BridgeState>,
}

impl<P: BluetoothPlatform> Bridge<P> {
    pub fn new(
        config: Config,
        platform: P,
        coordinator: Arc<ShutdownCoordinator>,
        events: EventSender,
        state: Arc<BridgeState>,
    ) -> Self {
        Self {
            config,
            platform,
            coordinator,
            events,
            state,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Power the adapter if needed and list paired devices.
    pub async fn survey(&self) -> Result<Vec<PeripheralDescriptor>> {
        if self.platform.ensure_powered().await? {
            self.events.emit(BridgeEvent::AdapterPoweredOn);
        }

        let devices = self.platform.paired_devices().await?;
        for device in &devices {
            self.events.emit(BridgeEvent::DeviceFound {
                name: device.name.clone(),
                address: device.address.clone(),
            });
        }

        Ok(devices)
    }

    /// Address to connect to: the configured one, or the first paired device
    /// whose name matches.
    pub async fn select_address(&self) -> Result<String> {
        if let Some(address) = &self.config.bluetooth.address {
            info!("Using configured device address {}", address);
            if self.platform.ensure_powered().await? {
                self.events.emit(BridgeEvent::AdapterPoweredOn);
            }
            return Ok(address.clone());
        }

        let devices = self.survey().await?;
        let patterns = &self.config.bluetooth.device_names;

        match select_device(&devices, patterns) {
            Some(selected) => {
                self.events.emit(BridgeEvent::DeviceMatched {
                    name: selected.device.name.clone(),
                    address: selected.device.address.clone(),
                    pattern: selected.pattern.to_string(),
                });
                Ok(selected.address().to_string())
            }
            None => {
                self.events.emit(BridgeEvent::NoMatchingDevice);
                Err(BridgeError::NoMatchingDevice {
                    patterns: patterns.clone(),
                })
            }
        }
    }

    /// Select and connect to the peripheral. One attempt, no retry.
    ///
    /// The channel is registered with the shutdown coordinator before it is
    /// returned.
    pub async fn connect_peripheral(&self) -> Result<Arc<BluetoothChannel>> {
        if self.coordinator.is_shutting_down() {
            return Err(BridgeError::Cancelled);
        }

        let address = self.select_address().await?;
        self.events.emit(BridgeEvent::Connecting {
            address: address.clone(),
        });

        let secs = self.config.bluetooth.connect_timeout_secs;
        let shutdown = self.coordinator.signal();
        let connected = tokio::select! {
            _ = shutdown.triggered() => Err(BridgeError::Cancelled),
            res = tokio::time::timeout(Duration::from_secs(secs), self.platform.connect(&address)) => {
                res.unwrap_or_else(|_| Err(BridgeError::ConnectTimeout {
                    address: address.clone(),
                    secs,
                }))
            }
        };

        match connected {
            Ok(channel) => {
                self.events.emit(BridgeEvent::Connected {
                    address: address.clone(),
                });
                let channel = Arc::new(channel);
                self.coordinator.attach_channel(channel.clone());
                Ok(channel)
            }
            Err(BridgeError::Cancelled) => Err(BridgeError::Cancelled),
            Err(e) => {
                self.events.emit(BridgeEvent::ConnectFailed {
                    address,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Relay settings for this run.
    pub fn relay_context(&self) -> RelayContext {
        RelayContext {
            buffer_size: self.config.relay.buffer_size,
            log_payloads: self.config.relay.log_payloads,
            shutdown: self.coordinator.signal(),
            events: self.events.clone(),
            state: self.state.clone(),
        }
    }

    /// Connect, bind and serve until shutdown.
    ///
    /// Setup failures are returned; once serving, only shutdown ends the run.
    pub async fn run(&self) -> Result<()> {
        let channel = self.connect_peripheral().await?;
        let listener = RelayListener::bind(&self.config.tcp).await?;

        let addr = listener.local_addr();
        if addr.ip().is_unspecified() {
            if let Some(ip) = local_ip_address() {
                info!("Clients can connect to {}:{}", ip, addr.port());
            }
        }

        listener.serve(channel, self.relay_context()).await;
        Ok(())
    }
}
