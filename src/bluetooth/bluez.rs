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

//! BlueZ implementation of [`BluetoothPlatform`].

use async_trait::async_trait;
use bluer::rfcomm::{Profile, Role, SocketAddr, Stream};
use bluer::{Adapter, Address, Session};
use futures::StreamExt;
use tracing::{debug, info};

use super::channel::BluetoothChannel;
use super::platform::{BluetoothPlatform, SPP_UUID};
use super::selector::PeripheralDescriptor;
use crate::error::{BridgeError, Result};

impl From<bluer::Error> for BridgeError {
    fn from(e: bluer::Error) -> Self {
        BridgeError::Adapter(e.to_string())
    }
}

/// Bluetooth access through the BlueZ daemon.
pub struct BluezPlatform {
    session: Session,
    adapter: Adapter,
    rfcomm_channel: Option<u8>,
}

impl BluezPlatform {
    /// Open a BlueZ session on the named adapter, or the default one.
    ///
    /// With `rfcomm_channel` set, connections go straight to that channel
    /// instead of resolving the SPP service through SDP.
    pub async fn new(adapter_name: Option<&str>, rfcomm_channel: Option<u8>) -> Result<Self> {
        let session = Session::new().await?;
        debug!("BlueZ session created");

        let adapter = match adapter_name {
            Some(name) => session.adapter(name)?,
            None => session.default_adapter().await?,
        };
        info!("Using Bluetooth adapter: {}", adapter.name());

        Ok(Self {
            session,
            adapter,
            rfcomm_channel,
        })
    }

    async fn connect_channel(
        &self,
        address: &str,
        target: Address,
        channel: u8,
    ) -> Result<BluetoothChannel> {
        info!("Connecting to {} on RFCOMM channel {}", address, channel);
        let stream = Stream::connect(SocketAddr::new(target, channel))
            .await
            .map_err(|e| BridgeError::ConnectFailed {
                address: address.to_string(),
                reason: e.to_string(),
            })?;

        Ok(BluetoothChannel::from_stream(address, stream))
    }

    async fn connect_spp(&self, address: &str, target: Address) -> Result<BluetoothChannel> {
        let connect_failed = |reason: String| BridgeError::ConnectFailed {
            address: address.to_string(),
            reason,
        };

        // BlueZ resolves the RFCOMM channel from the peer's SDP record and hands
        // the connected socket to this client profile.
        let profile = Profile {
            uuid: SPP_UUID,
            name: Some("rfcomm-bridge".to_string()),
            role: Some(Role::Client),
            require_authentication: Some(false),
            require_authorization: Some(false),
            ..Default::default()
        };
        let mut handle = self.session.register_profile(profile).await?;
        debug!("SPP client profile registered (UUID: {})", SPP_UUID);

        let device = self.adapter.device(target)?;
        info!("Connecting to {} (SPP)", address);

        let connect = device.connect_profile(&SPP_UUID);
        tokio::pin!(connect);

        let request = tokio::select! {
            res = &mut connect => {
                res.map_err(|e| connect_failed(e.to_string()))?;
                handle.next().await
            }
            req = handle.next() => req,
        };

        let request =
            request.ok_or_else(|| connect_failed("profile closed before connecting".to_string()))?;
        let stream = request
            .accept()
            .map_err(|e| connect_failed(e.to_string()))?;

        Ok(BluetoothChannel::from_stream(address, stream).with_registration(handle))
    }
}

#[async_trait]
impl BluetoothPlatform for BluezPlatform {
    async fn ensure_powered(&self) -> Result<bool> {
        if self.adapter.is_powered().await? {
            return Ok(false);
        }

        info!("Powering on Bluetooth adapter...");
        self.adapter.set_powered(true).await?;
        Ok(true)
    }

    async fn paired_devices(&self) -> Result<Vec<PeripheralDescriptor>> {
        let mut devices = Vec::new();

        for addr in self.adapter.device_addresses().await? {
            let device = self.adapter.device(addr)?;
            if device.is_paired().await? {
                let name = device.alias().await.unwrap_or_else(|_| addr.to_string());
                devices.push(PeripheralDescriptor::new(name, addr.to_string()));
            }
        }

        Ok(devices)
    }

    async fn connect(&self, address: &str) -> Result<BluetoothChannel> {
        let target: Address = address
            .parse()
            .map_err(|_| BridgeError::InvalidAddress(address.to_string()))?;

        match self.rfcomm_channel {
            Some(channel) => self.connect_channel(address, target, channel).await,
            None => self.connect_spp(address, target).await,
        }
    }
}
