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

//! Platform Bluetooth API seam.

use async_trait::async_trait;
use uuid::Uuid;

use super::channel::BluetoothChannel;
use super::selector::PeripheralDescriptor;
use crate::error::Result;

/// Standard SPP UUID.
pub const SPP_UUID: Uuid = Uuid::from_u128(0x00001101_0000_1000_8000_00805F9B34FB);

/// What the bridge needs from the host Bluetooth stack.
#[async_trait]
pub trait BluetoothPlatform: Send + Sync {
    /// Power the adapter on if it is off. Returns `true` if it was off.
    async fn ensure_powered(&self) -> Result<bool>;

    /// Paired devices, in the order the platform reports them.
    async fn paired_devices(&self) -> Result<Vec<PeripheralDescriptor>>;

    /// Open an RFCOMM connection to `address` for the SPP service.
    ///
    /// Makes a single attempt.
    async fn connect(&self, address: &str) -> Result<BluetoothChannel>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spp_uuid() {
        assert_eq!(
            SPP_UUID.to_string().to_uppercase(),
            "00001101-0000-1000-8000-00805F9B34FB"
        );
    }
}
