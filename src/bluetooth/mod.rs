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

//! Bluetooth side of the bridge.
//!
//! Picks the peripheral by name and owns the RFCOMM channel to it.

#[cfg(feature = "bluez")]
mod bluez;
mod channel;
mod platform;
mod selector;

#[cfg(feature = "bluez")]
pub use bluez::BluezPlatform;
pub use channel::BluetoothChannel;
pub use platform::{BluetoothPlatform, SPP_UUID};
pub use selector::{select_device, DeviceMatch, PeripheralDescriptor};
