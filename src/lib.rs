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

//! Bluetooth RFCOMM to TCP bridge.
//!
//! Connects to one paired serial-profile peripheral and relays raw bytes
//! between it and any number of TCP clients.

pub mod bluetooth;
pub mod bridge;
pub mod config;
pub mod error;
pub mod events;
pub mod shutdown;
pub mod state;

pub use error::{BridgeError, ChannelError};
