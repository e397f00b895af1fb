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

//! Bridge state shared between the setup task, relays and the status log.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::bridge::Direction;

/// Lifecycle of one bridge run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeStatus {
    Idle,
    Connecting,
    Connected,
    /// The peripheral went away while serving.
    Disconnected,
    ShuttingDown,
    Failed,
}

impl BridgeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeStatus::Idle => "Idle",
            BridgeStatus::Connecting => "Connecting...",
            BridgeStatus::Connected => "Connected",
            BridgeStatus::Disconnected => "Disconnected",
            BridgeStatus::ShuttingDown => "Shutting down",
            BridgeStatus::Failed => "Failed",
        }
    }
}

/// Shared bridge state.
#[derive(Debug)]
pub struct BridgeState {
    /// Current status.
    pub status: RwLock<BridgeStatus>,

    /// Address of the connected peripheral.
    pub peer_address: RwLock<Option<String>>,

    active_clients: AtomicUsize,
    clients_served: AtomicU64,
    bytes_to_bluetooth: AtomicU64,
    bytes_from_bluetooth: AtomicU64,
}

impl Default for BridgeState {
    fn default() -> Self {
        Self {
            status: RwLock::new(BridgeStatus::Idle),
            peer_address: RwLock::new(None),
            active_clients: AtomicUsize::new(0),
            clients_served: AtomicU64::new(0),
            bytes_to_bluetooth: AtomicU64::new(0),
            bytes_from_bluetooth: AtomicU64::new(0),
        }
    }
}

impl BridgeState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_connecting(&self, address: String) {
        *self.status.write() = BridgeStatus::Connecting;
        *self.peer_address.write() = Some(address);
    }

    pub fn set_connected(&self, address: String) {
        *self.status.write() = BridgeStatus::Connected;
        *self.peer_address.write() = Some(address);
    }

    pub fn set_disconnected(&self) {
        *self.status.write() = BridgeStatus::Disconnected;
    }

    pub fn set_failed(&self) {
        *self.status.write() = BridgeStatus::Failed;
    }

    /// Terminal; later status updates are ignored.
    pub fn set_shutting_down(&self) {
        *self.status.write() = BridgeStatus::ShuttingDown;
    }

    pub fn get_status(&self) -> BridgeStatus {
        *self.status.read()
    }

    pub fn get_peer_address(&self) -> Option<String> {
        self.peer_address.read().clone()
    }

    pub fn client_connected(&self) {
        self.active_clients.fetch_add(1, Ordering::Relaxed);
        self.clients_served.fetch_add(1, Ordering::Relaxed);
    }

    pub fn client_disconnected(&self) {
        let _ = self
            .active_clients
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn active_clients(&self) -> usize {
        self.active_clients.load(Ordering::Relaxed)
    }

    pub fn clients_served(&self) -> u64 {
        self.clients_served.load(Ordering::Relaxed)
    }

    pub fn record_relayed(&self, direction: Direction, bytes: usize) {
        let counter = match direction {
            Direction::BluetoothToTcp => &self.bytes_from_bluetooth,
            Direction::TcpToBluetooth => &self.bytes_to_bluetooth,
        };
        counter.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn bytes_relayed(&self, direction: Direction) -> u64 {
        match direction {
            Direction::BluetoothToTcp => self.bytes_from_bluetooth.load(Ordering::Relaxed),
            Direction::TcpToBluetooth => self.bytes_to_bluetooth.load(Ordering::Relaxed),
        }
    }

    /// One-line summary for the exit log.
    pub fn summary(&self) -> String {
        format!(
            "{} clients served, {} bytes to Bluetooth, {} bytes from Bluetooth",
            self.clients_served(),
            self.bytes_relayed(Direction::TcpToBluetooth),
            self.bytes_relayed(Direction::BluetoothToTcp),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_count_never_underflows() {
        let state = BridgeState::new();
        state.client_disconnected();
        assert_eq!(state.active_clients(), 0);

        state.client_connected();
        state.client_connected();
        state.client_disconnected();
        assert_eq!(state.active_clients(), 1);
        assert_eq!(state.clients_served(), 2);
    }

    #[test]
    fn test_byte_counters_by_direction() {
        let state = BridgeState::new();
        state.record_relayed(Direction::TcpToBluetooth, 4);
        state.record_relayed(Direction::TcpToBluetooth, 6);
        state.record_relayed(Direction::BluetoothToTcp, 3);

        assert_eq!(state.bytes_relayed(Direction::TcpToBluetooth), 10);
        assert_eq!(state.bytes_relayed(Direction::BluetoothToTcp), 3);
        assert!(state.summary().contains("10 bytes to Bluetooth"));
    }
}
