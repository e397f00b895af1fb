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

//! Status events for the presentation layer.
//!
//! Every significant step of a bridge run is emitted as a [`BridgeEvent`].
//! Its `Display` form is the human-readable status line.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::bridge::Direction;
use crate::state::{BridgeState, BridgeStatus};

/// Events emitted while the bridge runs.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    /// The adapter was off and has been powered on.
    AdapterPoweredOn,
    /// A paired device was enumerated.
    DeviceFound { name: String, address: String },
    /// The selector picked a device.
    DeviceMatched {
        name: String,
        address: String,
        pattern: String,
    },
    /// No paired device matched the configured names.
    NoMatchingDevice,
    /// RFCOMM connect started.
    Connecting { address: String },
    /// RFCOMM channel established.
    Connected { address: String },
    /// RFCOMM connect failed; the run ends.
    ConnectFailed { address: String, error: String },
    /// TCP listener bound and accepting.
    Listening { addr: SocketAddr },
    /// A TCP client was accepted and its relay pair started.
    ClientConnected { peer: SocketAddr },
    /// A TCP client was refused.
    ClientRejected { peer: SocketAddr, reason: String },
    /// One relay direction stopped on an I/O error.
    RelayError {
        peer: SocketAddr,
        direction: Direction,
        error: String,
    },
    /// Both directions of a client's relay pair have ended.
    ClientDisconnected { peer: SocketAddr },
    /// The Bluetooth channel broke while serving and has been closed.
    PeripheralDisconnected { address: String, reason: String },
    /// Shutdown started.
    ShuttingDown { reason: String },
    /// The Bluetooth channel was closed.
    ChannelClosed { address: String },
    /// The TCP listener socket was closed.
    ListenerClosed,
}

impl fmt::Display for BridgeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeEvent::AdapterPoweredOn => write!(f, "Bluetooth adapter enabled"),
            BridgeEvent::DeviceFound { name, address } => {
                write!(f, "Found Bluetooth device: {} - {}", name, address)
            }
            BridgeEvent::DeviceMatched {
                name,
                address,
                pattern,
            } => write!(f, "Matched device '{}' ({}) with '{}'", name, address, pattern),
            BridgeEvent::NoMatchingDevice => write!(f, "No matching Bluetooth devices found"),
            BridgeEvent::Connecting { address } => write!(f, "Connecting to {}...", address),
            BridgeEvent::Connected { address } => write!(f, "Connected to {}", address),
            BridgeEvent::ConnectFailed { address, error } => {
                write!(f, "Failed to connect to {}: {}", address, error)
            }
            BridgeEvent::Listening { addr } => write!(
                f,
                "TCP server started on {}. Waiting for client connection...",
                addr
            ),
            BridgeEvent::ClientConnected { peer } => write!(f, "Client connected from {}", peer),
            BridgeEvent::ClientRejected { peer, reason } => {
                write!(f, "Client {} rejected: {}", peer, reason)
            }
            BridgeEvent::RelayError {
                peer,
                direction,
                error,
            } => write!(f, "Relay {} for {} stopped: {}", direction, peer, error),
            BridgeEvent::ClientDisconnected { peer } => {
                write!(f, "Client {} disconnected", peer)
            }
            BridgeEvent::PeripheralDisconnected { address, reason } => write!(
                f,
                "Lost Bluetooth connection to {} ({}); new clients will be refused",
                address, reason
            ),
            BridgeEvent::ShuttingDown { reason } => {
                write!(f, "Shutting down gracefully ({})", reason)
            }
            BridgeEvent::ChannelClosed { address } => {
                write!(f, "Bluetooth socket to {} closed", address)
            }
            BridgeEvent::ListenerClosed => write!(f, "TCP server socket closed"),
        }
    }
}

/// Sending half of the status stream. Emitting never blocks and never fails;
/// events are dropped once the receiver is gone.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<BridgeEvent>,
}

impl EventSender {
    pub fn emit(&self, event: BridgeEvent) {
        let _ = self.tx.send(event);
    }
}

pub type EventReceiver = mpsc::UnboundedReceiver<BridgeEvent>;

/// Create a status stream.
pub fn channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, rx)
}

/// Folds status events into [`BridgeState`] and writes them to the log.
pub struct EventProcessor {
    state: Arc<BridgeState>,
}

impl EventProcessor {
    pub fn new(state: Arc<BridgeState>) -> Self {
        Self { state }
    }

    /// Process a single event.
    pub fn process_event(&self, event: &BridgeEvent) {
        match event {
            BridgeEvent::NoMatchingDevice | BridgeEvent::ConnectFailed { .. } => {
                error!("{}", event);
            }
            BridgeEvent::ClientRejected { .. }
            | BridgeEvent::RelayError { .. }
            | BridgeEvent::PeripheralDisconnected { .. } => {
                warn!("{}", event);
            }
            _ => info!("{}", event),
        }

        if self.state.get_status() == BridgeStatus::ShuttingDown {
            if let BridgeEvent::ClientDisconnected { .. } = event {
                self.state.client_disconnected();
            }
            return;
        }

        match event {
            BridgeEvent::Connecting { address } => self.state.set_connecting(address.clone()),
            BridgeEvent::Connected { address } => self.state.set_connected(address.clone()),
            BridgeEvent::NoMatchingDevice | BridgeEvent::ConnectFailed { .. } => {
                self.state.set_failed()
            }
            BridgeEvent::ClientConnected { .. } => self.state.client_connected(),
            BridgeEvent::ClientDisconnected { .. } => self.state.client_disconnected(),
            BridgeEvent::PeripheralDisconnected { .. } => self.state.set_disconnected(),
            BridgeEvent::ShuttingDown { .. } => self.state.set_shutting_down(),
            _ => {}
        }
    }

    /// Drain the stream until every sender is gone.
    pub async fn run(self, mut rx: EventReceiver) {
        while let Some(event) = rx.recv().await {
            self.process_event(&event);
        }
    }
}
