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

//! Coordinated shutdown.
//!
//! A [`ShutdownSignal`] is handed to every task when it is created. The
//! [`ShutdownCoordinator`] owns the only trigger for the process-wide signal,
//! flips it once, and force-closes the Bluetooth channel so blocked readers
//! return. The TCP listener closes itself when its accept loop sees the signal.

use parking_lot::Mutex;
use std::fmt;
use std::io;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::bluetooth::BluetoothChannel;
use crate::events::{BridgeEvent, EventSender};

/// Create a linked trigger/signal pair. The signal starts untriggered.
pub fn signal() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx: Arc::new(tx) }, ShutdownSignal { rx })
}

/// Sets the signal. Setting is one-shot; it is never cleared.
#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownTrigger {
    /// Trigger the signal. Returns `true` only for the call that flipped it.
    pub fn trigger(&self) -> bool {
        !self.tx.send_replace(true)
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Observes a [`ShutdownTrigger`]. Cheap to clone into every task.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Non-blocking check, used before each I/O attempt.
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the signal is set.
    ///
    /// A trigger that is dropped without firing counts as fired: nothing can
    /// set the signal anymore, so waiters must not hang on it.
    pub async fn triggered(&self) {
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(|set| *set).await;
    }
}

/// Why the bridge is going down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// OS termination signal (SIGINT, SIGTERM).
    Signal(&'static str),
    /// Explicit request from the embedding application.
    Requested,
    /// The setup task gave up.
    SetupFailed,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Signal(name) => write!(f, "received {}", name),
            ShutdownReason::Requested => write!(f, "requested"),
            ShutdownReason::SetupFailed => write!(f, "setup failed"),
        }
    }
}

/// Running -> ShuttingDown, exactly once.
pub struct ShutdownCoordinator {
    trigger: ShutdownTrigger,
    signal: ShutdownSignal,
    channel: Mutex<Option<Arc<BluetoothChannel>>>,
    events: EventSender,
}

impl ShutdownCoordinator {
    pub fn new(events: EventSender) -> Arc<Self> {
        let (trigger, signal) = signal();
        Arc::new(Self {
            trigger,
            signal,
            channel: Mutex::new(None),
            events,
        })
    }

    /// Signal to pass into a newly created task.
    pub fn signal(&self) -> ShutdownSignal {
        self.signal.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.trigger.is_triggered()
    }

    /// Register the live Bluetooth channel so shutdown can close it.
    ///
    /// A channel attached after shutdown has started is closed right away.
    pub fn attach_channel(&self, channel: Arc<BluetoothChannel>) {
        let mut slot = self.channel.lock();
        if self.trigger.is_triggered() {
            channel.close();
            return;
        }
        *slot = Some(channel);
    }

    /// Start shutdown. Returns `false` if it was already started.
    pub fn shutdown(&self, reason: ShutdownReason) -> bool {
        // Hold the slot while flipping the flag so a concurrent attach either
        // lands before (and is closed below) or sees the flag set.
        let mut slot = self.channel.lock();
        if !self.trigger.trigger() {
            debug!("Shutdown already in progress ({})", reason);
            return false;
        }

        info!("Shutting down: {}", reason);
        self.events.emit(BridgeEvent::ShuttingDown {
            reason: reason.to_string(),
        });

        // A channel already closed after a peripheral loss was reported then.
        if let Some(channel) = slot.take().filter(|channel| channel.close()) {
            self.events.emit(BridgeEvent::ChannelClosed {
                address: channel.peer_address().to_string(),
            });
        }

        true
    }
}

/// Wait for SIGINT or SIGTERM.
pub async fn wait_for_signal() -> io::Result<ShutdownReason> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res?;
                Ok(ShutdownReason::Signal("SIGINT"))
            }
            _ = terminate.recv() => Ok(ShutdownReason::Signal("SIGTERM")),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok(ShutdownReason::Signal("Ctrl-C"))
    }
}
