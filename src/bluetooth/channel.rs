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

//! The live RFCOMM connection shared by all relay pairs.

use parking_lot::Mutex as SyncMutex;
use std::any::Any;
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{watch, Mutex};
use tracing::debug;

use crate::error::ChannelError;

type Reader = Box<dyn AsyncRead + Send + Unpin>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// An established byte stream to one peripheral.
///
/// Reads and writes each take their own async lock, so one reader and one
/// writer can be in flight at the same time. A single `write` call is never
/// interleaved with another writer's bytes. `close` wakes every blocked
/// `read`/`write` immediately; they return [`ChannelError::Closed`].
pub struct BluetoothChannel {
    peer_address: String,
    reader: Mutex<Option<Reader>>,
    writer: Mutex<Option<Writer>>,
    closed: watch::Sender<bool>,
    registration: SyncMutex<Option<Box<dyn Any + Send>>>,
}

impl BluetoothChannel {
    /// Wrap any bidirectional stream, e.g. an RFCOMM socket.
    pub fn from_stream<S>(peer_address: impl Into<String>, stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (closed, _) = watch::channel(false);

        Self {
            peer_address: peer_address.into(),
            reader: Mutex::new(Some(Box::new(reader))),
            writer: Mutex::new(Some(Box::new(writer))),
            closed,
            registration: SyncMutex::new(None),
        }
    }

    /// Keep `guard` alive for as long as the channel is open.
    pub fn with_registration(self, guard: impl Any + Send) -> Self {
        *self.registration.lock() = Some(Box::new(guard));
        self
    }

    pub fn peer_address(&self) -> &str {
        &self.peer_address
    }

    pub fn is_open(&self) -> bool {
        !*self.closed.borrow()
    }

    /// Read at least one byte into `buf`.
    ///
    /// `Ok(0)` means the peer closed the stream.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize, ChannelError> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(ChannelError::Closed);
        }

        let mut guard = tokio::select! {
            guard = self.reader.lock() => guard,
            _ = closed.wait_for(|c| *c) => return Err(ChannelError::Closed),
        };
        let Some(reader) = guard.as_mut() else {
            return Err(ChannelError::Closed);
        };

        let outcome = tokio::select! {
            res = reader.read(buf) => Some(res),
            _ = closed.wait_for(|c| *c) => None,
        };
        if *closed.borrow() {
            guard.take();
        }

        match outcome {
            Some(res) => Ok(res?),
            None => Err(ChannelError::Closed),
        }
    }

    /// Write all of `bytes` and flush.
    pub async fn write(&self, bytes: &[u8]) -> Result<(), ChannelError> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(ChannelError::Closed);
        }

        let mut guard = tokio::select! {
            guard = self.writer.lock() => guard,
            _ = closed.wait_for(|c| *c) => return Err(ChannelError::Closed),
        };
        let Some(writer) = guard.as_mut() else {
            return Err(ChannelError::Closed);
        };

        let outcome = tokio::select! {
            res = async {
                match writer.write_all(bytes).await {
                    Ok(()) => writer.flush().await,
                    Err(e) => Err(e),
                }
            } => Some(res),
            _ = closed.wait_for(|c| *c) => None,
        };
        if *closed.borrow() {
            guard.take();
        }

        match outcome {
            Some(res) => Ok(res?),
            None => Err(ChannelError::Closed),
        }
    }

    /// Close the channel. Safe to call repeatedly and concurrently with
    /// in-flight reads and writes.
    ///
    /// Returns `true` only for the call that actually closed it.
    pub fn close(&self) -> bool {
        if self.closed.send_replace(true) {
            return false;
        }

        // Halves held by a blocked reader or writer are dropped by that task
        // once it wakes.
        if let Ok(mut reader) = self.reader.try_lock() {
            reader.take();
        }
        if let Ok(mut writer) = self.writer.try_lock() {
            writer.take();
        }
        self.registration.lock().take();

        debug!("Bluetooth channel to {} closed", self.peer_address);
        true
    }
}

impl fmt::Debug for BluetoothChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BluetoothChannel")
            .field("peer_address", &self.peer_address)
            .field("open", &self.is_open())
            .finish()
    }
}

impl Drop for BluetoothChannel {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
