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

//! Relay pair: two copy loops between one TCP client and the Bluetooth channel.
//!
//! Each direction reads up to `buffer_size` bytes from its source and writes
//! exactly those bytes to its sink before reading again. A direction stops on
//! shutdown, end of stream, or any I/O error. The pair shares a close signal,
//! so whichever direction stops first also stops the other one, and the TCP
//! connection is closed once both halves are dropped.
//!
//! End of stream or an I/O error on the Bluetooth side means the peripheral
//! is gone: the channel is closed for every client, not just this pair.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, trace};

use crate::bluetooth::BluetoothChannel;
use crate::error::ChannelError;
use crate::events::{BridgeEvent, EventSender};
use crate::shutdown::{self, ShutdownSignal, ShutdownTrigger};
use crate::state::BridgeState;

/// Direction of a copy loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    BluetoothToTcp,
    TcpToBluetooth,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::BluetoothToTcp => write!(f, "Bluetooth -> TCP"),
            Direction::TcpToBluetooth => write!(f, "TCP -> Bluetooth"),
        }
    }
}

/// Why a copy loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEnd {
    /// The process-wide shutdown signal fired.
    Shutdown,
    /// The other direction of the pair stopped first.
    PairClosed,
    /// The source returned end of stream.
    SourceClosed,
    ReadFailed(String),
    WriteFailed(String),
    /// The task panicked or was aborted.
    TaskFailed(String),
}

impl RelayEnd {
    /// Whether this end is worth reporting as a failure.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            RelayEnd::ReadFailed(_) | RelayEnd::WriteFailed(_) | RelayEnd::TaskFailed(_)
        )
    }

    fn from_join(res: Result<RelayEnd, JoinError>) -> RelayEnd {
        res.unwrap_or_else(|e| RelayEnd::TaskFailed(e.to_string()))
    }
}

impl fmt::Display for RelayEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayEnd::Shutdown => write!(f, "shutdown"),
            RelayEnd::PairClosed => write!(f, "paired direction closed"),
            RelayEnd::SourceClosed => write!(f, "end of stream"),
            RelayEnd::ReadFailed(e) => write!(f, "read failed: {}", e),
            RelayEnd::WriteFailed(e) => write!(f, "write failed: {}", e),
            RelayEnd::TaskFailed(e) => write!(f, "task failed: {}", e),
        }
    }
}

/// Everything a relay task needs besides its endpoints.
#[derive(Debug, Clone)]
pub struct RelayContext {
    pub buffer_size: usize,
    pub log_payloads: bool,
    pub shutdown: ShutdownSignal,
    pub events: EventSender,
    pub state: Arc<BridgeState>,
}

impl RelayContext {
    fn log_chunk(&self, peer: SocketAddr, direction: Direction, chunk: &[u8]) {
        if self.log_payloads {
            info!("{} [{}]: {}", direction, peer, hex::encode(chunk));
        } else {
            trace!("{} [{}]: {} bytes", direction, peer, chunk.len());
        }
    }

    fn finish(&self, peer: SocketAddr, direction: Direction, end: &RelayEnd) {
        if end.is_error() {
            self.events.emit(BridgeEvent::RelayError {
                peer,
                direction,
                error: end.to_string(),
            });
        } else {
            debug!("{} [{}] stopped: {}", direction, peer, end);
        }
    }

    /// Close `channel` after it failed outside of shutdown and report it once.
    fn peripheral_lost(&self, channel: &BluetoothChannel, reason: &str) {
        if self.shutdown.is_triggered() {
            return;
        }
        if channel.close() {
            self.events.emit(BridgeEvent::PeripheralDisconnected {
                address: channel.peer_address().to_string(),
                reason: reason.to_string(),
            });
        }
    }
}

/// Handles to the two copy tasks of one client.
pub struct RelayPair {
    bluetooth_to_tcp: JoinHandle<RelayEnd>,
    tcp_to_bluetooth: JoinHandle<RelayEnd>,
}

impl RelayPair {
    /// Start relaying between `stream` and `channel`.
    pub fn spawn(
        stream: TcpStream,
        peer: SocketAddr,
        channel: Arc<BluetoothChannel>,
        ctx: RelayContext,
    ) -> Self {
        let (source, sink) = stream.into_split();
        let (close, closed) = shutdown::signal();

        let bluetooth_to_tcp = tokio::spawn(bluetooth_to_tcp(
            channel.clone(),
            sink,
            peer,
            close.clone(),
            closed.clone(),
            ctx.clone(),
        ));
        let tcp_to_bluetooth =
            tokio::spawn(tcp_to_bluetooth(source, channel, peer, close, closed, ctx));

        Self {
            bluetooth_to_tcp,
            tcp_to_bluetooth,
        }
    }

    /// Wait for both directions. Returns (Bluetooth -> TCP, TCP -> Bluetooth).
    pub async fn join(self) -> (RelayEnd, RelayEnd) {
        let (inbound, outbound) = tokio::join!(self.bluetooth_to_tcp, self.tcp_to_bluetooth);
        (RelayEnd::from_join(inbound), RelayEnd::from_join(outbound))
    }
}

async fn bluetooth_to_tcp(
    channel: Arc<BluetoothChannel>,
    mut sink: OwnedWriteHalf,
    peer: SocketAddr,
    close: ShutdownTrigger,
    closed: ShutdownSignal,
    ctx: RelayContext,
) -> RelayEnd {
    let direction = Direction::BluetoothToTcp;
    let mut buf = vec![0u8; ctx.buffer_size];

    let end = loop {
        if ctx.shutdown.is_triggered() {
            break RelayEnd::Shutdown;
        }

        let read = tokio::select! {
            _ = ctx.shutdown.triggered() => break RelayEnd::Shutdown,
            _ = closed.triggered() => break RelayEnd::PairClosed,
            res = channel.read(&mut buf) => res,
        };
        let n = match read {
            Ok(0) => {
                ctx.peripheral_lost(&channel, "end of stream");
                break RelayEnd::SourceClosed;
            }
            Ok(n) => n,
            Err(ChannelError::Closed) if ctx.shutdown.is_triggered() => break RelayEnd::Shutdown,
            Err(e @ ChannelError::Io(_)) => {
                ctx.peripheral_lost(&channel, &e.to_string());
                break RelayEnd::ReadFailed(e.to_string());
            }
            Err(e) => break RelayEnd::ReadFailed(e.to_string()),
        };
        ctx.log_chunk(peer, direction, &buf[..n]);

        let written = tokio::select! {
            _ = ctx.shutdown.triggered() => break RelayEnd::Shutdown,
            res = sink.write_all(&buf[..n]) => res,
        };
        if let Err(e) = written {
            break RelayEnd::WriteFailed(e.to_string());
        }
        ctx.state.record_relayed(direction, n);
    };

    close.trigger();
    let _ = sink.shutdown().await;
    ctx.finish(peer, direction, &end);
    end
}

async fn tcp_to_bluetooth(
    mut source: OwnedReadHalf,
    channel: Arc<BluetoothChannel>,
    peer: SocketAddr,
    close: ShutdownTrigger,
    closed: ShutdownSignal,
    ctx: RelayContext,
) -> RelayEnd {
    let direction = Direction::TcpToBluetooth;
    let mut buf = vec![0u8; ctx.buffer_size];

    let end = loop {
        if ctx.shutdown.is_triggered() {
            break RelayEnd::Shutdown;
        }

        let read = tokio::select! {
            _ = ctx.shutdown.triggered() => break RelayEnd::Shutdown,
            _ = closed.triggered() => break RelayEnd::PairClosed,
            res = source.read(&mut buf) => res,
        };
        let n = match read {
            Ok(0) => break RelayEnd::SourceClosed,
            Ok(n) => n,
            Err(e) => break RelayEnd::ReadFailed(e.to_string()),
        };
        ctx.log_chunk(peer, direction, &buf[..n]);

        match channel.write(&buf[..n]).await {
            Ok(()) => ctx.state.record_relayed(direction, n),
            Err(ChannelError::Closed) if ctx.shutdown.is_triggered() => break RelayEnd::Shutdown,
            Err(e @ ChannelError::Io(_)) => {
                ctx.peripheral_lost(&channel, &e.to_string());
                break RelayEnd::WriteFailed(e.to_string());
            }
            Err(e) => break RelayEnd::WriteFailed(e.to_string()),
        }
    };

    close.trigger();
    drop(source);
    ctx.finish(peer, direction, &end);
    end
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events;
    use parking_lot::Mutex;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;
    use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
    use tokio::net::TcpListener;

    /// Peripheral that never sends and records every write call.
    #[derive(Clone, Default)]
    struct RecordingPeripheral {
        writes: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl AsyncRead for RecordingPeripheral {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Pending
        }
    }

    impl AsyncWrite for RecordingPeripheral {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            self.writes.lock().push(buf.to_vec());
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    async fn tcp_pair() -> (TcpStream, TcpStream, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, peer) = listener.accept().await.unwrap();
        (client, server, peer)
    }

    fn context(buffer_size: usize) -> (RelayContext, ShutdownTrigger, events::EventReceiver) {
        let (trigger, signal) = shutdown::signal();
        let (events, rx) = events::channel();
        let ctx = RelayContext {
            buffer_size,
            log_payloads: false,
            shutdown: signal,
            events,
            state: BridgeState::new(),
        };
        (ctx, trigger, rx)
    }

    async fn join_within(pair: RelayPair) -> (RelayEnd, RelayEnd) {
        tokio::time::timeout(Duration::from_secs(2), pair.join())
            .await
            .expect("relay pair did not terminate")
    }

    #[tokio::test]
    async fn test_tcp_bytes_reach_bluetooth_in_bounded_chunks() {
        let (mut client, server, peer) = tcp_pair().await;
        let peripheral = RecordingPeripheral::default();
        let channel = Arc::new(BluetoothChannel::from_stream("AA:BB", peripheral.clone()));
        let (ctx, _trigger, _rx) = context(16);
        let state = ctx.state.clone();

        let pair = RelayPair::spawn(server, peer, channel, ctx);

        let payload: Vec<u8> = (0..100u8).collect();
        client.write_all(&payload).await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            while peripheral.writes.lock().iter().map(Vec::len).sum::<usize>() < payload.len() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("bytes not relayed");

        let writes = peripheral.writes.lock().clone();
        assert!(writes.iter().all(|w| !w.is_empty() && w.len() <= 16));
        assert_eq!(writes.concat(), payload);
        assert_eq!(state.bytes_relayed(Direction::TcpToBluetooth), 100);

        drop(client);
        let (inbound, outbound) = join_within(pair).await;
        assert_eq!(outbound, RelayEnd::SourceClosed);
        assert_eq!(inbound, RelayEnd::PairClosed);
    }

    #[tokio::test]
    async fn test_kiss_frame_passes_through_unaltered() {
        let (mut client, server, peer) = tcp_pair().await;
        let (stream, mut peripheral) = tokio::io::duplex(1024);
        let channel = Arc::new(BluetoothChannel::from_stream("AA:BB", stream));
        let (ctx, _trigger, _rx) = context(1024);

        let _pair = RelayPair::spawn(server, peer, channel, ctx);

        client.write_all(&[0xC0, 0x00, 0x41, 0xC0]).await.unwrap();
        let mut frame = [0u8; 4];
        peripheral.read_exact(&mut frame).await.unwrap();
        assert_eq!(frame, [0xC0, 0x00, 0x41, 0xC0]);

        peripheral.write_all(&[0xC0, 0x00, 0x42, 0xC0]).await.unwrap();
        let mut reply = [0u8; 4];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [0xC0, 0x00, 0x42, 0xC0]);
    }

    #[tokio::test]
    async fn test_bluetooth_end_closes_tcp_client() {
        let (mut client, server, peer) = tcp_pair().await;
        let (stream, peripheral) = tokio::io::duplex(1024);
        let channel = Arc::new(BluetoothChannel::from_stream("AA:BB", stream));
        let (ctx, _trigger, mut rx) = context(1024);

        let pair = RelayPair::spawn(server, peer, channel.clone(), ctx);
        drop(peripheral);

        let (inbound, outbound) = join_within(pair).await;
        assert_eq!(inbound, RelayEnd::SourceClosed);
        assert_eq!(outbound, RelayEnd::PairClosed);

        // The peripheral is gone for everyone, and that is reported once.
        assert!(!channel.is_open());
        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            BridgeEvent::PeripheralDisconnected {
                address: "AA:BB".to_string(),
                reason: "end of stream".to_string(),
            }
        );
        assert!(rx.try_recv().is_err());

        let mut buf = [0u8; 8];
        let n = tokio::time::timeout(Duration::from_secs(1), client.read(&mut buf))
            .await
            .expect("client not closed")
            .unwrap_or(0);
        assert_eq!(n, 0);
    }

    /// Peripheral whose link has dropped: every read and write fails.
    struct BrokenPeripheral;

    impl AsyncRead for BrokenPeripheral {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Pending
        }
    }

    impl AsyncWrite for BrokenPeripheral {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::NotConnected, "link lost")))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_bluetooth_write_error_closes_channel() {
        let (mut client, server, peer) = tcp_pair().await;
        let channel = Arc::new(BluetoothChannel::from_stream("AA:BB", BrokenPeripheral));
        let (ctx, _trigger, mut rx) = context(1024);

        let pair = RelayPair::spawn(server, peer, channel.clone(), ctx);
        client.write_all(b"hello").await.unwrap();

        let (_, outbound) = join_within(pair).await;
        assert!(matches!(outbound, RelayEnd::WriteFailed(_)));
        assert!(!channel.is_open());

        let mut lost = false;
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_millis(200), rx.recv()).await
        {
            lost |= matches!(event, BridgeEvent::PeripheralDisconnected { .. });
        }
        assert!(lost);
    }

    #[tokio::test]
    async fn test_shutdown_stops_blocked_directions() {
        let (_client, server, peer) = tcp_pair().await;
        let (stream, _peripheral) = tokio::io::duplex(1024);
        let channel = Arc::new(BluetoothChannel::from_stream("AA:BB", stream));
        let (ctx, trigger, _rx) = context(1024);

        let pair = RelayPair::spawn(server, peer, channel.clone(), ctx);
        tokio::time::sleep(Duration::from_millis(20)).await;

        trigger.trigger();
        channel.close();

        let (inbound, outbound) = join_within(pair).await;
        assert_eq!(inbound, RelayEnd::Shutdown);
        assert_eq!(outbound, RelayEnd::Shutdown);
    }

    #[tokio::test]
    async fn test_channel_failure_reported() {
        let (_client, server, peer) = tcp_pair().await;
        let (stream, _peripheral) = tokio::io::duplex(1024);
        let channel = Arc::new(BluetoothChannel::from_stream("AA:BB", stream));
        let (ctx, _trigger, mut rx) = context(1024);

        // Closing the channel outside of shutdown is an ordinary failure.
        channel.close();
        let pair = RelayPair::spawn(server, peer, channel, ctx);

        let (inbound, outbound) = join_within(pair).await;
        assert_eq!(inbound, RelayEnd::ReadFailed("Bluetooth channel closed".to_string()));
        assert_eq!(outbound, RelayEnd::PairClosed);

        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, BridgeEvent::RelayError { .. }));
    }
}
