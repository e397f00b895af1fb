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

//! TCP listener and accept loop.

use std::io;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::relay::{RelayContext, RelayPair};
use crate::bluetooth::BluetoothChannel;
use crate::config::TcpConfig;
use crate::error::{BridgeError, Result};
use crate::events::BridgeEvent;

const LISTEN_BACKLOG: u32 = 16;

/// Bound TCP server socket that hands each client to a relay pair.
pub struct RelayListener {
    listener: TcpListener,
    local_addr: SocketAddr,
    max_clients: Option<usize>,
    retry_delay: Duration,
}

impl RelayListener {
    /// Bind `host:port` with address reuse enabled.
    pub async fn bind(config: &TcpConfig) -> Result<Self> {
        let target = format!("{}:{}", config.host, config.port);
        let bind_err = |source: io::Error| BridgeError::Bind {
            addr: target.clone(),
            source,
        };

        let addr = tokio::net::lookup_host((config.host.as_str(), config.port))
            .await
            .map_err(bind_err)?
            .next()
            .ok_or_else(|| {
                bind_err(io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    "host did not resolve to any address",
                ))
            })?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(bind_err)?;
        socket.set_reuseaddr(true).map_err(bind_err)?;
        socket.bind(addr).map_err(bind_err)?;

        let listener = socket.listen(LISTEN_BACKLOG).map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;
        info!("TCP listener bound on {}", local_addr);

        Ok(Self {
            listener,
            local_addr,
            max_clients: config.max_clients,
            retry_delay: Duration::from_millis(config.accept_retry_ms),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept clients until shutdown, starting a relay pair for each one.
    ///
    /// The listening socket is closed when this returns. Relay pairs that are
    /// still running are left to observe the shutdown signal themselves.
    pub async fn serve(self, channel: Arc<BluetoothChannel>, ctx: RelayContext) {
        let Self {
            listener,
            local_addr,
            max_clients,
            retry_delay,
        } = self;
        let limiter = max_clients.map(|n| Arc::new(Semaphore::new(n)));

        ctx.events.emit(BridgeEvent::Listening { addr: local_addr });

        loop {
            if ctx.shutdown.is_triggered() {
                break;
            }

            let accepted = tokio::select! {
                _ = ctx.shutdown.triggered() => break,
                res = listener.accept() => res,
            };

            let (stream, peer) = match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("Accept error: {}", e);
                    tokio::select! {
                        _ = ctx.shutdown.triggered() => break,
                        _ = tokio::time::sleep(retry_delay) => {}
                    }
                    continue;
                }
            };

            if !channel.is_open() {
                ctx.events.emit(BridgeEvent::ClientRejected {
                    peer,
                    reason: format!("Bluetooth channel to {} is closed", channel.peer_address()),
                });
                drop(stream);
                continue;
            }

            let permit = match &limiter {
                Some(limiter) => match limiter.clone().try_acquire_owned() {
                    Ok(permit) => Some(permit),
                    Err(_) => {
                        ctx.events.emit(BridgeEvent::ClientRejected {
                            peer,
                            reason: format!(
                                "client limit of {} reached",
                                max_clients.unwrap_or_default()
                            ),
                        });
                        drop(stream);
                        continue;
                    }
                },
                None => None,
            };

            if let Err(e) = stream.set_nodelay(true) {
                debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
            }
            ctx.events.emit(BridgeEvent::ClientConnected { peer });

            let pair = RelayPair::spawn(stream, peer, channel.clone(), ctx.clone());
            let events = ctx.events.clone();
            tokio::spawn(async move {
                let (inbound, outbound) = pair.join().await;
                debug!(
                    "Relay pair for {} finished (inbound: {}, outbound: {})",
                    peer, inbound, outbound
                );
                drop(permit);
                events.emit(BridgeEvent::ClientDisconnected { peer });
            });
        }

        drop(listener);
        ctx.events.emit(BridgeEvent::ListenerClosed);
    }
}

/// Address of the interface that routes off-host, for telling users where
/// to connect. No packets are sent.
pub fn local_ip_address() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("10.254.254.254:1").ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{self, EventReceiver};
    use crate::shutdown::{self, ShutdownTrigger};
    use crate::state::BridgeState;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn loopback(max_clients: Option<usize>) -> TcpConfig {
        TcpConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            max_clients,
            accept_retry_ms: 10,
        }
    }

    fn context() -> (RelayContext, ShutdownTrigger, EventReceiver) {
        let (trigger, signal) = shutdown::signal();
        let (events, rx) = events::channel();
        let ctx = RelayContext {
            buffer_size: 1024,
            log_payloads: false,
            shutdown: signal,
            events,
            state: BridgeState::new(),
        };
        (ctx, trigger, rx)
    }

    async fn next_event(rx: &mut EventReceiver) -> BridgeEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("no event")
            .expect("event stream closed")
    }

    #[tokio::test]
    async fn test_bind_reports_ephemeral_port() {
        let listener = RelayListener::bind(&loopback(None)).await.unwrap();
        assert_ne!(listener.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn test_bind_failure_is_typed() {
        let first = RelayListener::bind(&loopback(None)).await.unwrap();

        let mut config = loopback(None);
        config.port = first.local_addr().port();
        let err = RelayListener::bind(&config).await.err().unwrap();
        assert!(matches!(err, BridgeError::Bind { .. }));
    }

    #[tokio::test]
    async fn test_rebind_after_close() {
        let first = RelayListener::bind(&loopback(None)).await.unwrap();
        let port = first.local_addr().port();
        drop(first);

        let mut config = loopback(None);
        config.port = port;
        RelayListener::bind(&config).await.unwrap();
    }

    #[tokio::test]
    async fn test_serve_until_shutdown() {
        let listener = RelayListener::bind(&loopback(None)).await.unwrap();
        let addr = listener.local_addr();
        let (stream, mut peripheral) = tokio::io::duplex(1024);
        let channel = Arc::new(BluetoothChannel::from_stream("AA:BB", stream));
        let (ctx, trigger, mut rx) = context();

        let server = tokio::spawn(listener.serve(channel.clone(), ctx));
        assert!(matches!(next_event(&mut rx).await, BridgeEvent::Listening { .. }));

        let mut client = TcpStream::connect(addr).await.unwrap();
        assert!(matches!(next_event(&mut rx).await, BridgeEvent::ClientConnected { .. }));

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        peripheral.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        trigger.trigger();
        channel.close();
        tokio::time::timeout(Duration::from_secs(2), server)
            .await
            .expect("accept loop did not stop")
            .unwrap();

        let mut saw_closed = false;
        while let Ok(event) = rx.try_recv() {
            saw_closed |= event == BridgeEvent::ListenerClosed;
        }
        assert!(saw_closed);
    }

    #[tokio::test]
    async fn test_client_limit() {
        let listener = RelayListener::bind(&loopback(Some(1))).await.unwrap();
        let addr = listener.local_addr();
        let (stream, _peripheral) = tokio::io::duplex(1024);
        let channel = Arc::new(BluetoothChannel::from_stream("AA:BB", stream));
        let (ctx, _trigger, mut rx) = context();

        tokio::spawn(listener.serve(channel, ctx));
        assert!(matches!(next_event(&mut rx).await, BridgeEvent::Listening { .. }));

        let first = TcpStream::connect(addr).await.unwrap();
        assert!(matches!(next_event(&mut rx).await, BridgeEvent::ClientConnected { .. }));

        let mut second = TcpStream::connect(addr).await.unwrap();
        assert!(matches!(next_event(&mut rx).await, BridgeEvent::ClientRejected { .. }));
        let mut buf = [0u8; 1];
        assert_eq!(second.read(&mut buf).await.unwrap_or(0), 0);

        drop(first);
        assert!(matches!(next_event(&mut rx).await, BridgeEvent::ClientDisconnected { .. }));

        let _third = TcpStream::connect(addr).await.unwrap();
        assert!(matches!(next_event(&mut rx).await, BridgeEvent::ClientConnected { .. }));
    }

    #[tokio::test]
    async fn test_clients_refused_after_peripheral_lost() {
        let listener = RelayListener::bind(&loopback(None)).await.unwrap();
        let addr = listener.local_addr();
        let (stream, peripheral) = tokio::io::duplex(1024);
        let channel = Arc::new(BluetoothChannel::from_stream("AA:BB", stream));
        let (ctx, _trigger, mut rx) = context();

        tokio::spawn(listener.serve(channel.clone(), ctx));
        assert!(matches!(next_event(&mut rx).await, BridgeEvent::Listening { .. }));

        let mut first = TcpStream::connect(addr).await.unwrap();
        assert!(matches!(next_event(&mut rx).await, BridgeEvent::ClientConnected { .. }));

        drop(peripheral);
        let mut buf = [0u8; 1];
        assert_eq!(first.read(&mut buf).await.unwrap_or(0), 0);
        assert!(matches!(
            next_event(&mut rx).await,
            BridgeEvent::PeripheralDisconnected { .. }
        ));
        assert!(matches!(next_event(&mut rx).await, BridgeEvent::ClientDisconnected { .. }));
        assert!(!channel.is_open());

        let mut second = TcpStream::connect(addr).await.unwrap();
        match next_event(&mut rx).await {
            BridgeEvent::ClientRejected { reason, .. } => {
                assert!(reason.contains("AA:BB"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(second.read(&mut buf).await.unwrap_or(0), 0);
    }
}
