use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::BytesMut;
use socket2::{Domain, Protocol, Socket, Type};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{lookup_host, TcpStream, UdpSocket};
use tokio::sync::Mutex;

use crate::core::{Endpoint, Error, Result, TransportKind};

/// One open socket to a vehicle endpoint.
///
/// Shared by reference between connection managers targeting the same
/// endpoint; all methods take `&self` so an `Arc<LinkTransport>` is directly
/// usable from the send path and the receive loop concurrently.
#[derive(Debug)]
pub struct LinkTransport {
    endpoint: Endpoint,
    peer: SocketAddr,
    inner: Inner,
    closed: AtomicBool,
}

#[derive(Debug)]
enum Inner {
    Udp(UdpSocket),
    Tcp {
        reader: Mutex<OwnedReadHalf>,
        writer: Mutex<OwnedWriteHalf>,
    },
}

impl LinkTransport {
    /// Opens a transport to the endpoint, racing the open against `timeout`.
    ///
    /// UDP binds an ephemeral local port with reuse-address set and connects
    /// the socket to the peer so plain send/recv apply. TCP dials the peer.
    pub async fn open(endpoint: &Endpoint, timeout: Duration) -> Result<Self> {
        let open = Self::open_inner(endpoint);
        match tokio::time::timeout(timeout, open).await {
            Ok(result) => result,
            Err(_) => Err(Error::connection_timeout(format!(
                "opening {} did not complete within {:?}; {}",
                endpoint,
                timeout,
                Error::connection_hint(endpoint)
            ))),
        }
    }

    async fn open_inner(endpoint: &Endpoint) -> Result<Self> {
        let peer = resolve(endpoint).await?;

        let inner = match endpoint.kind {
            TransportKind::Udp => {
                let socket = Socket::new(Domain::for_address(peer), Type::DGRAM, Some(Protocol::UDP))
                    .map_err(Error::Io)?;
                socket.set_reuse_address(true).map_err(Error::Io)?;
                let bind_addr: SocketAddr = if peer.is_ipv4() {
                    "0.0.0.0:0".parse().unwrap()
                } else {
                    "[::]:0".parse().unwrap()
                };
                socket.bind(&bind_addr.into()).map_err(Error::Io)?;
                socket.set_nonblocking(true).map_err(Error::Io)?;
                let socket = UdpSocket::from_std(socket.into()).map_err(Error::Io)?;
                socket.connect(peer).await.map_err(|e| {
                    Error::connection_failed(format!(
                        "udp connect to {} failed: {}; {}",
                        peer,
                        e,
                        Error::connection_hint(endpoint)
                    ))
                })?;
                Inner::Udp(socket)
            }
            TransportKind::Tcp => {
                let stream = TcpStream::connect(peer).await.map_err(|e| {
                    Error::connection_failed(format!(
                        "tcp connect to {} failed: {}; {}",
                        peer,
                        e,
                        Error::connection_hint(endpoint)
                    ))
                })?;
                stream.set_nodelay(true).map_err(Error::Io)?;
                let (reader, writer) = stream.into_split();
                Inner::Tcp {
                    reader: Mutex::new(reader),
                    writer: Mutex::new(writer),
                }
            }
        };

        Ok(LinkTransport {
            endpoint: endpoint.clone(),
            peer,
            inner,
            closed: AtomicBool::new(false),
        })
    }

    /// Sends one encoded frame
    pub async fn send(&self, bytes: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(Error::connection_lost("transport closed"));
        }
        match &self.inner {
            Inner::Udp(socket) => {
                socket
                    .send(bytes)
                    .await
                    .map_err(|e| Error::connection_failed(format!("udp send failed: {}", e)))?;
            }
            Inner::Tcp { writer, .. } => {
                let mut writer = writer.lock().await;
                writer
                    .write_all(bytes)
                    .await
                    .map_err(|e| Error::connection_failed(format!("tcp send failed: {}", e)))?;
            }
        }
        Ok(())
    }

    /// Receives bytes, appending to `buf`; returns the number read
    pub async fn recv(&self, buf: &mut BytesMut) -> Result<usize> {
        if self.is_closed() {
            return Err(Error::connection_lost("transport closed"));
        }
        match &self.inner {
            Inner::Udp(socket) => {
                let n = socket
                    .recv_buf(buf)
                    .await
                    .map_err(|e| Error::connection_failed(format!("udp recv failed: {}", e)))?;
                Ok(n)
            }
            Inner::Tcp { reader, .. } => {
                let mut reader = reader.lock().await;
                let n = reader
                    .read_buf(buf)
                    .await
                    .map_err(|e| Error::connection_failed(format!("tcp recv failed: {}", e)))?;
                if n == 0 {
                    return Err(Error::connection_lost("tcp peer closed the stream"));
                }
                Ok(n)
            }
        }
    }

    /// Marks the transport closed; later send/recv calls fail with
    /// ConnectionLost. The socket itself is released when the last holder
    /// drops its reference.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Whether close() has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// The endpoint this transport was opened for
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Resolved peer address
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Local socket address (tests bind the fake vehicle against this)
    pub fn local_addr(&self) -> Result<SocketAddr> {
        match &self.inner {
            Inner::Udp(socket) => socket.local_addr().map_err(Error::Io),
            Inner::Tcp { .. } => Err(Error::protocol("local_addr unsupported on split tcp")),
        }
    }
}

async fn resolve(endpoint: &Endpoint) -> Result<SocketAddr> {
    let target = format!("{}:{}", endpoint.host, endpoint.port);
    let addr = lookup_host(&target)
        .await
        .map_err(|e| Error::connection_failed(format!("failed to resolve {}: {}", target, e)))?
        .next()
        .ok_or_else(|| Error::connection_failed(format!("no address for {}", target)));
    addr
}
