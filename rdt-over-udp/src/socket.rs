//! Datagram transport abstraction.
//!
//! The protocol engine only needs an unreliable, connected datagram pipe with
//! a settable receive timeout.  [`Transport`] names that contract;
//! [`UdpTransport`] is the production implementation over
//! `tokio::net::UdpSocket`, and [`crate::simulator::SimulatedTransport`] is
//! the in-memory one used by tests.  All protocol logic lives elsewhere; this
//! module owns only byte I/O.

use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::Instant;

/// Receive buffer size; large enough for any UDP datagram so an oversized
/// segment is seen whole and rejected by the codec instead of truncated.
const MAX_DATAGRAM: usize = 65_535;

/// An unreliable datagram pipe to a single peer.
pub trait Transport: Send {
    /// Send one datagram to the peer.  Delivery is not guaranteed.
    fn send(&mut self, datagram: &[u8]) -> impl Future<Output = io::Result<()>> + Send;

    /// Bound every subsequent [`Transport::recv`] by `timeout`; `None` waits
    /// indefinitely.
    fn set_receive_timeout(&mut self, timeout: Option<Duration>);

    /// Wait for the next datagram.
    ///
    /// `Ok(None)` means the receive timeout elapsed first.  Any `Err` is a
    /// hard failure below the protocol.
    fn recv(&mut self) -> impl Future<Output = io::Result<Option<Vec<u8>>>> + Send;

    /// Bind all further traffic to the source of the most recent datagram.
    ///
    /// The listener calls this once it has decoded a SYN, so a stray
    /// datagram from anyone else never claims the connection.  Transports
    /// that are point-to-point from the start have nothing to do.
    fn lock_peer(&mut self) -> impl Future<Output = io::Result<()>> + Send {
        async { Ok(()) }
    }

    /// Release the underlying resources.
    fn close(&mut self) -> io::Result<()>;
}

// ---------------------------------------------------------------------------
// UdpTransport
// ---------------------------------------------------------------------------

/// A UDP socket bound to (or waiting to be bound to) one peer.
#[derive(Debug)]
pub struct UdpTransport {
    socket: Option<UdpSocket>,
    /// `None` until the listener locks onto its peer.
    peer: Option<SocketAddr>,
    /// Source of the last datagram seen while still unlocked.
    last_source: Option<SocketAddr>,
    timeout: Option<Duration>,
}

impl UdpTransport {
    /// Listen on `port` on all IPv4 interfaces.
    ///
    /// The socket stays unconnected until [`Transport::lock_peer`] binds it
    /// to the sender of a valid SYN.
    pub async fn bind(port: u16) -> io::Result<Self> {
        Self::bind_addr(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))).await
    }

    /// Listen on an explicit local address (e.g. `127.0.0.1:0` in tests).
    pub async fn bind_addr(local: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(local).await?;
        log::debug!("[udp] listening on {}", socket.local_addr()?);
        Ok(Self {
            socket: Some(socket),
            peer: None,
            last_source: None,
            timeout: None,
        })
    }

    /// Resolve `host:port` and connect an ephemeral socket to it.
    pub async fn connect(host: &str, port: u16) -> io::Result<Self> {
        let peer = tokio::net::lookup_host((host, port))
            .await?
            .next()
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, format!("no address for {host}"))
            })?;
        Self::connect_addr(peer).await
    }

    /// Connect an ephemeral socket to `peer`.
    pub async fn connect_addr(peer: SocketAddr) -> io::Result<Self> {
        let local = match peer {
            SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(peer).await?;
        log::debug!("[udp] {} connected to {peer}", socket.local_addr()?);
        Ok(Self {
            socket: Some(socket),
            peer: Some(peer),
            last_source: None,
            timeout: None,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket()?.local_addr()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    fn socket(&self) -> io::Result<&UdpSocket> {
        self.socket
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "transport closed"))
    }

    async fn recv_once(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let socket = self.socket()?;
        if self.peer.is_some() {
            return socket.recv(buf).await;
        }
        let (n, from) = socket.recv_from(buf).await?;
        self.last_source = Some(from);
        Ok(n)
    }
}

impl Transport for UdpTransport {
    async fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
        if self.peer.is_none() {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "no peer to send to yet",
            ));
        }
        match self.socket()?.send(datagram).await {
            Ok(_) => Ok(()),
            // ICMP feedback from an earlier datagram; this one is simply lost.
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                log::debug!("[udp] send refused by peer; treating as loss");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn set_receive_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    async fn recv(&mut self) -> io::Result<Option<Vec<u8>>> {
        let deadline = self.timeout.and_then(|t| Instant::now().checked_add(t));
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            let received = match deadline {
                Some(at) => match tokio::time::timeout_at(at, self.recv_once(&mut buf)).await {
                    Ok(r) => r,
                    Err(_elapsed) => return Ok(None),
                },
                None => self.recv_once(&mut buf).await,
            };

            match received {
                Ok(n) => return Ok(Some(buf[..n].to_vec())),
                // Not a datagram: the peer's port was closed when an earlier
                // one arrived.  Keep waiting until the deadline.
                Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                    log::debug!("[udp] ICMP port unreachable from peer");
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn lock_peer(&mut self) -> io::Result<()> {
        if self.peer.is_some() {
            return Ok(());
        }
        let from = self.last_source.ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "no datagram received yet")
        })?;
        self.socket()?.connect(from).await?;
        log::debug!("[udp] locked onto peer {from}");
        self.peer = Some(from);
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        if self.socket.take().is_some() {
            log::debug!("[udp] socket released");
        }
        Ok(())
    }
}
