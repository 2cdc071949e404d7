//! Async UDP socket abstraction.
//!
//! [`Socket`] is a thin wrapper around `tokio::net::UdpSocket` that moves raw
//! datagrams.  It is created unbound ([`Socket::open`]) and bound later
//! ([`Socket::bind`]) so the caller can report creation and bind failures
//! separately.  All protocol logic lives elsewhere; this module owns only
//! byte I/O.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};

use socket2::{Domain, Protocol, Type};
use thiserror::Error;
use tokio::net::UdpSocket;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can arise from socket operations.
#[derive(Debug, Error)]
pub enum SocketError {
    /// Underlying I/O error from the OS.
    #[error("socket I/O error: {0}")]
    Io(#[from] io::Error),
    /// A send was attempted before the peer address was set.
    #[error("peer address not set")]
    PeerNotSet,
    /// Send or receive on a socket that was never bound.
    #[error("socket is not bound")]
    NotBound,
    #[error("socket is already bound")]
    AlreadyBound,
}

// ---------------------------------------------------------------------------
// Socket
// ---------------------------------------------------------------------------

/// Largest payload a UDP datagram over IPv4 can carry.
pub const MAX_DATAGRAM: usize = 65_507;

#[derive(Debug)]
enum Inner {
    Unbound(socket2::Socket),
    Bound(UdpSocket),
}

/// A datagram socket that is opened first and bound later.
#[derive(Debug)]
pub struct Socket {
    inner: Inner,
}

impl Socket {
    /// Create an unbound IPv4 UDP socket.
    pub fn open() -> Result<Self, SocketError> {
        let raw = socket2::Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        Ok(Self {
            inner: Inner::Unbound(raw),
        })
    }

    /// Bind to `port` on every local interface.  Port 0 lets the OS choose.
    pub fn bind(&mut self, port: u16) -> Result<SocketAddr, SocketError> {
        self.bind_addr(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
    }

    /// Bind to an explicit local address and register with the tokio reactor.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind_addr(&mut self, addr: SocketAddr) -> Result<SocketAddr, SocketError> {
        let raw = match &self.inner {
            Inner::Unbound(raw) => raw,
            Inner::Bound(_) => return Err(SocketError::AlreadyBound),
        };
        raw.bind(&addr.into())?;
        raw.set_nonblocking(true)?;

        // The duplicate handle keeps the OS socket alive once `raw` is dropped.
        let std_sock: std::net::UdpSocket = raw.try_clone()?.into();
        let udp = UdpSocket::from_std(std_sock)?;
        let local = udp.local_addr()?;
        self.inner = Inner::Bound(udp);
        Ok(local)
    }

    pub fn is_bound(&self) -> bool {
        matches!(self.inner, Inner::Bound(_))
    }

    /// Address this socket is bound to, once bound.
    pub fn local_addr(&self) -> Result<SocketAddr, SocketError> {
        Ok(self.bound()?.local_addr()?)
    }

    /// Send `bytes` as a single datagram to `dest`.  Returns the byte count.
    pub async fn send_to(&self, bytes: &[u8], dest: SocketAddr) -> Result<usize, SocketError> {
        Ok(self.bound()?.send_to(bytes, dest).await?)
    }

    /// Receive the next datagram, keeping at most `max_len` bytes of it
    /// (capped at [`MAX_DATAGRAM`]).
    ///
    /// Cancel-safe: dropping the future before completion loses no datagram.
    pub async fn recv(&self, max_len: usize) -> Result<(Vec<u8>, SocketAddr), SocketError> {
        let mut buf = vec![0u8; max_len.min(MAX_DATAGRAM)];
        let (n, from) = self.bound()?.recv_from(&mut buf).await?;
        buf.truncate(n);
        Ok((buf, from))
    }

    fn bound(&self) -> Result<&UdpSocket, SocketError> {
        match &self.inner {
            Inner::Bound(udp) => Ok(udp),
            Inner::Unbound(_) => Err(SocketError::NotBound),
        }
    }
}
