//! Transport layer implementations
//!
//! Establishes the physical connections the tunnel layer multiplexes over.
//! Two backends are provided:
//! - TCP (raw, for testing and trusted internal networks)
//! - TLS 1.3 over TCP (rustls)

mod tcp;
mod tls;

pub use tcp::{TcpAcceptor, TcpDialer};
pub use tls::{TlsDialer, TlsListener};

use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};

/// Transport layer errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Connection closed")]
    Closed,

    #[error("Timeout")]
    Timeout,
}

/// Marker trait for the byte streams a physical connection yields
pub trait IoStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> IoStream for T {}

/// A physical tunnel connection, type-erased over the transport backend
pub type TunnelConn = Box<dyn IoStream>;

/// Addressing information of a physical connection, kept for logging and
/// for address reporting on the logical streams it carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnInfo {
    pub local: SocketAddr,
    pub peer: SocketAddr,
}

/// Transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Dial timeout in seconds (covers TCP connect and TLS handshake)
    pub dial_timeout: u64,
    /// Enable TCP_NODELAY on established connections
    pub nodelay: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            dial_timeout: 3,
            nodelay: true,
        }
    }
}

/// Client-side connection establishment
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Establish a new physical connection to `addr`
    async fn dial(&self, addr: &str) -> Result<(TunnelConn, ConnInfo), TransportError>;
}

/// Server-side connection acceptance
///
/// A failed handshake on one inbound connection is contained by the
/// implementation (logged, connection abandoned); an error returned from
/// [`Acceptor::accept`] means the listener itself is broken.
#[async_trait]
pub trait Acceptor: Send + Sync {
    /// Accept the next physical connection
    async fn accept(&self) -> Result<(TunnelConn, ConnInfo), TransportError>;

    /// Address the underlying listener is bound to
    fn local_addr(&self) -> SocketAddr;
}
