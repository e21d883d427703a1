//! Raw TCP transport (for testing and internal networks)

use super::{Acceptor, ConnInfo, Dialer, TransportConfig, TransportError, TunnelConn};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

/// Raw TCP dialer
pub struct TcpDialer {
    config: TransportConfig,
}

impl TcpDialer {
    /// Create a new TCP dialer
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    /// Create with default configuration
    pub fn new_default() -> Self {
        Self::new(TransportConfig::default())
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, addr: &str) -> Result<(TunnelConn, ConnInfo), TransportError> {
        let timeout = Duration::from_secs(self.config.dial_timeout);

        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(TransportError::Io)?;

        if self.config.nodelay {
            stream.set_nodelay(true).ok();
        }

        let info = ConnInfo {
            local: stream.local_addr()?,
            peer: stream.peer_addr()?,
        };

        Ok((Box::new(stream), info))
    }
}

/// Raw TCP acceptor
pub struct TcpAcceptor {
    listener: TcpListener,
    local_addr: SocketAddr,
    nodelay: bool,
}

impl TcpAcceptor {
    /// Bind a TCP listener on `addr`
    pub async fn bind(addr: &str, config: TransportConfig) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
            nodelay: config.nodelay,
        })
    }
}

#[async_trait]
impl Acceptor for TcpAcceptor {
    async fn accept(&self) -> Result<(TunnelConn, ConnInfo), TransportError> {
        let (stream, peer) = self.listener.accept().await?;

        if self.nodelay {
            stream.set_nodelay(true).ok();
        }

        let info = ConnInfo {
            local: self.local_addr,
            peer,
        };

        Ok((Box::new(stream), info))
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_tcp_dial_accept() {
        let acceptor = TcpAcceptor::bind("127.0.0.1:0", TransportConfig::default())
            .await
            .unwrap();
        let addr = acceptor.local_addr();

        let server = tokio::spawn(async move {
            let (mut conn, info) = acceptor.accept().await.unwrap();
            let mut buf = [0u8; 32];
            let n = conn.read(&mut buf).await.unwrap();
            conn.write_all(&buf[..n]).await.unwrap();
            info
        });

        let dialer = TcpDialer::new_default();
        let (mut conn, info) = dialer.dial(&addr.to_string()).await.unwrap();
        assert_eq!(info.peer, addr);

        conn.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 32];
        let n = conn.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");

        let server_info = server.await.unwrap();
        assert_eq!(server_info.peer, info.local);
    }

    #[tokio::test]
    async fn test_tcp_dial_refused() {
        // Port 1 on loopback is almost certainly closed
        let dialer = TcpDialer::new_default();
        let result = dialer.dial("127.0.0.1:1").await;
        assert!(result.is_err());
    }
}
