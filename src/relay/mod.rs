//! Relay layer - listens locally and forwards byte streams to remotes
//!
//! Glue over the transport and tunnel layers: accepts inbound
//! connections, picks a remote (round-robin), dials it through the
//! configured transport and shuttles bytes both ways until either side
//! closes. Per-connection failures are logged and contained.

use crate::config::{ListenType, RelayConfig, TlsConfig, TransportType};
use crate::transport::{
    Acceptor, Dialer, TcpAcceptor, TcpDialer, TlsDialer, TlsListener, TransportConfig,
    TransportError, TunnelConn,
};
use crate::tunnel::{SessionPool, TunnelError, TunnelServer};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

/// Relay layer errors
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("No remotes configured")]
    NoRemotes,

    #[error("Listen type {0:?} requires TLS cert and key")]
    MissingTlsMaterial(ListenType),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Tunnel error: {0}")]
    Tunnel(#[from] TunnelError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where outbound connections go through
enum Outbound {
    /// One fresh physical connection per inbound connection
    Direct(Arc<dyn Dialer>),
    /// Logical streams multiplexed over pooled tunnel sessions
    Tunnel(Arc<SessionPool>),
}

/// One relay instance: a local listener bound to a set of remotes
pub struct Relay {
    cfg: RelayConfig,
    tls: TlsConfig,
    outbound: Outbound,
    next_remote: AtomicUsize,
}

impl Relay {
    /// Build a relay from its configuration
    pub fn new(cfg: RelayConfig, tls: TlsConfig) -> Result<Self, RelayError> {
        if cfg.remotes.is_empty() {
            return Err(RelayError::NoRemotes);
        }

        let transport = TransportConfig {
            dial_timeout: cfg.dial_timeout,
            ..TransportConfig::default()
        };

        let outbound = match cfg.transport_type {
            TransportType::Raw => {
                Outbound::Direct(Arc::new(TcpDialer::new(transport)))
            }
            TransportType::Tls => Outbound::Direct(Arc::new(TlsDialer::new(
                transport,
                tls.ca.as_deref(),
                tls.sni.clone(),
            )?)),
            TransportType::Mux => {
                // The tunnel runs over TLS when trust material is
                // configured, over plain TCP otherwise (tests, trusted
                // internal networks)
                let dialer: Arc<dyn Dialer> = if tls.ca.is_some() || tls.sni.is_some() {
                    Arc::new(TlsDialer::new(transport, tls.ca.as_deref(), tls.sni.clone())?)
                } else {
                    warn!("mux transport without TLS material, tunnel is unencrypted");
                    Arc::new(TcpDialer::new(transport))
                };
                Outbound::Tunnel(Arc::new(SessionPool::new(dialer)))
            }
        };

        Ok(Self {
            cfg,
            tls,
            outbound,
            next_remote: AtomicUsize::new(0),
        })
    }

    fn pick_remote(&self) -> String {
        let idx = self.next_remote.fetch_add(1, Ordering::Relaxed);
        self.cfg.remotes[idx % self.cfg.remotes.len()].clone()
    }

    /// Dial the next remote through the configured transport
    async fn dial_outbound(&self, remote: &str) -> Result<TunnelConn, RelayError> {
        match &self.outbound {
            Outbound::Direct(dialer) => {
                let (conn, _) = dialer.dial(remote).await?;
                Ok(conn)
            }
            Outbound::Tunnel(pool) => {
                let stream = pool.dial(remote).await?;
                Ok(Box::new(stream))
            }
        }
    }

    /// Run the relay until the listener fails
    pub async fn listen_and_serve(self: Arc<Self>) -> Result<(), RelayError> {
        let transport = TransportConfig {
            dial_timeout: self.cfg.dial_timeout,
            ..TransportConfig::default()
        };

        match self.cfg.listen_type {
            ListenType::Raw => {
                let acceptor = TcpAcceptor::bind(&self.cfg.listen, transport).await?;
                self.serve_connections(Box::new(acceptor)).await
            }
            ListenType::Tls => {
                let (cert, key) = self.tls_material(ListenType::Tls)?;
                let acceptor = TlsListener::bind(&self.cfg.listen, &cert, &key, transport).await?;
                self.serve_connections(Box::new(acceptor)).await
            }
            ListenType::Mux => {
                let acceptor: Box<dyn Acceptor> =
                    if self.tls.cert.is_some() && self.tls.key.is_some() {
                        let (cert, key) = self.tls_material(ListenType::Mux)?;
                        Box::new(
                            TlsListener::bind(&self.cfg.listen, &cert, &key, transport).await?,
                        )
                    } else {
                        warn!("mux listener without TLS material, tunnel is unencrypted");
                        Box::new(TcpAcceptor::bind(&self.cfg.listen, transport).await?)
                    };
                self.serve_tunnel(acceptor).await
            }
        }
    }

    fn tls_material(&self, listen_type: ListenType) -> Result<(String, String), RelayError> {
        match (&self.tls.cert, &self.tls.key) {
            (Some(cert), Some(key)) => Ok((cert.clone(), key.clone())),
            _ => Err(RelayError::MissingTlsMaterial(listen_type)),
        }
    }

    /// Accept loop for raw/TLS listeners
    async fn serve_connections(self: Arc<Self>, acceptor: Box<dyn Acceptor>) -> Result<(), RelayError> {
        info!(listen = %acceptor.local_addr(), "relay serving");
        loop {
            let (conn, conn_info) = acceptor.accept().await?;
            let relay = Arc::clone(&self);
            tokio::spawn(async move {
                let remote = relay.pick_remote();
                debug!(peer = %conn_info.peer, %remote, "relaying connection");
                match relay.dial_outbound(&remote).await {
                    Ok(outbound) => forward(conn, outbound, &remote).await,
                    Err(e) => warn!(%remote, "outbound dial failed: {}", e),
                }
            });
        }
    }

    /// Accept loop for the multiplexed tunnel listener
    async fn serve_tunnel(self: Arc<Self>, acceptor: Box<dyn Acceptor>) -> Result<(), RelayError> {
        info!(listen = %acceptor.local_addr(), "tunnel relay serving");
        let mut server = TunnelServer::start(acceptor);
        loop {
            let stream = server.accept().await?;
            let relay = Arc::clone(&self);
            tokio::spawn(async move {
                let remote = relay.pick_remote();
                debug!(peer = %stream.peer_addr(), %remote, "relaying tunneled stream");
                let dialer = TcpDialer::new(TransportConfig {
                    dial_timeout: relay.cfg.dial_timeout,
                    ..TransportConfig::default()
                });
                match dialer.dial(&remote).await {
                    Ok((outbound, _)) => forward(stream, outbound, &remote).await,
                    Err(e) => warn!(%remote, "outbound dial failed: {}", e),
                }
            });
        }
    }
}

/// Shuttle bytes both ways until either side closes
async fn forward<A, B>(mut inbound: A, mut outbound: B, remote: &str)
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    match tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await {
        Ok((tx, rx)) => debug!(%remote, tx, rx, "connection finished"),
        Err(e) => debug!(%remote, "connection ended: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;

    #[test]
    fn test_rejects_empty_remotes() {
        let cfg = RelayConfig {
            listen: "127.0.0.1:0".to_string(),
            remotes: Vec::new(),
            ..RelayConfig::default()
        };
        assert!(matches!(
            Relay::new(cfg, TlsConfig::default()),
            Err(RelayError::NoRemotes)
        ));
    }

    #[test]
    fn test_round_robin_remote_selection() {
        let cfg = RelayConfig {
            listen: "127.0.0.1:0".to_string(),
            remotes: vec!["a:1".to_string(), "b:2".to_string()],
            ..RelayConfig::default()
        };
        let relay = Relay::new(cfg, TlsConfig::default()).unwrap();
        assert_eq!(relay.pick_remote(), "a:1");
        assert_eq!(relay.pick_remote(), "b:2");
        assert_eq!(relay.pick_remote(), "a:1");
    }

    #[test]
    fn test_tls_listener_requires_material() {
        let cfg = RelayConfig {
            listen: "127.0.0.1:0".to_string(),
            listen_type: ListenType::Tls,
            remotes: vec!["a:1".to_string()],
            ..RelayConfig::default()
        };
        let relay = Arc::new(Relay::new(cfg, TlsConfig::default()).unwrap());
        let err = tokio::runtime::Runtime::new()
            .unwrap()
            .block_on(relay.listen_and_serve());
        assert!(matches!(err, Err(RelayError::MissingTlsMaterial(_))));
    }
}
