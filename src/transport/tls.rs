//! TLS 1.3 transport (rustls)
//!
//! Wraps the physical tunnel connections in TLS. The client verifies the
//! server against the webpki root store, optionally extended with a CA
//! bundle from disk so self-signed deployments work without disabling
//! verification.

use super::{Acceptor, ConnInfo, Dialer, TransportConfig, TransportError, TunnelConn};
use async_trait::async_trait;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::RootCertStore;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::warn;

/// TLS dialer
pub struct TlsDialer {
    config: TransportConfig,
    tls_config: Arc<rustls::ClientConfig>,
    /// Server name presented in the ClientHello; falls back to the host
    /// part of the dialed address when unset
    sni: Option<String>,
}

impl TlsDialer {
    /// Create a new TLS dialer
    ///
    /// `ca` is an optional path to a PEM bundle of extra trusted roots.
    pub fn new(
        config: TransportConfig,
        ca: Option<&str>,
        sni: Option<String>,
    ) -> Result<Self, TransportError> {
        let mut root_store = RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };

        if let Some(path) = ca {
            for cert in load_certs(path)? {
                root_store
                    .add(cert)
                    .map_err(|e| TransportError::Tls(e.to_string()))?;
            }
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        Ok(Self {
            config,
            tls_config: Arc::new(tls_config),
            sni,
        })
    }
}

#[async_trait]
impl Dialer for TlsDialer {
    async fn dial(&self, addr: &str) -> Result<(TunnelConn, ConnInfo), TransportError> {
        let timeout = Duration::from_secs(self.config.dial_timeout);

        let tcp_stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(TransportError::Io)?;

        if self.config.nodelay {
            tcp_stream.set_nodelay(true).ok();
        }

        let info = ConnInfo {
            local: tcp_stream.local_addr()?,
            peer: tcp_stream.peer_addr()?,
        };

        let server_name = match &self.sni {
            Some(sni) => sni.clone(),
            None => host_for_sni(addr),
        };
        let server_name = ServerName::try_from(server_name)
            .map_err(|e| TransportError::Tls(format!("Invalid server name: {}", e)))?;

        let connector = TlsConnector::from(self.tls_config.clone());
        let tls_stream = tokio::time::timeout(timeout, connector.connect(server_name, tcp_stream))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::Tls(e.to_string()))?;

        Ok((Box::new(tls_stream), info))
    }
}

/// TLS listener
///
/// An inbound connection that fails the TLS handshake is abandoned and the
/// listener keeps accepting; only listener-level failures are returned.
pub struct TlsListener {
    listener: TcpListener,
    acceptor: TlsAcceptor,
    local_addr: SocketAddr,
    config: TransportConfig,
}

impl TlsListener {
    /// Bind a listener on `addr` serving the given PEM certificate chain
    /// and private key
    pub async fn bind(
        addr: &str,
        cert_path: &str,
        key_path: &str,
        config: TransportConfig,
    ) -> Result<Self, TransportError> {
        let certs = load_certs(cert_path)?;
        let key = load_private_key(key_path)?;

        let tls_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| TransportError::Tls(e.to_string()))?;

        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener,
            acceptor: TlsAcceptor::from(Arc::new(tls_config)),
            local_addr,
            config,
        })
    }
}

#[async_trait]
impl Acceptor for TlsListener {
    async fn accept(&self) -> Result<(TunnelConn, ConnInfo), TransportError> {
        loop {
            let (tcp_stream, peer) = self.listener.accept().await?;

            if self.config.nodelay {
                tcp_stream.set_nodelay(true).ok();
            }

            let timeout = Duration::from_secs(self.config.dial_timeout);
            match tokio::time::timeout(timeout, self.acceptor.accept(tcp_stream)).await {
                Ok(Ok(tls_stream)) => {
                    let info = ConnInfo {
                        local: self.local_addr,
                        peer,
                    };
                    return Ok((Box::new(tls_stream), info));
                }
                Ok(Err(e)) => {
                    warn!(%peer, "TLS handshake failed: {}", e);
                }
                Err(_) => {
                    warn!(%peer, "TLS handshake timed out");
                }
            }
        }
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// Derive the server name from a dialed `host:port` address
///
/// Bracketed IPv6 addresses lose their brackets so the result parses as
/// an IP literal.
fn host_for_sni(addr: &str) -> String {
    let host = addr.rsplit_once(':').map(|(host, _)| host).unwrap_or(addr);
    host.trim_start_matches('[').trim_end_matches(']').to_string()
}

/// Load a TLS certificate chain from a PEM file
fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>, TransportError> {
    let mut file = std::io::BufReader::new(std::fs::File::open(path).map_err(|e| {
        TransportError::Tls(format!("Failed to open cert file {}: {}", path, e))
    })?);
    let certs: Vec<_> = rustls_pemfile::certs(&mut file)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| TransportError::Tls(format!("Failed to parse {}: {}", path, e)))?;
    if certs.is_empty() {
        return Err(TransportError::Tls(format!(
            "No certificates found in {}",
            path
        )));
    }
    Ok(certs)
}

/// Load a TLS private key from a PEM file
fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>, TransportError> {
    let mut file = std::io::BufReader::new(std::fs::File::open(path).map_err(|e| {
        TransportError::Tls(format!("Failed to open key file {}: {}", path, e))
    })?);
    rustls_pemfile::private_key(&mut file)
        .map_err(|e| TransportError::Tls(format!("Failed to parse {}: {}", path, e)))?
        .ok_or_else(|| TransportError::Tls(format!("No private key found in {}", path)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialer_with_default_roots() {
        let dialer = TlsDialer::new(TransportConfig::default(), None, None);
        assert!(dialer.is_ok());
    }

    #[test]
    fn test_sni_fallback_from_address() {
        assert_eq!(host_for_sni("example.com:443"), "example.com");
        assert_eq!(host_for_sni("10.0.0.1:443"), "10.0.0.1");
        assert_eq!(host_for_sni("[2001:db8::1]:443"), "2001:db8::1");

        for addr in ["example.com:443", "10.0.0.1:443", "[2001:db8::1]:443"] {
            assert!(ServerName::try_from(host_for_sni(addr)).is_ok());
        }
    }

    #[test]
    fn test_missing_ca_file() {
        let result = TlsDialer::new(
            TransportConfig::default(),
            Some("/nonexistent/ca.pem"),
            None,
        );
        assert!(result.is_err());
    }
}
