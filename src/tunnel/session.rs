//! Tunnel session - one physical connection plus its multiplexer

use super::stream::StreamGuard;
use super::{TunnelError, TunnelStream};
use crate::transport::{ConnInfo, Dialer, TunnelConn};
use async_smux::{MuxBuilder, MuxConnector};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// A client-side tunnel session
///
/// Owns exactly one physical connection and the multiplexer bound to it;
/// the connection is never shared with another session. Closing the
/// session tears down the multiplexer and the physical connection
/// together and is idempotent. A session that failed to establish is
/// never constructed, so there is no uninitialized state to guard for.
pub struct TunnelSession {
    connector: MuxConnector<TunnelConn>,
    /// Runs the multiplexer over the physical connection; owns the
    /// connection, so aborting it tears both down
    worker: JoinHandle<()>,
    info: ConnInfo,
    live_streams: Arc<AtomicUsize>,
    closed: AtomicBool,
}

impl TunnelSession {
    /// Establish a new session to `addr` through the given dialer
    pub async fn connect(dialer: &dyn Dialer, addr: &str) -> Result<Self, TunnelError> {
        let (conn, info) = dialer.dial(addr).await?;
        info!(peer = %info.peer, "new tunnel session established");
        Ok(Self::new(conn, info))
    }

    /// Build a session over an already-established physical connection
    pub fn new(conn: TunnelConn, info: ConnInfo) -> Self {
        let mut builder = MuxBuilder::client();
        let (connector, _acceptor, worker) = builder.with_connection(conn).build();

        let peer = info.peer;
        let worker = tokio::spawn(async move {
            if let Err(e) = worker.await {
                debug!(%peer, "mux worker exited: {}", e);
            }
        });

        Self {
            connector,
            worker,
            info,
            live_streams: Arc::new(AtomicUsize::new(0)),
            closed: AtomicBool::new(false),
        }
    }

    /// Open a new logical stream on this session
    pub fn open_stream(&self) -> Result<TunnelStream, TunnelError> {
        if self.is_closed() {
            return Err(TunnelError::SessionClosed);
        }
        let stream = self
            .connector
            .connect()
            .map_err(|e| TunnelError::StreamOpen(e.to_string()))?;
        Ok(TunnelStream::new(
            stream,
            self.info,
            StreamGuard::new(self.live_streams.clone()),
        ))
    }

    /// Close the session, tearing down the multiplexer and the physical
    /// connection. Closing an already-closed session is a no-op.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.worker.abort();
        }
    }

    /// True once the session has been closed or its physical connection
    /// or multiplexer has terminated for any reason
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.worker.is_finished()
    }

    /// Number of live, not-yet-dropped logical streams
    pub fn num_streams(&self) -> usize {
        self.live_streams.load(Ordering::SeqCst)
    }

    /// Peer address of the physical connection
    pub fn peer_addr(&self) -> SocketAddr {
        self.info.peer
    }
}

impl Drop for TunnelSession {
    fn drop(&mut self) {
        self.worker.abort();
    }
}
