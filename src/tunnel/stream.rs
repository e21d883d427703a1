//! Logical stream handle

use crate::transport::{ConnInfo, TunnelConn};
use async_smux::MuxStream;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Keeps a session's live-stream count accurate: incremented when a stream
/// is created, decremented when it is dropped.
pub(crate) struct StreamGuard(Arc<AtomicUsize>);

impl StreamGuard {
    pub(crate) fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// One logical byte stream multiplexed over a physical tunnel connection
///
/// Reads and writes delegate to the multiplexed sub-stream. Dropping the
/// stream closes only the sub-stream, never the physical connection.
/// Address reporting reflects the owning physical connection.
pub struct TunnelStream {
    inner: MuxStream<TunnelConn>,
    info: ConnInfo,
    _guard: StreamGuard,
}

impl TunnelStream {
    pub(crate) fn new(inner: MuxStream<TunnelConn>, info: ConnInfo, guard: StreamGuard) -> Self {
        Self {
            inner,
            info,
            _guard: guard,
        }
    }

    /// Local address of the physical connection carrying this stream
    pub fn local_addr(&self) -> SocketAddr {
        self.info.local
    }

    /// Peer address of the physical connection carrying this stream
    pub fn peer_addr(&self) -> SocketAddr {
        self.info.peer
    }
}

impl AsyncRead for TunnelStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for TunnelStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_counts() {
        let counter = Arc::new(AtomicUsize::new(0));

        let g1 = StreamGuard::new(counter.clone());
        let g2 = StreamGuard::new(counter.clone());
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        drop(g1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        drop(g2);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
