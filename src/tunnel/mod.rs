//! Tunnel layer - multiplexed stream transport
//!
//! Carries many logical byte streams over few physical connections:
//! - [`TunnelStream`]: one logical stream, a plain `AsyncRead + AsyncWrite`
//! - [`TunnelSession`]: one physical connection plus its multiplexer
//! - [`SessionPool`]: client-side session reuse, bounded per-session
//! - [`TunnelServer`]: server-side demultiplexing and dispatch
//!
//! The multiplexing sub-protocol itself (framing, flow control) is the
//! smux implementation's concern; this layer only manages sessions,
//! capacity and dispatch.

mod pool;
mod server;
mod session;
mod stream;

pub use pool::SessionPool;
pub use server::TunnelServer;
pub use session::TunnelSession;
pub use stream::TunnelStream;

use crate::transport::TransportError;

/// Tunnel layer errors
#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error("Session closed")]
    SessionClosed,

    #[error("Failed to open stream: {0}")]
    StreamOpen(String),

    #[error("Tunnel server closed")]
    ServerClosed,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Maximum live logical streams per session
pub const MAX_STREAMS_PER_SESSION: usize = 10;

/// Capacity of the shared dispatch queue on the server side
pub const DISPATCH_BACKLOG: usize = 1024;
