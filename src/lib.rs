//! # Mux Relay
//!
//! A network relay tool: forwards byte streams between a local listener
//! and remote endpoints, optionally carrying the forwarded traffic inside
//! an encrypted, multiplexed tunnel so many logical connections share a
//! small number of physical upstream links.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    Relay Layer                       │
//! │        (listen, pick remote, forward bytes)          │
//! ├─────────────────────────────────────────────────────┤
//! │                    Tunnel Layer                      │
//! │   (session pool, logical streams, dispatch queue)    │
//! ├─────────────────────────────────────────────────────┤
//! │                 Multiplexing Layer                   │
//! │         (smux sub-streams over one link)             │
//! ├─────────────────────────────────────────────────────┤
//! │                  Transport Layer                     │
//! │                  (TCP, TLS 1.3)                      │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! The relay and transport layers are thin glue; the tunnel layer carries
//! the interesting resource management. See [`tunnel`].

pub mod config;
pub mod relay;
pub mod transport;
pub mod tunnel;

pub use config::Config;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default relay listen port
pub const DEFAULT_PORT: u16 = 1234;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] transport::TransportError),

    #[error("Tunnel error: {0}")]
    Tunnel(#[from] tunnel::TunnelError),

    #[error("Relay error: {0}")]
    Relay(#[from] relay::RelayError),

    #[error("Configuration error: {0}")]
    Config(String),
}
