//! Transport abstraction layer.
//!
//! The phase protocol needs a reliable, ordered broadcast of single-line
//! text frames between participants. [`PhaseTransport`] is that contract;
//! the session neither knows nor cares what carries the frames.

pub mod loopback;
pub mod stdio;

pub use loopback::{LoopbackBus, LoopbackEndpoint};
pub use stdio::{StdioConfig, StdioTransport};

use std::fmt;

use crate::error::TransportError;

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Default maximum frame size in bytes (64 KB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// Default buffer size for the stdio transport (64 KB).
pub const DEFAULT_STDIO_BUFFER_SIZE: usize = 64 * 1024;

/// Default capacity of a loopback bus.
pub const DEFAULT_LOOPBACK_CAPACITY: usize = 256;

/// Async transport for phase frames.
///
/// Implementations must deliver frames in send order and must deliver a
/// participant's own frames back to it when that is how the underlying
/// medium behaves; the receiver copes either way.
#[async_trait::async_trait]
pub trait PhaseTransport: Send + Sync {
    /// Sends one frame to every participant.
    async fn send_frame(&self, frame: &str) -> Result<()>;

    /// Receives the next frame.
    ///
    /// Returns `Ok(None)` once the transport is closed or at EOF.
    async fn recv_frame(&self) -> Result<Option<String>>;

    /// Closes the transport. Once frames already queued locally are drained,
    /// pending and future receives return `None`.
    async fn close(&self) -> Result<()>;

    /// Returns the type of this transport for logging.
    fn transport_type(&self) -> TransportType;
}

/// Transport type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportType {
    /// In-process broadcast bus.
    Loopback,
    /// One frame per line over stdin/stdout.
    Stdio,
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loopback => write!(f, "loopback"),
            Self::Stdio => write!(f, "stdio"),
        }
    }
}
