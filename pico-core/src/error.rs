//! Domain-specific error types for the Pico Pixel client.
//!
//! All fallible operations return `Result<T, PicoError>`.
//! Nothing in the library panics on peer input or aborts the host process.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// The canonical error type for the Pico Pixel client.
#[derive(Debug, Error)]
pub enum PicoError {
    // ── Argument Errors ──────────────────────────────────────────
    /// A caller-supplied value was rejected before any I/O.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The requested port lies in the reserved range.
    #[error("invalid port {0}: ports up to 1024 are reserved")]
    InvalidPort(u16),

    /// A live marker already uses this name.
    #[error("a marker named {0:?} already exists")]
    DuplicateMarker(String),

    /// No live marker at this index.
    #[error("no marker at index {0}")]
    MarkerNotFound(u32),

    /// The marker's trigger count has reached zero.
    #[error("marker {0} has no triggers left")]
    MarkerExhausted(u32),

    // ── Connection Errors ────────────────────────────────────────
    /// The viewer host name could not be resolved.
    #[error("failed to resolve {host}: {source}")]
    ResolutionFailed {
        host: String,
        #[source]
        source: std::io::Error,
    },

    /// Every resolved address refused the connection.
    #[error("failed to connect to {addr}")]
    ConnectFailed { addr: String },

    /// The operation needs a live connection.
    #[error("not connected")]
    NotConnected,

    /// The TCP/IO layer reported an error.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// The peer closed the connection.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// A lifecycle step does not apply to the current session phase.
    #[error("session is {phase}; cannot {event}")]
    InvalidTransition {
        phase: &'static str,
        event: &'static str,
    },

    // ── Protocol Errors ──────────────────────────────────────────
    /// Framing was lost: short read mid-record or malformed field.
    #[error("protocol desync: {0}")]
    ProtocolDesync(&'static str),

    /// Received bytes that do not start with the Pico Pixel signature.
    #[error("invalid magic {0:#010x}")]
    InvalidMagic(u32),

    /// A numeric value did not map to any known enum variant.
    #[error("unknown {type_name} discriminant: {value:#x}")]
    UnknownVariant { type_name: &'static str, value: u32 },
}

// ── ErrorKind ─────────────────────────────────────────────────────

/// Coarse error categories callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Rejected before any I/O happened.
    InvalidArgument,
    /// The session has no live connection.
    NotConnected,
    /// Failure at the OS/socket boundary. Check `is_connected` afterwards.
    Transport,
    /// Stream framing was lost; handled internally by draining.
    ProtocolDesync,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::InvalidArgument => write!(f, "InvalidArgument"),
            ErrorKind::NotConnected => write!(f, "NotConnected"),
            ErrorKind::Transport => write!(f, "Transport"),
            ErrorKind::ProtocolDesync => write!(f, "ProtocolDesync"),
        }
    }
}

impl PicoError {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PicoError::InvalidArgument(_)
            | PicoError::InvalidPort(_)
            | PicoError::DuplicateMarker(_)
            | PicoError::MarkerNotFound(_)
            | PicoError::MarkerExhausted(_) => ErrorKind::InvalidArgument,
            PicoError::NotConnected => ErrorKind::NotConnected,
            PicoError::ResolutionFailed { .. }
            | PicoError::ConnectFailed { .. }
            | PicoError::Transport(_)
            | PicoError::Timeout(_)
            | PicoError::ConnectionClosed
            | PicoError::InvalidTransition { .. } => ErrorKind::Transport,
            PicoError::ProtocolDesync(_)
            | PicoError::InvalidMagic(_)
            | PicoError::UnknownVariant { .. } => ErrorKind::ProtocolDesync,
        }
    }
}
