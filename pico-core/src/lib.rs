//! # pico-core
//!
//! Client library that streams image buffers and marker counters to a
//! Pico Pixel viewer over its TCP protocol.
//!
//! This crate contains:
//! - **Client**: `PicoClient`, the session manager (connect, handshake, reconnect)
//! - **Markers**: `MarkerTable`, indexed trigger counters with auto/manual sync
//! - **Streaming**: `ImageInfo` plus gated and ungated image sends
//! - **Receiver**: background task applying viewer marker updates
//! - **Wire / Codec**: frame layout and the `PicoCodec` encoder
//! - **Network**: stall-tolerant send/receive primitives
//! - **State**: the `SessionPhase` state machine
//! - **Error**: `PicoError`, a typed `thiserror`-based error hierarchy

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod marker;
pub mod network;
pub mod receiver;
pub mod state;
pub mod stream;
pub mod task;
pub mod wire;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use client::PicoClient;
pub use codec::{OutboundFrame, PicoCodec};
pub use config::ClientConfig;
pub use error::{ErrorKind, PicoError};
pub use marker::{Marker, MarkerTable, RemoteUpdate, SyncMode};
pub use network::RecvPolicy;
pub use receiver::ReceiverStats;
pub use state::SessionPhase;
pub use stream::ImageInfo;
pub use task::BackgroundTask;
pub use wire::{
    ByteOrder, DEFAULT_MARKER_COLOR, DEFAULT_PORT, FramePrefix, ImageHeader, MarkerRecord,
    PayloadType, PixelFormat,
};
