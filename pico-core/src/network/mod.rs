//! Framed I/O over a byte stream.
//!
//! The viewer link is a TCP stream, not a message channel: writes may be
//! partial, reads may deliver any prefix of a frame, and the protocol has
//! no per-frame length envelope. These primitives give every higher-level
//! read a stall budget and an explicit recovery path (drain).

pub mod framed;

pub use framed::{
    Drained, RecvPolicy, Received, drain_until_idle, recv_exact, recv_field, recv_word, send_all,
};
