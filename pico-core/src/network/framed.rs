//! Send/receive primitives tolerant of partial delivery.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::error::PicoError;
use crate::wire::ByteOrder;

/// Scratch size used while draining.
const DRAIN_CHUNK: usize = 256;

// ── RecvPolicy ───────────────────────────────────────────────────

/// How long a receive waits for readiness, and how many empty waits it
/// tolerates before giving up on the remaining bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecvPolicy {
    pub timeout: Duration,
    pub stall_trials: u32,
}

impl Default for RecvPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(1000),
            stall_trials: 3,
        }
    }
}

// ── Received ─────────────────────────────────────────────────────

/// Outcome of [`recv_exact`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    /// The whole buffer was filled.
    Complete,
    /// The stall budget ran out after this many bytes. Framing is lost.
    Stalled(usize),
    /// The peer closed the stream after this many bytes.
    Closed(usize),
}

/// Outcome of [`drain_until_idle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Drained {
    /// Bytes discarded.
    pub bytes: usize,
    /// The drain ended because the peer closed the stream.
    pub closed: bool,
}

// ── Sending ──────────────────────────────────────────────────────

/// Write every byte of `bytes`, looping over partial writes.
///
/// Each individual write waits at most `write_timeout`. The caller decides
/// whether a failure tears the session down.
pub async fn send_all<W>(writer: &mut W, bytes: &[u8], write_timeout: Duration) -> Result<(), PicoError>
where
    W: AsyncWrite + Unpin,
{
    let mut sent = 0;
    while sent < bytes.len() {
        match timeout(write_timeout, writer.write(&bytes[sent..])).await {
            Err(_) => return Err(PicoError::Timeout(write_timeout)),
            Ok(Err(e)) => return Err(PicoError::Transport(e)),
            Ok(Ok(0)) => {
                return Err(PicoError::Transport(std::io::Error::from(
                    std::io::ErrorKind::WriteZero,
                )));
            }
            Ok(Ok(n)) => sent += n,
        }
    }
    match timeout(write_timeout, writer.flush()).await {
        Err(_) => Err(PicoError::Timeout(write_timeout)),
        Ok(result) => result.map_err(PicoError::Transport),
    }
}

// ── Receiving ────────────────────────────────────────────────────

/// Fill `buf` from `reader`.
///
/// Every read waits up to `policy.timeout`. A wait that yields nothing
/// counts as a stall; once `policy.stall_trials` stalls accumulate the
/// partial count is returned as [`Received::Stalled`]. A read error is
/// returned as `Err`.
pub async fn recv_exact<R>(reader: &mut R, buf: &mut [u8], policy: RecvPolicy) -> Result<Received, PicoError>
where
    R: AsyncRead + Unpin,
{
    let max_stalls = policy.stall_trials.max(1);
    let mut got = 0;
    let mut stalls = 0;
    while got < buf.len() {
        match timeout(policy.timeout, reader.read(&mut buf[got..])).await {
            Err(_) => {
                stalls += 1;
                if stalls >= max_stalls {
                    return Ok(Received::Stalled(got));
                }
            }
            Ok(Err(e)) => return Err(PicoError::Transport(e)),
            Ok(Ok(0)) => return Ok(Received::Closed(got)),
            Ok(Ok(n)) => got += n,
        }
    }
    Ok(Received::Complete)
}

/// [`recv_exact`] for a field inside a frame: anything short of complete
/// is an error.
pub async fn recv_field<R>(reader: &mut R, buf: &mut [u8], policy: RecvPolicy) -> Result<(), PicoError>
where
    R: AsyncRead + Unpin,
{
    match recv_exact(reader, buf, policy).await? {
        Received::Complete => Ok(()),
        Received::Stalled(_) => Err(PicoError::ProtocolDesync("short read mid-frame")),
        Received::Closed(_) => Err(PicoError::ConnectionClosed),
    }
}

/// Read one 4-byte integer in the frame's byte order.
pub async fn recv_word<R>(reader: &mut R, order: ByteOrder, policy: RecvPolicy) -> Result<u32, PicoError>
where
    R: AsyncRead + Unpin,
{
    let mut word = [0u8; 4];
    recv_field(reader, &mut word, policy).await?;
    Ok(order.word(word))
}

/// Discard incoming bytes until a read comes back empty.
///
/// Used to regain alignment after an unknown or malformed frame: with no
/// length envelope there is nothing to skip by, so the stream is emptied.
pub async fn drain_until_idle<R>(reader: &mut R, policy: RecvPolicy) -> Result<Drained, PicoError>
where
    R: AsyncRead + Unpin,
{
    let mut scratch = [0u8; DRAIN_CHUNK];
    let mut bytes = 0;
    loop {
        match timeout(policy.timeout, reader.read(&mut scratch)).await {
            Err(_) => return Ok(Drained { bytes, closed: false }),
            Ok(Ok(0)) => return Ok(Drained { bytes, closed: true }),
            Ok(Ok(n)) => bytes += n,
            Ok(Err(e)) => return Err(PicoError::Transport(e)),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
