//! Background receiver for viewer marker updates.
//!
//! The viewer only ever talks back with marker-sync frames. Anything else,
//! or anything malformed, is drained until the stream goes idle, since the
//! protocol carries no length envelope to skip by.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio::io::AsyncRead;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::client::Shared;
use crate::error::PicoError;
use crate::marker::RemoteUpdate;
use crate::network::{RecvPolicy, Received, drain_until_idle, recv_exact, recv_field, recv_word};
use crate::wire::{
    ByteOrder, FramePrefix, MARKER_RECORD_FIXED_SIZE, MarkerRecord, PREFIX_SIZE, PayloadType,
    check_name_len, clamp_count, decode_name,
};

// ── ReceiverStats ────────────────────────────────────────────────

/// Counters published by the receiver through a `watch` channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    /// Marker-sync frames fully parsed.
    pub frames_received: u64,
    /// Records written straight into the table (auto-sync).
    pub records_applied: u64,
    /// Records staged for [`synchronize_markers`](crate::PicoClient::synchronize_markers).
    pub records_staged: u64,
    /// Records naming no live marker.
    pub records_ignored: u64,
    /// Unknown or malformed frames discarded.
    pub frames_drained: u64,
    /// Successful automatic reconnections.
    pub reconnects: u64,
}

// ── Frame parsing ────────────────────────────────────────────────

/// What [`consume_frame`] did with one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// A marker-sync frame carrying this many records.
    Synced(usize),
    /// An unknown or malformed frame; this many bytes were discarded.
    Drained(usize),
}

/// Read one marker record in the frame's byte order.
pub async fn read_marker_record<R>(reader: &mut R, order: ByteOrder, policy: RecvPolicy) -> Result<MarkerRecord, PicoError>
where
    R: AsyncRead + Unpin,
{
    let mut fixed = [0u8; MARKER_RECORD_FIXED_SIZE];
    recv_field(reader, &mut fixed, policy).await?;
    let name_len = check_name_len(order.word_at(&fixed, 12))?;

    let mut name = vec![0u8; name_len];
    recv_field(reader, &mut name, policy).await?;

    Ok(MarkerRecord {
        index: order.word_at(&fixed, 0),
        use_count: clamp_count(order.word_at(&fixed, 4)),
        color: order.word_at(&fixed, 8),
        name: decode_name(&name)?,
    })
}

async fn read_marker_sync<R, F>(reader: &mut R, order: ByteOrder, policy: RecvPolicy, apply: &mut F) -> Result<usize, PicoError>
where
    R: AsyncRead + Unpin,
    F: FnMut(MarkerRecord),
{
    let count = clamp_count(recv_word(reader, order, policy).await?) as usize;
    for _ in 0..count {
        apply(read_marker_record(reader, order, policy).await?);
    }
    Ok(count)
}

/// Consume one frame from `reader`, handing each marker record to `apply`.
///
/// Returns `Err` only when the link itself is gone: the peer closed the
/// stream or the transport failed.
pub async fn consume_frame<R, F>(reader: &mut R, policy: RecvPolicy, mut apply: F) -> Result<FrameOutcome, PicoError>
where
    R: AsyncRead + Unpin,
    F: FnMut(MarkerRecord),
{
    let mut raw = [0u8; PREFIX_SIZE];
    match recv_exact(reader, &mut raw, policy).await? {
        Received::Complete => {}
        Received::Closed(_) => return Err(PicoError::ConnectionClosed),
        Received::Stalled(got) => {
            debug!(got, "incomplete frame prefix");
            return skip(reader, policy, got).await;
        }
    }

    let prefix = match FramePrefix::decode(&raw) {
        Ok(prefix) => prefix,
        Err(e) => {
            debug!("discarding frame: {e}");
            return skip(reader, policy, PREFIX_SIZE).await;
        }
    };
    match prefix.kind() {
        Ok(PayloadType::MarkerSync) => {}
        Ok(kind) => {
            debug!(?kind, "discarding unexpected frame");
            return skip(reader, policy, PREFIX_SIZE).await;
        }
        Err(e) => {
            debug!("discarding frame: {e}");
            return skip(reader, policy, PREFIX_SIZE).await;
        }
    }

    match read_marker_sync(reader, prefix.order, policy, &mut apply).await {
        Ok(count) => Ok(FrameOutcome::Synced(count)),
        Err(PicoError::ProtocolDesync(reason)) => {
            debug!("marker-sync frame abandoned: {reason}");
            skip(reader, policy, PREFIX_SIZE).await
        }
        Err(e) => Err(e),
    }
}

async fn skip<R>(reader: &mut R, policy: RecvPolicy, already: usize) -> Result<FrameOutcome, PicoError>
where
    R: AsyncRead + Unpin,
{
    let drained = drain_until_idle(reader, policy).await?;
    if drained.closed {
        return Err(PicoError::ConnectionClosed);
    }
    Ok(FrameOutcome::Drained(already + drained.bytes))
}

// ── Receiver task ────────────────────────────────────────────────

#[derive(Default)]
struct Tally {
    applied: u64,
    staged: u64,
    ignored: u64,
}

/// Wait for one frame and apply it. `Ok` covers an idle interval too.
async fn poll_once(shared: &Shared) -> Result<(), PicoError> {
    let policy = shared.config.recv_policy();
    let mut guard = shared.reader.lock().await;
    let Some(reader) = guard.as_mut() else {
        return Err(PicoError::NotConnected);
    };

    let mut head = [0u8; PREFIX_SIZE];
    match timeout(policy.timeout, reader.peek(&mut head)).await {
        Err(_) => return Ok(()),
        Ok(Ok(0)) => return Err(PicoError::ConnectionClosed),
        Ok(Ok(_)) => {}
        Ok(Err(e)) => return Err(PicoError::Transport(e)),
    }

    let mut tally = Tally::default();
    let outcome = consume_frame(reader, policy, |record| {
        match shared.markers().apply_remote(record.index, record.use_count) {
            RemoteUpdate::Applied => tally.applied += 1,
            RemoteUpdate::Staged => tally.staged += 1,
            RemoteUpdate::Ignored => {
                debug!(index = record.index, name = %record.name, "update for unknown marker ignored");
                tally.ignored += 1;
            }
        }
    })
    .await?;
    drop(guard);

    shared.stats.send_modify(|stats| {
        stats.records_applied += tally.applied;
        stats.records_staged += tally.staged;
        stats.records_ignored += tally.ignored;
        match outcome {
            FrameOutcome::Synced(_) => stats.frames_received += 1,
            FrameOutcome::Drained(_) => stats.frames_drained += 1,
        }
    });
    trace!(?outcome, "frame consumed");
    Ok(())
}

/// Receiver body: poll the link until cancelled or the link is lost for
/// good. With auto-reconnect on, one reconnection is tried per drop.
pub(crate) async fn run(shared: Arc<Shared>, cancel: CancellationToken) {
    debug!("marker receiver started");
    loop {
        let step = tokio::select! {
            _ = cancel.cancelled() => break,
            step = poll_once(&shared) => step,
        };
        let Err(e) = step else { continue };
        if cancel.is_cancelled() {
            break;
        }

        warn!("viewer link lost: {e}");
        shared.drop_link().await;
        if !shared.auto_reconnect.load(Ordering::SeqCst) {
            break;
        }

        let attempt = tokio::select! {
            _ = cancel.cancelled() => break,
            attempt = shared.reconnect() => attempt,
        };
        match attempt {
            Ok(()) => {
                shared.stats.send_modify(|stats| stats.reconnects += 1);
                info!("reconnected to viewer; markers republished");
            }
            Err(e) => {
                warn!("reconnection failed: {e}");
                break;
            }
        }
    }
    shared.settle_dropped();
    debug!("marker receiver stopped");
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use bytes::BytesMut;
    use tokio::io::{AsyncWriteExt, duplex};

    use crate::codec::OutboundFrame;
    use crate::marker::{MarkerTable, SyncMode};
    use crate::wire::SIGNATURE;

    fn fast_policy() -> RecvPolicy {
        RecvPolicy {
            timeout: Duration::from_millis(30),
            stall_trials: 2,
        }
    }

    fn be_marker_frame(records: &[(u32, i32, u32, &str)]) -> Vec<u8> {
        let mut raw = Vec::new();
        for word in [SIGNATURE, PayloadType::MarkerSync as u32, 1, 1] {
            raw.extend_from_slice(&word.to_be_bytes());
        }
        raw.extend_from_slice(&(records.len() as u32).to_be_bytes());
        for &(index, count, color, name) in records {
            raw.extend_from_slice(&index.to_be_bytes());
            raw.extend_from_slice(&count.to_be_bytes());
            raw.extend_from_slice(&color.to_be_bytes());
            raw.extend_from_slice(&(name.len() as u32 + 1).to_be_bytes());
            raw.extend_from_slice(name.as_bytes());
            raw.push(0);
        }
        raw
    }

    #[tokio::test]
    async fn published_table_parses_back() {
        let mut table = MarkerTable::new(SyncMode::Auto);
        table.add("albedo", 4, 0x11).unwrap();
        table.add("normals", 0, 0x22).unwrap();
        let frame: BytesMut = OutboundFrame::MarkerSync(table.records()).to_bytes().unwrap();

        let mut got = Vec::new();
        let mut reader: &[u8] = &frame;
        let outcome = consume_frame(&mut reader, fast_policy(), |r| got.push(r))
            .await
            .unwrap();

        assert_eq!(outcome, FrameOutcome::Synced(2));
        assert_eq!(got, table.records());
    }

    #[tokio::test]
    async fn big_endian_frame_with_negative_count() {
        let raw = be_marker_frame(&[(0, -3, 0xFF66_FF00, "sky"), (7, 9, 1, "fog")]);
        let mut got = Vec::new();
        let mut reader: &[u8] = &raw;
        consume_frame(&mut reader, fast_policy(), |r| got.push(r))
            .await
            .unwrap();

        assert_eq!(got.len(), 2);
        assert_eq!(got[0].use_count, 0);
        assert_eq!(got[0].color, 0xFF66_FF00);
        assert_eq!(got[0].name, "sky");
        assert_eq!(got[1].index, 7);
        assert_eq!(got[1].use_count, 9);
    }

    #[tokio::test]
    async fn unexpected_frame_is_drained() {
        let (mut tx, mut rx) = duplex(1024);
        let mut raw = Vec::new();
        for word in [SIGNATURE, PayloadType::Image as u32, 1, 0, 42, 43] {
            raw.extend_from_slice(&word.to_le_bytes());
        }
        tx.write_all(&raw).await.unwrap();

        let mut applied = 0;
        let outcome = consume_frame(&mut rx, fast_policy(), |_| applied += 1)
            .await
            .unwrap();
        assert_eq!(outcome, FrameOutcome::Drained(raw.len()));
        assert_eq!(applied, 0);
    }

    #[tokio::test]
    async fn bad_magic_is_drained() {
        let (mut tx, mut rx) = duplex(1024);
        tx.write_all(&[0xAB; 24]).await.unwrap();
        let outcome = consume_frame(&mut rx, fast_policy(), |_| {}).await.unwrap();
        assert_eq!(outcome, FrameOutcome::Drained(24));
    }

    #[tokio::test]
    async fn truncated_record_abandons_frame() {
        let (mut tx, mut rx) = duplex(1024);
        let raw = be_marker_frame(&[(0, 1, 0, "a"), (1, 2, 0, "b")]);
        // Cut the second record short.
        tx.write_all(&raw[..raw.len() - 3]).await.unwrap();

        let mut got = Vec::new();
        let outcome = consume_frame(&mut rx, fast_policy(), |r| got.push(r))
            .await
            .unwrap();
        assert!(matches!(outcome, FrameOutcome::Drained(_)));
        assert_eq!(got.len(), 1);
    }

    #[tokio::test]
    async fn closed_stream_is_link_loss() {
        let mut reader: &[u8] = &[];
        assert!(matches!(
            consume_frame(&mut reader, fast_policy(), |_| {}).await,
            Err(PicoError::ConnectionClosed)
        ));

        // Closed while draining is link loss too.
        let mut reader: &[u8] = &[0xAB; 20];
        assert!(matches!(
            consume_frame(&mut reader, fast_policy(), |_| {}).await,
            Err(PicoError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn oversized_name_is_rejected() {
        let mut raw = Vec::new();
        for word in [0u32, 1, 2, u32::MAX] {
            raw.extend_from_slice(&word.to_le_bytes());
        }
        let mut reader: &[u8] = &raw;
        assert!(matches!(
            read_marker_record(&mut reader, ByteOrder::Little, fast_policy()).await,
            Err(PicoError::ProtocolDesync(_))
        ));
    }
}
