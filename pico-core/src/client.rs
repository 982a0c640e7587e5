//! Session manager.
//!
//! [`PicoClient`] owns the viewer link, the marker table and the background
//! receiver. Caller-facing calls run on the caller's task; the receiver
//! task shares the same [`Shared`] state behind locks.
//!
//! Lock discipline: the marker table and session bookkeeping sit behind
//! `std` mutexes and are never held across an `.await`. The socket halves
//! sit behind `tokio` mutexes so a whole frame is written under one guard.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::codec::OutboundFrame;
use crate::config::ClientConfig;
use crate::error::PicoError;
use crate::marker::{Marker, MarkerTable, SyncMode};
use crate::network::send_all;
use crate::receiver::{self, ReceiverStats};
use crate::state::{SessionEvent, SessionPhase, SessionState, Target};
use crate::task::BackgroundTask;
use crate::wire::{AUTO_IMAGE_PREFIX, DEFAULT_PORT, RESERVED_PORT_MAX};

/// Host used when the caller passes an empty host.
pub const LOOPBACK_HOST: &str = "127.0.0.1";

// ── Shared ───────────────────────────────────────────────────────

/// State shared between the caller and the receiver task.
pub(crate) struct Shared {
    pub(crate) config: ClientConfig,
    markers: Mutex<MarkerTable>,
    session: Mutex<SessionState>,
    pub(crate) reader: tokio::sync::Mutex<Option<OwnedReadHalf>>,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    /// Serializes link establishment and teardown.
    link_lock: tokio::sync::Mutex<()>,
    pub(crate) auto_reconnect: AtomicBool,
    reconnecting: AtomicBool,
    image_seq: AtomicU64,
    pub(crate) stats: watch::Sender<ReceiverStats>,
}

impl Shared {
    fn new(config: ClientConfig) -> Self {
        let mode = if config.auto_sync {
            SyncMode::Auto
        } else {
            SyncMode::Manual
        };
        let (stats, _) = watch::channel(ReceiverStats::default());
        Self {
            auto_reconnect: AtomicBool::new(config.auto_reconnect),
            config,
            markers: Mutex::new(MarkerTable::new(mode)),
            session: Mutex::new(SessionState::default()),
            reader: tokio::sync::Mutex::new(None),
            writer: tokio::sync::Mutex::new(None),
            link_lock: tokio::sync::Mutex::new(()),
            reconnecting: AtomicBool::new(false),
            image_seq: AtomicU64::new(0),
            stats,
        }
    }

    pub(crate) fn markers(&self) -> MutexGuard<'_, MarkerTable> {
        self.markers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn session(&self) -> MutexGuard<'_, SessionState> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.session().phase.is_connected()
    }

    /// Name for an image sent without one. Sequence is per session.
    pub(crate) fn next_image_name(&self) -> String {
        let n = self.image_seq.fetch_add(1, Ordering::Relaxed);
        format!("{AUTO_IMAGE_PREFIX}{n}")
    }

    /// Open the TCP link, send the handshake and install the socket halves.
    ///
    /// Succeeds immediately if a link is already up. Leaves the session
    /// `Disconnected` on every failure, including the future being dropped
    /// mid-attempt.
    async fn establish(&self, host: &str, port: u16) -> Result<(), PicoError> {
        let _link = self.link_lock.lock().await;
        if self.is_connected() {
            return Ok(());
        }
        self.session().phase.apply(SessionEvent::Dial)?;
        let attempt = LinkAttempt::new(self);

        let addr = self.open_and_greet(host, port).await?;
        let mut session = self.session();
        session.phase.apply(SessionEvent::HandshakeSent)?;
        session.target = Some(Target {
            host: addr.ip().to_string(),
            port,
        });
        session.peer = Some(addr);
        attempt.commit();
        info!(peer = %addr, "connected to viewer");
        Ok(())
    }

    async fn open_and_greet(&self, host: &str, port: u16) -> Result<SocketAddr, PicoError> {
        let (stream, addr) = self.open_stream(host, port).await?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("set_nodelay failed: {e}");
        }
        self.session().phase.apply(SessionEvent::LinkOpened)?;

        let (read_half, mut write_half) = stream.into_split();
        let hello = OutboundFrame::Handshake {
            client_id: self.config.client_id.clone(),
        }
        .to_bytes()?;
        send_all(&mut write_half, &hello, self.config.send_timeout()).await?;

        *self.reader.lock().await = Some(read_half);
        *self.writer.lock().await = Some(write_half);
        Ok(addr)
    }

    /// Resolve `host` (IPv4 only) and connect to the first address that
    /// accepts.
    async fn open_stream(&self, host: &str, port: u16) -> Result<(TcpStream, SocketAddr), PicoError> {
        let host = if host.is_empty() { LOOPBACK_HOST } else { host };
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
            .await
            .map_err(|source| PicoError::ResolutionFailed {
                host: host.to_string(),
                source,
            })?
            .filter(SocketAddr::is_ipv4)
            .collect();
        if addrs.is_empty() {
            return Err(PicoError::ResolutionFailed {
                host: host.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no IPv4 address"),
            });
        }

        let connect_timeout = self.config.connect_timeout();
        for addr in addrs {
            match tokio::time::timeout(connect_timeout, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => return Ok((stream, addr)),
                Ok(Err(e)) => debug!(%addr, "connect failed: {e}"),
                Err(_) => debug!(%addr, "connect timed out after {connect_timeout:?}"),
            }
        }

        if self.reconnecting.load(Ordering::SeqCst) {
            info!("attempting reconnection to viewer at {host}:{port}");
        } else {
            warn!("connection to {host}:{port} failed; the Pico Pixel viewer must be running");
        }
        Err(PicoError::ConnectFailed {
            addr: format!("{host}:{port}"),
        })
    }

    /// Write several buffers back to back under one writer guard, so no
    /// other frame can interleave.
    pub(crate) async fn send_parts(&self, parts: &[&[u8]]) -> Result<(), PicoError> {
        let mut writer = self.writer.lock().await;
        let Some(stream) = writer.as_mut() else {
            return Err(PicoError::NotConnected);
        };
        let write_timeout = self.config.send_timeout();
        for part in parts {
            send_all(stream, part, write_timeout).await?;
        }
        Ok(())
    }

    /// Publish every live marker to the viewer.
    pub(crate) async fn publish_markers(&self) -> Result<(), PicoError> {
        if !self.is_connected() {
            return Err(PicoError::NotConnected);
        }
        let records = self.markers().records();
        let count = records.len();
        let frame = OutboundFrame::MarkerSync(records).to_bytes()?;
        self.send_parts(&[&frame]).await?;
        debug!(markers = count, "marker table published");
        Ok(())
    }

    /// Forget the current link after the viewer or transport ended it.
    pub(crate) async fn drop_link(&self) {
        self.reader.lock().await.take();
        self.writer.lock().await.take();
        let _ = self.session().phase.apply(SessionEvent::LinkLost);
    }

    /// Re-establish the last link and republish the marker table.
    pub(crate) async fn reconnect(&self) -> Result<(), PicoError> {
        let Some(target) = self.session().target.clone() else {
            return Err(PicoError::NotConnected);
        };
        let _flag = ReconnectFlag::raise(&self.reconnecting);
        info!(host = %target.host, port = target.port, "reconnecting to viewer");

        self.establish(&target.host, target.port).await?;
        if let Err(e) = self.publish_markers().await {
            self.drop_link().await;
            return Err(e);
        }
        Ok(())
    }

    /// Called by the receiver on exit: a dropped link with nobody left to
    /// revive it is disconnected.
    pub(crate) fn settle_dropped(&self) {
        let mut session = self.session();
        if session.phase == SessionPhase::Dropped {
            let _ = session.phase.apply(SessionEvent::Settled);
            session.peer = None;
        }
    }

    /// Caller-initiated shutdown. No-op when already disconnected.
    async fn close_link(&self) {
        let _link = self.link_lock.lock().await;
        let uptime = {
            let mut session = self.session();
            session.target = None;
            let uptime = session.phase.uptime();
            if session.phase.apply(SessionEvent::CloseRequested).is_err() {
                return;
            }
            uptime
        };

        if let Some(mut stream) = self.writer.lock().await.take() {
            if let Err(e) = stream.shutdown().await {
                debug!("shutdown failed: {e}");
            }
        }
        self.reader.lock().await.take();

        let mut session = self.session();
        session.peer = None;
        let _ = session.phase.apply(SessionEvent::Settled);
        info!(?uptime, "disconnected from viewer");
    }
}

// ── Attempt guards ───────────────────────────────────────────────

/// Rolls a half-built link back to `Disconnected` when dropped before
/// [`commit`](Self::commit), whether the attempt failed or its future was
/// cancelled.
struct LinkAttempt<'a> {
    shared: &'a Shared,
    committed: bool,
}

impl<'a> LinkAttempt<'a> {
    fn new(shared: &'a Shared) -> Self {
        Self {
            shared,
            committed: false,
        }
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for LinkAttempt<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        // A half missed here is overwritten by the next attempt.
        if let Ok(mut reader) = self.shared.reader.try_lock() {
            reader.take();
        }
        if let Ok(mut writer) = self.shared.writer.try_lock() {
            writer.take();
        }
        let mut session = self.shared.session();
        session.phase.reset();
        session.peer = None;
        debug!("link attempt rolled back");
    }
}

/// Holds the "currently reconnecting" flag up for its lifetime.
struct ReconnectFlag<'a>(&'a AtomicBool);

impl<'a> ReconnectFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for ReconnectFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

// ── PicoClient ───────────────────────────────────────────────────

/// A session streaming images and markers to a Pico Pixel viewer.
///
/// ```no_run
/// # use pico_core::{ClientConfig, ImageInfo, PicoClient, PixelFormat};
/// # async fn example() -> Result<(), pico_core::PicoError> {
/// let client = PicoClient::new(ClientConfig::with_client_id("renderer"));
/// client.connect_local().await?;
/// let marker = client.add_marker("shadow-map", 3)?;
///
/// let pixels = vec![0u8; 64 * 64 * 4];
/// let info = ImageInfo::new(PixelFormat::Rgba8, 64, 64, 64 * 4).with_name("shadow");
/// client.send_image_gated(marker, &info, &pixels).await?;
/// # Ok(())
/// # }
/// ```
pub struct PicoClient {
    pub(crate) shared: Arc<Shared>,
    receiver: Mutex<Option<BackgroundTask>>,
}

impl PicoClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            shared: Arc::new(Shared::new(config)),
            receiver: Mutex::new(None),
        }
    }

    pub fn with_client_id(client_id: impl Into<String>) -> Self {
        Self::new(ClientConfig::with_client_id(client_id))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    fn receiver_slot(&self) -> MutexGuard<'_, Option<BackgroundTask>> {
        self.receiver.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Connection ───────────────────────────────────────────────

    /// Connect to the viewer on loopback at the default port.
    pub async fn connect_local(&self) -> Result<(), PicoError> {
        self.connect("", DEFAULT_PORT).await
    }

    /// Connect to the host and port from the configuration.
    pub async fn connect_configured(&self) -> Result<(), PicoError> {
        let host = self.shared.config.host.clone();
        self.connect(&host, self.shared.config.port).await
    }

    /// Connect, send the handshake and start the background receiver.
    ///
    /// An empty `host` means loopback. Returns `Ok` without doing anything
    /// if already connected.
    pub async fn connect(&self, host: &str, port: u16) -> Result<(), PicoError> {
        if port <= RESERVED_PORT_MAX {
            return Err(PicoError::InvalidPort(port));
        }
        if self.is_connected() {
            return Ok(());
        }

        // A receiver left over from a dropped link is retired before the
        // new link goes up, so there is never more than one.
        self.stop_receiver().await;
        self.shared.establish(host, port).await?;
        self.start_receiver();
        Ok(())
    }

    /// Stop the receiver and close the link. Safe to call repeatedly.
    pub async fn disconnect(&self) {
        self.stop_receiver().await;
        self.shared.close_link().await;
    }

    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    pub fn phase(&self) -> SessionPhase {
        self.shared.session().phase.clone()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.shared.session().peer
    }

    /// Reconnect (once per drop) and republish markers when the viewer goes
    /// away.
    pub fn enable_auto_reconnect(&self) {
        self.shared.auto_reconnect.store(true, Ordering::SeqCst);
    }

    pub fn disable_auto_reconnect(&self) {
        self.shared.auto_reconnect.store(false, Ordering::SeqCst);
    }

    /// Whether the background receiver is alive.
    pub fn receiver_running(&self) -> bool {
        self.receiver_slot()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Receiver counters, updated as frames arrive.
    pub fn stats_receiver(&self) -> watch::Receiver<ReceiverStats> {
        self.shared.stats.subscribe()
    }

    fn start_receiver(&self) {
        let mut slot = self.receiver_slot();
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        let shared = Arc::clone(&self.shared);
        *slot = Some(BackgroundTask::spawn("marker-receiver", move |cancel| {
            receiver::run(shared, cancel)
        }));
    }

    async fn stop_receiver(&self) {
        let task = self.receiver_slot().take();
        if let Some(task) = task {
            task.join().await;
        }
    }

    // ── Markers ──────────────────────────────────────────────────

    /// Register a marker with the default colour. Returns its index.
    pub fn add_marker(&self, name: &str, use_count: u32) -> Result<u32, PicoError> {
        let index = self.shared.markers().add_default(name, use_count)?;
        debug!(index, name, use_count, "marker added");
        Ok(index)
    }

    /// Register a marker. Fails if a live marker already has this name.
    pub fn add_marker_with_color(&self, name: &str, use_count: u32, color: u32) -> Result<u32, PicoError> {
        let index = self.shared.markers().add(name, use_count, color)?;
        debug!(index, name, use_count, "marker added");
        Ok(index)
    }

    /// Remaining triggers of the marker at `index`.
    pub fn marker_use_count(&self, index: u32) -> Option<u32> {
        self.shared.markers().use_count(index)
    }

    /// Snapshot of the live marker at `index`.
    pub fn marker(&self, index: u32) -> Option<Marker> {
        self.shared.markers().get(index).cloned()
    }

    /// Snapshot of every live marker.
    pub fn markers(&self) -> Vec<Marker> {
        self.shared.markers().iter().cloned().collect()
    }

    /// Tombstone a marker. Other indices are unaffected.
    pub fn delete_marker(&self, index: u32) -> bool {
        self.shared.markers().delete(index)
    }

    pub fn delete_marker_by_name(&self, name: &str) -> bool {
        self.shared.markers().delete_by_name(name)
    }

    /// Tombstone every marker and, when connected, publish the empty table.
    pub async fn delete_all_markers(&self) -> Result<(), PicoError> {
        self.shared.markers().delete_all();
        if self.is_connected() {
            self.shared.publish_markers().await?;
        }
        Ok(())
    }

    /// Zero a marker's trigger count.
    pub fn reset_marker(&self, index: u32) -> bool {
        self.shared.markers().reset(index)
    }

    pub fn reset_marker_by_name(&self, name: &str) -> bool {
        self.shared.markers().reset_by_name(name)
    }

    /// Commit viewer updates staged in manual-sync mode. Returns how many
    /// markers changed.
    pub fn synchronize_markers(&self) -> usize {
        self.shared.markers().synchronize()
    }

    /// Switch between auto-sync (`true`) and manual sync (`false`).
    pub fn set_auto_sync(&self, enabled: bool) {
        let mode = if enabled { SyncMode::Auto } else { SyncMode::Manual };
        self.shared.markers().set_mode(mode);
    }

    pub fn auto_sync(&self) -> bool {
        self.shared.markers().mode() == SyncMode::Auto
    }

    /// Publish the full marker table to the viewer.
    pub async fn send_markers(&self) -> Result<(), PicoError> {
        self.shared.publish_markers().await
    }
}

impl std::fmt::Debug for PicoClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PicoClient")
            .field("client_id", &self.shared.config.client_id)
            .field("phase", &self.phase())
            .field("receiver_running", &self.receiver_running())
            .finish()
    }
}

// ── Tests ────────────────────────────────────────────────────────
