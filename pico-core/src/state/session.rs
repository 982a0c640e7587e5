//! Session lifecycle.
//!
//! `SessionPhase` only moves through [`SessionPhase::apply`], which takes a
//! [`SessionEvent`] and rejects steps that do not fit the current phase.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::error::PicoError;

// ── SessionEvent ─────────────────────────────────────────────────

/// Something that happened to the viewer link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// A connection attempt starts.
    Dial,
    /// The TCP link is open; the handshake goes next.
    LinkOpened,
    /// The handshake frame went out.
    HandshakeSent,
    /// The viewer or the transport ended the link.
    LinkLost,
    /// The caller asked to disconnect.
    CloseRequested,
    /// Teardown or a failed attempt finished.
    Settled,
}

impl SessionEvent {
    pub fn name(self) -> &'static str {
        match self {
            Self::Dial => "dial",
            Self::LinkOpened => "open link",
            Self::HandshakeSent => "finish handshake",
            Self::LinkLost => "lose link",
            Self::CloseRequested => "close",
            Self::Settled => "settle",
        }
    }
}

// ── SessionPhase ─────────────────────────────────────────────────

/// Where the viewer link stands.
///
/// ```text
///  Disconnected ─Dial─► Connecting ─LinkOpened─► Handshaking ─HandshakeSent─► Connected
///     ▲    ▲                                        │                            │
///     │    └── Settled ── Dropped ◄── LinkLost ─────┴────────────────────────────┤
///     │                      │ Dial (reconnect)                                  │
///     └──── Settled ──── Closing ◄──────────── CloseRequested ───────────────────┘
/// ```
///
/// `Connecting` and `Handshaking` also settle straight back to
/// `Disconnected` when an attempt fails.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Disconnected,
    Connecting,
    Handshaking,
    Connected {
        since: Instant,
    },
    Closing,
    Dropped,
}

impl SessionPhase {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Handshaking => "Handshaking",
            Self::Connected { .. } => "Connected",
            Self::Closing => "Closing",
            Self::Dropped => "Dropped",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected)
    }

    /// Time spent `Connected`, if connected.
    pub fn uptime(&self) -> Option<Duration> {
        match self {
            Self::Connected { since } => Some(since.elapsed()),
            _ => None,
        }
    }

    /// Advance by `event`.
    ///
    /// Closing a session that is already `Disconnected` is
    /// [`PicoError::NotConnected`]; any other misfit step is
    /// [`PicoError::InvalidTransition`] and leaves the phase untouched.
    pub fn apply(&mut self, event: SessionEvent) -> Result<(), PicoError> {
        use SessionEvent as E;

        let next = match (&*self, event) {
            (Self::Disconnected | Self::Dropped, E::Dial) => Self::Connecting,
            (Self::Connecting, E::LinkOpened) => Self::Handshaking,
            (Self::Handshaking, E::HandshakeSent) => Self::Connected {
                since: Instant::now(),
            },
            (Self::Handshaking | Self::Connected { .. }, E::LinkLost) => Self::Dropped,
            (Self::Disconnected, E::CloseRequested) => return Err(PicoError::NotConnected),
            (_, E::CloseRequested) => Self::Closing,
            (Self::Connecting | Self::Handshaking | Self::Closing | Self::Dropped, E::Settled) => {
                Self::Disconnected
            }
            (phase, event) => {
                return Err(PicoError::InvalidTransition {
                    phase: phase.name(),
                    event: event.name(),
                });
            }
        };
        *self = next;
        Ok(())
    }

    /// Drop to `Disconnected` whatever the phase.
    pub fn reset(&mut self) {
        *self = Self::Disconnected;
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ── SessionState ─────────────────────────────────────────────────

/// Resolved viewer endpoint remembered for reconnection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
}

/// Mutable session bookkeeping guarded by the client.
#[derive(Debug, Default)]
pub struct SessionState {
    pub phase: SessionPhase,
    /// Last endpoint connected to. Cleared on caller disconnect so that
    /// no reconnection fires afterwards.
    pub target: Option<Target>,
    pub peer: Option<SocketAddr>,
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use SessionEvent as E;

    fn connected() -> SessionPhase {
        SessionPhase::Connected {
            since: Instant::now(),
        }
    }

    fn walk(events: &[SessionEvent]) -> Result<SessionPhase, PicoError> {
        let mut phase = SessionPhase::default();
        for &event in events {
            phase.apply(event)?;
        }
        Ok(phase)
    }

    #[test]
    fn connect_then_close() {
        let phase = walk(&[E::Dial, E::LinkOpened, E::HandshakeSent]).unwrap();
        assert!(phase.is_connected());
        assert!(phase.uptime().is_some());

        let phase = walk(&[E::Dial, E::LinkOpened, E::HandshakeSent, E::CloseRequested]).unwrap();
        assert_eq!(phase, SessionPhase::Closing);
        assert!(phase.uptime().is_none());

        let phase = walk(&[
            E::Dial,
            E::LinkOpened,
            E::HandshakeSent,
            E::CloseRequested,
            E::Settled,
        ])
        .unwrap();
        assert!(phase.is_disconnected());
    }

    #[test]
    fn lost_link_can_redial_or_settle() {
        let mut phase = connected();
        phase.apply(E::LinkLost).unwrap();
        assert_eq!(phase, SessionPhase::Dropped);

        let mut redial = phase.clone();
        redial.apply(E::Dial).unwrap();
        assert_eq!(redial, SessionPhase::Connecting);

        phase.apply(E::Settled).unwrap();
        assert!(phase.is_disconnected());
    }

    #[test]
    fn failed_attempts_settle_to_disconnected() {
        for events in [&[E::Dial][..], &[E::Dial, E::LinkOpened][..]] {
            let mut phase = walk(events).unwrap();
            phase.apply(E::Settled).unwrap();
            assert!(phase.is_disconnected(), "after {events:?}");
        }
    }

    #[test]
    fn misfit_steps_leave_phase_untouched() {
        let cases = [
            (connected(), E::Dial),
            (SessionPhase::Connecting, E::Dial),
            (SessionPhase::Disconnected, E::LinkOpened),
            (SessionPhase::Disconnected, E::LinkLost),
            (SessionPhase::Connecting, E::HandshakeSent),
            (connected(), E::Settled),
            (SessionPhase::Disconnected, E::Settled),
        ];
        for (start, event) in cases {
            let mut phase = start.clone();
            let err = phase.apply(event).unwrap_err();
            assert!(
                matches!(err, PicoError::InvalidTransition { .. }),
                "{start} + {event:?} gave {err:?}"
            );
            assert_eq!(phase.name(), start.name());
        }
    }

    #[test]
    fn closing_while_disconnected_is_not_connected() {
        let mut phase = SessionPhase::Disconnected;
        assert!(matches!(
            phase.apply(E::CloseRequested),
            Err(PicoError::NotConnected)
        ));
    }

    #[test]
    fn reset_from_mid_attempt() {
        let mut phase = walk(&[E::Dial, E::LinkOpened]).unwrap();
        phase.reset();
        assert!(phase.is_disconnected());
    }
}
