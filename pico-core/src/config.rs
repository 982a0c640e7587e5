//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::network::RecvPolicy;
use crate::wire::DEFAULT_PORT;

/// Settings for a [`PicoClient`](crate::PicoClient) session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Identifier sent to the viewer in the handshake.
    pub client_id: String,
    /// Viewer host. Empty means loopback.
    pub host: String,
    /// Viewer TCP port.
    pub port: u16,
    /// Receive readiness timeout in milliseconds.
    pub recv_timeout_ms: u64,
    /// Zero-byte reads tolerated before a receive reports a stall.
    pub recv_stall_trials: u32,
    /// Per-write timeout in milliseconds.
    pub send_timeout_ms: u64,
    /// TCP connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Reconnect and republish markers when the viewer goes away.
    pub auto_reconnect: bool,
    /// Apply viewer marker updates immediately.
    pub auto_sync: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_id: "pico-client".into(),
            host: String::new(),
            port: DEFAULT_PORT,
            recv_timeout_ms: 1000,
            recv_stall_trials: 3,
            send_timeout_ms: 5000,
            connect_timeout_ms: 5000,
            auto_reconnect: false,
            auto_sync: true,
        }
    }
}

impl ClientConfig {
    /// Config with the given client identifier and defaults elsewhere.
    pub fn with_client_id(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ..Self::default()
        }
    }

    pub fn recv_policy(&self) -> RecvPolicy {
        RecvPolicy {
            timeout: Duration::from_millis(self.recv_timeout_ms),
            stall_trials: self.recv_stall_trials,
        }
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

// ── Tests ────────────────────────────────────────────────────────
