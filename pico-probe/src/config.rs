//! Probe configuration.

use std::path::Path;

use pico_core::ClientConfig;
use serde::{Deserialize, Serialize};

/// Top-level configuration for the probe.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Viewer session settings.
    pub client: ClientConfig,
    /// Synthetic stream settings.
    pub stream: StreamConfig,
    /// Logging.
    pub logging: LoggingConfig,
}

/// What the probe streams.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Frames to attempt before exiting.
    pub frames: u32,
    /// Delay between frames.
    pub interval_ms: u64,
    /// Marker gating the stream.
    pub marker_name: String,
    /// Initial trigger count of that marker.
    pub marker_uses: u32,
    /// Tag frames as sRGB.
    pub srgb: bool,
}

/// Logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset.
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            width: 256,
            height: 256,
            frames: 120,
            interval_ms: 33,
            marker_name: "probe-frame".into(),
            marker_uses: 10,
            srgb: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl ProbeConfig {
    /// Load from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write default config to a file.
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let text = toml::to_string_pretty(&ProbeConfig::default()).unwrap();
        assert!(text.contains("[client]"));
        assert!(text.contains("marker_name"));
        assert!(text.contains("recv_stall_trials"));
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let cfg: ProbeConfig = toml::from_str(
            r#"
            [client]
            host = "10.0.0.5"
            auto_reconnect = true

            [stream]
            frames = 3
            "#,
        )
        .unwrap();
        assert_eq!(cfg.client.host, "10.0.0.5");
        assert_eq!(cfg.client.port, 2001);
        assert!(cfg.client.auto_reconnect);
        assert_eq!(cfg.stream.frames, 3);
        assert_eq!(cfg.stream.width, 256);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn write_default_then_load() {
        let path = std::env::temp_dir().join(format!("pico-probe-{}.toml", std::process::id()));
        ProbeConfig::write_default(&path).unwrap();
        let cfg = ProbeConfig::load(&path);
        let _ = std::fs::remove_file(&path);
        assert_eq!(cfg.stream.marker_uses, 10);
        assert_eq!(cfg.client, ClientConfig::default());
    }
}
