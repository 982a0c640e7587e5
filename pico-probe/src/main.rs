//! Pico Pixel probe, entry point.
//!
//! ```text
//! pico-probe                      Stream to the viewer on loopback
//! pico-probe --host 10.0.0.5      Stream to a remote viewer
//! pico-probe --config <path>      Use custom config TOML
//! pico-probe --gen-config         Dump default config and exit
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use pico_core::{ImageInfo, PicoClient, PicoError, PixelFormat};

use pico_probe::config::ProbeConfig;
use pico_probe::pattern::gradient_rgba;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "pico-probe", about = "Stream synthetic frames to a Pico Pixel viewer")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "pico-probe.toml")]
    config: PathBuf,

    /// Viewer host (overrides config).
    #[arg(long)]
    host: Option<String>,

    /// Viewer port (overrides config).
    #[arg(short, long)]
    port: Option<u16>,

    /// Number of frames to attempt (overrides config).
    #[arg(short, long)]
    frames: Option<u32>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&ProbeConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = ProbeConfig::load(&cli.config);
    if let Some(host) = cli.host {
        config.client.host = host;
    }
    if let Some(port) = cli.port {
        config.client.port = port;
    }
    if let Some(frames) = cli.frames {
        config.stream.frames = frames;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("pico-probe v{}", env!("CARGO_PKG_VERSION"));

    // ── 1. Connect ──────────────────────────────────────────────

    let stream = config.stream.clone();
    let client = PicoClient::new(config.client);
    client.connect_configured().await?;
    let marker = client.add_marker(&stream.marker_name, stream.marker_uses)?;
    client.send_markers().await?;
    info!(marker = %stream.marker_name, uses = stream.marker_uses, "marker published");

    // ── 2. Stream ───────────────────────────────────────────────

    let pitch = stream.width * 4;
    let interval = Duration::from_millis(stream.interval_ms);
    let (mut sent, mut skipped) = (0u32, 0u32);

    for frame in 0..stream.frames {
        client.synchronize_markers();

        let pixels = gradient_rgba(stream.width, stream.height, frame);
        let info = ImageInfo::new(PixelFormat::Rgba8, stream.width, stream.height, pitch)
            .with_name(format!("probe-{frame}"))
            .srgb(stream.srgb);

        match client.send_image_gated(marker, &info, &pixels).await {
            Ok(()) => sent += 1,
            Err(PicoError::MarkerExhausted(_)) => {
                debug!(frame, "marker exhausted; frame skipped");
                skipped += 1;
            }
            Err(PicoError::NotConnected) if client.config().auto_reconnect => {
                debug!(frame, "viewer away; frame skipped");
                skipped += 1;
            }
            Err(e) => {
                warn!("stream stopped: {e}");
                break;
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }

    // ── 3. Shutdown ─────────────────────────────────────────────

    let stats = client.stats_receiver().borrow().clone();
    info!(
        sent,
        skipped,
        viewer_updates = stats.records_applied + stats.records_staged,
        reconnects = stats.reconnects,
        "shutting down"
    );
    client.disconnect().await;

    Ok(())
}
