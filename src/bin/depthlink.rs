//! depthlink - capture host and viewer for depth/color frames
//!
//! `depthlink host` serves a synthetic sensor over request/reply and
//! publishes its color stream on the bus. `depthlink view` connects to a
//! host, bootstraps, and reports frames and delay until Ctrl+C.

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use depthlink::codec::{encode_size, encode_stamped};
use depthlink::connection::{FRAME_TOPIC, SIZE_TOPIC};
use depthlink::types::ticks;
use depthlink::{
    CalibrationRecord, CaptureHost, ColorFeed, FrameBuffer, LatencyTracker,
    LinkConfig, LookupTable, PollingConnection, Publisher, Subscriber, UpdateRate,
};
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Depth/color frame transport
#[derive(Parser, Debug)]
#[command(name = "depthlink")]
#[command(version)]
#[command(about = "Serve or view live depth/color frames")]
struct Args {
    #[command(subcommand)]
    mode: Mode,

    /// YAML link configuration
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Connect to a capture host and report incoming frames
    View {
        /// Maximum frame reports per second (0 = every frame)
        #[arg(short, long, default_value = "1")]
        rate: u32,

        /// Also listen for color frames on the bus
        #[arg(long)]
        bus: bool,
    },
    /// Serve a synthetic sensor
    Host {
        /// Depth image width
        #[arg(long, default_value = "640")]
        width: u32,

        /// Depth image height
        #[arg(long, default_value = "576")]
        height: u32,

        /// Frames produced per second
        #[arg(long, default_value = "30")]
        fps: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => LinkConfig::load(path)
            .await
            .with_context(|| format!("loading {}", path.display()))?,
        None => LinkConfig::default(),
    };

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received, shutting down");
        }
        trigger.cancel();
    });

    match args.mode {
        Mode::View { rate, bus } => view(&config, rate, bus, shutdown).await,
        Mode::Host { width, height, fps } => host(&config, width, height, fps, shutdown).await,
    }
}

async fn view(config: &LinkConfig, rate: u32, bus: bool, shutdown: CancellationToken) -> Result<()> {
    let mut connection = PollingConnection::connect(config)
        .await
        .with_context(|| format!("connecting to {}", config.request_endpoint()))?;

    let mut bus_session = if bus {
        let subscriber = Subscriber::connect(&config.bus_endpoint(), config)
            .await
            .with_context(|| format!("subscribing to {}", config.bus_endpoint()))?;
        let feed = ColorFeed::attach(
            &subscriber,
            Arc::new(FrameBuffer::new()),
            LatencyTracker::new(config.latency_history),
        );
        Some((subscriber, feed))
    } else {
        None
    };

    let mut states = Box::pin(connection.state_updates());
    let mut frames = Box::pin(connection.frame_updates(UpdateRate::Max(rate)));

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            Some(state) = states.next() => info!("Link state: {}", state),
            Some(frame) = frames.next() => {
                let summary = connection.latency().summary();
                info!(
                    "Frame {}: depth {} bytes, color {} bytes, delay {}",
                    frame.sequence,
                    frame.depth.len(),
                    frame.color.len(),
                    summary.map_or_else(|| "n/a".to_string(), |s| format!(
                        "{:.0} ms (mean {:.1}, max {:.0})", s.last_ms, s.mean_ms, s.max_ms
                    )),
                );
                if let Some((_, feed)) = &bus_session {
                    if let Some(image) = feed.latest_color_frame() {
                        info!("Bus color frame {}x{}, {} bytes", image.width, image.height, image.data.len());
                    }
                }
            }
        }
    }

    if let Some((mut subscriber, feed)) = bus_session.take() {
        feed.detach(&subscriber);
        subscriber.dispose().await;
    }
    connection.dispose().await;
    Ok(())
}

/// Lookup table of unit rays for a pinhole sensor with a 90 degree field of view.
fn synthetic_lookup(width: u32, height: u32) -> Result<LookupTable> {
    let len = LookupTable::expected_len(width, height)
        .with_context(|| format!("lookup table for {}x{} is too large", width, height))?;
    let mut table = Vec::with_capacity(len);
    for y in 0..height {
        for x in 0..width {
            let rx = (x as f32 + 0.5) / width as f32 * 2.0 - 1.0;
            let ry = (y as f32 + 0.5) / height as f32 * 2.0 - 1.0;
            for value in [rx, ry, 1.0f32, 0.0] {
                table.extend_from_slice(&value.to_le_bytes());
            }
        }
    }
    Ok(LookupTable::new(Bytes::from(table)))
}

async fn host(
    config: &LinkConfig,
    width: u32,
    height: u32,
    fps: u32,
    shutdown: CancellationToken,
) -> Result<()> {
    let calibration = CalibrationRecord {
        color_to_depth: CalibrationRecord::IDENTITY,
        color_width: width,
        color_height: height,
        depth_width: width,
        depth_height: height,
        ir_width: width,
        ir_height: height,
    };

    let request_addr = format!("0.0.0.0:{}", config.request_port);
    let bus_addr = format!("0.0.0.0:{}", config.bus_port);
    let mut capture = CaptureHost::bind(&request_addr, config, calibration, synthetic_lookup(width, height)?)
        .await
        .with_context(|| format!("binding {}", request_addr))?;
    let mut publisher = Publisher::bind(&bus_addr, config)
        .await
        .with_context(|| format!("binding {}", bus_addr))?;

    let pixels = calibration
        .depth_pixels()
        .with_context(|| format!("{}x{} depth image is too large", width, height))?;
    let size = encode_size(width, height)?;
    let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / f64::from(fps.max(1))));
    let mut frame_number = 0u64;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        frame_number += 1;

        // 16-bit depth ramp and a BGRA color gradient that shift every frame
        let shift = (frame_number % 256) as u8;
        let depth: Vec<u8> = (0..pixels).flat_map(|i| ((i as u16).wrapping_add(shift as u16)).to_le_bytes()).collect();
        let color: Vec<u8> = (0..pixels).flat_map(|i| [(i as u8).wrapping_add(shift), shift, 0, 255]).collect();

        let sent = ticks::now_ticks();
        capture.update_frame_at(sent, &depth, &color);

        if !publisher.publish(SIZE_TOPIC, size.clone()) {
            warn!("Size message dropped for a slow subscriber");
        }
        publisher.publish(FRAME_TOPIC, encode_stamped(sent, &color));

        if frame_number % u64::from(fps.max(1)) == 0 {
            info!("Served {} frames to {} bus subscribers", frame_number, publisher.peer_count());
        }
    }

    publisher.dispose().await;
    capture.dispose().await;
    Ok(())
}
