//! camerad - camera node daemon
//!
//! Serves the page/snapshot group and the streaming group until Ctrl-C, or
//! with `--snapshot` grabs one still image to a file and exits.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};

use oko_camera::{
    capture_snapshot, open_source, CameraConfig, JpegEncoder, MemoryResponse, ServerBootstrap,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Serve a camera as MJPEG and JPEG snapshots")]
struct Args {
    /// Config file (.toml or .json). Defaults to $OKO_CAMERA_CONFIG.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write a single snapshot to this path and exit.
    #[arg(long, value_name = "OUT.jpg")]
    snapshot: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => CameraConfig::load_from(Some(path))?,
        None => CameraConfig::load()?,
    };
    let source = open_source(&config.source)
        .with_context(|| format!("open frame source {}", config.source.url))?;
    let encoder = Arc::new(JpegEncoder::new());

    if let Some(out) = args.snapshot {
        let mut response = MemoryResponse::new();
        let report = capture_snapshot(
            &*source,
            &*encoder,
            config.stream.jpeg_quality,
            response.responder(),
        )?;
        std::fs::write(&out, response.full_body())
            .with_context(|| format!("write snapshot {}", out.display()))?;
        log::info!(
            "snapshot written to {} ({} bytes, captured {})",
            out.display(),
            report.bytes,
            report.timestamp
        );
        return Ok(());
    }

    let servers = ServerBootstrap::new(&config, source, encoder)?.start()?;
    log::info!(
        "camerad running: page http://{} stream http://{}/stream",
        servers.http_addr(),
        servers.stream_addr()
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|err| anyhow!("error setting Ctrl-C handler: {}", err))?;

    log::info!("camerad waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping servers...");
    servers.stop()?;

    Ok(())
}
