//! Wiring of the two server groups.
//!
//! The page group serves the index page, snapshots and health; the stream
//! group serves only the live feed, on its own listener so a long-running
//! stream never shares a port with short requests. Both groups share one
//! frame source and one encoder.

use anyhow::Result;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crate::config::CameraConfig;
use crate::encode::Encoder;
use crate::error::BootstrapError;
use crate::frame::{FrameSource, SourceStats};
use crate::http::{HttpServer, Method, Router, ServerHandle, ServerOptions};
use crate::snapshot::capture_snapshot;
use crate::stream::serve_stream;
use crate::transport::{Responder, ResponseHead};

const INDEX_HTML: &str = include_str!("index.html");
const STREAM_PORT_PLACEHOLDER: &str = "{{STREAM_PORT}}";

pub const INDEX_PATH: &str = "/";
pub const CAPTURE_PATH: &str = "/capture";
pub const HEALTH_PATH: &str = "/health";
pub const STREAM_PATH: &str = "/stream";

#[derive(Serialize)]
struct Health<'a> {
    status: &'static str,
    source: &'a str,
    #[serde(flatten)]
    stats: SourceStats,
}

pub struct ServerBootstrap {
    http_addr: SocketAddr,
    stream_addr: SocketAddr,
    send_timeout: Duration,
    pages: Router,
    streams: Router,
    stream_port: Arc<OnceLock<u16>>,
}

impl ServerBootstrap {
    /// Register the built-in routes of both groups.
    pub fn new(
        config: &CameraConfig,
        source: Arc<dyn FrameSource>,
        encoder: Arc<dyn Encoder>,
    ) -> Result<Self, BootstrapError> {
        let options = config.stream.options();
        let stream_port = Arc::new(OnceLock::new());
        let mut pages = Router::new();
        let mut streams = Router::new();

        let index_port = stream_port.clone();
        let fallback_port = config.stream_addr.port();
        pages.register(Method::Get, INDEX_PATH, move |_request, responder| {
            let port = index_port.get().copied().unwrap_or(fallback_port);
            let page = INDEX_HTML.replace(STREAM_PORT_PLACEHOLDER, &port.to_string());
            responder.respond(
                ResponseHead::ok().header("Content-Type", "text/html; charset=utf-8"),
                page.as_bytes(),
            )?;
            Ok(())
        })?;

        let (capture_source, capture_encoder) = (source.clone(), encoder.clone());
        let quality = options.jpeg_quality;
        pages.register(Method::Get, CAPTURE_PATH, move |_request, responder| {
            capture_snapshot(&*capture_source, &*capture_encoder, quality, responder)?;
            Ok(())
        })?;

        let health_source = source.clone();
        pages.register(Method::Get, HEALTH_PATH, move |_request, responder| {
            let body = serde_json::to_vec(&Health {
                status: "ok",
                source: health_source.name(),
                stats: health_source.stats(),
            })?;
            responder.respond(
                ResponseHead::ok().header("Content-Type", "application/json"),
                &body,
            )?;
            Ok(())
        })?;

        streams.register(Method::Get, STREAM_PATH, move |request, responder| {
            let end = serve_stream(&*source, &*encoder, options.clone(), responder);
            log::info!(
                "stream to {} closed: {} frames, {} bytes, avg {:?} ({})",
                request
                    .peer
                    .map_or_else(|| "unknown".to_string(), |peer| peer.to_string()),
                end.frames_sent,
                end.bytes_sent,
                end.average_interval,
                end.cause
            );
            Ok(())
        })?;

        Ok(Self {
            http_addr: config.http_addr,
            stream_addr: config.stream_addr,
            send_timeout: config.stream.send_timeout,
            pages,
            streams,
            stream_port,
        })
    }

    /// Page/snapshot routes, for registering extra handlers before `start`.
    pub fn pages(&mut self) -> &mut Router {
        &mut self.pages
    }

    /// Streaming routes, for registering extra handlers before `start`.
    pub fn streams(&mut self) -> &mut Router {
        &mut self.streams
    }

    /// Bind both groups. The stream group starts first so the index page
    /// can point at its real port; if the page group then fails to bind, the
    /// stream group is stopped again.
    pub fn start(self) -> Result<CameraServers, BootstrapError> {
        let stream_server = HttpServer::new(
            self.streams,
            ServerOptions {
                write_timeout: Some(self.send_timeout),
                ..ServerOptions::named("stream")
            },
        );
        let stream = stream_server.start(self.stream_addr)?;
        // only this call ever sets the port
        let _ = self.stream_port.set(stream.addr().port());

        let page_server = HttpServer::new(
            self.pages,
            ServerOptions {
                write_timeout: Some(self.send_timeout),
                ..ServerOptions::named("http")
            },
        );
        let pages = match page_server.start(self.http_addr) {
            Ok(handle) => handle,
            Err(err) => {
                if let Err(stop_err) = stream.stop() {
                    log::warn!("stream server stop failed: {:#}", stop_err);
                }
                return Err(err);
            }
        };

        Ok(CameraServers { pages, stream })
    }
}

/// Both running server groups.
#[derive(Debug)]
pub struct CameraServers {
    pub pages: ServerHandle,
    pub stream: ServerHandle,
}

impl CameraServers {
    pub fn http_addr(&self) -> SocketAddr {
        self.pages.addr()
    }

    pub fn stream_addr(&self) -> SocketAddr {
        self.stream.addr()
    }

    pub fn stop(self) -> Result<()> {
        let pages = self.pages.stop();
        let stream = self.stream.stop();
        pages.and(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::JpegEncoder;
    use crate::ingest::SyntheticSource;

    fn loopback_config() -> CameraConfig {
        let mut config = CameraConfig::default();
        config.http_addr = "127.0.0.1:0".parse().unwrap();
        config.stream_addr = "127.0.0.1:0".parse().unwrap();
        config.source.width = 16;
        config.source.height = 16;
        config
    }

    fn bootstrap(config: &CameraConfig) -> ServerBootstrap {
        let source = Arc::new(SyntheticSource::new(&config.source).unwrap());
        ServerBootstrap::new(config, source, Arc::new(JpegEncoder::new())).unwrap()
    }

    #[test]
    fn builtin_routes_are_split_by_group() {
        let mut boot = bootstrap(&loopback_config());
        let pages: Vec<_> = boot.pages().routes().map(|(_, path)| path.to_string()).collect();
        assert_eq!(pages, vec!["/", "/capture", "/health"]);
        let streams: Vec<_> = boot.streams().routes().map(|(_, path)| path.to_string()).collect();
        assert_eq!(streams, vec!["/stream"]);
    }

    #[test]
    fn duplicate_registration_is_a_configuration_error() {
        let mut boot = bootstrap(&loopback_config());
        let err = boot
            .pages()
            .register(Method::Get, CAPTURE_PATH, |_, _| Ok(()))
            .err()
            .unwrap();
        assert!(matches!(err, BootstrapError::DuplicateRoute { .. }));
    }

    #[test]
    fn bind_failure_is_reported() {
        let blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut config = loopback_config();
        config.http_addr = blocker.local_addr().unwrap();
        let err = bootstrap(&config).start().err().unwrap();
        assert!(matches!(err, BootstrapError::Bind { .. }));
    }
}
