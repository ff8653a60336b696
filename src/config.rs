use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::encode::DEFAULT_JPEG_QUALITY;
use crate::frame::PixelFormat;
use crate::stream::{StreamOptions, DEFAULT_ADVERTISED_FRAMERATE};

pub const CONFIG_ENV: &str = "OKO_CAMERA_CONFIG";

const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_STREAM_ADDR: &str = "0.0.0.0:8081";
const DEFAULT_SOURCE_URL: &str = "stub://camera";
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_TARGET_FPS: u32 = 30;
const DEFAULT_SEND_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CameraConfigFile {
    http_addr: Option<String>,
    stream_addr: Option<String>,
    source: Option<SourceConfigFile>,
    stream: Option<StreamConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SourceConfigFile {
    url: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    format: Option<String>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct StreamConfigFile {
    jpeg_quality: Option<u8>,
    advertised_framerate: Option<u32>,
    min_frame_interval_ms: Option<u64>,
    send_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CameraConfig {
    /// Page and snapshot group.
    pub http_addr: SocketAddr,
    /// Streaming group.
    pub stream_addr: SocketAddr,
    pub source: SourceSettings,
    pub stream: StreamSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSettings {
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub target_fps: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSettings {
    pub jpeg_quality: u8,
    pub advertised_framerate: u32,
    pub min_frame_interval: Duration,
    pub send_timeout: Duration,
}

impl StreamSettings {
    pub fn options(&self) -> StreamOptions {
        StreamOptions {
            jpeg_quality: self.jpeg_quality,
            min_frame_interval: self.min_frame_interval,
            advertised_framerate: self.advertised_framerate,
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            stream_addr: SocketAddr::from(([0, 0, 0, 0], 8081)),
            source: SourceSettings {
                url: DEFAULT_SOURCE_URL.to_string(),
                width: DEFAULT_WIDTH,
                height: DEFAULT_HEIGHT,
                format: PixelFormat::Rgb24,
                target_fps: DEFAULT_TARGET_FPS,
            },
            stream: StreamSettings {
                jpeg_quality: DEFAULT_JPEG_QUALITY,
                advertised_framerate: DEFAULT_ADVERTISED_FRAMERATE,
                min_frame_interval: Duration::ZERO,
                send_timeout: Duration::from_secs(DEFAULT_SEND_TIMEOUT_SECS),
            },
        }
    }
}

impl CameraConfig {
    /// File named by `OKO_CAMERA_CONFIG` (optional), then environment
    /// overrides, then validation.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var(CONFIG_ENV).ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Like `load`, but with an explicit config file instead of the
    /// environment variable.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => CameraConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: CameraConfigFile) -> Result<Self> {
        let http_addr = parse_addr(
            "http_addr",
            file.http_addr.as_deref().unwrap_or(DEFAULT_HTTP_ADDR),
        )?;
        let stream_addr = parse_addr(
            "stream_addr",
            file.stream_addr.as_deref().unwrap_or(DEFAULT_STREAM_ADDR),
        )?;
        let source_file = file.source.unwrap_or_default();
        let format = match source_file.format.as_deref() {
            Some(name) => parse_format(name)?,
            None => PixelFormat::Rgb24,
        };
        let source = SourceSettings {
            url: source_file
                .url
                .unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
            width: source_file.width.unwrap_or(DEFAULT_WIDTH),
            height: source_file.height.unwrap_or(DEFAULT_HEIGHT),
            format,
            target_fps: source_file.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
        };
        let stream_file = file.stream.unwrap_or_default();
        let stream = StreamSettings {
            jpeg_quality: stream_file.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
            advertised_framerate: stream_file
                .advertised_framerate
                .unwrap_or(DEFAULT_ADVERTISED_FRAMERATE),
            min_frame_interval: Duration::from_millis(
                stream_file.min_frame_interval_ms.unwrap_or(0),
            ),
            send_timeout: Duration::from_secs(
                stream_file
                    .send_timeout_secs
                    .unwrap_or(DEFAULT_SEND_TIMEOUT_SECS),
            ),
        };
        Ok(Self {
            http_addr,
            stream_addr,
            source,
            stream,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = env_value("OKO_HTTP_ADDR") {
            self.http_addr = parse_addr("OKO_HTTP_ADDR", &addr)?;
        }
        if let Some(addr) = env_value("OKO_STREAM_ADDR") {
            self.stream_addr = parse_addr("OKO_STREAM_ADDR", &addr)?;
        }
        if let Some(url) = env_value("OKO_SOURCE_URL") {
            self.source.url = url;
        }
        if let Some(format) = env_value("OKO_SOURCE_FORMAT") {
            self.source.format = parse_format(&format)?;
        }
        if let Some(quality) = env_value("OKO_JPEG_QUALITY") {
            self.stream.jpeg_quality = quality
                .parse()
                .map_err(|_| anyhow!("OKO_JPEG_QUALITY must be an integer between 1 and 100"))?;
        }
        if let Some(interval) = env_value("OKO_MIN_FRAME_INTERVAL_MS") {
            let millis: u64 = interval.parse().map_err(|_| {
                anyhow!("OKO_MIN_FRAME_INTERVAL_MS must be an integer number of milliseconds")
            })?;
            self.stream.min_frame_interval = Duration::from_millis(millis);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.stream.jpeg_quality) {
            return Err(anyhow!(
                "jpeg_quality must be between 1 and 100 (got {})",
                self.stream.jpeg_quality
            ));
        }
        if self.http_addr.port() != 0 && self.http_addr.port() == self.stream_addr.port() {
            return Err(anyhow!(
                "http_addr and stream_addr must use different ports (both {})",
                self.http_addr.port()
            ));
        }
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("source width and height must be greater than zero"));
        }
        if self.source.target_fps == 0 {
            return Err(anyhow!("source target_fps must be greater than zero"));
        }
        if self.stream.send_timeout.is_zero() {
            return Err(anyhow!("send_timeout_secs must be greater than zero"));
        }
        Ok(())
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn parse_addr(field: &str, value: &str) -> Result<SocketAddr> {
    value
        .trim()
        .parse()
        .map_err(|_| anyhow!("{} is not a socket address: '{}'", field, value))
}

fn parse_format(name: &str) -> Result<PixelFormat> {
    PixelFormat::from_name(name).ok_or_else(|| {
        anyhow!(
            "unknown pixel format '{}' (expected jpeg, rgb24, gray8, rgb565 or yuyv)",
            name
        )
    })
}

fn read_config_file(path: &Path) -> Result<CameraConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw)
            .with_context(|| format!("invalid config file {}", path.display()))?
    } else {
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid config file {}", path.display()))?
    };
    Ok(cfg)
}
