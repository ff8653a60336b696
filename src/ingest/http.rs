//! Upstream HTTP camera source.
//!
//! A `multipart/x-mixed-replace` response is relayed part by part; any other
//! response is treated as a single JPEG and polled once per acquire. The
//! upstream connection is opened lazily and reopened after a read error.

use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::sync::Mutex;
use std::time::Duration;

use url::Url;

use super::Pacer;
use crate::config::SourceSettings;
use crate::frame::{CaptureTimestamp, Frame, FramePool, FrameSource, PixelFormat, SourceStats};
use crate::multipart::{boundary_from_content_type, MultipartReader, MAX_PART_BYTES};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_secs(10);

type UpstreamReader = MultipartReader<Box<dyn Read + Send + Sync>>;

enum Upstream {
    Disconnected,
    Mjpeg(UpstreamReader),
    SingleJpeg,
}

pub struct HttpSource {
    url: Url,
    name: String,
    width: u32,
    height: u32,
    agent: ureq::Agent,
    pacer: Pacer,
    upstream: Mutex<Upstream>,
    pool: FramePool,
}

impl HttpSource {
    pub fn new(settings: &SourceSettings) -> Result<Self> {
        let url = Url::parse(settings.url.trim()).context("parse upstream camera url")?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(anyhow!(
                "unsupported upstream scheme '{}'; expected http(s)",
                url.scheme()
            ));
        }
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .timeout_read(READ_TIMEOUT)
            .build();
        log::info!("HttpSource: relaying {}", url);
        Ok(Self {
            name: url.to_string(),
            url,
            width: settings.width,
            height: settings.height,
            agent,
            // the upstream sets the pace of a relayed stream
            pacer: Pacer::new(settings.target_fps),
            upstream: Mutex::new(Upstream::Disconnected),
            pool: FramePool::default(),
        })
    }

    fn connect(&self) -> Result<(Upstream, Option<Vec<u8>>)> {
        let response = self
            .agent
            .request_url("GET", &self.url)
            .call()
            .with_context(|| format!("connect to {}", self.url))?;
        let content_type = response.header("Content-Type").unwrap_or("").to_string();
        if content_type.to_ascii_lowercase().contains("multipart") {
            let boundary = boundary_from_content_type(&content_type)
                .ok_or_else(|| anyhow!("multipart response from {} has no boundary", self.url))?;
            log::info!("HttpSource: {} is an MJPEG stream", self.url);
            Ok((
                Upstream::Mjpeg(MultipartReader::new(response.into_reader(), &boundary)),
                None,
            ))
        } else {
            let body = read_body(response.into_reader())?;
            Ok((Upstream::SingleJpeg, Some(body)))
        }
    }

    fn fetch_single(&self) -> Result<Vec<u8>> {
        let response = self
            .agent
            .request_url("GET", &self.url)
            .call()
            .with_context(|| format!("fetch {}", self.url))?;
        read_body(response.into_reader())
    }

    fn next_jpeg(&self, upstream: &mut Upstream) -> Result<Vec<u8>> {
        match upstream {
            Upstream::Disconnected => {
                let (connected, first) = self.connect()?;
                *upstream = connected;
                match first {
                    Some(body) => Ok(body),
                    None => self.next_jpeg(upstream),
                }
            }
            Upstream::Mjpeg(reader) => match reader.next_part() {
                Ok(Some(part)) => Ok(part.body),
                Ok(None) => {
                    *upstream = Upstream::Disconnected;
                    Err(anyhow!("upstream stream {} ended", self.url))
                }
                Err(err) => {
                    *upstream = Upstream::Disconnected;
                    Err(anyhow::Error::new(err).context("read upstream part"))
                }
            },
            Upstream::SingleJpeg => self.fetch_single(),
        }
    }
}

impl FrameSource for HttpSource {
    fn acquire(&self) -> Option<Frame> {
        let mut upstream = self
            .upstream
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if matches!(*upstream, Upstream::SingleJpeg) {
            self.pacer.wait();
        }
        let jpeg = match self.next_jpeg(&mut upstream) {
            Ok(jpeg) if jpeg.starts_with(&[0xFF, 0xD8]) => jpeg,
            Ok(_) => {
                log::error!("HttpSource: {} sent a part that is not a JPEG", self.url);
                return None;
            }
            Err(err) => {
                log::error!("HttpSource: {:#}", err);
                return None;
            }
        };
        drop(upstream);

        let mut data = self.pool.take(jpeg.len());
        data.extend_from_slice(&jpeg);
        self.pool.note_acquired();
        Some(Frame::new(
            data,
            self.width,
            self.height,
            PixelFormat::Jpeg,
            CaptureTimestamp::now(),
        ))
    }

    fn release(&self, frame: Frame) {
        self.pool.give_back(frame);
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn stats(&self) -> SourceStats {
        self.pool.stats()
    }
}

fn read_body(reader: impl Read) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    reader
        .take(MAX_PART_BYTES as u64 + 1)
        .read_to_end(&mut body)
        .context("read upstream jpeg")?;
    if body.len() > MAX_PART_BYTES {
        return Err(anyhow!("upstream jpeg exceeds {} bytes", MAX_PART_BYTES));
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CameraConfig;
    use std::io::Write;
    use std::net::TcpListener;

    fn settings(url: &str) -> SourceSettings {
        SourceSettings {
            url: url.to_string(),
            target_fps: 0,
            ..CameraConfig::default().source
        }
    }

    #[test]
    fn relays_multipart_parts() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).unwrap();
            let mut body = Vec::new();
            for payload in [&[0xFF, 0xD8, 1, 2][..], &[0xFF, 0xD8, 3][..]] {
                body.extend_from_slice(b"\r\n--frame\r\nContent-Type: image/jpeg\r\n");
                body.extend_from_slice(format!("Content-Length: {}\r\n\r\n", payload.len()).as_bytes());
                body.extend_from_slice(payload);
            }
            let head = "HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary=frame\r\nConnection: close\r\n\r\n";
            stream.write_all(head.as_bytes()).unwrap();
            stream.write_all(&body).unwrap();
        });

        let source = HttpSource::new(&settings(&format!("http://{}/stream", addr))).unwrap();
        let first = source.acquire().unwrap();
        assert_eq!(first.data(), &[0xFF, 0xD8, 1, 2]);
        source.release(first);
        let second = source.acquire().unwrap();
        assert_eq!(second.data(), &[0xFF, 0xD8, 3]);
        source.release(second);
        server.join().unwrap();

        assert!(source.acquire().is_none());
        assert_eq!(source.stats().outstanding(), 0);
    }

    #[test]
    fn rejects_non_http_urls() {
        assert!(HttpSource::new(&settings("ftp://camera/stream")).is_err());
    }
}
