//! Frame sources.
//!
//! - `stub://<name>`: synthetic moving pattern (testing, demos)
//! - local JPEG file or directory of JPEG files, cycled
//! - V4L2 devices (feature: ingest-v4l2)
//! - upstream MJPEG/JPEG over HTTP (feature: ingest-http)
//!
//! Every source lends frames out through `FrameSource::acquire`, takes them
//! back through `release`, and recycles payload buffers via `FramePool`.

pub mod file;
#[cfg(feature = "ingest-http")]
pub mod http;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

pub use file::FileSource;
#[cfg(feature = "ingest-http")]
pub use http::HttpSource;
pub use synthetic::SyntheticSource;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Source;

use anyhow::{anyhow, Result};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::SourceSettings;
use crate::frame::FrameSource;

/// Open the source named by `settings.url`.
pub fn open_source(settings: &SourceSettings) -> Result<Arc<dyn FrameSource>> {
    let url = settings.url.trim();
    if url.starts_with("stub://") {
        return Ok(Arc::new(SyntheticSource::new(settings)?));
    }
    if url.starts_with("http://") || url.starts_with("https://") {
        #[cfg(feature = "ingest-http")]
        {
            return Ok(Arc::new(HttpSource::new(settings)?));
        }
        #[cfg(not(feature = "ingest-http"))]
        {
            return Err(anyhow!("{} requires the ingest-http feature", url));
        }
    }
    if url.starts_with("/dev/video") {
        #[cfg(feature = "ingest-v4l2")]
        {
            return Ok(Arc::new(V4l2Source::new(settings)?));
        }
        #[cfg(not(feature = "ingest-v4l2"))]
        {
            return Err(anyhow!("{} requires the ingest-v4l2 feature", url));
        }
    }
    if url.contains("://") {
        return Err(anyhow!("unsupported source url '{}'", url));
    }
    Ok(Arc::new(FileSource::new(settings)?))
}

/// Spaces consecutive acquires at least `1 / target_fps` apart.
///
/// Concurrent callers queue on the same cadence, the way readers of a single
/// sensor would.
pub(crate) struct Pacer {
    interval: Duration,
    next_due: Mutex<Option<Instant>>,
}

impl Pacer {
    pub(crate) fn new(target_fps: u32) -> Self {
        let interval = if target_fps == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs(1) / target_fps
        };
        Self {
            interval,
            next_due: Mutex::new(None),
        }
    }

    pub(crate) fn wait(&self) {
        if self.interval.is_zero() {
            return;
        }
        let mut next_due = self
            .next_due
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(due) = *next_due {
            let now = Instant::now();
            if due > now {
                std::thread::sleep(due - now);
            }
        }
        *next_due = Some(Instant::now() + self.interval);
    }
}
