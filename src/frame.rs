//! Captured frames and the source they are borrowed from.
//!
//! - `Frame`: pixel payload plus its encoding tag and capture timestamp.
//! - `FrameSource`: the camera-facing collaborator with explicit acquire/release.
//! - `FrameGuard`: scoped loan of a frame. Returns it to the source on drop.
//! - `FramePool`: buffer recycling and acquire/release accounting for sources.
//!
//! A frame belongs to its source for its whole life. Callers only ever hold a
//! `FrameGuard`, so every successful acquire is paired with exactly one release
//! on every exit path (success, encode failure, send failure, panic unwind).

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;

/// Number of spare buffers a source keeps for reuse.
pub const DEFAULT_POOL_BUFFERS: usize = 4;

// ----------------------------------------------------------------------------
// PixelFormat / CaptureTimestamp
// ----------------------------------------------------------------------------

/// Encoding tag of a frame payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Already a complete JPEG image.
    Jpeg,
    /// Packed 8-bit RGB.
    Rgb24,
    /// 8-bit luminance.
    Gray8,
    /// Packed 5-6-5 RGB, big-endian (sensor byte order).
    Rgb565,
    /// YUV 4:2:2 packed as Y0 U Y1 V.
    Yuyv,
}

impl PixelFormat {
    pub fn is_jpeg(self) -> bool {
        self == PixelFormat::Jpeg
    }

    /// Bytes per pixel for raw layouts, `None` for compressed payloads.
    pub fn bytes_per_pixel(self) -> Option<usize> {
        match self {
            PixelFormat::Jpeg => None,
            PixelFormat::Rgb24 => Some(3),
            PixelFormat::Gray8 => Some(1),
            PixelFormat::Rgb565 | PixelFormat::Yuyv => Some(2),
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" | "mjpeg" => Some(PixelFormat::Jpeg),
            "rgb24" | "rgb" | "rgb888" => Some(PixelFormat::Rgb24),
            "gray8" | "gray" | "grayscale" => Some(PixelFormat::Gray8),
            "rgb565" => Some(PixelFormat::Rgb565),
            "yuyv" | "yuv422" => Some(PixelFormat::Yuyv),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PixelFormat::Jpeg => "jpeg",
            PixelFormat::Rgb24 => "rgb24",
            PixelFormat::Gray8 => "gray8",
            PixelFormat::Rgb565 => "rgb565",
            PixelFormat::Yuyv => "yuyv",
        }
    }
}

/// Wall-clock capture time with microsecond resolution.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct CaptureTimestamp {
    pub secs: u64,
    pub micros: u32,
}

impl CaptureTimestamp {
    pub fn new(secs: u64, micros: u32) -> Self {
        Self {
            secs: secs + u64::from(micros / 1_000_000),
            micros: micros % 1_000_000,
        }
    }

    /// Current wall-clock time. A clock set before the epoch reads as zero.
    pub fn now() -> Self {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(Self::from_duration)
            .unwrap_or_default()
    }

    pub fn from_duration(since_epoch: Duration) -> Self {
        Self {
            secs: since_epoch.as_secs(),
            micros: since_epoch.subsec_micros(),
        }
    }
}

/// Renders as `<sec>.<6-digit usec>`, the form used in `X-Timestamp`.
impl fmt::Display for CaptureTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}", self.secs, self.micros)
    }
}

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// One captured image plus metadata.
///
/// No `Clone`: a frame is a loan from its source and
/// must travel back through `FrameSource::release`.
#[derive(Debug)]
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub timestamp: CaptureTimestamp,
}

impl Frame {
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: PixelFormat,
        timestamp: CaptureTimestamp,
    ) -> Self {
        Self {
            data,
            width,
            height,
            format,
            timestamp,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_jpeg(&self) -> bool {
        self.format.is_jpeg()
    }

    /// Payload length implied by the geometry, for raw layouts.
    pub fn expected_len(&self) -> Option<usize> {
        let bpp = self.format.bytes_per_pixel()?;
        (self.width as usize)
            .checked_mul(self.height as usize)?
            .checked_mul(bpp)
    }

    /// Hand the backing buffer back to whoever recycles it.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    fn placeholder() -> Self {
        Self::new(
            Vec::new(),
            0,
            0,
            PixelFormat::Jpeg,
            CaptureTimestamp::default(),
        )
    }
}

// ----------------------------------------------------------------------------
// FrameSource / FrameGuard
// ----------------------------------------------------------------------------

/// Acquire/release counters reported by a source.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SourceStats {
    pub frames_acquired: u64,
    pub frames_released: u64,
}

impl SourceStats {
    /// Frames currently lent out.
    pub fn outstanding(&self) -> u64 {
        self.frames_acquired.saturating_sub(self.frames_released)
    }
}

/// Camera-facing frame producer.
///
/// `acquire` lends a frame out; the frame must come back through `release`
/// exactly once. Sources are shared between connection workers, so both take
/// `&self` and implementations synchronise internally.
pub trait FrameSource: Send + Sync {
    /// Lend out the next frame, or `None` when no frame is available.
    fn acquire(&self) -> Option<Frame>;

    /// Return a frame obtained from `acquire`.
    fn release(&self, frame: Frame);

    /// Short human-readable identifier (URL, device path).
    fn name(&self) -> &str;

    fn stats(&self) -> SourceStats;
}

/// Scoped loan of one frame. Dropping the guard releases the frame.
pub struct FrameGuard<'a> {
    source: &'a dyn FrameSource,
    frame: Frame,
}

impl<'a> FrameGuard<'a> {
    pub fn acquire(source: &'a dyn FrameSource) -> Option<Self> {
        let frame = source.acquire()?;
        Some(Self { source, frame })
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// Release now instead of at end of scope.
    pub fn release(self) {
        drop(self);
    }
}

impl Deref for FrameGuard<'_> {
    type Target = Frame;

    fn deref(&self) -> &Frame {
        &self.frame
    }
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        let frame = std::mem::replace(&mut self.frame, Frame::placeholder());
        self.source.release(frame);
    }
}

impl fmt::Debug for FrameGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameGuard")
            .field("source", &self.source.name())
            .field("frame", &self.frame)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// FramePool: buffer recycling for sources
// ----------------------------------------------------------------------------

/// Spare-buffer pool shared by the built-in sources.
///
/// Released frames donate their buffer back so steady-state streaming does
/// not allocate a fresh payload per frame.
pub struct FramePool {
    free: Mutex<Vec<Vec<u8>>>,
    max_free: usize,
    acquired: AtomicU64,
    released: AtomicU64,
}

impl FramePool {
    pub fn new(max_free: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(max_free)),
            max_free,
            acquired: AtomicU64::new(0),
            released: AtomicU64::new(0),
        }
    }

    /// Take an empty buffer with at least `capacity` bytes reserved.
    pub fn take(&self, capacity: usize) -> Vec<u8> {
        let spare = self
            .free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop();
        match spare {
            Some(mut buf) => {
                buf.clear();
                buf.reserve(capacity);
                buf
            }
            None => Vec::with_capacity(capacity),
        }
    }

    /// Record that a frame built from this pool was lent out.
    pub fn note_acquired(&self) {
        self.acquired.fetch_add(1, Ordering::Relaxed);
    }

    /// Accept a released frame and keep its buffer if there is room.
    pub fn give_back(&self, frame: Frame) {
        self.released.fetch_add(1, Ordering::Relaxed);
        let data = frame.into_data();
        let mut free = self
            .free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if free.len() < self.max_free {
            free.push(data);
        }
    }

    pub fn spare_buffers(&self) -> usize {
        self.free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn stats(&self) -> SourceStats {
        SourceStats {
            frames_acquired: self.acquired.load(Ordering::Relaxed),
            frames_released: self.released.load(Ordering::Relaxed),
        }
    }
}

impl Default for FramePool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_BUFFERS)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
