//! Oko camera node
//!
//! Serves frames from a single camera over HTTP: a live MJPEG feed
//! (`multipart/x-mixed-replace`) on the stream port and single JPEG snapshots,
//! an index page and a health probe on the page port.
//!
//! # Architecture
//!
//! Frames are borrowed from a [`FrameSource`] and must be returned exactly
//! once. Callers hold a [`FrameGuard`], so the return happens on every exit
//! path. Frames already in JPEG form are sent straight from the source buffer;
//! anything else is compressed by an [`Encoder`] first and the source buffer is
//! given back before the first byte goes out.
//!
//! # Module Structure
//!
//! - `frame`: frames, pixel formats, the source trait and buffer pool
//! - `encode` / `normalize`: JPEG conversion (pull and push style)
//! - `multipart`: part framing for the live feed
//! - `transport`: response channels handlers write into
//! - `stream`: the per-connection streaming state machine
//! - `snapshot`: single still image
//! - `rate`: frame-interval statistics for diagnostics
//! - `http` / `bootstrap`: the two server groups
//! - `ingest`: frame sources (synthetic, files, V4L2, upstream HTTP)
//! - `config`: daemon configuration

pub mod bootstrap;
pub mod config;
pub mod encode;
pub mod error;
pub mod frame;
pub mod http;
pub mod ingest;
pub mod multipart;
mod normalize;
pub mod rate;
pub mod snapshot;
pub mod stream;
pub mod transport;

pub use bootstrap::{CameraServers, ServerBootstrap};
pub use config::CameraConfig;
pub use encode::{ChunkSink, EncodedFrame, Encoder, JpegEncoder, DEFAULT_JPEG_QUALITY};
pub use error::{BootstrapError, EncodeError, StreamError, TransportError};
pub use frame::{
    CaptureTimestamp, Frame, FrameGuard, FramePool, FrameSource, PixelFormat, SourceStats,
};
pub use ingest::open_source;
pub use multipart::{PartHeader, PART_BOUNDARY, STREAM_BOUNDARY, STREAM_CONTENT_TYPE};
pub use rate::{FrameTiming, RateStats};
pub use snapshot::{capture_snapshot, SnapshotReport};
pub use stream::{
    serve_stream, IterationOutcome, SessionEnd, SessionState, StreamOptions, StreamSession,
};
pub use transport::{
    ChunkedTransport, MemoryResponder, MemoryResponse, MemoryTransport, Responder, ResponseHead,
};
