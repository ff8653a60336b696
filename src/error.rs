//! Error types for the camera node.
//!
//! Failures inside a streaming session or a snapshot request are reported as a
//! [`StreamError`]. Each variant corresponds to the stage that failed:
//!
//! - **SourceUnavailable**: the frame source had no frame to hand out
//! - **Encode**: a raw frame could not be converted to JPEG
//! - **Transport**: a chunk could not be delivered to the client
//! - **Terminated**: the session had already stopped on an earlier failure
//!
//! Server assembly failures are reported as a [`BootstrapError`].

use std::net::SocketAddr;

use thiserror::Error;

use crate::frame::PixelFormat;

/// Failure of a single acquire → encode → send pass.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("frame source unavailable")]
    SourceUnavailable,

    #[error("jpeg conversion failed: {0}")]
    Encode(#[from] EncodeError),

    #[error("transport failed: {0}")]
    Transport(#[from] TransportError),

    #[error("stream session already terminated")]
    Terminated,
}

impl StreamError {
    /// True when the client side went away or stalled, as opposed to a
    /// camera-side failure.
    pub fn is_transport(&self) -> bool {
        matches!(self, StreamError::Transport(_))
    }
}

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("pixel format {0:?} cannot be converted to jpeg")]
    UnsupportedFormat(PixelFormat),

    #[error("frame length mismatch: expected {expected} bytes, got {actual}")]
    Geometry { expected: usize, actual: usize },

    #[error("jpeg codec error: {0}")]
    Codec(#[from] image::ImageError),

    #[error("encoder produced no output")]
    EmptyOutput,

    #[error("chunk sink rejected output after {accepted} bytes")]
    SinkRejected { accepted: usize },
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport already closed")]
    Closed,
}

#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("route {method} {path} registered twice")]
    DuplicateRoute { method: String, path: String },

    #[error("invalid route path {0:?}: must start with '/' and contain no query or whitespace")]
    InvalidPath(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}
