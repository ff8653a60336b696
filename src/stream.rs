//! Live MJPEG feed.
//!
//! One `StreamSession` runs per streaming connection. Each iteration walks
//! ACQUIRE → ENCODE → SEND → RELEASE and yields an `IterationOutcome`; the
//! next state is a pure function of that outcome. Any failure terminates the
//! session and is handed back to the caller in `SessionEnd`.
//!
//! Buffer ownership is carried by `EncodedFrame`: a JPEG frame stays acquired
//! until its payload has been sent, a converted frame was released before the
//! first send and its JPEG buffer is recycled when the iteration ends.

use std::time::{Duration, Instant};

use crate::encode::{EncodedFrame, Encoder, DEFAULT_JPEG_QUALITY};
use crate::error::{EncodeError, StreamError, TransportError};
use crate::frame::{FrameGuard, FrameSource};
use crate::multipart::{PartHeader, STREAM_BOUNDARY, STREAM_CONTENT_TYPE};
use crate::rate::RateStats;
use crate::transport::{ChunkedTransport, Responder, ResponseHead};

/// Value of the informational `X-Framerate` header.
pub const DEFAULT_ADVERTISED_FRAMERATE: u32 = 60;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamOptions {
    pub jpeg_quality: u8,
    /// Lower bound on the spacing of consecutive frames. Zero disables pacing.
    pub min_frame_interval: Duration,
    pub advertised_framerate: u32,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            min_frame_interval: Duration::ZERO,
            advertised_framerate: DEFAULT_ADVERTISED_FRAMERATE,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Acquire,
    Encode,
    Send,
    Release,
    Terminated,
}

/// Result of one acquire → encode → send → release pass.
#[derive(Debug)]
pub enum IterationOutcome {
    Sent { bytes: usize, owned: bool },
    SourceUnavailable,
    EncodeFailure(EncodeError),
    TransportFailure(TransportError),
    /// The session stopped on an earlier iteration; nothing was attempted.
    Terminated,
}

impl IterationOutcome {
    pub fn next_state(&self) -> SessionState {
        match self {
            IterationOutcome::Sent { .. } => SessionState::Acquire,
            _ => SessionState::Terminated,
        }
    }

    /// The failure carried by this outcome, if any.
    pub fn into_failure(self) -> Option<StreamError> {
        match self {
            IterationOutcome::Sent { .. } => None,
            IterationOutcome::SourceUnavailable => Some(StreamError::SourceUnavailable),
            IterationOutcome::EncodeFailure(err) => Some(StreamError::Encode(err)),
            IterationOutcome::TransportFailure(err) => Some(StreamError::Transport(err)),
            IterationOutcome::Terminated => Some(StreamError::Terminated),
        }
    }
}

/// Summary handed back when a session stops.
#[derive(Debug)]
pub struct SessionEnd {
    pub frames_sent: u64,
    pub bytes_sent: u64,
    pub average_interval: Option<Duration>,
    pub cause: StreamError,
}

pub struct StreamSession<'a, T> {
    source: &'a dyn FrameSource,
    encoder: &'a dyn Encoder,
    transport: T,
    options: StreamOptions,
    stats: RateStats,
    state: SessionState,
    header_buf: Vec<u8>,
    frames_sent: u64,
    bytes_sent: u64,
}

impl<'a, T: ChunkedTransport> StreamSession<'a, T> {
    pub fn new(
        source: &'a dyn FrameSource,
        encoder: &'a dyn Encoder,
        transport: T,
        options: StreamOptions,
    ) -> Self {
        Self {
            source,
            encoder,
            transport,
            options,
            stats: RateStats::new(),
            state: SessionState::Acquire,
            header_buf: Vec::with_capacity(128),
            frames_sent: 0,
            bytes_sent: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stats(&self) -> &RateStats {
        &self.stats
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Stream until the first failure.
    pub fn run(&mut self) -> SessionEnd {
        log::info!("stream session started on {}", self.source.name());
        loop {
            if let Some(cause) = self.step().into_failure() {
                let end = SessionEnd {
                    frames_sent: self.frames_sent,
                    bytes_sent: self.bytes_sent,
                    average_interval: self.stats.average(),
                    cause,
                };
                log::info!(
                    "stream session ended after {} frames ({} bytes): {}",
                    end.frames_sent,
                    end.bytes_sent,
                    end.cause
                );
                return end;
            }
        }
    }

    /// Run one iteration and advance the state machine.
    pub fn step(&mut self) -> IterationOutcome {
        if self.state == SessionState::Terminated {
            return IterationOutcome::Terminated;
        }
        let outcome = self.run_iteration();
        if let IterationOutcome::Sent { bytes, .. } = outcome {
            self.record_sent(bytes);
        }
        self.state = outcome.next_state();
        outcome
    }

    fn run_iteration(&mut self) -> IterationOutcome {
        self.pace();

        self.state = SessionState::Acquire;
        let Some(guard) = FrameGuard::acquire(self.source) else {
            log::error!("camera capture failed on {}", self.source.name());
            return IterationOutcome::SourceUnavailable;
        };

        self.state = SessionState::Encode;
        let encoded = match EncodedFrame::normalize(guard, self.encoder, self.options.jpeg_quality)
        {
            Ok(encoded) => encoded,
            Err(err) => {
                log::error!("jpeg compression failed: {}", err);
                return IterationOutcome::EncodeFailure(err);
            }
        };

        self.state = SessionState::Send;
        let sent = self.send_part(&encoded);

        self.state = SessionState::Release;
        let bytes = encoded.len();
        let owned = encoded.is_owned();
        drop(encoded);

        match sent {
            Ok(()) => IterationOutcome::Sent { bytes, owned },
            Err(err) => {
                log::warn!("send frame failed: {}", err);
                IterationOutcome::TransportFailure(err)
            }
        }
    }

    /// Boundary, part header, payload. The first failure skips the rest.
    fn send_part(&mut self, frame: &EncodedFrame<'_>) -> Result<(), TransportError> {
        self.transport.send_chunk(STREAM_BOUNDARY)?;
        self.header_buf.clear();
        PartHeader::new(frame.len(), frame.timestamp()).encode_into(&mut self.header_buf)?;
        self.transport.send_chunk(&self.header_buf)?;
        self.transport.send_chunk(frame.as_bytes())
    }

    fn record_sent(&mut self, bytes: usize) {
        self.frames_sent += 1;
        self.bytes_sent += bytes as u64;
        if let Some(timing) = self.stats.record(Instant::now()) {
            log::debug!(
                "MJPG: {}B {}ms ({:.1}fps), AVG: {}ms ({:.1}fps)",
                bytes,
                timing.interval.as_millis(),
                timing.fps(),
                timing.average.as_millis(),
                timing.average_fps()
            );
        }
    }

    fn pace(&self) {
        let min = self.options.min_frame_interval;
        if min.is_zero() {
            return;
        }
        if let Some(last) = self.stats.last_frame() {
            let elapsed = last.elapsed();
            if elapsed < min {
                std::thread::sleep(min - elapsed);
            }
        }
    }
}

/// Answer a streaming request: send the multipart head, then stream until
/// the first failure.
pub fn serve_stream<R: Responder>(
    source: &dyn FrameSource,
    encoder: &dyn Encoder,
    options: StreamOptions,
    responder: R,
) -> SessionEnd {
    let head = ResponseHead::ok()
        .header("Content-Type", STREAM_CONTENT_TYPE)
        .header("Access-Control-Allow-Origin", "*")
        .header("X-Framerate", options.advertised_framerate.to_string());
    match responder.respond_chunked(head) {
        Ok(body) => StreamSession::new(source, encoder, body, options).run(),
        Err(err) => {
            log::warn!("stream response head failed: {}", err);
            SessionEnd {
                frames_sent: 0,
                bytes_sent: 0,
                average_interval: None,
                cause: StreamError::Transport(err),
            }
        }
    }
}
