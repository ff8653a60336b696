//! Single still image.
//!
//! A JPEG frame goes out as one fixed-length response. A raw frame is
//! converted with the push-style encoder straight into a chunked body, so the
//! full JPEG never sits in memory. Either way the frame is released exactly
//! once, after the body has been sent.

use std::time::{Duration, Instant};

use crate::encode::Encoder;
use crate::error::{EncodeError, StreamError};
use crate::frame::{CaptureTimestamp, Frame, FrameGuard, FrameSource};
use crate::multipart::PART_CONTENT_TYPE;
use crate::transport::{ChunkedTransport, Responder, ResponseHead, TransportSink};

/// What a snapshot request delivered. Used for logging only.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SnapshotReport {
    pub bytes: usize,
    pub elapsed: Duration,
    pub converted: bool,
    pub timestamp: CaptureTimestamp,
}

/// Acquire one frame and answer the request with it.
pub fn capture_snapshot<R: Responder>(
    source: &dyn FrameSource,
    encoder: &dyn Encoder,
    quality: u8,
    responder: R,
) -> Result<SnapshotReport, StreamError> {
    let started = Instant::now();
    let Some(guard) = FrameGuard::acquire(source) else {
        log::error!("camera capture failed on {}", source.name());
        let head = ResponseHead::new(500).header("Content-Type", "text/plain");
        if let Err(err) = responder.respond(head, b"camera capture failed\n") {
            log::warn!("snapshot error response failed: {}", err);
        }
        return Err(StreamError::SourceUnavailable);
    };

    let timestamp = guard.timestamp;
    let converted = !guard.is_jpeg();
    let head = ResponseHead::ok()
        .header("Content-Type", PART_CONTENT_TYPE)
        .header("Content-Disposition", "inline; filename=capture.jpg")
        .header("Access-Control-Allow-Origin", "*")
        .header("X-Timestamp", timestamp.to_string());

    let sent = if converted {
        send_converted(guard.frame(), encoder, quality, responder, head)
    } else {
        responder
            .respond(head, guard.data())
            .map(|()| guard.len())
            .map_err(StreamError::from)
    };
    guard.release();

    let bytes = sent?;
    let report = SnapshotReport {
        bytes,
        elapsed: started.elapsed(),
        converted,
        timestamp,
    };
    log::info!("JPG: {}B {}ms", report.bytes, report.elapsed.as_millis());
    Ok(report)
}

fn send_converted<R: Responder>(
    frame: &Frame,
    encoder: &dyn Encoder,
    quality: u8,
    responder: R,
    head: ResponseHead,
) -> Result<usize, StreamError> {
    let mut body = responder.respond_chunked(head)?;
    let mut sink = TransportSink::new(&mut body);
    let encoded = encoder
        .encode_to_sink(frame, quality, &mut sink)
        .and_then(|bytes| match bytes {
            0 => Err(EncodeError::EmptyOutput),
            n => Ok(n),
        });
    if let Some(err) = sink.into_error() {
        return Err(err.into());
    }
    // a failed conversion leaves the body unterminated
    let bytes = encoded?;
    body.send_final()?;
    Ok(bytes)
}
