//! Raw-to-JPEG conversion and the two provenances of transmitted bytes.
//!
//! The `Encoder` trait exposes both interfaces the streaming code needs:
//!
//! - pull style (`encode_to_vec`): one heap buffer per frame, handed back via
//!   `recycle` once the caller is done with it
//! - push style (`encode_to_sink`): output is pushed into a `ChunkSink` as it
//!   is produced, without building the full image in memory
//!
//! `EncodedFrame` is what actually goes on the wire. A frame that was already
//! JPEG is `Borrowed`: it keeps the `FrameGuard` alive and aliases its bytes.
//! A converted frame is `Owned`: the source frame has already been released
//! and the JPEG buffer goes back to the encoder on drop. Dropping an
//! `EncodedFrame` therefore performs exactly one of release or recycle.

use std::io::{self, BufWriter, Write};
use std::sync::Mutex;

use image::codecs::jpeg::JpegEncoder as ImageJpegEncoder;
use image::ImageError;

use crate::error::EncodeError;
use crate::frame::{CaptureTimestamp, Frame, FrameGuard};
use crate::normalize::encoder_input;

pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Block size used when pushing encoder output into a sink.
const SINK_BLOCK_BYTES: usize = 4096;

/// Spare output buffers kept by `JpegEncoder`.
const MAX_SPARE_BUFFERS: usize = 4;

// ----------------------------------------------------------------------------
// Encoder interfaces
// ----------------------------------------------------------------------------

/// Receiver for push-style encoder output.
pub trait ChunkSink {
    /// Accept `data`, which sits at byte `offset` of the encoded image.
    /// Returns the number of bytes accepted; a short count aborts encoding.
    fn write_chunk(&mut self, offset: usize, data: &[u8]) -> usize;
}

impl<F> ChunkSink for F
where
    F: FnMut(usize, &[u8]) -> usize,
{
    fn write_chunk(&mut self, offset: usize, data: &[u8]) -> usize {
        self(offset, data)
    }
}

pub trait Encoder: Send + Sync {
    /// Convert a raw frame into one owned JPEG buffer.
    fn encode_to_vec(&self, frame: &Frame, quality: u8) -> Result<Vec<u8>, EncodeError>;

    /// Convert a raw frame, pushing output into `sink`. Returns total bytes.
    fn encode_to_sink(
        &self,
        frame: &Frame,
        quality: u8,
        sink: &mut dyn ChunkSink,
    ) -> Result<usize, EncodeError>;

    /// Take back a buffer produced by `encode_to_vec`.
    fn recycle(&self, buffer: Vec<u8>) {
        drop(buffer);
    }
}

// ----------------------------------------------------------------------------
// JpegEncoder
// ----------------------------------------------------------------------------

/// Baseline JPEG encoder backed by the `image` crate.
pub struct JpegEncoder {
    spare: Mutex<Vec<Vec<u8>>>,
}

impl JpegEncoder {
    pub fn new() -> Self {
        Self {
            spare: Mutex::new(Vec::with_capacity(MAX_SPARE_BUFFERS)),
        }
    }

    fn take_buffer(&self, hint: usize) -> Vec<u8> {
        let spare = self
            .spare
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop();
        match spare {
            Some(mut buf) => {
                buf.clear();
                buf
            }
            None => Vec::with_capacity(hint),
        }
    }
}

impl Default for JpegEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder for JpegEncoder {
    fn encode_to_vec(&self, frame: &Frame, quality: u8) -> Result<Vec<u8>, EncodeError> {
        let (pixels, color) = encoder_input(frame)?;
        // a compressed frame is typically well under a tenth of the raw size
        let mut out = self.take_buffer(pixels.len() / 8);
        let result = ImageJpegEncoder::new_with_quality(&mut out, clamp_quality(quality)).encode(
            &pixels,
            frame.width,
            frame.height,
            color,
        );
        match result {
            Ok(()) if !out.is_empty() => Ok(out),
            Ok(()) => {
                self.recycle(out);
                Err(EncodeError::EmptyOutput)
            }
            Err(err) => {
                self.recycle(out);
                Err(EncodeError::Codec(err))
            }
        }
    }

    fn encode_to_sink(
        &self,
        frame: &Frame,
        quality: u8,
        sink: &mut dyn ChunkSink,
    ) -> Result<usize, EncodeError> {
        let (pixels, color) = encoder_input(frame)?;
        let mut writer = BufWriter::with_capacity(
            SINK_BLOCK_BYTES,
            SinkWriter {
                sink,
                offset: 0,
                rejected: false,
            },
        );
        let result = ImageJpegEncoder::new_with_quality(&mut writer, clamp_quality(quality))
            .encode(&pixels, frame.width, frame.height, color);
        if let Err(err) = result {
            let accepted = writer.get_ref().offset;
            return Err(match err {
                ImageError::IoError(io_err) if io_err.kind() == io::ErrorKind::WriteZero => {
                    EncodeError::SinkRejected { accepted }
                }
                other => EncodeError::Codec(other),
            });
        }
        if writer.flush().is_err() {
            return Err(EncodeError::SinkRejected {
                accepted: writer.get_ref().offset,
            });
        }
        match writer.get_ref().offset {
            0 => Err(EncodeError::EmptyOutput),
            total => Ok(total),
        }
    }

    fn recycle(&self, buffer: Vec<u8>) {
        let mut spare = self
            .spare
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if spare.len() < MAX_SPARE_BUFFERS {
            spare.push(buffer);
        }
    }
}

fn clamp_quality(quality: u8) -> u8 {
    quality.clamp(1, 100)
}

/// `io::Write` adapter over a `ChunkSink`.
struct SinkWriter<'s> {
    sink: &'s mut dyn ChunkSink,
    offset: usize,
    rejected: bool,
}

impl Write for SinkWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.rejected {
            return Err(io::ErrorKind::WriteZero.into());
        }
        let accepted = self.sink.write_chunk(self.offset, buf).min(buf.len());
        self.offset += accepted;
        if accepted < buf.len() {
            self.rejected = true;
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "chunk sink accepted a short write",
            ));
        }
        Ok(accepted)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// EncodedFrame
// ----------------------------------------------------------------------------

/// JPEG produced by conversion. Returned to its encoder on drop.
pub struct OwnedJpeg<'a> {
    bytes: Vec<u8>,
    timestamp: CaptureTimestamp,
    encoder: &'a dyn Encoder,
}

impl Drop for OwnedJpeg<'_> {
    fn drop(&mut self) {
        self.encoder.recycle(std::mem::take(&mut self.bytes));
    }
}

/// The bytes to transmit for one frame.
pub enum EncodedFrame<'a> {
    /// Frame was already JPEG; bytes alias the still-acquired frame.
    Borrowed(FrameGuard<'a>),
    /// Frame was converted; the source frame has already been released.
    Owned(OwnedJpeg<'a>),
}

impl<'a> EncodedFrame<'a> {
    /// Make sure `guard` is deliverable as JPEG.
    ///
    /// A raw frame is converted with the pull interface and released back to
    /// its source immediately, whether or not conversion succeeded. An empty
    /// conversion is an `EmptyOutput` failure.
    pub fn normalize(
        guard: FrameGuard<'a>,
        encoder: &'a dyn Encoder,
        quality: u8,
    ) -> Result<Self, EncodeError> {
        if guard.is_jpeg() {
            return Ok(EncodedFrame::Borrowed(guard));
        }
        let timestamp = guard.timestamp;
        let converted = encoder.encode_to_vec(guard.frame(), quality);
        guard.release();
        let bytes = converted?;
        if bytes.is_empty() {
            encoder.recycle(bytes);
            return Err(EncodeError::EmptyOutput);
        }
        Ok(EncodedFrame::Owned(OwnedJpeg {
            bytes,
            timestamp,
            encoder,
        }))
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            EncodedFrame::Borrowed(guard) => guard.data(),
            EncodedFrame::Owned(jpeg) => &jpeg.bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    pub fn timestamp(&self) -> CaptureTimestamp {
        match self {
            EncodedFrame::Borrowed(guard) => guard.timestamp,
            EncodedFrame::Owned(jpeg) => jpeg.timestamp,
        }
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, EncodedFrame::Owned(_))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FramePool, FrameSource, PixelFormat, SourceStats};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn gradient(width: u32, height: u32) -> Frame {
        let mut data = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&[(x * 8) as u8, (y * 8) as u8, 128]);
            }
        }
        Frame::new(
            data,
            width,
            height,
            PixelFormat::Rgb24,
            CaptureTimestamp::new(5, 6),
        )
    }

    struct OneShot {
        pool: FramePool,
        format: PixelFormat,
    }

    impl FrameSource for OneShot {
        fn acquire(&self) -> Option<Frame> {
            self.pool.note_acquired();
            let frame = match self.format {
                PixelFormat::Jpeg => Frame::new(
                    vec![0xFF, 0xD8, 1, 2, 3, 0xFF, 0xD9],
                    1,
                    1,
                    PixelFormat::Jpeg,
                    CaptureTimestamp::new(9, 10),
                ),
                _ => gradient(16, 8),
            };
            Some(frame)
        }

        fn release(&self, frame: Frame) {
            self.pool.give_back(frame);
        }

        fn name(&self) -> &str {
            "oneshot"
        }

        fn stats(&self) -> SourceStats {
            self.pool.stats()
        }
    }

    struct CountingEncoder {
        inner: JpegEncoder,
        recycled: AtomicUsize,
    }

    impl Encoder for CountingEncoder {
        fn encode_to_vec(&self, frame: &Frame, quality: u8) -> Result<Vec<u8>, EncodeError> {
            self.inner.encode_to_vec(frame, quality)
        }

        fn encode_to_sink(
            &self,
            frame: &Frame,
            quality: u8,
            sink: &mut dyn ChunkSink,
        ) -> Result<usize, EncodeError> {
            self.inner.encode_to_sink(frame, quality, sink)
        }

        fn recycle(&self, buffer: Vec<u8>) {
            self.recycled.fetch_add(1, Ordering::SeqCst);
            self.inner.recycle(buffer);
        }
    }

    #[test]
    fn encodes_rgb_to_decodable_jpeg() {
        let encoder = JpegEncoder::new();
        let jpeg = encoder.encode_to_vec(&gradient(16, 8), 80).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);

        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!(decoded.width(), 16);
        assert_eq!(decoded.height(), 8);
    }

    #[test]
    fn sink_output_matches_buffer_output() {
        let encoder = JpegEncoder::new();
        let frame = gradient(32, 16);
        let whole = encoder.encode_to_vec(&frame, 70).unwrap();

        let mut streamed = Vec::new();
        let mut offsets = Vec::new();
        let mut sink = |offset: usize, data: &[u8]| {
            offsets.push(offset);
            streamed.extend_from_slice(data);
            data.len()
        };
        let total = encoder.encode_to_sink(&frame, 70, &mut sink).unwrap();

        assert_eq!(total, whole.len());
        assert_eq!(streamed, whole);
        assert_eq!(offsets[0], 0);
    }

    #[test]
    fn sink_rejection_aborts_encoding() {
        let encoder = JpegEncoder::new();
        let mut sink = |_offset: usize, _data: &[u8]| 0usize;
        let err = encoder
            .encode_to_sink(&gradient(16, 8), 80, &mut sink)
            .unwrap_err();
        assert!(matches!(err, EncodeError::SinkRejected { accepted: 0 }));
    }

    #[test]
    fn jpeg_frames_are_borrowed_without_copy() {
        let source = OneShot {
            pool: FramePool::default(),
            format: PixelFormat::Jpeg,
        };
        let encoder = JpegEncoder::new();
        let guard = FrameGuard::acquire(&source).unwrap();
        let original = guard.data().as_ptr();

        let encoded = EncodedFrame::normalize(guard, &encoder, 80).unwrap();
        assert!(!encoded.is_owned());
        assert_eq!(encoded.as_bytes().as_ptr(), original);
        assert_eq!(encoded.as_bytes(), &[0xFF, 0xD8, 1, 2, 3, 0xFF, 0xD9]);
        assert_eq!(encoded.timestamp(), CaptureTimestamp::new(9, 10));
        assert_eq!(source.stats().outstanding(), 1);

        drop(encoded);
        assert_eq!(source.stats().outstanding(), 0);
    }

    #[test]
    fn raw_frames_release_source_before_transmit() {
        let source = OneShot {
            pool: FramePool::default(),
            format: PixelFormat::Rgb24,
        };
        let encoder = CountingEncoder {
            inner: JpegEncoder::new(),
            recycled: AtomicUsize::new(0),
        };
        let guard = FrameGuard::acquire(&source).unwrap();

        let encoded = EncodedFrame::normalize(guard, &encoder, 80).unwrap();
        assert!(encoded.is_owned());
        assert_eq!(source.stats().outstanding(), 0);
        assert_eq!(encoded.timestamp(), CaptureTimestamp::new(5, 6));
        assert_eq!(encoder.recycled.load(Ordering::SeqCst), 0);

        drop(encoded);
        assert_eq!(encoder.recycled.load(Ordering::SeqCst), 1);
        assert_eq!(source.stats().frames_released, 1);
    }
}
