//! Instrumented collaborators shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use oko_camera::{
    CaptureTimestamp, ChunkSink, ChunkedTransport, EncodeError, Encoder, Frame, FrameSource,
    MemoryTransport, PixelFormat, SourceStats, TransportError,
};

/// Ordered record of acquire/release/send calls across collaborators.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// A JPEG-looking payload of exactly `len` bytes (len >= 4).
pub fn jpeg_bytes(len: usize, fill: u8) -> Vec<u8> {
    let mut bytes = vec![fill; len];
    bytes[0] = 0xFF;
    bytes[1] = 0xD8;
    bytes[len - 2] = 0xFF;
    bytes[len - 1] = 0xD9;
    bytes
}

pub struct ScriptedFrame {
    pub data: Vec<u8>,
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub timestamp: CaptureTimestamp,
}

impl ScriptedFrame {
    pub fn jpeg(len: usize) -> Self {
        Self {
            data: jpeg_bytes(len, 0x11),
            format: PixelFormat::Jpeg,
            width: 640,
            height: 480,
            timestamp: CaptureTimestamp::new(1_700_000_000, 250_000),
        }
    }

    pub fn raw(width: u32, height: u32) -> Self {
        Self {
            data: vec![0x40; (width * height * 3) as usize],
            format: PixelFormat::Rgb24,
            width,
            height,
            timestamp: CaptureTimestamp::new(1_700_000_001, 7),
        }
    }

    pub fn at(mut self, timestamp: CaptureTimestamp) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Hands out a fixed script of frames, then reports no frame available.
pub struct ScriptedSource {
    frames: Mutex<VecDeque<ScriptedFrame>>,
    acquired: AtomicU64,
    released: AtomicU64,
    log: EventLog,
}

impl ScriptedSource {
    pub fn new(frames: Vec<ScriptedFrame>, log: EventLog) -> Self {
        Self {
            frames: Mutex::new(frames.into()),
            acquired: AtomicU64::new(0),
            released: AtomicU64::new(0),
            log,
        }
    }

    pub fn remaining(&self) -> usize {
        self.frames.lock().unwrap().len()
    }
}

impl FrameSource for ScriptedSource {
    fn acquire(&self) -> Option<Frame> {
        let next = self.frames.lock().unwrap().pop_front();
        let Some(scripted) = next else {
            self.log.push("acquire:none");
            return None;
        };
        let n = self.acquired.fetch_add(1, Ordering::SeqCst) + 1;
        self.log.push(format!("acquire:{}", n));
        Some(Frame::new(
            scripted.data,
            scripted.width,
            scripted.height,
            scripted.format,
            scripted.timestamp,
        ))
    }

    fn release(&self, _frame: Frame) {
        let n = self.released.fetch_add(1, Ordering::SeqCst) + 1;
        self.log.push(format!("release:{}", n));
    }

    fn name(&self) -> &str {
        "scripted"
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_acquired: self.acquired.load(Ordering::SeqCst),
            frames_released: self.released.load(Ordering::SeqCst),
        }
    }
}

/// Produces a fixed-size fake JPEG and counts buffer allocations/recycles.
pub struct FixedEncoder {
    output_len: usize,
    fail_on_call: Option<usize>,
    calls: AtomicUsize,
    allocated: AtomicUsize,
    recycled: AtomicUsize,
    log: EventLog,
}

impl FixedEncoder {
    pub fn new(output_len: usize, log: EventLog) -> Self {
        Self {
            output_len,
            fail_on_call: None,
            calls: AtomicUsize::new(0),
            allocated: AtomicUsize::new(0),
            recycled: AtomicUsize::new(0),
            log,
        }
    }

    /// Fail the call with zero-based index `call`.
    pub fn failing_on(mut self, call: usize) -> Self {
        self.fail_on_call = Some(call);
        self
    }

    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::SeqCst)
    }

    pub fn recycled(&self) -> usize {
        self.recycled.load(Ordering::SeqCst)
    }

    /// An encoder that "succeeds" without producing any bytes.
    pub fn producing_nothing(log: EventLog) -> Self {
        Self::new(0, log)
    }

    fn output(&self) -> Vec<u8> {
        match self.output_len {
            0 => Vec::new(),
            len => jpeg_bytes(len, 0x22),
        }
    }

    fn check(&self, frame: &Frame) -> Result<(), EncodeError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if frame.is_jpeg() {
            return Err(EncodeError::UnsupportedFormat(frame.format));
        }
        if self.fail_on_call == Some(call) {
            return Err(EncodeError::EmptyOutput);
        }
        Ok(())
    }
}

impl Encoder for FixedEncoder {
    fn encode_to_vec(&self, frame: &Frame, _quality: u8) -> Result<Vec<u8>, EncodeError> {
        self.check(frame)?;
        self.allocated.fetch_add(1, Ordering::SeqCst);
        self.log.push("encode");
        Ok(self.output())
    }

    fn encode_to_sink(
        &self,
        frame: &Frame,
        _quality: u8,
        sink: &mut dyn ChunkSink,
    ) -> Result<usize, EncodeError> {
        self.check(frame)?;
        let bytes = self.output();
        let mut offset = 0;
        for chunk in bytes.chunks(100) {
            let accepted = sink.write_chunk(offset, chunk);
            if accepted != chunk.len() {
                return Err(EncodeError::SinkRejected {
                    accepted: offset + accepted,
                });
            }
            offset += accepted;
        }
        Ok(offset)
    }

    fn recycle(&self, _buffer: Vec<u8>) {
        self.recycled.fetch_add(1, Ordering::SeqCst);
        self.log.push("recycle");
    }
}

/// `MemoryTransport` that also records each delivered chunk in the event log.
pub struct LoggedTransport {
    pub inner: MemoryTransport,
    log: EventLog,
}

impl LoggedTransport {
    pub fn new(inner: MemoryTransport, log: EventLog) -> Self {
        Self { inner, log }
    }
}

impl ChunkedTransport for LoggedTransport {
    fn send_chunk(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let result = self.inner.send_chunk(bytes);
        self.log.push(if result.is_ok() { "send" } else { "send:failed" });
        result
    }

    fn send_final(&mut self) -> Result<(), TransportError> {
        self.inner.send_final()
    }
}
