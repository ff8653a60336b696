//! Synthetic frame source for `stub://` URLs.
//!
//! Produces a moving byte pattern in the configured pixel layout. With the
//! `jpeg` format each frame is compressed at acquire time, so the source
//! behaves like a camera with on-sensor JPEG.

use anyhow::{anyhow, Result};
use std::sync::Mutex;

use super::Pacer;
use crate::config::SourceSettings;
use crate::encode::{Encoder, JpegEncoder, DEFAULT_JPEG_QUALITY};
use crate::frame::{CaptureTimestamp, Frame, FramePool, FrameSource, PixelFormat, SourceStats};

pub struct SyntheticSource {
    name: String,
    width: u32,
    height: u32,
    format: PixelFormat,
    pacer: Pacer,
    pool: FramePool,
    encoder: JpegEncoder,
    state: Mutex<SceneState>,
}

#[derive(Default)]
struct SceneState {
    frame_count: u64,
    /// Bumped every 50 frames to simulate a scene change.
    scene: u8,
    /// Raw pattern buffer for the `jpeg` format.
    scratch: Vec<u8>,
}

impl SyntheticSource {
    pub fn new(settings: &SourceSettings) -> Result<Self> {
        if settings.width == 0 || settings.height == 0 {
            return Err(anyhow!("synthetic source needs a non-zero frame size"));
        }
        log::info!(
            "SyntheticSource: {} {}x{} {} @ {}fps",
            settings.url,
            settings.width,
            settings.height,
            settings.format.name(),
            settings.target_fps
        );
        Ok(Self {
            name: settings.url.clone(),
            width: settings.width,
            height: settings.height,
            format: settings.format,
            pacer: Pacer::new(settings.target_fps),
            pool: FramePool::default(),
            encoder: JpegEncoder::new(),
            state: Mutex::new(SceneState::default()),
        })
    }

    fn raw_len(&self, format: PixelFormat) -> usize {
        self.width as usize * self.height as usize * format.bytes_per_pixel().unwrap_or(3)
    }

    fn fill_pattern(buf: &mut Vec<u8>, len: usize, frame_count: u64, scene: u8) {
        buf.clear();
        buf.extend((0..len).map(|i| ((i as u64 + frame_count + scene as u64) % 256) as u8));
    }

    fn render(&self, state: &mut SceneState, timestamp: CaptureTimestamp) -> Option<Frame> {
        state.frame_count += 1;
        if state.frame_count.is_multiple_of(50) {
            state.scene = state.scene.wrapping_add(1);
        }

        if !self.format.is_jpeg() {
            let len = self.raw_len(self.format);
            let mut buf = self.pool.take(len);
            Self::fill_pattern(&mut buf, len, state.frame_count, state.scene);
            return Some(Frame::new(
                buf,
                self.width,
                self.height,
                self.format,
                timestamp,
            ));
        }

        let len = self.raw_len(PixelFormat::Rgb24);
        let mut scratch = std::mem::take(&mut state.scratch);
        Self::fill_pattern(&mut scratch, len, state.frame_count, state.scene);
        let raw = Frame::new(
            scratch,
            self.width,
            self.height,
            PixelFormat::Rgb24,
            timestamp,
        );

        let mut out = self.pool.take(len / 8);
        let mut sink = |_offset: usize, data: &[u8]| -> usize {
            out.extend_from_slice(data);
            data.len()
        };
        let encoded = self
            .encoder
            .encode_to_sink(&raw, DEFAULT_JPEG_QUALITY, &mut sink);
        state.scratch = raw.into_data();

        match encoded {
            Ok(_) => Some(Frame::new(
                out,
                self.width,
                self.height,
                PixelFormat::Jpeg,
                timestamp,
            )),
            Err(err) => {
                log::error!("SyntheticSource: jpeg pattern failed: {}", err);
                None
            }
        }
    }
}

impl FrameSource for SyntheticSource {
    fn acquire(&self) -> Option<Frame> {
        self.pacer.wait();
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let frame = self.render(&mut state, CaptureTimestamp::now())?;
        self.pool.note_acquired();
        Some(frame)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CameraConfig;

    fn settings(format: PixelFormat) -> SourceSettings {
        SourceSettings {
            url: "stub://test".to_string(),
            width: 32,
            height: 24,
            format,
            target_fps: 0,
        }
    }

    #[test]
    fn raw_frames_match_geometry() {
        for format in [
            PixelFormat::Rgb24,
            PixelFormat::Gray8,
            PixelFormat::Rgb565,
            PixelFormat::Yuyv,
        ] {
            let source = SyntheticSource::new(&settings(format)).unwrap();
            let frame = source.acquire().unwrap();
            assert_eq!(frame.format, format);
            assert_eq!(Some(frame.len()), frame.expected_len());
            source.release(frame);
        }
    }

    #[test]
    fn jpeg_format_produces_jpeg() {
        let source = SyntheticSource::new(&settings(PixelFormat::Jpeg)).unwrap();
        let frame = source.acquire().unwrap();
        assert!(frame.is_jpeg());
        assert_eq!(&frame.data()[..2], &[0xFF, 0xD8]);
        source.release(frame);
    }

    #[test]
    fn pattern_moves_between_frames() {
        let source = SyntheticSource::new(&settings(PixelFormat::Gray8)).unwrap();
        let first = source.acquire().unwrap();
        let second = source.acquire().unwrap();
        assert_ne!(first.data(), second.data());
        source.release(first);
        source.release(second);
    }

    #[test]
    fn released_buffers_are_reused() {
        let source = SyntheticSource::new(&settings(PixelFormat::Rgb24)).unwrap();
        let frame = source.acquire().unwrap();
        let ptr = frame.data().as_ptr();
        source.release(frame);
        let again = source.acquire().unwrap();
        assert_eq!(again.data().as_ptr(), ptr);
        source.release(again);

        let stats = source.stats();
        assert_eq!(stats.frames_acquired, 2);
        assert_eq!(stats.frames_released, 2);
    }

    #[test]
    fn zero_size_is_rejected() {
        let mut bad = CameraConfig::default().source;
        bad.width = 0;
        assert!(SyntheticSource::new(&bad).is_err());
    }
}
