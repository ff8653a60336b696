//! V4L2 frame source.
//!
//! Opens a local device node (e.g. /dev/video0) and asks for MJPG first, so
//! frames can be served without recompression. Devices that refuse MJPG are
//! captured as YUYV and tagged raw.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;
use std::sync::Mutex;

use crate::config::SourceSettings;
use crate::frame::{CaptureTimestamp, Frame, FramePool, FrameSource, PixelFormat, SourceStats};

const MMAP_BUFFERS: u32 = 4;

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

pub struct V4l2Source {
    name: String,
    width: u32,
    height: u32,
    format: PixelFormat,
    state: Mutex<DeviceState>,
    pool: FramePool,
}

impl V4l2Source {
    pub fn new(settings: &SourceSettings) -> Result<Self> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let path = settings.url.trim();
        let mut device =
            v4l::Device::with_path(path).with_context(|| format!("open v4l2 device {}", path))?;
        let mut requested = device.format().context("read v4l2 format")?;
        requested.width = settings.width;
        requested.height = settings.height;
        requested.fourcc = v4l::FourCC::new(b"MJPG");

        let mut active = device.set_format(&requested);
        if active
            .as_ref()
            .map_or(true, |format| format.fourcc != requested.fourcc)
        {
            log::warn!("V4l2Source: {} refused MJPG, trying YUYV", path);
            requested.fourcc = v4l::FourCC::new(b"YUYV");
            active = device.set_format(&requested);
        }
        let active = active.with_context(|| format!("set v4l2 format on {}", path))?;
        let format = match &active.fourcc.repr {
            b"MJPG" => PixelFormat::Jpeg,
            b"YUYV" => PixelFormat::Yuyv,
            other => {
                return Err(anyhow!(
                    "{} negotiated unsupported pixel format {}",
                    path,
                    String::from_utf8_lossy(other)
                ))
            }
        };

        if settings.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(settings.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("V4l2Source: failed to set fps on {}: {}", path, err);
            }
        }

        let state = DeviceStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, MMAP_BUFFERS)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;

        log::info!(
            "V4l2Source: connected to {} ({}x{} {})",
            path,
            active.width,
            active.height,
            format.name()
        );
        Ok(Self {
            name: path.to_string(),
            width: active.width,
            height: active.height,
            format,
            state: Mutex::new(state),
            pool: FramePool::default(),
        })
    }
}

impl FrameSource for V4l2Source {
    fn acquire(&self) -> Option<Frame> {
        use v4l::io::traits::CaptureStream;

        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let captured = state.with_mut(|fields| {
            fields.stream.next().map(|(buf, _meta)| {
                let mut data = self.pool.take(buf.len());
                data.extend_from_slice(buf);
                data
            })
        });
        let data = match captured {
            Ok(data) => data,
            Err(err) => {
                log::error!("V4l2Source: capture on {} failed: {}", self.name, err);
                return None;
            }
        };
        self.pool.note_acquired();
        Some(Frame::new(
            data,
            self.width,
            self.height,
            self.format,
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
