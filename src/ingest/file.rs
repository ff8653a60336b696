//! Local JPEG frame source.
//!
//! Reads one `.jpg`/`.jpeg` file, or every such file in a directory (sorted by
//! name), once at open. Frames are served in a loop and timestamped at
//! acquire time.

use anyhow::{anyhow, Context, Result};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use image::codecs::jpeg::JpegDecoder;
use image::ImageDecoder;

use super::Pacer;
use crate::config::SourceSettings;
use crate::frame::{CaptureTimestamp, Frame, FramePool, FrameSource, PixelFormat, SourceStats};

struct StillImage {
    path: PathBuf,
    jpeg: Vec<u8>,
    width: u32,
    height: u32,
}

pub struct FileSource {
    name: String,
    images: Vec<StillImage>,
    cursor: AtomicUsize,
    pacer: Pacer,
    pool: FramePool,
}

impl FileSource {
    pub fn new(settings: &SourceSettings) -> Result<Self> {
        let root = Path::new(settings.url.trim());
        let paths = jpeg_paths(root)?;
        let images = paths
            .into_iter()
            .map(load_image)
            .collect::<Result<Vec<_>>>()?;
        if images.is_empty() {
            return Err(anyhow!("no .jpg/.jpeg files in {}", root.display()));
        }
        log::info!(
            "FileSource: {} image(s) from {}",
            images.len(),
            root.display()
        );
        Ok(Self {
            name: settings.url.clone(),
            images,
            cursor: AtomicUsize::new(0),
            pacer: Pacer::new(settings.target_fps),
            pool: FramePool::default(),
        })
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

impl FrameSource for FileSource {
    fn acquire(&self) -> Option<Frame> {
        self.pacer.wait();
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.images.len();
        let image = &self.images[index];
        log::trace!("FileSource: serving {}", image.path.display());

        let mut buf = self.pool.take(image.jpeg.len());
        buf.extend_from_slice(&image.jpeg);
        self.pool.note_acquired();
        Some(Frame::new(
            buf,
            image.width,
            image.height,
            PixelFormat::Jpeg,
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

fn is_jpeg_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"))
}

fn jpeg_paths(root: &Path) -> Result<Vec<PathBuf>> {
    let meta = std::fs::metadata(root)
        .with_context(|| format!("open frame source {}", root.display()))?;
    if meta.is_file() {
        return Ok(vec![root.to_path_buf()]);
    }
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(root).with_context(|| format!("list {}", root.display()))? {
        let path = entry?.path();
        if path.is_file() && is_jpeg_path(&path) {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

fn load_image(path: PathBuf) -> Result<StillImage> {
    let jpeg = std::fs::read(&path).with_context(|| format!("read {}", path.display()))?;
    let (width, height) = JpegDecoder::new(Cursor::new(jpeg.as_slice()))
        .with_context(|| format!("{} is not a readable JPEG", path.display()))?
        .dimensions();
    Ok(StillImage {
        path,
        jpeg,
        width,
        height,
    })
}
