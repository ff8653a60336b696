use std::borrow::Cow;

use image::ExtendedColorType;

use crate::error::EncodeError;
use crate::frame::{Frame, PixelFormat};

/// Convert a raw frame into a layout the JPEG codec accepts.
///
/// RGB24 and GRAY8 pass through without copying; RGB565 and YUYV are expanded
/// to RGB24.
pub(crate) fn encoder_input(frame: &Frame) -> Result<(Cow<'_, [u8]>, ExtendedColorType), EncodeError> {
    let expected = frame
        .expected_len()
        .ok_or(EncodeError::UnsupportedFormat(frame.format))?;
    if frame.len() != expected {
        return Err(EncodeError::Geometry {
            expected,
            actual: frame.len(),
        });
    }

    let pixels = frame.data();
    match frame.format {
        PixelFormat::Rgb24 => Ok((Cow::Borrowed(pixels), ExtendedColorType::Rgb8)),
        PixelFormat::Gray8 => Ok((Cow::Borrowed(pixels), ExtendedColorType::L8)),
        PixelFormat::Rgb565 => Ok((Cow::Owned(rgb565_to_rgb(pixels)), ExtendedColorType::Rgb8)),
        PixelFormat::Yuyv => Ok((Cow::Owned(yuyv_to_rgb(pixels)), ExtendedColorType::Rgb8)),
        PixelFormat::Jpeg => Err(EncodeError::UnsupportedFormat(PixelFormat::Jpeg)),
    }
}

fn rgb565_to_rgb(pixels: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(pixels.len() / 2 * 3);
    for px in pixels.chunks_exact(2) {
        let value = u16::from_be_bytes([px[0], px[1]]);
        let r = ((value >> 11) & 0x1F) as u8;
        let g = ((value >> 5) & 0x3F) as u8;
        let b = (value & 0x1F) as u8;
        rgb.push((r << 3) | (r >> 2));
        rgb.push((g << 2) | (g >> 4));
        rgb.push((b << 3) | (b >> 2));
    }
    rgb
}

fn yuyv_to_rgb(pixels: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(pixels.len() / 2 * 3);
    let mut pairs = pixels.chunks_exact(4);
    for quad in &mut pairs {
        let u = quad[1] as f32 - 128.0;
        let v = quad[3] as f32 - 128.0;
        push_yuv(&mut rgb, quad[0] as f32, u, v);
        push_yuv(&mut rgb, quad[2] as f32, u, v);
    }
    // odd pixel count: trailing Y U with no V
    if let [y, u] = pairs.remainder() {
        push_yuv(&mut rgb, *y as f32, *u as f32 - 128.0, 0.0);
    }
    rgb
}

fn push_yuv(rgb: &mut Vec<u8>, y: f32, u: f32, v: f32) {
    let r = y + 1.402_f32 * v;
    let g = y - 0.344_136_f32 * u - 0.714_136_f32 * v;
    let b = y + 1.772_f32 * u;
    rgb.push(clamp_to_u8(r));
    rgb.push(clamp_to_u8(g));
    rgb.push(clamp_to_u8(b));
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
