//! Raw buffer to RGB conversion.

use image::{ImageFormat, Rgb, RgbImage};

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("buffer too short for {width}x{height}: expected {expected} bytes, got {actual}")]
    InvalidLength {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("MJPEG decode failed: {0}")]
    Decode(#[from] image::ImageError),
}

fn check_len(buf: &[u8], width: u32, height: u32, bytes_per_pixel: usize) -> Result<(), FrameError> {
    let expected = width as usize * height as usize * bytes_per_pixel;
    if buf.len() < expected {
        return Err(FrameError::InvalidLength {
            width,
            height,
            expected,
            actual: buf.len(),
        });
    }
    Ok(())
}

/// BT.601 limited-range YCbCr to RGB.
fn ycbcr_to_rgb(y: u8, cb: u8, cr: u8) -> Rgb<u8> {
    let c = (y as f32 - 16.0) * 1.164;
    let d = cb as f32 - 128.0;
    let e = cr as f32 - 128.0;
    let clamp = |v: f32| v.round().clamp(0.0, 255.0) as u8;
    Rgb([
        clamp(c + 1.596 * e),
        clamp(c - 0.392 * d - 0.813 * e),
        clamp(c + 2.017 * d),
    ])
}

/// Convert packed YUYV 4:2:2 to RGB.
///
/// Every 4 bytes `[Y0, U, Y1, V]` describe two horizontally adjacent
/// pixels sharing one chroma sample.
pub fn yuyv_to_rgb(buf: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    check_len(buf, width, height, 2)?;
    Ok(RgbImage::from_fn(width, height, |x, y| {
        let pair = (y as usize * width as usize + (x as usize & !1)) * 2;
        let luma = if x % 2 == 0 { buf[pair] } else { buf[pair + 2] };
        ycbcr_to_rgb(luma, buf[pair + 1], buf[pair + 3])
    }))
}

/// Replicate 8-bit grayscale into three channels.
pub fn grey_to_rgb(buf: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    check_len(buf, width, height, 1)?;
    Ok(RgbImage::from_fn(width, height, |x, y| {
        let v = buf[y as usize * width as usize + x as usize];
        Rgb([v, v, v])
    }))
}

/// Decode one Motion-JPEG frame.
pub fn mjpeg_to_rgb(buf: &[u8]) -> Result<RgbImage, FrameError> {
    Ok(image::load_from_memory_with_format(buf, ImageFormat::Jpeg)?.to_rgb8())
}
