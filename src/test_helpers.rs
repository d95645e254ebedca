//! Shared test fixtures for the unit tests.
//!
//! Small synthetic buffers with known contents, plus helpers to turn them
//! into encoded bytes and to check that a backend released everything it
//! acquired.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let buf = gradient(8, 6, 4);
//! let png = encode_png(&buf);
//! let red = solid(10, 10, [255, 0, 0]);
//! ```

use crate::imaging::resources::HandleLedger;
use crate::imaging::{BackendError, ImageProcessor, ProcessingResult};
use crate::types::{PixelBuffer, PixelFormat};
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};

// =========================================================================
// Buffers
// =========================================================================

/// Horizontal red ramp, vertical green ramp, constant blue. With 4 channels
/// the alpha is opaque except for the top-left pixel.
pub fn gradient(width: u32, height: u32, channels: u8) -> PixelBuffer {
    let format = PixelFormat::from_channels(channels).unwrap();
    let mut data = Vec::with_capacity(PixelBuffer::expected_len(width, height, channels));
    for y in 0..height {
        for x in 0..width {
            let r = (x * 255 / width.max(2).saturating_sub(1)).min(255) as u8;
            let g = (y * 255 / height.max(2).saturating_sub(1)).min(255) as u8;
            data.extend_from_slice(&[r, g, 96]);
            if channels == 4 {
                data.push(if x == 0 && y == 0 { 128 } else { 255 });
            }
        }
    }
    PixelBuffer::new(data, width, height, format).unwrap()
}

/// Opaque RGB buffer of one colour.
pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> PixelBuffer {
    PixelBuffer::filled(width, height, &rgb).unwrap()
}

/// RGBA buffer of one colour and alpha.
pub fn solid_rgba(width: u32, height: u32, rgba: [u8; 4]) -> PixelBuffer {
    PixelBuffer::filled(width, height, &rgba).unwrap()
}

/// A buffer whose `data` no longer matches its declared size.
pub fn corrupted(width: u32, height: u32) -> PixelBuffer {
    let mut buf = solid(width, height, [10, 20, 30]);
    buf.data.truncate(buf.data.len() / 2);
    buf
}

// =========================================================================
// Encoding
// =========================================================================

pub fn encode_png(buffer: &PixelBuffer) -> Vec<u8> {
    let color = match buffer.format {
        PixelFormat::Rgb => ExtendedColorType::Rgb8,
        PixelFormat::Rgba => ExtendedColorType::Rgba8,
    };
    let mut out = Vec::new();
    PngEncoder::new(&mut out)
        .write_image(&buffer.data, buffer.width, buffer.height, color)
        .unwrap();
    out
}

// =========================================================================
// Assertions: panic with a clear message on failure
// =========================================================================

/// Unwrap a successful result, showing the failure message otherwise.
#[track_caller]
pub fn expect_data<T: std::fmt::Debug>(result: ProcessingResult<T>) -> T {
    match result.outcome {
        Ok(data) => data,
        Err(msg) => panic!("{} operation failed: {msg}", result.library),
    }
}

/// Unwrap a failure message, panicking on success.
#[track_caller]
pub fn expect_failure<T: std::fmt::Debug>(result: ProcessingResult<T>) -> String {
    match result.outcome {
        Ok(data) => panic!("{} operation unexpectedly succeeded: {data:?}", result.library),
        Err(msg) => msg,
    }
}

#[track_caller]
pub fn assert_balanced(ledger: &HandleLedger) {
    let snap = ledger.snapshot();
    assert_eq!(
        snap.acquired, snap.released,
        "native handles leaked: {snap:?}"
    );
}

/// Encode `buffer` with `backend` and decode it straight back.
pub fn save_and_reload(
    backend: &dyn ImageProcessor,
    buffer: &PixelBuffer,
    options: &crate::imaging::SaveOptions,
) -> Result<PixelBuffer, BackendError> {
    let bytes = backend.save_image(buffer, options)?;
    backend.load_image(&bytes.into())
}
