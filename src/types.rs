//! Pixel data shared by every backend.
//!
//! [`PixelBuffer`] is the only representation that crosses the
//! [`ImageProcessor`](crate::imaging::ImageProcessor) boundary. Backends convert
//! it into their own native representation on entry and back on exit; they
//! never hold on to one after the call returns.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    #[error("unsupported channel count {0} (expected 3 or 4)")]
    Channels(u8),
    #[error("channel count {channels} does not match format {format}")]
    FormatMismatch { channels: u8, format: PixelFormat },
    #[error("buffer length {actual} does not match {width}x{height}x{channels} = {expected}")]
    Length {
        width: u32,
        height: u32,
        channels: u8,
        expected: usize,
        actual: usize,
    },
    #[error("empty image ({width}x{height})")]
    Empty { width: u32, height: u32 },
}

/// Channel layout tag carried next to the raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Rgb,
    Rgba,
}

impl PixelFormat {
    pub fn channels(self) -> u8 {
        match self {
            PixelFormat::Rgb => 3,
            PixelFormat::Rgba => 4,
        }
    }

    pub fn from_channels(channels: u8) -> Result<Self, BufferError> {
        match channels {
            3 => Ok(PixelFormat::Rgb),
            4 => Ok(PixelFormat::Rgba),
            other => Err(BufferError::Channels(other)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PixelFormat::Rgb => "rgb",
            PixelFormat::Rgba => "rgba",
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PixelFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rgb" => Ok(PixelFormat::Rgb),
            "rgba" => Ok(PixelFormat::Rgba),
            other => Err(format!("unknown pixel format '{other}'")),
        }
    }
}

/// Width and height in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Raw interleaved 8-bit pixels.
///
/// Invariant: `data.len() == width * height * channels`. The fields are plain
/// data so callers can build buffers however they like; [`PixelBuffer::new`]
/// checks the invariant up front and every operation re-checks it with
/// [`PixelBuffer::validate`] before touching the bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub format: PixelFormat,
}

impl PixelBuffer {
    pub fn new(data: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Result<Self, BufferError> {
        let buffer = Self {
            data,
            width,
            height,
            channels: format.channels(),
            format,
        };
        buffer.validate()?;
        Ok(buffer)
    }

    /// A buffer filled with one pixel value. `pixel` must hold 3 or 4 bytes.
    pub fn filled(width: u32, height: u32, pixel: &[u8]) -> Result<Self, BufferError> {
        let channels = u8::try_from(pixel.len()).map_err(|_| BufferError::Channels(u8::MAX))?;
        let format = PixelFormat::from_channels(channels)?;
        let count = width as usize * height as usize;
        let data = pixel.repeat(count);
        Self::new(data, width, height, format)
    }

    pub fn expected_len(width: u32, height: u32, channels: u8) -> usize {
        width as usize * height as usize * channels as usize
    }

    pub fn validate(&self) -> Result<(), BufferError> {
        if self.width == 0 || self.height == 0 {
            return Err(BufferError::Empty {
                width: self.width,
                height: self.height,
            });
        }
        if self.channels != 3 && self.channels != 4 {
            return Err(BufferError::Channels(self.channels));
        }
        if self.format.channels() != self.channels {
            return Err(BufferError::FormatMismatch {
                channels: self.channels,
                format: self.format,
            });
        }
        let expected = Self::expected_len(self.width, self.height, self.channels);
        if self.data.len() != expected {
            return Err(BufferError::Length {
                width: self.width,
                height: self.height,
                channels: self.channels,
                expected,
                actual: self.data.len(),
            });
        }
        Ok(())
    }

    pub fn dimensions(&self) -> Dimensions {
        Dimensions {
            width: self.width,
            height: self.height,
        }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn has_alpha(&self) -> bool {
        self.channels == 4
    }

    /// Pixels expanded to RGBA (alpha 255 for RGB input).
    pub fn to_rgba(&self) -> Vec<u8> {
        match self.format {
            PixelFormat::Rgba => self.data.clone(),
            PixelFormat::Rgb => {
                let mut out = Vec::with_capacity(self.pixel_count() * 4);
                for px in self.data.chunks_exact(3) {
                    out.extend_from_slice(&[px[0], px[1], px[2], 255]);
                }
                out
            }
        }
    }

    /// Build a buffer with `channels` channels out of tightly packed RGBA.
    pub fn from_rgba(rgba: &[u8], width: u32, height: u32, channels: u8) -> Result<Self, BufferError> {
        let format = PixelFormat::from_channels(channels)?;
        let data = match format {
            PixelFormat::Rgba => rgba.to_vec(),
            PixelFormat::Rgb => rgba
                .chunks_exact(4)
                .flat_map(|px| [px[0], px[1], px[2]])
                .collect(),
        };
        Self::new(data, width, height, format)
    }
}

/// Where `load_image` reads encoded bytes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Path(PathBuf),
    Url(String),
    Bytes(Vec<u8>),
}

impl From<PathBuf> for ImageSource {
    fn from(path: PathBuf) -> Self {
        ImageSource::Path(path)
    }
}

impl From<Vec<u8>> for ImageSource {
    fn from(bytes: Vec<u8>) -> Self {
        ImageSource::Bytes(bytes)
    }
}
