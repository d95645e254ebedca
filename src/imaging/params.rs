//! Parameter types for image operations.
//!
//! These structs describe *what* to do, not *how* to do it. They are the
//! vocabulary shared by the [`ImageProcessor`](super::ImageProcessor) contract
//! and every backend, so a caller can hand the same request to any engine.
//!
//! ## Types
//!
//! - [`Quality`]: Lossy encoding quality, given as `0.0..=1.0` and stored as 1–100.
//! - [`Sharpening`]: Unsharp-mask parameters (sigma + threshold).
//! - [`ResizeParams`]: Target dimensions.
//! - [`CropRect`]: Region to extract.
//! - [`Filter`]: Closed set of named filters; parsed from free-form names.
//! - [`OutputFormat`] / [`SaveOptions`]: Encoding request for `save_image`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quality(pub u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    /// Quality from the `0.0..=1.0` scale used by [`SaveOptions`].
    pub fn from_unit(value: f32) -> Self {
        if !value.is_finite() {
            return Self::default();
        }
        Self::new((value.clamp(0.0, 1.0) * 100.0).round() as u32)
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(90)
    }
}

/// Sharpening parameters for unsharp mask.
///
/// - `sigma`: Standard deviation of the Gaussian blur (higher = more sharpening)
/// - `threshold`: Minimum brightness difference to sharpen (0 = sharpen all pixels)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sharpening {
    pub sigma: f32,
    pub threshold: i32,
}

impl Sharpening {
    /// Light sharpening.
    pub fn light() -> Self {
        Self {
            sigma: 0.5,
            threshold: 0,
        }
    }

    /// Sharpening scaled by a filter intensity around 1.0.
    pub fn from_intensity(intensity: f32) -> Self {
        Self {
            sigma: intensity.max(0.3),
            threshold: 0,
        }
    }
}

/// Target dimensions for a resize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizeParams {
    pub width: u32,
    pub height: u32,
}

/// Rectangle to extract, in source pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Every filter name any backend understands.
///
/// Backends match on this exhaustively; a variant a backend cannot do is a
/// failure result, and a name that parses to no variant is a failure too.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Filter {
    Blur,
    Sharpen,
    Edge,
    Grayscale,
    Sepia,
    Invert,
    Median,
    Bilateral,
    Posterize,
    Normalize,
    Threshold,
    Brightness,
    Contrast,
}

impl Filter {
    pub const ALL: [Filter; 13] = [
        Filter::Blur,
        Filter::Sharpen,
        Filter::Edge,
        Filter::Grayscale,
        Filter::Sepia,
        Filter::Invert,
        Filter::Median,
        Filter::Bilateral,
        Filter::Posterize,
        Filter::Normalize,
        Filter::Threshold,
        Filter::Brightness,
        Filter::Contrast,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Filter::Blur => "blur",
            Filter::Sharpen => "sharpen",
            Filter::Edge => "edge",
            Filter::Grayscale => "grayscale",
            Filter::Sepia => "sepia",
            Filter::Invert => "invert",
            Filter::Median => "median",
            Filter::Bilateral => "bilateral",
            Filter::Posterize => "posterize",
            Filter::Normalize => "normalize",
            Filter::Threshold => "threshold",
            Filter::Brightness => "brightness",
            Filter::Contrast => "contrast",
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Filter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        let filter = match normalized.as_str() {
            "blur" | "gaussian" | "gaussian-blur" => Filter::Blur,
            "sharpen" => Filter::Sharpen,
            "edge" | "edges" | "edge-detect" => Filter::Edge,
            "grayscale" | "greyscale" => Filter::Grayscale,
            "sepia" => Filter::Sepia,
            "invert" | "negate" => Filter::Invert,
            "median" => Filter::Median,
            "bilateral" => Filter::Bilateral,
            "posterize" | "posterise" => Filter::Posterize,
            "normalize" | "normalise" => Filter::Normalize,
            "threshold" => Filter::Threshold,
            "brightness" => Filter::Brightness,
            "contrast" => Filter::Contrast,
            _ => return Err(format!("unknown filter '{}'", s.trim())),
        };
        Ok(filter)
    }
}

/// Encoded output formats accepted by `save_image`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Png,
    Jpeg,
    WebP,
    Avif,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpg",
            OutputFormat::WebP => "webp",
            OutputFormat::Avif => "avif",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpeg",
            OutputFormat::WebP => "webp",
            OutputFormat::Avif => "avif",
        };
        f.write_str(name)
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(OutputFormat::Png),
            "jpg" | "jpeg" => Ok(OutputFormat::Jpeg),
            "webp" => Ok(OutputFormat::WebP),
            "avif" => Ok(OutputFormat::Avif),
            other => Err(format!("unsupported output format '{other}'")),
        }
    }
}

/// Options for `save_image`. `quality` is on the `0.0..=1.0` scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SaveOptions {
    pub format: OutputFormat,
    pub quality: f32,
}

impl SaveOptions {
    pub fn new(format: OutputFormat, quality: f32) -> Self {
        Self { format, quality }
    }

    pub fn encoder_quality(&self) -> Quality {
        Quality::from_unit(self.quality)
    }
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            format: OutputFormat::Png,
            quality: 0.9,
        }
    }
}
