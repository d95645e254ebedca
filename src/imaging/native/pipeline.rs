//! Chained operation pipeline over one working image.
//!
//! A [`Pipeline`] owns a single decoded working image, registered with the
//! ledger for as long as the chain lives. Each step consumes the pipeline and
//! returns it, so a chain reads like the operation it performs:
//!
//! ```text
//! Pipeline::new(ledger, &buffer)?.resize(320, 200)?.sharpen(light)?.to_raw()
//! ```
//!
//! Per-pixel steps run over rows in parallel with `rayon`; the call only
//! returns once every row is done.

use crate::imaging::backend::OpError;
use crate::imaging::calculations::{
    LUMA_B, LUMA_G, LUMA_R, RotationMap, clamp_u8, fit_radius, fit_sigma, validate_crop, validate_resize,
};
use crate::imaging::params::{CropRect, Sharpening};
use crate::imaging::resources::{Handle, HandleLedger};
use crate::imaging::sampling;
use crate::types::{PixelBuffer, PixelFormat};
use fast_image_resize as fir;
use fir::{FilterType, PixelType, ResizeAlg, ResizeOptions};
use image::{DynamicImage, RgbImage, RgbaImage};
use rayon::prelude::*;

/// Colour matrix applied by [`Pipeline::recomb`], rows are output channels.
pub type Recomb = [[f32; 3]; 3];

pub const SEPIA: Recomb = [
    [0.393, 0.769, 0.189],
    [0.349, 0.686, 0.168],
    [0.272, 0.534, 0.131],
];

/// Histogram levels per channel for the dominant colour.
const HISTOGRAM_LEVELS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelStats {
    pub min: u8,
    pub max: u8,
    pub mean: f64,
    pub stdev: f64,
}

/// Whole-image statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageStats {
    /// Red, green, blue.
    pub channels: [ChannelStats; 3],
    /// Standard deviation of the luminance Laplacian.
    pub laplacian_stdev: f64,
    /// Most populated histogram cell, as its level-centre colour.
    pub dominant: [u8; 3],
    /// Share of pixels in that cell, `0.0..=1.0`.
    pub dominant_share: f64,
}

fn wrap(data: Vec<u8>, width: u32, height: u32, channels: usize) -> Result<DynamicImage, OpError> {
    let image = match channels {
        4 => RgbaImage::from_raw(width, height, data).map(DynamicImage::ImageRgba8),
        _ => RgbImage::from_raw(width, height, data).map(DynamicImage::ImageRgb8),
    };
    image.ok_or_else(|| OpError::Engine(format!("{width}x{height} buffer does not fit the working image")))
}

fn channel_count(image: &DynamicImage) -> usize {
    if image.color().has_alpha() { 4 } else { 3 }
}

fn gray(px: &[u8]) -> f32 {
    LUMA_R * px[0] as f32 + LUMA_G * px[1] as f32 + LUMA_B * px[2] as f32
}

pub struct Pipeline<'l> {
    ledger: &'l HandleLedger,
    image: Handle<'l, DynamicImage>,
}

impl<'l> Pipeline<'l> {
    /// Copy `buffer` into a tracked working image.
    pub fn new(ledger: &'l HandleLedger, buffer: &PixelBuffer) -> Result<Self, OpError> {
        buffer.validate()?;
        let image = wrap(buffer.data.clone(), buffer.width, buffer.height, buffer.channels as usize)?;
        Ok(Self {
            ledger,
            image: ledger.acquire("image", image)?,
        })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Final buffer, with the same channel count the pipeline started with.
    pub fn to_raw(&self) -> Result<PixelBuffer, OpError> {
        let format = PixelFormat::from_channels(channel_count(&self.image) as u8)?;
        Ok(PixelBuffer::new(
            self.image.as_bytes().to_vec(),
            self.width(),
            self.height(),
            format,
        )?)
    }

    fn samples_mut(&mut self) -> Result<(&mut [u8], usize), OpError> {
        match &mut *self.image {
            DynamicImage::ImageRgb8(img) => Ok((&mut **img, 3)),
            DynamicImage::ImageRgba8(img) => Ok((&mut **img, 4)),
            other => Err(OpError::Engine(format!(
                "unexpected working colour type {:?}",
                other.color()
            ))),
        }
    }

    /// Run `f` over every pixel in parallel.
    fn each_pixel(mut self, f: impl Fn(&mut [u8]) + Send + Sync) -> Result<Self, OpError> {
        let (data, channels) = self.samples_mut()?;
        data.par_chunks_mut(channels).for_each(|px| f(px));
        Ok(self)
    }

    /// Lanczos3 resample through a tracked resizer.
    pub fn resize(mut self, width: u32, height: u32) -> Result<Self, OpError> {
        validate_resize(width, height).map_err(OpError::InvalidArgument)?;
        let mut resizer = self.ledger.acquire("resampler", fir::Resizer::new())?;
        let channels = channel_count(&self.image);
        let pixel_type = if channels == 4 { PixelType::U8x4 } else { PixelType::U8x3 };

        let src = fir::images::Image::from_vec_u8(
            self.width(),
            self.height(),
            self.image.as_bytes().to_vec(),
            pixel_type,
        )
        .map_err(|e| OpError::Engine(format!("resampler rejected source: {e}")))?;
        let mut dst = fir::images::Image::new(width, height, pixel_type);
        let options = ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Lanczos3));
        resizer
            .resize(&src, &mut dst, &options)
            .map_err(|e| OpError::Engine(format!("resample failed: {e}")))?;

        *self.image = wrap(dst.into_vec(), width, height, channels)?;
        Ok(self)
    }

    pub fn extract(mut self, rect: &CropRect) -> Result<Self, OpError> {
        validate_crop(self.width(), self.height(), rect).map_err(OpError::InvalidArgument)?;
        let cropped = self.image.crop_imm(rect.x, rect.y, rect.width, rect.height);
        *self.image = cropped;
        Ok(self)
    }

    /// Clockwise rotation. Right angles are lossless transposes; anything
    /// else lands on the enlarged canvas with a transparent (or black) border.
    pub fn rotate(mut self, degrees: f64) -> Result<Self, OpError> {
        if !degrees.is_finite() {
            return Err(OpError::InvalidArgument(format!("invalid rotation angle {degrees}")));
        }
        let map = RotationMap::new(self.width(), self.height(), degrees);
        let rotated = match map.quarter_turns() {
            Some(0) => return Ok(self),
            Some(1) => self.image.rotate90(),
            Some(2) => self.image.rotate180(),
            Some(3) => self.image.rotate270(),
            _ => {
                let channels = channel_count(&self.image);
                let data = sampling::rotate_bilinear(
                    self.image.as_bytes(),
                    self.width(),
                    self.height(),
                    channels,
                    &map,
                );
                wrap(data, map.dst_width, map.dst_height, channels)?
            }
        };
        *self.image = rotated;
        Ok(self)
    }

    /// Gaussian blur with standard deviation `sigma`.
    pub fn blur(mut self, sigma: f32) -> Result<Self, OpError> {
        if !(sigma.is_finite() && sigma > 0.0) {
            return Err(OpError::InvalidArgument(format!("invalid blur sigma {sigma}")));
        }
        let blurred = self.image.blur(fit_sigma(sigma, self.width(), self.height()));
        *self.image = blurred;
        Ok(self)
    }

    /// Unsharp mask.
    pub fn sharpen(mut self, sharpening: Sharpening) -> Result<Self, OpError> {
        let sigma = fit_sigma(sharpening.sigma, self.width(), self.height());
        let sharpened = self.image.unsharpen(sigma, sharpening.threshold);
        *self.image = sharpened;
        Ok(self)
    }

    /// Multiply colour channels by `brightness`.
    pub fn modulate(self, brightness: f32) -> Result<Self, OpError> {
        self.each_pixel(|px| {
            for c in px.iter_mut().take(3) {
                *c = clamp_u8(*c as f32 * brightness);
            }
        })
    }

    /// `a·c + b` on colour channels.
    pub fn linear(self, a: f32, b: f32) -> Result<Self, OpError> {
        self.each_pixel(|px| {
            for c in px.iter_mut().take(3) {
                *c = clamp_u8(*c as f32 * a + b);
            }
        })
    }

    pub fn recomb(self, matrix: Recomb) -> Result<Self, OpError> {
        self.each_pixel(|px| {
            let rgb = [px[0] as f32, px[1] as f32, px[2] as f32];
            for (out, row) in px.iter_mut().zip(&matrix) {
                *out = clamp_u8(row[0] * rgb[0] + row[1] * rgb[1] + row[2] * rgb[2]);
            }
        })
    }

    pub fn negate(self) -> Result<Self, OpError> {
        self.each_pixel(|px| {
            for c in px.iter_mut().take(3) {
                *c = 255 - *c;
            }
        })
    }

    /// BT.601 luminance spread over the colour channels.
    pub fn grayscale(self) -> Result<Self, OpError> {
        self.each_pixel(|px| {
            let y = clamp_u8(gray(px));
            px[..3].fill(y);
        })
    }

    /// `>= level` becomes white, the rest black, judged on luminance.
    pub fn threshold(self, level: u8) -> Result<Self, OpError> {
        self.each_pixel(|px| {
            let v = if gray(px) >= level as f32 { 255 } else { 0 };
            px[..3].fill(v);
        })
    }

    /// Stretch luminance to cover the full range.
    pub fn normalise(mut self) -> Result<Self, OpError> {
        let (data, channels) = self.samples_mut()?;
        let (lo, hi) = data
            .par_chunks(channels)
            .map(|px| {
                let y = gray(px);
                (y, y)
            })
            .reduce(|| (f32::MAX, f32::MIN), |a, b| (a.0.min(b.0), a.1.max(b.1)));
        if hi - lo < 1.0 {
            return Ok(self);
        }
        let scale = 255.0 / (hi - lo);
        self.linear(scale, -lo * scale)
    }

    /// Median of a `(2r+1)²` window per colour channel, clamped edges.
    pub fn median(mut self, radius: u32) -> Result<Self, OpError> {
        let r = fit_radius(radius, self.width(), self.height()) as i64;
        let (w, h) = (self.width() as i64, self.height() as i64);
        let (data, channels) = self.samples_mut()?;
        let src = data.to_vec();
        let row_len = w as usize * channels;
        data.par_chunks_mut(row_len).enumerate().for_each(|(y, row)| {
            let side = 2 * r as usize + 1;
            let mut window = Vec::with_capacity(side.saturating_mul(side));
            for x in 0..w {
                for c in 0..3 {
                    window.clear();
                    for dy in -r..=r {
                        let sy = (y as i64 + dy).clamp(0, h - 1);
                        for dx in -r..=r {
                            let sx = (x + dx).clamp(0, w - 1);
                            window.push(src[(sy * w + sx) as usize * channels + c]);
                        }
                    }
                    let mid = window.len() / 2;
                    let (_, median, _) = window.select_nth_unstable(mid);
                    row[x as usize * channels + c] = *median;
                }
            }
        });
        Ok(self)
    }

    /// Per-channel min/max/mean/stdev, Laplacian spread and the dominant
    /// histogram cell.
    pub fn stats(&self) -> ImageStats {
        let channels = channel_count(&self.image);
        let data = self.image.as_bytes();
        let n = (data.len() / channels).max(1) as f64;

        let mut stats = [ChannelStats { min: 255, max: 0, mean: 0.0, stdev: 0.0 }; 3];
        let mut sums = [0.0f64; 3];
        let mut squares = [0.0f64; 3];
        let mut histogram = vec![0usize; HISTOGRAM_LEVELS.pow(3)];
        let shift = 8 - HISTOGRAM_LEVELS.trailing_zeros();
        for px in data.chunks_exact(channels) {
            for c in 0..3 {
                let v = px[c];
                stats[c].min = stats[c].min.min(v);
                stats[c].max = stats[c].max.max(v);
                sums[c] += v as f64;
                squares[c] += (v as f64) * (v as f64);
            }
            let cell = |c: usize| (px[c] >> shift) as usize;
            histogram[(cell(0) * HISTOGRAM_LEVELS + cell(1)) * HISTOGRAM_LEVELS + cell(2)] += 1;
        }
        for c in 0..3 {
            stats[c].mean = sums[c] / n;
            stats[c].stdev = (squares[c] / n - stats[c].mean.powi(2)).max(0.0).sqrt();
        }

        let (cell, count) = histogram
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(&a.0)))
            .map(|(i, &count)| (i, count))
            .unwrap_or((0, 0));
        let step = 255 / (HISTOGRAM_LEVELS - 1);
        let level = |i: usize| (i * step) as u8;
        let dominant = [
            level(cell / (HISTOGRAM_LEVELS * HISTOGRAM_LEVELS)),
            level(cell / HISTOGRAM_LEVELS % HISTOGRAM_LEVELS),
            level(cell % HISTOGRAM_LEVELS),
        ];

        ImageStats {
            channels: stats,
            laplacian_stdev: self.laplacian_stdev(data, channels),
            dominant,
            dominant_share: count as f64 / n,
        }
    }

    fn laplacian_stdev(&self, data: &[u8], channels: usize) -> f64 {
        let (w, h) = (self.width() as i64, self.height() as i64);
        let luma: Vec<f32> = data.chunks_exact(channels).map(gray).collect();
        let at = |x: i64, y: i64| luma[(y.clamp(0, h - 1) * w + x.clamp(0, w - 1)) as usize] as f64;
        let values: Vec<f64> = (0..h)
            .into_par_iter()
            .flat_map_iter(|y| {
                (0..w).map(move |x| at(x - 1, y) + at(x + 1, y) + at(x, y - 1) + at(x, y + 1) - 4.0 * at(x, y))
            })
            .collect();
        let n = values.len().max(1) as f64;
        let mean = values.iter().sum::<f64>() / n;
        (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt()
    }
}
