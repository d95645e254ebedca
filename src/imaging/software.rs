//! Pure-software backend: direct loops over a copy of the pixels.
//!
//! The engine's only native object is a [`Bitmap`], a private copy of the
//! caller's buffer registered with the ledger. Every operation mutates that
//! copy in place and hands a new [`PixelBuffer`] back, so the caller's input
//! is never touched.
//!
//! | Operation | Implementation |
//! |---|---|
//! | Resize | bilinear, clamped edges |
//! | Rotate | nearest neighbour onto the enlarged canvas |
//! | Blur | separable box filter |
//! | Sharpen | 3×3 kernel `[0,-1,0,-1,5,-1,0,-1,0]` |
//! | Grayscale / sepia / invert / posterize | per-pixel maps |
//! | Analyze | shared 32-wide bucket scan |

use super::analysis;
use super::backend::{
    AnalysisResult, BackendError, Capabilities, ImageMetadata, ImageProcessor, Library, OpError,
    ProcessingResult, run_op,
};
use super::calculations::{
    RotationMap, adjustment_from_intensity, clamp_adjustment, clamp_u8, posterize_levels,
    fit_radius, validate_crop, validate_resize, window_radius,
};
use super::codec::{self, SourceFormat};
use super::params::{CropRect, Filter, OutputFormat, ResizeParams, SaveOptions};
use super::resources::HandleLedger;
use super::sampling;
use crate::types::{ImageSource, PixelBuffer, PixelFormat};
use std::sync::Arc;

const LIBRARY: Library = Library::Software;
const INPUTS: &[SourceFormat] = &[SourceFormat::Jpeg, SourceFormat::Png, SourceFormat::Tiff];
const OUTPUTS: &[OutputFormat] = &[OutputFormat::Png, OutputFormat::Jpeg];

const SHARPEN_KERNEL: [f32; 9] = [0.0, -1.0, 0.0, -1.0, 5.0, -1.0, 0.0, -1.0, 0.0];

/// Private pixel copy the loops run over.
#[derive(Debug)]
struct Bitmap {
    data: Vec<u8>,
    width: u32,
    height: u32,
    channels: usize,
}

impl Bitmap {
    fn from_buffer(buffer: &PixelBuffer) -> Self {
        Self {
            data: buffer.data.clone(),
            width: buffer.width,
            height: buffer.height,
            channels: buffer.channels as usize,
        }
    }

    fn to_buffer(&self) -> Result<PixelBuffer, OpError> {
        let format = PixelFormat::from_channels(self.channels as u8)?;
        Ok(PixelBuffer::new(self.data.clone(), self.width, self.height, format)?)
    }

    /// Apply `f` to the colour channels of every pixel; alpha is left alone.
    fn map_rgb(&mut self, f: impl Fn([u8; 3]) -> [u8; 3]) {
        for px in self.data.chunks_exact_mut(self.channels) {
            let [r, g, b] = f([px[0], px[1], px[2]]);
            px[0] = r;
            px[1] = g;
            px[2] = b;
        }
    }

    fn map_channels(&mut self, f: impl Fn(u8) -> u8) {
        self.map_rgb(|[r, g, b]| [f(r), f(g), f(b)]);
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.data = sampling::resize_bilinear(&self.data, self.width, self.height, self.channels, width, height);
        self.width = width;
        self.height = height;
    }

    fn crop(&mut self, rect: &CropRect) {
        self.data = sampling::extract(&self.data, self.width, self.channels, rect.x, rect.y, rect.width, rect.height);
        self.width = rect.width;
        self.height = rect.height;
    }

    fn rotate(&mut self, map: &RotationMap) {
        let mut out = vec![0u8; map.dst_width as usize * map.dst_height as usize * self.channels];
        for (y, row) in out.chunks_exact_mut(map.dst_width as usize * self.channels).enumerate() {
            for (x, px) in row.chunks_exact_mut(self.channels).enumerate() {
                let (sx, sy) = map.source_of(x as u32, y as u32);
                sampling::nearest(&self.data, self.width, self.height, self.channels, sx, sy, px);
            }
        }
        self.data = out;
        self.width = map.dst_width;
        self.height = map.dst_height;
    }

    /// Box blur of the colour channels, horizontal pass then vertical.
    fn box_blur(&mut self, radius: u32) {
        let (w, h, ch) = (self.width as i64, self.height as i64, self.channels);
        let r = fit_radius(radius, self.width, self.height) as i64;
        let window = (2 * r + 1) as f32;
        let idx = |x: i64, y: i64| (y * w + x) as usize * ch;

        for horizontal in [true, false] {
            let src = self.data.clone();
            for y in 0..h {
                for x in 0..w {
                    let mut sums = [0.0f32; 3];
                    for k in -r..=r {
                        let (sx, sy) = if horizontal {
                            ((x + k).clamp(0, w - 1), y)
                        } else {
                            (x, (y + k).clamp(0, h - 1))
                        };
                        let i = idx(sx, sy);
                        for (c, sum) in sums.iter_mut().enumerate() {
                            *sum += src[i + c] as f32;
                        }
                    }
                    let o = idx(x, y);
                    for (c, sum) in sums.iter().enumerate() {
                        self.data[o + c] = clamp_u8(sum / window);
                    }
                }
            }
        }
    }

    /// 3×3 convolution of the colour channels with clamped edges, blended
    /// with the original by `amount` (1.0 = the plain kernel).
    fn convolve3(&mut self, kernel: &[f32; 9], amount: f32) {
        let (w, h, ch) = (self.width as i64, self.height as i64, self.channels);
        let src = self.data.clone();
        for y in 0..h {
            for x in 0..w {
                let o = (y * w + x) as usize * ch;
                for c in 0..3 {
                    let mut acc = 0.0f32;
                    for (k, weight) in kernel.iter().enumerate() {
                        let sx = (x + k as i64 % 3 - 1).clamp(0, w - 1);
                        let sy = (y + k as i64 / 3 - 1).clamp(0, h - 1);
                        acc += weight * src[(sy * w + sx) as usize * ch + c] as f32;
                    }
                    let original = src[o + c] as f32;
                    self.data[o + c] = clamp_u8(original + amount * (acc - original));
                }
            }
        }
    }
}

/// `v < 0` scales towards black, `v > 0` moves towards white.
fn brighten(c: u8, v: f32) -> u8 {
    let c = c as f32;
    if v < 0.0 {
        clamp_u8(c * (1.0 + v))
    } else {
        clamp_u8(c + (255.0 - c) * v)
    }
}

fn contrast_factor(v: f32) -> f32 {
    let v = v.min(0.999);
    (v + 1.0) / (1.0 - v)
}

fn grayscale([r, g, b]: [u8; 3]) -> [u8; 3] {
    let y = clamp_u8(0.2126 * r as f32 + 0.7152 * g as f32 + 0.0722 * b as f32);
    [y, y, y]
}

fn sepia([r, g, b]: [u8; 3]) -> [u8; 3] {
    let (r, g, b) = (r as f32, g as f32, b as f32);
    [
        clamp_u8(0.393 * r + 0.769 * g + 0.189 * b),
        clamp_u8(0.349 * r + 0.686 * g + 0.168 * b),
        clamp_u8(0.272 * r + 0.534 * g + 0.131 * b),
    ]
}

fn posterize(c: u8, levels: u32) -> u8 {
    let step = 255.0 / (levels - 1) as f32;
    clamp_u8((c as f32 / step).round() * step)
}

/// Backend that runs every operation as a plain loop over a pixel copy.
pub struct SoftwareBackend {
    ledger: Arc<HandleLedger>,
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self::with_ledger(Arc::new(HandleLedger::new()))
    }

    pub fn with_ledger(ledger: Arc<HandleLedger>) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &HandleLedger {
        &self.ledger
    }

    /// Copy `buffer` into a tracked bitmap, run `f` over it and copy it back.
    fn with_bitmap(
        &self,
        name: &str,
        buffer: &PixelBuffer,
        f: impl FnOnce(&mut Bitmap) -> Result<(), OpError>,
    ) -> ProcessingResult {
        run_op(LIBRARY, name, || {
            buffer.validate()?;
            let mut bitmap = self.ledger.acquire("bitmap", Bitmap::from_buffer(buffer))?;
            f(&mut bitmap)?;
            bitmap.to_buffer()
        })
    }
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageProcessor for SoftwareBackend {
    fn library(&self) -> Library {
        LIBRARY
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::basic()
    }

    fn load_image(&self, source: &ImageSource) -> Result<PixelBuffer, BackendError> {
        let bytes = codec::read_source(source)?;
        let image = codec::decode(&bytes, INPUTS, LIBRARY)?;
        codec::into_pixel_buffer(image, true)
    }

    fn save_image(&self, buffer: &PixelBuffer, options: &SaveOptions) -> Result<Vec<u8>, BackendError> {
        codec::encode(buffer, options, OUTPUTS, LIBRARY)
    }

    fn get_metadata(&self, bytes: &[u8]) -> Result<ImageMetadata, BackendError> {
        codec::inspect(bytes)
    }

    fn resize(&self, buffer: &PixelBuffer, params: &ResizeParams) -> ProcessingResult {
        self.with_bitmap("resize", buffer, |bitmap| {
            validate_resize(params.width, params.height).map_err(OpError::InvalidArgument)?;
            bitmap.resize(params.width, params.height);
            Ok(())
        })
    }

    fn crop(&self, buffer: &PixelBuffer, rect: &CropRect) -> ProcessingResult {
        self.with_bitmap("crop", buffer, |bitmap| {
            validate_crop(bitmap.width, bitmap.height, rect).map_err(OpError::InvalidArgument)?;
            bitmap.crop(rect);
            Ok(())
        })
    }

    fn rotate(&self, buffer: &PixelBuffer, degrees: f32) -> ProcessingResult {
        self.with_bitmap("rotate", buffer, |bitmap| {
            if !degrees.is_finite() {
                return Err(OpError::InvalidArgument(format!("invalid rotation angle {degrees}")));
            }
            let map = RotationMap::new(bitmap.width, bitmap.height, degrees as f64);
            bitmap.rotate(&map);
            Ok(())
        })
    }

    fn apply_filter(&self, buffer: &PixelBuffer, filter: &str, intensity: f32) -> ProcessingResult {
        self.with_bitmap("filter", buffer, |bitmap| {
            let filter: Filter = filter.parse().map_err(OpError::InvalidArgument)?;
            match filter {
                Filter::Blur => bitmap.box_blur(window_radius(intensity)),
                Filter::Sharpen => bitmap.convolve3(&SHARPEN_KERNEL, 1.0),
                Filter::Grayscale => bitmap.map_rgb(grayscale),
                Filter::Sepia => bitmap.map_rgb(sepia),
                Filter::Invert => bitmap.map_channels(|c| 255 - c),
                Filter::Posterize => {
                    let levels = posterize_levels(intensity);
                    bitmap.map_channels(|c| posterize(c, levels));
                }
                Filter::Brightness => {
                    let v = adjustment_from_intensity(intensity);
                    bitmap.map_channels(|c| brighten(c, v));
                }
                Filter::Contrast => {
                    let factor = contrast_factor(adjustment_from_intensity(intensity));
                    bitmap.map_channels(|c| clamp_u8((c as f32 - 127.5) * factor + 127.5));
                }
                Filter::Edge | Filter::Median | Filter::Bilateral | Filter::Normalize | Filter::Threshold => {
                    return Err(OpError::Unsupported {
                        what: filter.to_string(),
                        library: LIBRARY,
                    });
                }
            }
            Ok(())
        })
    }

    fn adjust_brightness(&self, buffer: &PixelBuffer, value: f32) -> ProcessingResult {
        let v = clamp_adjustment(value);
        self.with_bitmap("brightness", buffer, |bitmap| {
            bitmap.map_channels(|c| brighten(c, v));
            Ok(())
        })
    }

    fn adjust_contrast(&self, buffer: &PixelBuffer, value: f32) -> ProcessingResult {
        let factor = contrast_factor(clamp_adjustment(value));
        self.with_bitmap("contrast", buffer, |bitmap| {
            bitmap.map_channels(|c| clamp_u8((c as f32 - 127.5) * factor + 127.5));
            Ok(())
        })
    }

    fn blur(&self, buffer: &PixelBuffer, radius: f32) -> ProcessingResult {
        self.with_bitmap("blur", buffer, |bitmap| {
            bitmap.box_blur(window_radius(radius));
            Ok(())
        })
    }

    fn sharpen(&self, buffer: &PixelBuffer, amount: f32) -> ProcessingResult {
        self.with_bitmap("sharpen", buffer, |bitmap| {
            let amount = if amount.is_finite() { amount.max(0.0) } else { 1.0 };
            bitmap.convolve3(&SHARPEN_KERNEL, amount);
            Ok(())
        })
    }

    fn analyze(&self, buffer: &PixelBuffer) -> ProcessingResult<AnalysisResult> {
        run_op(LIBRARY, "analyze", || {
            buffer.validate()?;
            let bitmap = self.ledger.acquire("bitmap", Bitmap::from_buffer(buffer))?;
            let scan = analysis::scan_pixels(&bitmap.data, bitmap.width, bitmap.height, bitmap.channels);
            Ok(AnalysisResult {
                dominant_colors: scan.dominant_colors,
                brightness: scan.brightness,
                contrast: scan.contrast,
                sharpness: scan.sharpness,
                dimensions: buffer.dimensions(),
                file_size: buffer.data.len(),
                format: buffer.format,
            })
        })
    }
}
