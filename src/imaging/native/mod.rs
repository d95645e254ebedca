//! Native-buffer backend: one pipeline per call.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, TIFF, WebP) | `image` crate |
//! | Decode (AVIF) | `avif-parse` + `rav1d`, see [`avif`](super::avif) |
//! | Resize | `fast_image_resize`, Lanczos3 |
//! | Rotate | `image` transposes for right angles, enlarged canvas otherwise |
//! | Blur / sharpen | `image` Gaussian blur and unsharp mask |
//! | Per-pixel steps | `rayon` parallel rows |
//! | Encode → AVIF | `image::codecs::avif::AvifEncoder` (rav1e) |
//! | IPTC metadata | [`iptc_parser`](super::iptc_parser) |

pub mod pipeline;

use super::avif::{avif_dimensions, decode_avif};
use super::backend::{
    AnalysisResult, BackendError, Capabilities, DominantColor, ImageMetadata, ImageProcessor, Library,
    OpError, ProcessingResult, run_op,
};
use super::calculations::{
    LUMA_B, LUMA_G, LUMA_R, adjustment_from_intensity, clamp_adjustment, hex_color, window_radius,
};
use super::codec::{self, SourceFormat};
use super::iptc_parser::read_iptc;
use super::params::{CropRect, Filter, OutputFormat, ResizeParams, SaveOptions, Sharpening};
use super::resources::HandleLedger;
use crate::types::{ImageSource, PixelBuffer};
use image::{ImageDecoder, ImageReader};
use pipeline::{Pipeline, SEPIA};
use std::io::Cursor;
use std::sync::Arc;

const LIBRARY: Library = Library::Native;
const INPUTS: &[SourceFormat] = &[
    SourceFormat::Jpeg,
    SourceFormat::Png,
    SourceFormat::WebP,
    SourceFormat::Tiff,
    SourceFormat::Avif,
];
const OUTPUTS: &[OutputFormat] = &[
    OutputFormat::Png,
    OutputFormat::Jpeg,
    OutputFormat::WebP,
    OutputFormat::Avif,
];

/// Gaussian sigma for a blur intensity; the library's lower bound.
fn blur_sigma(intensity: f32) -> f32 {
    if intensity.is_finite() { intensity.max(0.3) } else { 1.0 }
}

fn threshold_level(intensity: f32) -> u8 {
    let i = if intensity.is_finite() { intensity } else { 1.0 };
    (i * 128.0).round().clamp(0.0, 255.0) as u8
}

pub struct NativeBackend {
    ledger: Arc<HandleLedger>,
}

impl NativeBackend {
    pub fn new() -> Self {
        Self::with_ledger(Arc::new(HandleLedger::new()))
    }

    pub fn with_ledger(ledger: Arc<HandleLedger>) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &HandleLedger {
        &self.ledger
    }

    /// Run `steps` on a fresh pipeline over `buffer`.
    fn pipeline(
        &self,
        name: &str,
        buffer: &PixelBuffer,
        steps: impl FnOnce(Pipeline<'_>) -> Result<Pipeline<'_>, OpError>,
    ) -> ProcessingResult {
        run_op(LIBRARY, name, || steps(Pipeline::new(&self.ledger, buffer)?)?.to_raw())
    }

    /// Orientation, colour profile, EXIF and IPTC on top of the header read.
    fn describe(&self, bytes: &[u8], format: SourceFormat) -> Result<ImageMetadata, BackendError> {
        let mut meta = codec::inspect(bytes)?;
        let reader = ImageReader::with_format(Cursor::new(bytes), format.image_format());
        if let Ok(mut decoder) = reader.into_decoder() {
            let color = decoder.color_type();
            meta.bit_depth = Some((color.bits_per_pixel() / u16::from(color.channel_count())) as u8);
            meta.orientation = decoder.orientation().ok().map(|o| o.to_exif());
            meta.icc_profile_len = decoder.icc_profile().ok().flatten().map(|p| p.len());
            meta.exif_len = decoder.exif_metadata().ok().flatten().map(|e| e.len());
        }
        Ok(meta)
    }
}

impl Default for NativeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageProcessor for NativeBackend {
    fn library(&self) -> Library {
        LIBRARY
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::basic()
    }

    /// Keeps the source's channel layout; AVIF decodes to RGB.
    fn load_image(&self, source: &ImageSource) -> Result<PixelBuffer, BackendError> {
        let bytes = codec::read_source(source)?;
        if codec::accepted_format(&bytes, INPUTS, LIBRARY)? == SourceFormat::Avif {
            return decode_avif(&bytes, &self.ledger).map_err(BackendError::LoadFailed);
        }
        let image = codec::decode(&bytes, INPUTS, LIBRARY)?;
        codec::into_pixel_buffer(image, false)
    }

    fn save_image(&self, buffer: &PixelBuffer, options: &SaveOptions) -> Result<Vec<u8>, BackendError> {
        codec::encode(buffer, options, OUTPUTS, LIBRARY)
    }

    fn get_metadata(&self, bytes: &[u8]) -> Result<ImageMetadata, BackendError> {
        let format = codec::sniff(bytes)
            .ok_or_else(|| BackendError::MetadataFailed("unrecognised image format".into()))?;
        let mut meta = if format == SourceFormat::Avif {
            let (width, height) = avif_dimensions(bytes).map_err(BackendError::MetadataFailed)?;
            ImageMetadata {
                format: format.name().to_string(),
                width,
                height,
                channels: 3,
                size: bytes.len(),
                ..ImageMetadata::default()
            }
        } else {
            self.describe(bytes, format)?
        };

        if meta.height > 0 {
            meta.aspect_ratio = Some(meta.width as f32 / meta.height as f32);
        }
        let iptc = read_iptc(bytes, format);
        meta.title = iptc.title;
        meta.description = iptc.description;
        meta.keywords = iptc.keywords;
        Ok(meta)
    }

    fn resize(&self, buffer: &PixelBuffer, params: &ResizeParams) -> ProcessingResult {
        self.pipeline("resize", buffer, |p| p.resize(params.width, params.height))
    }

    fn crop(&self, buffer: &PixelBuffer, rect: &CropRect) -> ProcessingResult {
        self.pipeline("crop", buffer, |p| p.extract(rect))
    }

    fn rotate(&self, buffer: &PixelBuffer, degrees: f32) -> ProcessingResult {
        self.pipeline("rotate", buffer, |p| p.rotate(degrees as f64))
    }

    fn apply_filter(&self, buffer: &PixelBuffer, filter: &str, intensity: f32) -> ProcessingResult {
        let parsed: Result<Filter, String> = filter.parse();
        self.pipeline("filter", buffer, |p| {
            let filter = parsed.map_err(OpError::InvalidArgument)?;
            match filter {
                Filter::Blur => p.blur(blur_sigma(intensity)),
                Filter::Sharpen => p.sharpen(Sharpening::from_intensity(intensity)),
                Filter::Grayscale => p.grayscale(),
                Filter::Sepia => p.recomb(SEPIA),
                Filter::Invert => p.negate(),
                Filter::Median => p.median(window_radius(intensity)),
                Filter::Normalize => p.normalise(),
                Filter::Threshold => p.threshold(threshold_level(intensity)),
                Filter::Brightness => p.modulate(1.0 + adjustment_from_intensity(intensity)),
                Filter::Contrast => {
                    let a = 1.0 + adjustment_from_intensity(intensity);
                    p.linear(a, 128.0 * (1.0 - a))
                }
                Filter::Edge | Filter::Bilateral | Filter::Posterize => Err(OpError::Unsupported {
                    what: filter.to_string(),
                    library: LIBRARY,
                }),
            }
        })
    }

    fn adjust_brightness(&self, buffer: &PixelBuffer, value: f32) -> ProcessingResult {
        let multiplier = 1.0 + clamp_adjustment(value);
        self.pipeline("brightness", buffer, |p| p.modulate(multiplier))
    }

    fn adjust_contrast(&self, buffer: &PixelBuffer, value: f32) -> ProcessingResult {
        let a = 1.0 + clamp_adjustment(value);
        self.pipeline("contrast", buffer, |p| p.linear(a, 128.0 * (1.0 - a)))
    }

    fn blur(&self, buffer: &PixelBuffer, radius: f32) -> ProcessingResult {
        self.pipeline("blur", buffer, |p| p.blur(blur_sigma(radius)))
    }

    fn sharpen(&self, buffer: &PixelBuffer, amount: f32) -> ProcessingResult {
        let sharpening = if amount.is_finite() {
            Sharpening::from_intensity(amount)
        } else {
            Sharpening::light()
        };
        self.pipeline("sharpen", buffer, |p| p.sharpen(sharpening))
    }

    fn analyze(&self, buffer: &PixelBuffer) -> ProcessingResult<AnalysisResult> {
        run_op(LIBRARY, "analyze", || {
            let stats = Pipeline::new(&self.ledger, buffer)?.stats();
            let [r, g, b] = stats.channels;
            let luma = LUMA_R as f64 * r.mean + LUMA_G as f64 * g.mean + LUMA_B as f64 * b.mean;
            let spread = (r.stdev + g.stdev + b.stdev) / 3.0;
            Ok(AnalysisResult {
                dominant_colors: vec![DominantColor {
                    color: stats.dominant,
                    percentage: (stats.dominant_share * 100.0) as f32,
                    hex: hex_color(stats.dominant),
                }],
                brightness: (luma / 255.0) as f32,
                contrast: (spread / 255.0) as f32,
                sharpness: (stats.laplacian_stdev / 255.0).min(1.0) as f32,
                dimensions: buffer.dimensions(),
                file_size: buffer.data.len(),
                format: buffer.format,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PixelFormat;
    use crate::test_helpers::*;

    #[test]
    fn load_keeps_channels() {
        let native = NativeBackend::new();
        let rgb = native.load_image(&encode_png(&gradient(4, 3, 3)).into()).unwrap();
        assert_eq!(rgb.format, PixelFormat::Rgb);
        let rgba = native.load_image(&encode_png(&gradient(4, 3, 4)).into()).unwrap();
        assert_eq!(rgba.format, PixelFormat::Rgba);
    }

    #[test]
    fn saves_all_four_formats() {
        let native = NativeBackend::new();
        let buf = gradient(16, 16, 3);
        for format in [OutputFormat::Png, OutputFormat::Jpeg, OutputFormat::WebP, OutputFormat::Avif] {
            let bytes = native.save_image(&buf, &SaveOptions::new(format, 0.8)).unwrap();
            assert!(!bytes.is_empty(), "{format} produced no bytes");
        }
    }

    #[test]
    fn avif_round_trip_through_own_decoder() {
        let native = NativeBackend::new();
        let buf = solid(16, 8, [40, 120, 200]);
        let bytes = native.save_image(&buf, &SaveOptions::new(OutputFormat::Avif, 1.0)).unwrap();
        let meta = native.get_metadata(&bytes).unwrap();
        assert_eq!((meta.format.as_str(), meta.width, meta.height), ("avif", 16, 8));
        assert_eq!(meta.aspect_ratio, Some(2.0));

        let decoded = native.load_image(&bytes.into()).unwrap();
        assert_eq!((decoded.width, decoded.height, decoded.channels), (16, 8, 3));
        // blue stays the strongest channel through YUV
        assert!(decoded.data[2] > decoded.data[1] && decoded.data[1] > decoded.data[0]);
        assert_balanced(native.ledger());
    }

    #[test]
    fn metadata_of_png_has_depth_and_ratio() {
        let native = NativeBackend::new();
        let meta = native.get_metadata(&encode_png(&gradient(6, 3, 4))).unwrap();
        assert_eq!(meta.format, "png");
        assert_eq!((meta.width, meta.height, meta.channels), (6, 3, 4));
        assert!(meta.has_alpha);
        assert_eq!(meta.bit_depth, Some(8));
        assert_eq!(meta.aspect_ratio, Some(2.0));
        assert!(meta.title.is_none() && meta.keywords.is_empty());
    }

    #[test]
    fn brightness_and_contrast_formulas() {
        let native = NativeBackend::new();
        let white = solid_rgba(4, 4, [255, 255, 255, 255]);
        let black = expect_data(native.adjust_brightness(&white, -1.0));
        assert!(black.data.chunks_exact(4).all(|px| px == [0, 0, 0, 255]));
        assert_eq!(expect_data(native.adjust_contrast(&white, 0.0)), white);

        let buf = solid(1, 1, [100, 128, 200]);
        assert_eq!(expect_data(native.adjust_brightness(&buf, 0.5)).data, vec![150, 192, 255]);
        assert_eq!(expect_data(native.adjust_contrast(&buf, 0.5)).data, vec![86, 128, 236]);
    }

    #[test]
    fn sepia_and_threshold_filters() {
        let native = NativeBackend::new();
        let sepia = expect_data(native.apply_filter(&solid(1, 1, [100, 100, 100]), "sepia", 1.0));
        assert_eq!(sepia.data, vec![135, 120, 94]);
        let binary = expect_data(native.apply_filter(&gradient(8, 8, 3), "threshold", 1.0));
        assert!(binary.data.iter().all(|&v| v == 0 || v == 255));
    }

    #[test]
    fn edge_is_not_a_native_filter() {
        let native = NativeBackend::new();
        assert_eq!(
            expect_failure(native.apply_filter(&solid(2, 2, [0, 0, 0]), "edges", 1.0)),
            "edge not supported by native"
        );
        assert!(native.detect_faces(&solid(2, 2, [0, 0, 0])).is_empty());
        assert!(!native.detect_edges(&solid(2, 2, [0, 0, 0]), 0.5).is_success());
    }

    #[test]
    fn analyze_uses_histogram_cell() {
        let native = NativeBackend::new();
        let result = expect_data(native.analyze(&solid(10, 10, [255, 0, 0])));
        assert_eq!(result.dominant_colors.len(), 1);
        assert_eq!(result.dominant_colors[0].hex, "#ff0000");
        assert_eq!(result.dominant_colors[0].percentage, 100.0);
        assert!((result.brightness - 0.299).abs() < 0.01);
        assert_eq!(result.contrast, 0.0);
    }

    #[test]
    fn mid_chain_failure_is_balanced() {
        let native = NativeBackend::new();
        native.ledger().fail_on_acquire(2);
        let msg = expect_failure(native.resize(&gradient(6, 6, 4), &ResizeParams { width: 3, height: 3 }));
        assert_eq!(msg, "failed to acquire resampler handle");
        assert_balanced(native.ledger());
    }
}
