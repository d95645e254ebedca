//! Computer-vision backend built on dense matrices.
//!
//! Every operation converts the buffer into a four-channel [`Mat`], runs one
//! or more primitives into freshly allocated destination matrices, and
//! converts the result back to the input's channel count. All matrices,
//! intermediates (gray, YCrCb, masks) and rectangle vectors are ledger
//! handles, released on every path out of the operation.
//!
//! Detection looks classifiers up in an injected [`DetectorCache`]; a key
//! with no asset yields no detections rather than an error.
//!
//! | Operation | Primitive |
//! |---|---|
//! | Resize | bilinear `resize` |
//! | Rotate | `warp_rotate` on the enlarged canvas |
//! | Blur | Gaussian, `k = 2·ceil(2·i) + 1` |
//! | Sharpen | `filter2d` with centre `4k + 1`, neighbours `−k` |
//! | Edges | Sobel magnitude on luminance |
//! | Median / bilateral | windowed filters |
//! | Brightness / contrast | `convert_scale` |

pub mod detector;
pub mod mat;

use super::backend::{
    AnalysisResult, BackendError, Capabilities, DetectionKind, DetectionResult, DominantColor,
    ImageMetadata, ImageProcessor, Library, OpError, ProcessingResult, run_op,
};
use super::calculations::{
    LUMA_B, LUMA_G, LUMA_R, RotationMap, adjustment_from_intensity, clamp_adjustment,
    gaussian_kernel_size, hex_color, sigma_for_kernel, validate_crop, validate_resize,
    window_radius,
};
use super::codec::{self, SourceFormat};
use super::params::{CropRect, Filter, OutputFormat, ResizeParams, SaveOptions};
use super::resources::{Handle, HandleLedger};
use crate::config::VisionConfig;
use crate::types::{ImageSource, PixelBuffer};
use detector::DetectorCache;
use mat::Mat;
use std::sync::Arc;

const LIBRARY: Library = Library::Vision;
const INPUTS: &[SourceFormat] = &[
    SourceFormat::Jpeg,
    SourceFormat::Png,
    SourceFormat::WebP,
    SourceFormat::Tiff,
];
const OUTPUTS: &[OutputFormat] = &[OutputFormat::Png, OutputFormat::Jpeg, OutputFormat::WebP];

/// Largest RGB distance, `sqrt(3·255²)`.
const MAX_COLOR_DISTANCE: f32 = 441.673;

pub struct VisionBackend {
    ledger: Arc<HandleLedger>,
    detectors: Arc<DetectorCache>,
    config: VisionConfig,
}

impl VisionBackend {
    pub fn new(detectors: Arc<DetectorCache>) -> Self {
        Self::with_ledger(Arc::new(HandleLedger::new()), detectors, VisionConfig::default())
    }

    pub fn with_ledger(ledger: Arc<HandleLedger>, detectors: Arc<DetectorCache>, config: VisionConfig) -> Self {
        Self {
            ledger,
            detectors,
            config,
        }
    }

    pub fn ledger(&self) -> &HandleLedger {
        &self.ledger
    }

    pub fn detectors(&self) -> &DetectorCache {
        &self.detectors
    }

    fn mat(&self, rows: u32, cols: u32, channels: usize) -> Result<Handle<'_, Mat>, OpError> {
        Ok(self.ledger.acquire("mat", Mat::zeros(rows, cols, channels))?)
    }

    fn src_mat(&self, buffer: &PixelBuffer) -> Result<Handle<'_, Mat>, OpError> {
        buffer.validate()?;
        Ok(self.ledger.acquire("mat", Mat::from_buffer(buffer))?)
    }

    /// Source matrix → same-sized destination via `f` → buffer.
    fn same_size(
        &self,
        buffer: &PixelBuffer,
        f: impl FnOnce(&Mat, &mut Mat) -> Result<(), OpError>,
    ) -> Result<PixelBuffer, OpError> {
        let src = self.src_mat(buffer)?;
        let mut dst = self.mat(src.rows, src.cols, 4)?;
        f(&src, &mut dst)?;
        Ok(dst.to_buffer(buffer.channels)?)
    }

    /// Luminance → Sobel magnitude, optionally binarised at `thresh`.
    fn edges(&self, buffer: &PixelBuffer, thresh: Option<f32>) -> Result<PixelBuffer, OpError> {
        let src = self.src_mat(buffer)?;
        let mut gray = self.mat(src.rows, src.cols, 1)?;
        mat::cvt_gray(&src, &mut gray);
        let mut magnitude = self.mat(src.rows, src.cols, 1)?;
        mat::sobel_magnitude(&gray, &mut magnitude);
        if let Some(t) = thresh {
            mat::threshold(&magnitude, &mut gray, t);
            std::mem::swap(&mut *gray, &mut *magnitude);
        }
        let mut dst = self.mat(src.rows, src.cols, 4)?;
        mat::merge_gray(&magnitude, &src, &mut dst);
        Ok(dst.to_buffer(buffer.channels)?)
    }

    fn detect(&self, buffer: &PixelBuffer, key: &str, kind: DetectionKind) -> Vec<DetectionResult> {
        let Some(classifier) = self.detectors.get_or_load(key) else {
            return Vec::new();
        };
        let found = (|| -> Result<Vec<DetectionResult>, OpError> {
            let src = self.src_mat(buffer)?;
            let mut ycrcb = self.mat(src.rows, src.cols, 3)?;
            mat::cvt_ycrcb(&src, &mut ycrcb);
            let rects = self.ledger.acquire("rect-vector", classifier.detect_multi_scale(&ycrcb))?;
            Ok(rects
                .iter()
                .filter(|r| r.confidence >= self.config.min_confidence)
                .map(|r| DetectionResult {
                    kind,
                    confidence: r.confidence,
                    bounding_box: r.rect,
                    label: classifier.label().to_string(),
                })
                .collect())
        })();
        match found {
            Ok(found) => {
                log::debug!("{LIBRARY}: {} {key} detection(s)", found.len());
                found
            }
            Err(e) => {
                log::warn!("{LIBRARY}: {key} detection failed: {e}");
                Vec::new()
            }
        }
    }
}

fn sharpen_kernel(k: f32) -> [f32; 9] {
    let k = if k.is_finite() { k.max(0.0) } else { 1.0 };
    [0.0, -k, 0.0, -k, 4.0 * k + 1.0, -k, 0.0, -k, 0.0]
}

fn gaussian(src: &Mat, dst: &mut Mat, intensity: f32) {
    let ksize = gaussian_kernel_size(intensity);
    mat::gaussian_blur(src, dst, ksize, sigma_for_kernel(ksize));
}

impl ImageProcessor for VisionBackend {
    fn library(&self) -> Library {
        LIBRARY
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            object_detection: true,
            face_detection: true,
            text_recognition: false,
            edge_detection: true,
            background_removal: true,
            ..Capabilities::basic()
        }
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
        run_op(LIBRARY, "resize", || {
            validate_resize(params.width, params.height).map_err(OpError::InvalidArgument)?;
            let src = self.src_mat(buffer)?;
            let mut dst = self.mat(params.height, params.width, 4)?;
            mat::resize(&src, &mut dst);
            Ok(dst.to_buffer(buffer.channels)?)
        })
    }

    fn crop(&self, buffer: &PixelBuffer, rect: &CropRect) -> ProcessingResult {
        run_op(LIBRARY, "crop", || {
            validate_crop(buffer.width, buffer.height, rect).map_err(OpError::InvalidArgument)?;
            let src = self.src_mat(buffer)?;
            let mut dst = self.mat(rect.height, rect.width, 4)?;
            mat::copy_roi(&src, rect, &mut dst);
            Ok(dst.to_buffer(buffer.channels)?)
        })
    }

    fn rotate(&self, buffer: &PixelBuffer, degrees: f32) -> ProcessingResult {
        run_op(LIBRARY, "rotate", || {
            if !degrees.is_finite() {
                return Err(OpError::InvalidArgument(format!("invalid rotation angle {degrees}")));
            }
            let src = self.src_mat(buffer)?;
            let map = RotationMap::new(src.cols, src.rows, degrees as f64);
            let mut dst = self.mat(map.dst_height, map.dst_width, 4)?;
            mat::warp_rotate(&src, &map, &mut dst);
            Ok(dst.to_buffer(buffer.channels)?)
        })
    }

    fn apply_filter(&self, buffer: &PixelBuffer, filter: &str, intensity: f32) -> ProcessingResult {
        run_op(LIBRARY, "filter", || {
            let filter: Filter = filter.parse().map_err(OpError::InvalidArgument)?;
            match filter {
                Filter::Blur => self.same_size(buffer, |src, dst| {
                    gaussian(src, dst, intensity);
                    Ok(())
                }),
                Filter::Sharpen => self.same_size(buffer, |src, dst| {
                    mat::filter2d(src, dst, &sharpen_kernel(intensity));
                    Ok(())
                }),
                Filter::Edge => self.edges(buffer, None),
                Filter::Grayscale => {
                    let src = self.src_mat(buffer)?;
                    let mut gray = self.mat(src.rows, src.cols, 1)?;
                    mat::cvt_gray(&src, &mut gray);
                    let mut dst = self.mat(src.rows, src.cols, 4)?;
                    mat::merge_gray(&gray, &src, &mut dst);
                    Ok(dst.to_buffer(buffer.channels)?)
                }
                Filter::Median => self.same_size(buffer, |src, dst| {
                    mat::median_blur(src, dst, window_radius(intensity));
                    Ok(())
                }),
                Filter::Bilateral => self.same_size(buffer, |src, dst| {
                    let diameter = 2 * window_radius(intensity * 2.0) + 1;
                    let spread = if intensity.is_finite() { intensity.clamp(0.1, 4.0) } else { 1.0 };
                    let sigma_color = 50.0 * spread;
                    mat::bilateral(src, dst, diameter, sigma_color, diameter as f32 / 2.0);
                    Ok(())
                }),
                Filter::Brightness => self.same_size(buffer, |src, dst| {
                    mat::convert_scale(src, dst, 1.0, adjustment_from_intensity(intensity) * 255.0);
                    Ok(())
                }),
                Filter::Contrast => self.same_size(buffer, |src, dst| {
                    let gain = 1.0 + adjustment_from_intensity(intensity);
                    mat::convert_scale(src, dst, gain, 128.0 * (1.0 - gain));
                    Ok(())
                }),
                Filter::Sepia | Filter::Invert | Filter::Posterize | Filter::Normalize | Filter::Threshold => {
                    Err(OpError::Unsupported {
                        what: filter.to_string(),
                        library: LIBRARY,
                    })
                }
            }
        })
    }

    fn adjust_brightness(&self, buffer: &PixelBuffer, value: f32) -> ProcessingResult {
        let beta = clamp_adjustment(value) * 255.0;
        run_op(LIBRARY, "brightness", || {
            self.same_size(buffer, |src, dst| {
                mat::convert_scale(src, dst, 1.0, beta);
                Ok(())
            })
        })
    }

    fn adjust_contrast(&self, buffer: &PixelBuffer, value: f32) -> ProcessingResult {
        let gain = 1.0 + clamp_adjustment(value);
        run_op(LIBRARY, "contrast", || {
            self.same_size(buffer, |src, dst| {
                mat::convert_scale(src, dst, gain, 128.0 * (1.0 - gain));
                Ok(())
            })
        })
    }

    fn blur(&self, buffer: &PixelBuffer, radius: f32) -> ProcessingResult {
        run_op(LIBRARY, "blur", || {
            self.same_size(buffer, |src, dst| {
                gaussian(src, dst, radius);
                Ok(())
            })
        })
    }

    fn sharpen(&self, buffer: &PixelBuffer, amount: f32) -> ProcessingResult {
        run_op(LIBRARY, "sharpen", || {
            self.same_size(buffer, |src, dst| {
                mat::filter2d(src, dst, &sharpen_kernel(amount));
                Ok(())
            })
        })
    }

    fn analyze(&self, buffer: &PixelBuffer) -> ProcessingResult<AnalysisResult> {
        run_op(LIBRARY, "analyze", || {
            let src = self.src_mat(buffer)?;
            let (mean, _) = mat::mean_std_dev(&src);
            let mut gray = self.mat(src.rows, src.cols, 1)?;
            mat::cvt_gray(&src, &mut gray);
            let (_, gray_std) = mat::mean_std_dev(&gray);
            let lap = self.ledger.acquire("mat", mat::laplacian(&gray))?;

            let n = lap.len().max(1) as f64;
            let lap_mean = lap.iter().map(|&v| v as f64).sum::<f64>() / n;
            let lap_var = lap.iter().map(|&v| (v as f64 - lap_mean).powi(2)).sum::<f64>() / n;

            let luma = LUMA_R as f64 * mean[0] + LUMA_G as f64 * mean[1] + LUMA_B as f64 * mean[2];
            let color = [
                mean[0].round() as u8,
                mean[1].round() as u8,
                mean[2].round() as u8,
            ];
            Ok(AnalysisResult {
                dominant_colors: vec![DominantColor {
                    color,
                    percentage: 100.0,
                    hex: hex_color(color),
                }],
                brightness: (luma / 255.0) as f32,
                contrast: (gray_std[0] / 255.0) as f32,
                sharpness: (lap_var.sqrt() / 255.0).min(1.0) as f32,
                dimensions: buffer.dimensions(),
                file_size: buffer.data.len(),
                format: buffer.format,
            })
        })
    }

    fn detect_objects(&self, buffer: &PixelBuffer) -> Vec<DetectionResult> {
        self.detect(buffer, &self.config.object_key, DetectionKind::Object)
    }

    fn detect_faces(&self, buffer: &PixelBuffer) -> Vec<DetectionResult> {
        self.detect(buffer, &self.config.face_key, DetectionKind::Face)
    }

    fn detect_edges(&self, buffer: &PixelBuffer, threshold: f32) -> ProcessingResult {
        run_op(LIBRARY, "edge detection", || {
            let t = if threshold.is_finite() { threshold.clamp(0.0, 1.0) } else { 0.5 };
            self.edges(buffer, Some(t * 255.0))
        })
    }

    fn remove_background(&self, buffer: &PixelBuffer) -> ProcessingResult {
        run_op(LIBRARY, "background removal", || {
            let src = self.src_mat(buffer)?;
            let mut dst = self.mat(src.rows, src.cols, 4)?;
            dst.data.copy_from_slice(&src.data);

            let (w, h) = (src.cols, src.rows);
            let mut sums = [0.0f64; 3];
            let mut count = 0.0f64;
            for y in 0..h {
                for x in 0..w {
                    if x == 0 || y == 0 || x + 1 == w || y + 1 == h {
                        let px = src.at(x, y);
                        for c in 0..3 {
                            sums[c] += px[c] as f64;
                        }
                        count += 1.0;
                    }
                }
            }
            let background = sums.map(|s| (s / count) as f32);
            let limit = self.config.background_tolerance.clamp(0.0, 1.0) * MAX_COLOR_DISTANCE;
            for px in dst.data.chunks_exact_mut(4) {
                let dist = (0..3)
                    .map(|c| (px[c] as f32 - background[c]).powi(2))
                    .sum::<f32>()
                    .sqrt();
                if dist <= limit {
                    px[3] = 0;
                }
            }
            Ok(dst.to_buffer(4)?)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::detector::RegionClassifier;
    use super::*;
    use crate::test_helpers::*;

    fn backend() -> VisionBackend {
        VisionBackend::new(Arc::new(DetectorCache::empty()))
    }

    /// Grey background with a skin-toned square.
    fn portrait() -> PixelBuffer {
        let mut buf = solid(40, 40, [90, 90, 90]);
        for y in 10..26 {
            for x in 12..28 {
                let i = ((y * 40 + x) * 3) as usize;
                buf.data[i..i + 3].copy_from_slice(&[224, 172, 140]);
            }
        }
        buf
    }

    #[test]
    fn capabilities_cover_detection_but_not_text() {
        let caps = backend().capabilities();
        assert!(caps.face_detection && caps.object_detection && caps.edge_detection);
        assert!(caps.background_removal && caps.color_analysis);
        assert!(!caps.text_recognition);
    }

    #[test]
    fn missing_assets_mean_no_detections() {
        let vision = backend();
        assert!(vision.detect_faces(&portrait()).is_empty());
        assert!(vision.detect_objects(&portrait()).is_empty());
        assert_eq!(vision.ledger().snapshot().acquired, 0);
    }

    #[test]
    fn injected_classifier_finds_face_and_releases_everything() {
        let cache = Arc::new(DetectorCache::empty());
        cache.insert("face", Arc::new(RegionClassifier::skin_tone()));
        let vision = VisionBackend::new(cache);
        let faces = vision.detect_faces(&portrait());
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].kind, DetectionKind::Face);
        assert_eq!(faces[0].label, "face");
        assert_eq!(
            faces[0].bounding_box,
            crate::imaging::backend::BoundingBox { x: 12, y: 10, width: 16, height: 16 }
        );
        assert_balanced(vision.ledger());
        // source mat, ycrcb mat, rect vector
        assert_eq!(vision.ledger().snapshot().acquired, 3);
    }

    #[test]
    fn detection_failure_midway_is_empty_and_balanced() {
        let cache = Arc::new(DetectorCache::empty());
        cache.insert("face", Arc::new(RegionClassifier::skin_tone()));
        let vision = VisionBackend::new(cache);
        vision.ledger().fail_on_acquire(2);
        assert!(vision.detect_faces(&portrait()).is_empty());
        assert_balanced(vision.ledger());
    }

    #[test]
    fn sharpen_kernel_identity_on_flat() {
        let vision = backend();
        let buf = solid(6, 6, [100, 120, 140]);
        assert_eq!(expect_data(vision.sharpen(&buf, 2.0)), buf);
        assert_eq!(sharpen_kernel(1.0)[4], 5.0);
        assert_eq!(sharpen_kernel(f32::NAN), sharpen_kernel(1.0));
    }

    #[test]
    fn edges_filter_marks_the_step_and_keeps_alpha() {
        let vision = backend();
        let mut buf = solid_rgba(6, 4, [0, 0, 0, 200]);
        for y in 0..4 {
            for x in 3..6 {
                let i = (y * 6 + x) * 4;
                buf.data[i..i + 3].copy_from_slice(&[255, 255, 255]);
            }
        }
        let out = expect_data(vision.apply_filter(&buf, "edges", 1.0));
        assert_eq!(&out.data[0..4], &[0, 0, 0, 200]);
        assert_eq!(&out.data[2 * 4..3 * 4], &[255, 255, 255, 200]);

        let binary = expect_data(vision.detect_edges(&buf, 0.5));
        assert!(binary.data.chunks_exact(4).all(|px| px[0] == 0 || px[0] == 255));
    }

    #[test]
    fn brightness_is_additive_and_contrast_pivots_on_128() {
        let vision = backend();
        let buf = solid(1, 1, [100, 128, 200]);
        assert_eq!(expect_data(vision.adjust_brightness(&buf, 0.2)).data, vec![151, 179, 251]);
        assert_eq!(expect_data(vision.adjust_contrast(&buf, 1.0)).data, vec![72, 128, 255]);
        assert_eq!(expect_data(vision.adjust_contrast(&buf, 0.0)), buf);
    }

    #[test]
    fn analyze_reports_single_mean_colour() {
        let vision = backend();
        let result = expect_data(vision.analyze(&solid(10, 10, [255, 0, 0])));
        assert_eq!(result.dominant_colors.len(), 1);
        assert_eq!(result.dominant_colors[0].hex, "#ff0000");
        assert!((result.brightness - 0.299).abs() < 0.01);
        assert_eq!(result.sharpness, 0.0);
        assert_balanced(vision.ledger());
    }

    #[test]
    fn remove_background_clears_the_border_colour() {
        let vision = backend();
        let out = expect_data(vision.remove_background(&portrait()));
        assert_eq!(out.channels, 4);
        assert_eq!(out.data[3], 0);
        let centre = ((18 * 40 + 20) * 4) as usize;
        assert_eq!(out.data[centre + 3], 255);
    }

    #[test]
    fn unsupported_filters_name_the_library() {
        let vision = backend();
        assert_eq!(
            expect_failure(vision.apply_filter(&solid(2, 2, [0, 0, 0]), "sepia", 1.0)),
            "sepia not supported by vision"
        );
    }

    #[test]
    fn loads_webp_and_saves_webp() {
        let vision = backend();
        let buf = gradient(6, 5, 4);
        let webp = vision
            .save_image(&buf, &SaveOptions::new(OutputFormat::WebP, 1.0))
            .unwrap();
        assert_eq!(vision.load_image(&webp.into()).unwrap(), buf);
        let err = vision
            .save_image(&buf, &SaveOptions::new(OutputFormat::Avif, 0.5))
            .unwrap_err();
        assert_eq!(err.kind(), crate::imaging::ErrorKind::NotImplemented);
    }
}
