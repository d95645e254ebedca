//! Image processing backend trait and shared types.
//!
//! The [`ImageProcessor`] trait is the one contract every engine implements,
//! so callers can swap engines without touching their own code. It has two
//! error channels on purpose:
//!
//! - pixel operations (`resize`, `apply_filter`, `analyze`, ...) return a
//!   [`ProcessingResult`] whose `outcome` carries either the new data or a
//!   failure message. Detection returns an empty `Vec` when it cannot run.
//!   A caller that gets a failure can simply try another backend.
//! - the byte boundary (`load_image`, `save_image`, `get_metadata`) returns
//!   `Result<_, BackendError>`, because a bad file is not something another
//!   transform can fix.
//!
//! | Backend | Library | Geometry | Filters | Detection | Formats out |
//! |---|---|---|---|---|---|
//! | [`CanvasBackend`](super::canvas::CanvasBackend) | `canvas` | ✓ | compositing filters | — | png, jpeg |
//! | [`VisionBackend`](super::vision::VisionBackend) | `vision` | ✓ | rich + edges | faces, objects | png, jpeg, webp |
//! | [`NativeBackend`](super::native::NativeBackend) | `native` | ✓ | strongest | — | png, jpeg, webp, avif |
//! | [`SoftwareBackend`](super::software::SoftwareBackend) | `software` | ✓ | pixel loops | — | png, jpeg |

use super::params::{CropRect, ResizeParams, SaveOptions};
use super::resources::ResourceError;
use crate::types::{BufferError, Dimensions, ImageSource, PixelBuffer, PixelFormat};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Boundary error for load/save/metadata.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("load failed: {0}")]
    LoadFailed(String),
    #[error("save failed: {0}")]
    SaveFailed(String),
    #[error("metadata failed: {0}")]
    MetadataFailed(String),
    #[error("not implemented: {0}")]
    NotImplemented(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    LoadFailed,
    SaveFailed,
    MetadataFailed,
    NotImplemented,
}

impl BackendError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BackendError::LoadFailed(_) => ErrorKind::LoadFailed,
            BackendError::SaveFailed(_) => ErrorKind::SaveFailed,
            BackendError::MetadataFailed(_) => ErrorKind::MetadataFailed,
            BackendError::NotImplemented(_) => ErrorKind::NotImplemented,
        }
    }
}

/// Failure inside a pixel operation. Never crosses the trait boundary: it is
/// flattened into [`ProcessingResult::outcome`].
#[derive(Error, Debug)]
pub enum OpError {
    #[error("invalid pixel buffer: {0}")]
    InvalidInput(#[from] BufferError),
    #[error("{0}")]
    InvalidArgument(String),
    #[error("{what} not supported by {library}")]
    Unsupported { what: String, library: Library },
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error("{0}")]
    Engine(String),
}

/// Which engine produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Library {
    Canvas,
    Vision,
    Native,
    Software,
}

impl Library {
    pub const ALL: [Library; 4] = [
        Library::Canvas,
        Library::Vision,
        Library::Native,
        Library::Software,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Library::Canvas => "canvas",
            Library::Vision => "vision",
            Library::Native => "native",
            Library::Software => "software",
        }
    }
}

impl fmt::Display for Library {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Library {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "canvas" => Ok(Library::Canvas),
            "vision" | "cv" => Ok(Library::Vision),
            "native" => Ok(Library::Native),
            "software" | "sw" => Ok(Library::Software),
            other => Err(format!("unknown backend '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ComputeTarget {
    Cpu,
    Gpu,
}

/// Outcome of one pixel operation plus how long it took and who ran it.
///
/// `outcome` is `Ok(data)` for `success: true` and `Err(message)` for
/// `success: false`.
#[derive(Debug, Clone)]
pub struct ProcessingResult<T = PixelBuffer> {
    pub outcome: Result<T, String>,
    pub processing_time: Duration,
    pub library: Library,
    pub backend: ComputeTarget,
}

impl<T> ProcessingResult<T> {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn data(&self) -> Option<&T> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&str> {
        self.outcome.as_ref().err().map(String::as_str)
    }

    pub fn into_data(self) -> Option<T> {
        self.outcome.ok()
    }

    pub fn processing_time_ms(&self) -> f64 {
        self.processing_time.as_secs_f64() * 1000.0
    }
}

/// Run `op` on behalf of `library`, timing it and flattening its error.
pub(crate) fn run_op<T>(
    library: Library,
    name: &str,
    op: impl FnOnce() -> Result<T, OpError>,
) -> ProcessingResult<T> {
    let started = Instant::now();
    let outcome = op().map_err(|e| e.to_string());
    let processing_time = started.elapsed();
    match &outcome {
        Ok(_) => log::debug!("{library}: {name} finished in {processing_time:?}"),
        Err(msg) => log::warn!("{library}: {name} failed: {msg}"),
    }
    ProcessingResult {
        outcome,
        processing_time,
        library,
        backend: ComputeTarget::Cpu,
    }
}

/// Failure result for an operation a backend does not provide.
pub(crate) fn unsupported<T>(library: Library, what: &str) -> ProcessingResult<T> {
    run_op(library, what, || {
        Err(OpError::Unsupported {
            what: what.to_string(),
            library,
        })
    })
}

/// One ranked dominant colour.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DominantColor {
    pub color: [u8; 3],
    /// Share of pixels, `0.0..=100.0`.
    pub percentage: f32,
    pub hex: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    /// At most five entries, most frequent first.
    pub dominant_colors: Vec<DominantColor>,
    /// Mean luminance in `0.0..=1.0`.
    pub brightness: f32,
    pub contrast: f32,
    pub sharpness: f32,
    pub dimensions: Dimensions,
    pub file_size: usize,
    pub format: PixelFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionKind {
    Object,
    Face,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionResult {
    #[serde(rename = "type")]
    pub kind: DetectionKind,
    pub confidence: f32,
    pub bounding_box: BoundingBox,
    pub label: String,
}

/// Facts about encoded image bytes. Backends fill in what their decoder
/// exposes; the native backend fills in the most.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImageMetadata {
    pub format: String,
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub has_alpha: bool,
    pub size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bit_depth: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orientation: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icc_profile_len: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exif_len: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
}

/// Individual capability flags, for [`Capabilities::supports`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    Resize,
    Crop,
    Rotate,
    Filter,
    ObjectDetection,
    FaceDetection,
    TextRecognition,
    ColorAnalysis,
    EdgeDetection,
    BackgroundRemoval,
}

/// Static per-backend declaration of supported operations.
///
/// Fixed for the lifetime of a backend. The contract does not enforce it;
/// callers read it to decide which backend to ask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Capabilities {
    pub resize: bool,
    pub crop: bool,
    pub rotate: bool,
    pub filter: bool,
    pub object_detection: bool,
    pub face_detection: bool,
    pub text_recognition: bool,
    pub color_analysis: bool,
    pub edge_detection: bool,
    pub background_removal: bool,
}

impl Capabilities {
    /// Geometry, filters and colour analysis; nothing else.
    pub const fn basic() -> Self {
        Self {
            resize: true,
            crop: true,
            rotate: true,
            filter: true,
            object_detection: false,
            face_detection: false,
            text_recognition: false,
            color_analysis: true,
            edge_detection: false,
            background_removal: false,
        }
    }

    pub fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::Resize => self.resize,
            Capability::Crop => self.crop,
            Capability::Rotate => self.rotate,
            Capability::Filter => self.filter,
            Capability::ObjectDetection => self.object_detection,
            Capability::FaceDetection => self.face_detection,
            Capability::TextRecognition => self.text_recognition,
            Capability::ColorAnalysis => self.color_analysis,
            Capability::EdgeDetection => self.edge_detection,
            Capability::BackgroundRemoval => self.background_removal,
        }
    }
}

/// Trait for image processing backends.
///
/// Every pixel operation takes the input by reference and returns a fresh
/// buffer; native resources live only for the duration of the call.
/// Operations a backend cannot perform return a failure result (or an empty
/// detection list) instead of panicking or erroring.
pub trait ImageProcessor: Send + Sync {
    fn library(&self) -> Library;

    fn capabilities(&self) -> Capabilities;

    /// Decode image bytes from `source` into a buffer.
    fn load_image(&self, source: &ImageSource) -> Result<PixelBuffer, BackendError>;

    /// Encode `buffer` into the requested format.
    fn save_image(&self, buffer: &PixelBuffer, options: &SaveOptions) -> Result<Vec<u8>, BackendError>;

    /// Describe encoded bytes without keeping the pixels.
    fn get_metadata(&self, bytes: &[u8]) -> Result<ImageMetadata, BackendError>;

    fn resize(&self, buffer: &PixelBuffer, params: &ResizeParams) -> ProcessingResult;

    fn crop(&self, buffer: &PixelBuffer, rect: &CropRect) -> ProcessingResult;

    /// Rotate clockwise by `degrees` onto a canvas large enough to hold the
    /// whole rotated image.
    fn rotate(&self, buffer: &PixelBuffer, degrees: f32) -> ProcessingResult;

    /// Apply a filter by name. Unknown names and filters this backend lacks
    /// are failure results.
    fn apply_filter(&self, buffer: &PixelBuffer, filter: &str, intensity: f32) -> ProcessingResult;

    /// `value` in `-1.0..=1.0`; `-1.0` is black, `0.0` leaves pixels alone.
    fn adjust_brightness(&self, buffer: &PixelBuffer, value: f32) -> ProcessingResult;

    /// `value` in `-1.0..=1.0`; `0.0` leaves pixels alone.
    fn adjust_contrast(&self, buffer: &PixelBuffer, value: f32) -> ProcessingResult;

    fn blur(&self, buffer: &PixelBuffer, radius: f32) -> ProcessingResult;

    fn sharpen(&self, buffer: &PixelBuffer, amount: f32) -> ProcessingResult;

    fn analyze(&self, buffer: &PixelBuffer) -> ProcessingResult<AnalysisResult>;

    fn detect_objects(&self, _buffer: &PixelBuffer) -> Vec<DetectionResult> {
        Vec::new()
    }

    fn detect_faces(&self, _buffer: &PixelBuffer) -> Vec<DetectionResult> {
        Vec::new()
    }

    fn detect_edges(&self, _buffer: &PixelBuffer, _threshold: f32) -> ProcessingResult {
        unsupported(self.library(), "edge detection")
    }

    fn remove_background(&self, _buffer: &PixelBuffer) -> ProcessingResult {
        unsupported(self.library(), "background removal")
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Mock backend that records operations and echoes its input.
    /// Uses Mutex (not RefCell) so it is Sync like a real backend.
    pub struct MockBackend {
        pub library: Library,
        pub capabilities: Capabilities,
        pub fail_with: Option<String>,
        pub operations: Mutex<Vec<RecordedOp>>,
    }

    #[derive(Debug, Clone, PartialEq)]
    pub enum RecordedOp {
        Resize { width: u32, height: u32 },
        Crop(CropRect),
        Rotate(f32),
        Filter { name: String, intensity: f32 },
        Brightness(f32),
        Contrast(f32),
        Blur(f32),
        Sharpen(f32),
        Analyze,
    }

    impl MockBackend {
        pub fn new(library: Library) -> Self {
            Self {
                library,
                capabilities: Capabilities::basic(),
                fail_with: None,
                operations: Mutex::new(Vec::new()),
            }
        }

        pub fn failing(library: Library, message: &str) -> Self {
            Self {
                fail_with: Some(message.to_string()),
                ..Self::new(library)
            }
        }

        pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
            self.capabilities = capabilities;
            self
        }

        pub fn get_operations(&self) -> Vec<RecordedOp> {
            self.operations.lock().unwrap().clone()
        }

        fn record(&self, op: RecordedOp, buffer: &PixelBuffer) -> ProcessingResult {
            self.operations.lock().unwrap().push(op);
            run_op(self.library, "mock", || match &self.fail_with {
                Some(msg) => Err(OpError::Engine(msg.clone())),
                None => Ok(buffer.clone()),
            })
        }
    }

    impl ImageProcessor for MockBackend {
        fn library(&self) -> Library {
            self.library
        }

        fn capabilities(&self) -> Capabilities {
            self.capabilities
        }

        fn load_image(&self, _source: &ImageSource) -> Result<PixelBuffer, BackendError> {
            Err(BackendError::NotImplemented("mock load".into()))
        }

        fn save_image(&self, _buffer: &PixelBuffer, _options: &SaveOptions) -> Result<Vec<u8>, BackendError> {
            Err(BackendError::NotImplemented("mock save".into()))
        }

        fn get_metadata(&self, _bytes: &[u8]) -> Result<ImageMetadata, BackendError> {
            Err(BackendError::NotImplemented("mock metadata".into()))
        }

        fn resize(&self, buffer: &PixelBuffer, params: &ResizeParams) -> ProcessingResult {
            self.record(
                RecordedOp::Resize {
                    width: params.width,
                    height: params.height,
                },
                buffer,
            )
        }

        fn crop(&self, buffer: &PixelBuffer, rect: &CropRect) -> ProcessingResult {
            self.record(RecordedOp::Crop(*rect), buffer)
        }

        fn rotate(&self, buffer: &PixelBuffer, degrees: f32) -> ProcessingResult {
            self.record(RecordedOp::Rotate(degrees), buffer)
        }

        fn apply_filter(&self, buffer: &PixelBuffer, filter: &str, intensity: f32) -> ProcessingResult {
            self.record(
                RecordedOp::Filter {
                    name: filter.to_string(),
                    intensity,
                },
                buffer,
            )
        }

        fn adjust_brightness(&self, buffer: &PixelBuffer, value: f32) -> ProcessingResult {
            self.record(RecordedOp::Brightness(value), buffer)
        }

        fn adjust_contrast(&self, buffer: &PixelBuffer, value: f32) -> ProcessingResult {
            self.record(RecordedOp::Contrast(value), buffer)
        }

        fn blur(&self, buffer: &PixelBuffer, radius: f32) -> ProcessingResult {
            self.record(RecordedOp::Blur(radius), buffer)
        }

        fn sharpen(&self, buffer: &PixelBuffer, amount: f32) -> ProcessingResult {
            self.record(RecordedOp::Sharpen(amount), buffer)
        }

        fn analyze(&self, _buffer: &PixelBuffer) -> ProcessingResult<AnalysisResult> {
            self.operations.lock().unwrap().push(RecordedOp::Analyze);
            unsupported(self.library, "mock analysis")
        }
    }

    fn pixel() -> PixelBuffer {
        PixelBuffer::filled(2, 2, &[1, 2, 3]).unwrap()
    }

    #[test]
    fn mock_records_resize() {
        let backend = MockBackend::new(Library::Software);
        let result = backend.resize(&pixel(), &ResizeParams { width: 8, height: 6 });
        assert!(result.is_success());
        assert_eq!(
            backend.get_operations(),
            vec![RecordedOp::Resize { width: 8, height: 6 }]
        );
    }

    #[test]
    fn failure_result_carries_message_and_library() {
        let backend = MockBackend::failing(Library::Canvas, "boom");
        let result = backend.blur(&pixel(), 2.0);
        assert!(!result.is_success());
        assert_eq!(result.error(), Some("boom"));
        assert_eq!(result.library, Library::Canvas);
        assert_eq!(result.backend, ComputeTarget::Cpu);
        assert!(result.data().is_none());
    }

    #[test]
    fn default_detection_is_empty_and_edges_unsupported() {
        let backend = MockBackend::new(Library::Native);
        assert!(backend.detect_faces(&pixel()).is_empty());
        assert!(backend.detect_objects(&pixel()).is_empty());
        let edges = backend.detect_edges(&pixel(), 0.5);
        assert_eq!(edges.error(), Some("edge detection not supported by native"));
        assert!(!backend.remove_background(&pixel()).is_success());
    }

    #[test]
    fn capabilities_supports_matches_fields() {
        let caps = Capabilities::basic();
        assert!(caps.supports(Capability::Rotate));
        assert!(caps.supports(Capability::ColorAnalysis));
        assert!(!caps.supports(Capability::FaceDetection));
        assert!(!caps.supports(Capability::TextRecognition));
    }

    #[test]
    fn error_kinds() {
        assert_eq!(BackendError::SaveFailed("x".into()).kind(), ErrorKind::SaveFailed);
        assert_eq!(
            BackendError::NotImplemented("x".into()).to_string(),
            "not implemented: x"
        );
    }

    #[test]
    fn library_parses_short_names() {
        assert_eq!("cv".parse::<Library>().unwrap(), Library::Vision);
        assert_eq!(" SW ".parse::<Library>().unwrap(), Library::Software);
        assert_eq!("Canvas".parse::<Library>().unwrap(), Library::Canvas);
        assert!("gpu".parse::<Library>().is_err());
    }
}
