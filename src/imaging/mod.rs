//! Image processing behind one interface, four engines.
//!
//! | Backend | Native objects | Strength |
//! |---|---|---|
//! | [`CanvasBackend`] | surfaces + 2D context | compositing filters, affine draws |
//! | [`VisionBackend`] | dense matrices | edges, detection, rich filters |
//! | [`NativeBackend`] | one pipeline per call | Lanczos resize, AVIF in and out, metadata |
//! | [`SoftwareBackend`] | a pixel copy | no native state at all |
//!
//! The module is split into:
//! - **Backend**: the [`ImageProcessor`] trait, result and error types
//! - **Calculations**: pure functions for geometry and parameter math (unit testable)
//! - **Parameters**: data structures describing image operations
//! - **Resources**: the [`HandleLedger`](resources::HandleLedger) every native object is registered with
//! - **Codec**: byte-level decode/encode shared by the backends
//! - **Operations**: operations as data and the fallback registry

pub mod analysis;
pub mod avif;
pub mod backend;
pub mod calculations;
pub mod canvas;
pub mod codec;
pub(crate) mod iptc_parser;
pub mod native;
pub mod operations;
pub mod params;
pub mod resources;
pub(crate) mod sampling;
pub mod software;
pub mod vision;

pub use backend::{
    AnalysisResult, BackendError, BoundingBox, Capabilities, Capability, ComputeTarget, DetectionKind,
    DetectionResult, DominantColor, ErrorKind, ImageMetadata, ImageProcessor, Library, ProcessingResult,
};
pub use canvas::CanvasBackend;
pub use native::NativeBackend;
pub use operations::{BackendSet, Operation, apply};
pub use params::{CropRect, Filter, OutputFormat, Quality, ResizeParams, SaveOptions, Sharpening};
pub use resources::{HandleLedger, LedgerSnapshot};
pub use software::SoftwareBackend;
pub use vision::VisionBackend;
pub use vision::detector::DetectorCache;
