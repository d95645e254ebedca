//! Software-canvas backend: every operation is a draw between surfaces.
//!
//! An operation opens a source [`Surface`] and fills it from the buffer with
//! `put_image_data`, opens a destination surface of the output size, draws
//! source into destination through a [`Context2d`] configured with the right
//! transform and filter chain, and reads the result back with
//! `get_image_data`. Both surfaces are ledger handles.
//!
//! | Operation | Context state |
//! |---|---|
//! | Resize | `scale(new_w / w, new_h / h)` |
//! | Crop | `translate(-x, -y)` on a crop-sized surface |
//! | Rotate | forward rotation matrix on the enlarged canvas |
//! | Filters | CSS filter chain (`blur`, `brightness`, `contrast`, `grayscale`, `sepia`, `invert`) |
//!
//! Anything the filter chain cannot express (sharpen, median, edges, ...)
//! is a failure result.

pub mod surface;

use super::analysis;
use super::backend::{
    AnalysisResult, BackendError, Capabilities, ImageMetadata, ImageProcessor, Library, OpError,
    ProcessingResult, run_op, unsupported,
};
use super::calculations::{
    RotationMap, adjustment_from_intensity, clamp_adjustment, validate_crop, validate_resize,
};
use super::codec::{self, SourceFormat};
use super::params::{CropRect, Filter, OutputFormat, ResizeParams, SaveOptions};
use super::resources::{Handle, HandleLedger};
use super::sampling::Edge;
use crate::types::{ImageSource, PixelBuffer};
use std::sync::Arc;
pub use surface::{Context2d, CssFilter, Surface};

const LIBRARY: Library = Library::Canvas;
const INPUTS: &[SourceFormat] = &[SourceFormat::Jpeg, SourceFormat::Png];
const OUTPUTS: &[OutputFormat] = &[OutputFormat::Png, OutputFormat::Jpeg];

/// How the destination relates to the source for one draw.
enum Placement {
    Scale { width: u32, height: u32 },
    Window(CropRect),
    Rotate(RotationMap),
    Identity,
}

pub struct CanvasBackend {
    ledger: Arc<HandleLedger>,
}

impl CanvasBackend {
    pub fn new() -> Self {
        Self::with_ledger(Arc::new(HandleLedger::new()))
    }

    pub fn with_ledger(ledger: Arc<HandleLedger>) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &HandleLedger {
        &self.ledger
    }

    fn open_surface(&self, width: u32, height: u32) -> Result<Handle<'_, Surface>, OpError> {
        let surface = Surface::new(width, height).map_err(OpError::Engine)?;
        Ok(self.ledger.acquire("surface", surface)?)
    }

    /// Surface holding the buffer's pixels as RGBA.
    fn source_surface(&self, buffer: &PixelBuffer) -> Result<Handle<'_, Surface>, OpError> {
        buffer.validate()?;
        let mut surface = self.open_surface(buffer.width, buffer.height)?;
        surface.put_image_data(buffer.to_rgba()).map_err(OpError::Engine)?;
        Ok(surface)
    }

    fn draw(&self, buffer: &PixelBuffer, placement: Placement, filters: Vec<CssFilter>) -> Result<PixelBuffer, OpError> {
        let source = self.source_surface(buffer)?;
        let (width, height) = match &placement {
            Placement::Scale { width, height } => (*width, *height),
            Placement::Window(rect) => (rect.width, rect.height),
            Placement::Rotate(map) => (map.dst_width, map.dst_height),
            Placement::Identity => (buffer.width, buffer.height),
        };
        let mut dest = self.open_surface(width, height)?;
        {
            let mut ctx = dest.context();
            // Only rotation exposes area outside the source.
            if !matches!(placement, Placement::Rotate(_)) {
                ctx.set_edge_mode(Edge::Clamp);
            }
            match placement {
                Placement::Scale { width, height } => {
                    ctx.scale(width as f64 / buffer.width as f64, height as f64 / buffer.height as f64)
                }
                Placement::Window(rect) => ctx.translate(-(rect.x as f64), -(rect.y as f64)),
                Placement::Rotate(map) => ctx.set_transform(map.forward_matrix()),
                Placement::Identity => {}
            }
            ctx.set_filter(filters);
            ctx.draw_image(&source).map_err(OpError::Engine)?;
        }
        Ok(PixelBuffer::from_rgba(&dest.get_image_data(), width, height, buffer.channels)?)
    }

    fn filtered(&self, name: &str, buffer: &PixelBuffer, filters: Vec<CssFilter>) -> ProcessingResult {
        run_op(LIBRARY, name, || self.draw(buffer, Placement::Identity, filters))
    }
}

impl Default for CanvasBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageProcessor for CanvasBackend {
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
        run_op(LIBRARY, "resize", || {
            validate_resize(params.width, params.height).map_err(OpError::InvalidArgument)?;
            let placement = Placement::Scale {
                width: params.width,
                height: params.height,
            };
            self.draw(buffer, placement, Vec::new())
        })
    }

    fn crop(&self, buffer: &PixelBuffer, rect: &CropRect) -> ProcessingResult {
        run_op(LIBRARY, "crop", || {
            validate_crop(buffer.width, buffer.height, rect).map_err(OpError::InvalidArgument)?;
            self.draw(buffer, Placement::Window(*rect), Vec::new())
        })
    }

    fn rotate(&self, buffer: &PixelBuffer, degrees: f32) -> ProcessingResult {
        run_op(LIBRARY, "rotate", || {
            if !degrees.is_finite() {
                return Err(OpError::InvalidArgument(format!("invalid rotation angle {degrees}")));
            }
            let map = RotationMap::new(buffer.width, buffer.height, degrees as f64);
            self.draw(buffer, Placement::Rotate(map), Vec::new())
        })
    }

    fn apply_filter(&self, buffer: &PixelBuffer, filter: &str, intensity: f32) -> ProcessingResult {
        run_op(LIBRARY, "filter", || {
            let filter: Filter = filter.parse().map_err(OpError::InvalidArgument)?;
            let css = match filter {
                Filter::Blur => CssFilter::Blur(intensity.max(0.0)),
                Filter::Grayscale => CssFilter::Grayscale(1.0),
                Filter::Sepia => CssFilter::Sepia(1.0),
                Filter::Invert => CssFilter::Invert(1.0),
                Filter::Brightness => CssFilter::Brightness(1.0 + adjustment_from_intensity(intensity)),
                Filter::Contrast => CssFilter::Contrast(1.0 + adjustment_from_intensity(intensity)),
                other => {
                    return Err(OpError::Unsupported {
                        what: other.to_string(),
                        library: LIBRARY,
                    });
                }
            };
            self.draw(buffer, Placement::Identity, vec![css])
        })
    }

    fn adjust_brightness(&self, buffer: &PixelBuffer, value: f32) -> ProcessingResult {
        let amount = 1.0 + clamp_adjustment(value);
        self.filtered("brightness", buffer, vec![CssFilter::Brightness(amount)])
    }

    fn adjust_contrast(&self, buffer: &PixelBuffer, value: f32) -> ProcessingResult {
        let amount = 1.0 + clamp_adjustment(value);
        self.filtered("contrast", buffer, vec![CssFilter::Contrast(amount)])
    }

    fn blur(&self, buffer: &PixelBuffer, radius: f32) -> ProcessingResult {
        let sigma = if radius.is_finite() { radius.max(0.0) } else { 0.0 };
        self.filtered("blur", buffer, vec![CssFilter::Blur(sigma)])
    }

    fn sharpen(&self, _buffer: &PixelBuffer, _amount: f32) -> ProcessingResult {
        unsupported(LIBRARY, "sharpen")
    }

    fn analyze(&self, buffer: &PixelBuffer) -> ProcessingResult<AnalysisResult> {
        run_op(LIBRARY, "analyze", || {
            let surface = self.source_surface(buffer)?;
            let rgba = surface.get_image_data();
            let scan = analysis::scan_pixels(&rgba, surface.width(), surface.height(), 4);
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
