//! The byte boundary: reading sources, decoding, encoding and probing.
//!
//! | Step | Crate / function |
//! |---|---|
//! | Path / bytes | `std::fs::read` / passthrough |
//! | URL | `ureq` (feature `remote`) |
//! | Decode (JPEG, PNG, TIFF, WebP) | `image` crate (pure Rust decoders) |
//! | Decode (AVIF) | [`avif`](super::avif), native backend only |
//! | Encode PNG / JPEG / WebP / AVIF | `image::codecs::*` |
//!
//! Each backend passes the list of formats its engine accepts, so the same
//! helpers serve all four while still refusing what a backend cannot do.

use super::backend::{BackendError, ImageMetadata, Library};
use super::params::{OutputFormat, SaveOptions};
use crate::types::{ImageSource, PixelBuffer, PixelFormat};
use image::codecs::avif::AvifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::{DynamicImage, ExtendedColorType, ImageDecoder, ImageEncoder, ImageFormat, ImageReader};
use std::io::Cursor;

/// Encoded input formats this crate can recognise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Jpeg,
    Png,
    WebP,
    Tiff,
    Avif,
}

impl SourceFormat {
    pub fn name(self) -> &'static str {
        match self {
            SourceFormat::Jpeg => "jpeg",
            SourceFormat::Png => "png",
            SourceFormat::WebP => "webp",
            SourceFormat::Tiff => "tiff",
            SourceFormat::Avif => "avif",
        }
    }

    pub(crate) fn image_format(self) -> ImageFormat {
        match self {
            SourceFormat::Jpeg => ImageFormat::Jpeg,
            SourceFormat::Png => ImageFormat::Png,
            SourceFormat::WebP => ImageFormat::WebP,
            SourceFormat::Tiff => ImageFormat::Tiff,
            SourceFormat::Avif => ImageFormat::Avif,
        }
    }
}

/// Upper bound on remote downloads.
#[cfg(feature = "remote")]
const MAX_REMOTE_BYTES: u64 = 64 * 1024 * 1024;

/// Read the encoded bytes behind `source`.
pub fn read_source(source: &ImageSource) -> Result<Vec<u8>, BackendError> {
    match source {
        ImageSource::Bytes(bytes) => Ok(bytes.clone()),
        ImageSource::Path(path) => std::fs::read(path).map_err(|e| {
            BackendError::LoadFailed(format!("failed to read {}: {e}", path.display()))
        }),
        ImageSource::Url(url) => fetch_url(url),
    }
}

#[cfg(feature = "remote")]
fn fetch_url(url: &str) -> Result<Vec<u8>, BackendError> {
    use std::io::Read;

    let response = ureq::get(url)
        .call()
        .map_err(|e| BackendError::LoadFailed(format!("failed to fetch {url}: {e}")))?;
    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(MAX_REMOTE_BYTES)
        .read_to_end(&mut bytes)
        .map_err(|e| BackendError::LoadFailed(format!("failed to read body of {url}: {e}")))?;
    Ok(bytes)
}

#[cfg(not(feature = "remote"))]
fn fetch_url(url: &str) -> Result<Vec<u8>, BackendError> {
    Err(BackendError::NotImplemented(format!(
        "remote source {url} (build with the `remote` feature or fetch the bytes first)"
    )))
}

/// Whether `bytes` start with an ISO-BMFF `ftyp` box branded AVIF.
pub fn is_avif(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[4..8] == b"ftyp" && matches!(&bytes[8..12], b"avif" | b"avis")
}

/// Identify the container format from magic bytes.
pub fn sniff(bytes: &[u8]) -> Option<SourceFormat> {
    if is_avif(bytes) {
        return Some(SourceFormat::Avif);
    }
    match image::guess_format(bytes).ok()? {
        ImageFormat::Jpeg => Some(SourceFormat::Jpeg),
        ImageFormat::Png => Some(SourceFormat::Png),
        ImageFormat::WebP => Some(SourceFormat::WebP),
        ImageFormat::Tiff => Some(SourceFormat::Tiff),
        _ => None,
    }
}

/// Sniff and check against what `library` accepts.
pub fn accepted_format(
    bytes: &[u8],
    accept: &[SourceFormat],
    library: Library,
) -> Result<SourceFormat, BackendError> {
    let format = sniff(bytes)
        .ok_or_else(|| BackendError::LoadFailed("unrecognised image format".into()))?;
    if !accept.contains(&format) {
        return Err(BackendError::LoadFailed(format!(
            "{} input not supported by {library}",
            format.name()
        )));
    }
    Ok(format)
}

/// Decode bytes with the `image` crate. AVIF is handled by the native backend
/// itself and is rejected here.
pub fn decode(bytes: &[u8], accept: &[SourceFormat], library: Library) -> Result<DynamicImage, BackendError> {
    let format = accepted_format(bytes, accept, library)?;
    if format == SourceFormat::Avif {
        return Err(BackendError::LoadFailed(format!(
            "avif input not supported by {library}"
        )));
    }
    image::load_from_memory_with_format(bytes, format.image_format())
        .map_err(|e| BackendError::LoadFailed(format!("failed to decode {}: {e}", format.name())))
}

/// Convert a decoded image into a buffer, either always RGBA or keeping the
/// source's alpha-ness (gray becomes RGB, gray+alpha becomes RGBA).
pub fn into_pixel_buffer(image: DynamicImage, force_rgba: bool) -> Result<PixelBuffer, BackendError> {
    let (width, height) = (image.width(), image.height());
    let built = if force_rgba || image.color().has_alpha() {
        PixelBuffer::new(image.to_rgba8().into_raw(), width, height, PixelFormat::Rgba)
    } else {
        PixelBuffer::new(image.to_rgb8().into_raw(), width, height, PixelFormat::Rgb)
    };
    built.map_err(|e| BackendError::LoadFailed(e.to_string()))
}

/// Encode `buffer` if `options.format` is one of `accept`.
pub fn encode(
    buffer: &PixelBuffer,
    options: &SaveOptions,
    accept: &[OutputFormat],
    library: Library,
) -> Result<Vec<u8>, BackendError> {
    if !accept.contains(&options.format) {
        return Err(BackendError::NotImplemented(format!(
            "{} output not supported by {library}",
            options.format
        )));
    }
    buffer
        .validate()
        .map_err(|e| BackendError::SaveFailed(e.to_string()))?;

    let quality = options.encoder_quality().value() as u8;
    let color = match buffer.format {
        PixelFormat::Rgb => ExtendedColorType::Rgb8,
        PixelFormat::Rgba => ExtendedColorType::Rgba8,
    };
    let (w, h) = (buffer.width, buffer.height);
    let mut out = Vec::new();

    let written = match options.format {
        OutputFormat::Png => PngEncoder::new(&mut out).write_image(&buffer.data, w, h, color),
        OutputFormat::Jpeg => {
            // JPEG has no alpha channel.
            let rgb = match buffer.format {
                PixelFormat::Rgb => buffer.data.clone(),
                PixelFormat::Rgba => buffer
                    .data
                    .chunks_exact(4)
                    .flat_map(|px| [px[0], px[1], px[2]])
                    .collect(),
            };
            JpegEncoder::new_with_quality(&mut out, quality).write_image(&rgb, w, h, ExtendedColorType::Rgb8)
        }
        // The pure-Rust WebP encoder is lossless only; quality is ignored.
        OutputFormat::WebP => WebPEncoder::new_lossless(&mut out).write_image(&buffer.data, w, h, color),
        OutputFormat::Avif => {
            AvifEncoder::new_with_speed_quality(&mut out, 6, quality).write_image(&buffer.data, w, h, color)
        }
    };
    written.map_err(|e| BackendError::SaveFailed(format!("{} encode failed: {e}", options.format)))?;
    Ok(out)
}

/// Header-level metadata every backend can report.
pub fn inspect(bytes: &[u8]) -> Result<ImageMetadata, BackendError> {
    let format = sniff(bytes)
        .ok_or_else(|| BackendError::MetadataFailed("unrecognised image format".into()))?;
    let reader = ImageReader::with_format(Cursor::new(bytes), format.image_format());
    let decoder = reader
        .into_decoder()
        .map_err(|e| BackendError::MetadataFailed(format!("failed to read {} header: {e}", format.name())))?;
    let (width, height) = decoder.dimensions();
    let color = decoder.color_type();
    Ok(ImageMetadata {
        format: format.name().to_string(),
        width,
        height,
        channels: color.channel_count(),
        has_alpha: color.has_alpha(),
        size: bytes.len(),
        ..ImageMetadata::default()
    })
}
