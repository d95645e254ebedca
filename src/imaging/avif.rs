//! AVIF input for the native backend.
//!
//! The `image` crate's `"avif"` feature only provides the encoder (rav1e);
//! decoding would need `"avif-native"` and the C dav1d library. Instead the
//! container is parsed with `avif-parse` and the AV1 payload is decoded with
//! `rav1d`, the pure Rust port of dav1d.
//!
//! The decoder context, the input data and the output picture are all native
//! objects. Each one is registered with the caller's [`HandleLedger`] as soon
//! as it exists, so every early return closes or unrefs exactly what was
//! opened so far.

use super::calculations::{clamp_u8, ycbcr_to_rgb};
use super::resources::HandleLedger;
use crate::types::PixelBuffer;
use std::io::Cursor;
use std::ptr::NonNull;

/// Dimensions from the container metadata (no AV1 decode).
pub fn avif_dimensions(bytes: &[u8]) -> Result<(u32, u32), String> {
    let avif = avif_parse::read_avif(&mut Cursor::new(bytes))
        .map_err(|e| format!("failed to parse AVIF: {e:?}"))?;
    let meta = avif
        .primary_item_metadata()
        .map_err(|e| format!("failed to read AVIF metadata: {e:?}"))?;
    Ok((meta.max_frame_width.get(), meta.max_frame_height.get()))
}

/// Decode an AVIF file into an RGB buffer.
pub fn decode_avif(bytes: &[u8], ledger: &HandleLedger) -> Result<PixelBuffer, String> {
    use rav1d::include::dav1d::data::Dav1dData;
    use rav1d::include::dav1d::dav1d::Dav1dSettings;
    use rav1d::include::dav1d::headers::{
        DAV1D_PIXEL_LAYOUT_I400, DAV1D_PIXEL_LAYOUT_I420, DAV1D_PIXEL_LAYOUT_I422,
        DAV1D_PIXEL_LAYOUT_I444,
    };
    use rav1d::include::dav1d::picture::Dav1dPicture;
    use rav1d::src::lib::{
        dav1d_close, dav1d_data_create, dav1d_data_unref, dav1d_default_settings, dav1d_get_picture,
        dav1d_open, dav1d_picture_unref, dav1d_send_data,
    };

    let avif = avif_parse::read_avif(&mut Cursor::new(bytes))
        .map_err(|e| format!("failed to parse AVIF: {e:?}"))?;
    let av1_bytes: &[u8] = &avif.primary_item;

    let mut settings = std::mem::MaybeUninit::<Dav1dSettings>::uninit();
    unsafe { dav1d_default_settings(NonNull::from(&mut settings).cast::<Dav1dSettings>()) };
    let mut settings = unsafe { settings.assume_init() };
    settings.n_threads = 1;
    settings.max_frame_delay = 1;

    let mut ctx = None;
    let rc = unsafe { dav1d_open(NonNull::new(&mut ctx), NonNull::new(&mut settings)) };
    if rc.0 != 0 {
        return Err(format!("rav1d open failed ({})", rc.0));
    }
    let ctx = ledger
        .acquire_with("av1-decoder", ctx, |ctx| unsafe { dav1d_close(NonNull::new(ctx)) })
        .map_err(|e| e.to_string())?;

    let mut data = Dav1dData::default();
    let buf_ptr = unsafe { dav1d_data_create(NonNull::new(&mut data), av1_bytes.len()) };
    if buf_ptr.is_null() {
        return Err("rav1d data_create failed".into());
    }
    // On a successful send the decoder takes the payload and leaves `data`
    // empty, so the unref on drop is a no-op in that case.
    let mut data = ledger
        .acquire_with("av1-data", data, |data| unsafe { dav1d_data_unref(NonNull::new(data)) })
        .map_err(|e| e.to_string())?;
    unsafe { std::ptr::copy_nonoverlapping(av1_bytes.as_ptr(), buf_ptr, av1_bytes.len()) };

    let rc = unsafe { dav1d_send_data(*ctx, NonNull::new(&mut *data)) };
    if rc.0 != 0 {
        return Err(format!("rav1d send_data failed ({})", rc.0));
    }

    let mut pic: Dav1dPicture = unsafe { std::mem::zeroed() };
    let rc = unsafe { dav1d_get_picture(*ctx, NonNull::new(&mut pic)) };
    if rc.0 != 0 {
        return Err(format!("rav1d get_picture failed ({})", rc.0));
    }
    let pic = ledger
        .acquire_with("av1-picture", pic, |pic| unsafe { dav1d_picture_unref(NonNull::new(pic)) })
        .map_err(|e| e.to_string())?;

    let width = pic.p.w as u32;
    let height = pic.p.h as u32;
    let bits = pic.p.bpc as u32;
    if !(8..=16).contains(&bits) {
        return Err(format!("unsupported AVIF bit depth {bits}"));
    }
    let plane = |i: usize, stride: isize, (shift_x, shift_y): (u32, u32)| {
        pic.data[i]
            .map(|p| Plane {
                base: p.as_ptr() as *const u8,
                stride,
                shift_x,
                shift_y,
                bits,
            })
            .ok_or_else(|| format!("decoded picture is missing plane {i}"))
    };
    let luma = plane(0, pic.stride[0], (0, 0))?;
    let chroma = match pic.p.layout {
        DAV1D_PIXEL_LAYOUT_I400 => None,
        layout => {
            let shift = match layout {
                DAV1D_PIXEL_LAYOUT_I420 => (1, 1),
                DAV1D_PIXEL_LAYOUT_I422 => (1, 0),
                DAV1D_PIXEL_LAYOUT_I444 => (0, 0),
                other => return Err(format!("unsupported AVIF pixel layout: {other}")),
            };
            Some((plane(1, pic.stride[1], shift)?, plane(2, pic.stride[1], shift)?))
        }
    };

    let mut out = PixelBuffer::filled(width, height, &[0, 0, 0]).map_err(|e| e.to_string())?;
    let channels = out.channels as usize;
    for (i, px) in out.data.chunks_exact_mut(channels).enumerate() {
        let (x, y) = ((i % width as usize) as u32, (i / width as usize) as u32);
        let l = luma.level(x, y);
        let rgb = match &chroma {
            None => [clamp_u8(l); 3],
            Some((cb, cr)) => ycbcr_to_rgb(l, cb.offset(x, y), cr.offset(x, y)),
        };
        px[..3].copy_from_slice(&rgb);
    }
    Ok(out)
}

/// A plane of the decoded picture, addressed in luma coordinates.
///
/// Valid only while the picture handle it was read from is held.
struct Plane {
    base: *const u8,
    stride: isize,
    shift_x: u32,
    shift_y: u32,
    bits: u32,
}

impl Plane {
    /// Sample under luma pixel `(x, y)`, rescaled to 0..=255.
    fn level(&self, x: u32, y: u32) -> f32 {
        let col = (x >> self.shift_x) as isize;
        let row = (y >> self.shift_y) as isize * self.stride;
        // Deeper than 8 bits, samples are u16.
        let raw = if self.bits > 8 {
            unsafe { (self.base.offset(row + col * 2) as *const u16).read_unaligned() as f32 }
        } else {
            unsafe { *self.base.offset(row + col) as f32 }
        };
        raw * 255.0 / ((1u32 << self.bits) - 1) as f32
    }

    /// Chroma sample relative to the neutral midpoint.
    fn offset(&self, x: u32, y: u32) -> f32 {
        let mid = (1u32 << (self.bits - 1)) as f32 * 255.0 / ((1u32 << self.bits) - 1) as f32;
        self.level(x, y) - mid
    }
}
