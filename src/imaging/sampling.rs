//! Pixel sampling shared by the geometry paths of the pixel-loop engines.
//!
//! All functions work on tightly packed interleaved 8-bit data with any
//! channel count and use the pixel-centre convention: pixel `(x, y)` covers
//! `x..x+1` and its sample sits at `x + 0.5`.

use super::calculations::{RotationMap, clamp_u8};

/// What a sample that falls outside the source reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    /// Repeat the nearest edge pixel.
    Clamp,
    /// All-zero (transparent black).
    Transparent,
}

#[inline]
fn texel(src: &[u8], width: u32, height: u32, channels: usize, x: i64, y: i64, edge: Edge) -> Option<&[u8]> {
    let (x, y) = match edge {
        Edge::Clamp => (x.clamp(0, width as i64 - 1), y.clamp(0, height as i64 - 1)),
        Edge::Transparent => {
            if x < 0 || y < 0 || x >= width as i64 || y >= height as i64 {
                return None;
            }
            (x, y)
        }
    };
    let i = (y as usize * width as usize + x as usize) * channels;
    Some(&src[i..i + channels])
}

/// Bilinear sample at source coordinates `(sx, sy)` (pixel-centre space)
/// written into `out`.
#[allow(clippy::too_many_arguments)]
pub fn bilinear(
    src: &[u8],
    width: u32,
    height: u32,
    channels: usize,
    sx: f64,
    sy: f64,
    edge: Edge,
    out: &mut [u8],
) {
    let x0 = sx.floor();
    let y0 = sy.floor();
    let fx = sx - x0;
    let fy = sy - y0;
    let (x0, y0) = (x0 as i64, y0 as i64);

    let mut acc = [0.0f64; 4];
    for (dx, dy, w) in [
        (0, 0, (1.0 - fx) * (1.0 - fy)),
        (1, 0, fx * (1.0 - fy)),
        (0, 1, (1.0 - fx) * fy),
        (1, 1, fx * fy),
    ] {
        if w == 0.0 {
            continue;
        }
        if let Some(px) = texel(src, width, height, channels, x0 + dx, y0 + dy, edge) {
            for (a, &v) in acc.iter_mut().zip(px) {
                *a += v as f64 * w;
            }
        }
    }
    for (o, a) in out.iter_mut().zip(acc) {
        *o = clamp_u8(a as f32);
    }
}

/// Nearest-neighbour sample; outside the source leaves `out` untouched.
pub fn nearest(src: &[u8], width: u32, height: u32, channels: usize, sx: f64, sy: f64, out: &mut [u8]) {
    let (x, y) = (sx.round() as i64, sy.round() as i64);
    if let Some(px) = texel(src, width, height, channels, x, y, Edge::Transparent) {
        out.copy_from_slice(px);
    }
}

/// Bilinear resize with clamped edges.
pub fn resize_bilinear(src: &[u8], width: u32, height: u32, channels: usize, dst_w: u32, dst_h: u32) -> Vec<u8> {
    let mut out = vec![0u8; dst_w as usize * dst_h as usize * channels];
    let scale_x = width as f64 / dst_w as f64;
    let scale_y = height as f64 / dst_h as f64;
    for (y, row) in out.chunks_exact_mut(dst_w as usize * channels).enumerate() {
        let sy = (y as f64 + 0.5) * scale_y - 0.5;
        for (x, px) in row.chunks_exact_mut(channels).enumerate() {
            let sx = (x as f64 + 0.5) * scale_x - 0.5;
            bilinear(src, width, height, channels, sx, sy, Edge::Clamp, px);
        }
    }
    out
}

/// Copy a `w`×`h` window starting at `(x, y)`.
pub fn extract(src: &[u8], width: u32, channels: usize, x: u32, y: u32, w: u32, h: u32) -> Vec<u8> {
    let row_len = w as usize * channels;
    let mut out = Vec::with_capacity(row_len * h as usize);
    for row in y..y + h {
        let start = (row as usize * width as usize + x as usize) * channels;
        out.extend_from_slice(&src[start..start + row_len]);
    }
    out
}

/// Rotate onto the enlarged canvas of `map`, bilinear, with a transparent
/// border. Right angles land exactly on source pixels.
pub fn rotate_bilinear(src: &[u8], width: u32, height: u32, channels: usize, map: &RotationMap) -> Vec<u8> {
    let mut out = vec![0u8; map.dst_width as usize * map.dst_height as usize * channels];
    for (y, row) in out.chunks_exact_mut(map.dst_width as usize * channels).enumerate() {
        for (x, px) in row.chunks_exact_mut(channels).enumerate() {
            let (sx, sy) = map.source_of(x as u32, y as u32);
            bilinear(src, width, height, channels, sx, sy, Edge::Transparent, px);
        }
    }
    out
}
