//! Dense matrices and the primitives the vision backend runs on them.
//!
//! A [`Mat`] is row-major interleaved 8-bit data with 1, 3 or 4 channels.
//! Primitives follow the `op(src, dst, ...)` shape: the caller allocates the
//! destination (as a ledger handle) and the primitive fills it. Colour
//! primitives touch the first three channels and copy alpha through.

use crate::imaging::backend::BoundingBox;
use crate::imaging::calculations::{LUMA_B, LUMA_G, LUMA_R, RotationMap, clamp_u8, fit_radius};
use crate::imaging::params::CropRect;
use crate::imaging::sampling;
use crate::types::{BufferError, PixelBuffer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mat {
    pub rows: u32,
    pub cols: u32,
    pub channels: usize,
    pub data: Vec<u8>,
}

impl Mat {
    pub fn zeros(rows: u32, cols: u32, channels: usize) -> Self {
        Self {
            rows,
            cols,
            channels,
            data: vec![0; rows as usize * cols as usize * channels],
        }
    }

    /// Four-channel matrix from a buffer (RGB gains opaque alpha).
    pub fn from_buffer(buffer: &PixelBuffer) -> Self {
        Self {
            rows: buffer.height,
            cols: buffer.width,
            channels: 4,
            data: buffer.to_rgba(),
        }
    }

    /// Back to a buffer with `channels` channels. Expects a 4-channel matrix.
    pub fn to_buffer(&self, channels: u8) -> Result<PixelBuffer, BufferError> {
        PixelBuffer::from_rgba(&self.data, self.cols, self.rows, channels)
    }

    #[inline]
    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.cols as usize + x as usize) * self.channels
    }

    #[inline]
    pub fn at(&self, x: u32, y: u32) -> &[u8] {
        let i = self.offset(x, y);
        &self.data[i..i + self.channels]
    }

    #[inline]
    fn clamped(&self, x: i64, y: i64) -> &[u8] {
        self.at(
            x.clamp(0, self.cols as i64 - 1) as u32,
            y.clamp(0, self.rows as i64 - 1) as u32,
        )
    }

    fn pixel_count(&self) -> usize {
        self.rows as usize * self.cols as usize
    }
}

/// Bilinear resize into `dst`'s size.
pub fn resize(src: &Mat, dst: &mut Mat) {
    dst.data = sampling::resize_bilinear(&src.data, src.cols, src.rows, src.channels, dst.cols, dst.rows);
}

/// Copy the region of interest `rect` into `dst`.
pub fn copy_roi(src: &Mat, rect: &CropRect, dst: &mut Mat) {
    dst.data = sampling::extract(&src.data, src.cols, src.channels, rect.x, rect.y, rect.width, rect.height);
}

/// Affine warp for a rotation, bilinear, constant transparent border.
pub fn warp_rotate(src: &Mat, map: &RotationMap, dst: &mut Mat) {
    dst.data = sampling::rotate_bilinear(&src.data, src.cols, src.rows, src.channels, map);
}

/// `dst = saturate(src·alpha + beta)` on colour channels.
pub fn convert_scale(src: &Mat, dst: &mut Mat, alpha: f32, beta: f32) {
    dst.data.copy_from_slice(&src.data);
    for px in dst.data.chunks_exact_mut(dst.channels) {
        for c in px.iter_mut().take(3) {
            *c = clamp_u8(*c as f32 * alpha + beta);
        }
    }
}

/// 1-D Gaussian weights over `-r..=r`, normalised.
fn gaussian_weights(r: i64, sigma: f32) -> Vec<f32> {
    let weights: Vec<f32> = (-r..=r)
        .map(|k| (-((k * k) as f32) / (2.0 * sigma * sigma)).exp())
        .collect();
    let sum: f32 = weights.iter().sum();
    weights.into_iter().map(|w| w / sum).collect()
}

/// Separable Gaussian with replicated borders.
pub fn gaussian_blur(src: &Mat, dst: &mut Mat, ksize: u32, sigma: f32) {
    dst.data.copy_from_slice(&src.data);
    if ksize <= 1 || sigma <= 0.0 {
        return;
    }
    let r = fit_radius(ksize / 2, src.cols, src.rows) as i64;
    let weights = gaussian_weights(r, sigma);
    let colour = src.channels.min(3);

    for horizontal in [true, false] {
        let pass = dst.clone();
        for y in 0..src.rows as i64 {
            for x in 0..src.cols as i64 {
                let mut acc = [0.0f32; 3];
                for (k, w) in (-r..=r).zip(&weights) {
                    let px = if horizontal { pass.clamped(x + k, y) } else { pass.clamped(x, y + k) };
                    for c in 0..colour {
                        acc[c] += px[c] as f32 * w;
                    }
                }
                let o = dst.offset(x as u32, y as u32);
                for c in 0..colour {
                    dst.data[o + c] = clamp_u8(acc[c]);
                }
            }
        }
    }
}

/// 3×3 correlation with replicated borders.
pub fn filter2d(src: &Mat, dst: &mut Mat, kernel: &[f32; 9]) {
    dst.data.copy_from_slice(&src.data);
    let colour = src.channels.min(3);
    for y in 0..src.rows as i64 {
        for x in 0..src.cols as i64 {
            let mut acc = [0.0f32; 3];
            for (k, w) in kernel.iter().enumerate() {
                if *w == 0.0 {
                    continue;
                }
                let px = src.clamped(x + k as i64 % 3 - 1, y + k as i64 / 3 - 1);
                for c in 0..colour {
                    acc[c] += px[c] as f32 * w;
                }
            }
            let o = dst.offset(x as u32, y as u32);
            for c in 0..colour {
                dst.data[o + c] = clamp_u8(acc[c]);
            }
        }
    }
}

/// Single-channel BT.601 luminance.
pub fn cvt_gray(src: &Mat, dst: &mut Mat) {
    for (g, px) in dst.data.iter_mut().zip(src.data.chunks_exact(src.channels)) {
        *g = clamp_u8(LUMA_R * px[0] as f32 + LUMA_G * px[1] as f32 + LUMA_B * px[2] as f32);
    }
}

/// Full-range YCrCb (JPEG convention), three channels.
pub fn cvt_ycrcb(src: &Mat, dst: &mut Mat) {
    for (out, px) in dst.data.chunks_exact_mut(3).zip(src.data.chunks_exact(src.channels)) {
        let (r, g, b) = (px[0] as f32, px[1] as f32, px[2] as f32);
        let y = LUMA_R * r + LUMA_G * g + LUMA_B * b;
        out[0] = clamp_u8(y);
        out[1] = clamp_u8((r - y) * 0.713 + 128.0);
        out[2] = clamp_u8((b - y) * 0.564 + 128.0);
    }
}

/// Sobel gradient magnitude of a single-channel matrix, saturated to 255.
pub fn sobel_magnitude(gray: &Mat, dst: &mut Mat) {
    for y in 0..gray.rows as i64 {
        for x in 0..gray.cols as i64 {
            let p = |dx: i64, dy: i64| gray.clamped(x + dx, y + dy)[0] as f32;
            let gx = (p(1, -1) + 2.0 * p(1, 0) + p(1, 1)) - (p(-1, -1) + 2.0 * p(-1, 0) + p(-1, 1));
            let gy = (p(-1, 1) + 2.0 * p(0, 1) + p(1, 1)) - (p(-1, -1) + 2.0 * p(0, -1) + p(1, -1));
            let o = dst.offset(x as u32, y as u32);
            dst.data[o] = clamp_u8((gx * gx + gy * gy).sqrt());
        }
    }
}

/// Binary threshold: `> thresh` becomes 255, the rest 0.
pub fn threshold(src: &Mat, dst: &mut Mat, thresh: f32) {
    for (d, &s) in dst.data.iter_mut().zip(&src.data) {
        *d = if s as f32 > thresh { 255 } else { 0 };
    }
}

/// Spread a single-channel matrix over the colour channels of a 4-channel
/// `dst`, taking alpha from `alpha_src`.
pub fn merge_gray(gray: &Mat, alpha_src: &Mat, dst: &mut Mat) {
    for ((out, &g), src) in dst
        .data
        .chunks_exact_mut(4)
        .zip(&gray.data)
        .zip(alpha_src.data.chunks_exact(4))
    {
        out.copy_from_slice(&[g, g, g, src[3]]);
    }
}

/// Median over a `(2r+1)²` window per colour channel.
pub fn median_blur(src: &Mat, dst: &mut Mat, radius: u32) {
    dst.data.copy_from_slice(&src.data);
    let r = fit_radius(radius, src.cols, src.rows) as i64;
    let colour = src.channels.min(3);
    let side = 2 * r as usize + 1;
    let mut window = Vec::with_capacity(side.saturating_mul(side));
    for y in 0..src.rows as i64 {
        for x in 0..src.cols as i64 {
            let o = dst.offset(x as u32, y as u32);
            for c in 0..colour {
                window.clear();
                for dy in -r..=r {
                    for dx in -r..=r {
                        window.push(src.clamped(x + dx, y + dy)[c]);
                    }
                }
                let mid = window.len() / 2;
                let (_, median, _) = window.select_nth_unstable(mid);
                dst.data[o + c] = *median;
            }
        }
    }
}

/// Edge-preserving bilateral filter over a `diameter`-wide window.
pub fn bilateral(src: &Mat, dst: &mut Mat, diameter: u32, sigma_color: f32, sigma_space: f32) {
    dst.data.copy_from_slice(&src.data);
    let r = fit_radius(diameter / 2, src.cols, src.rows) as i64;
    let colour = src.channels.min(3);
    let space_coeff = -0.5 / (sigma_space * sigma_space);
    let color_coeff = -0.5 / (sigma_color * sigma_color);

    for y in 0..src.rows as i64 {
        for x in 0..src.cols as i64 {
            let centre = src.at(x as u32, y as u32);
            let mut acc = [0.0f32; 3];
            let mut total = 0.0f32;
            for dy in -r..=r {
                for dx in -r..=r {
                    let px = src.clamped(x + dx, y + dy);
                    let dist2: f32 = (0..colour)
                        .map(|c| {
                            let d = px[c] as f32 - centre[c] as f32;
                            d * d
                        })
                        .sum();
                    let w = (((dx * dx + dy * dy) as f32) * space_coeff + dist2 * color_coeff).exp();
                    for c in 0..colour {
                        acc[c] += px[c] as f32 * w;
                    }
                    total += w;
                }
            }
            let o = dst.offset(x as u32, y as u32);
            for c in 0..colour {
                dst.data[o + c] = clamp_u8(acc[c] / total);
            }
        }
    }
}

/// Per-channel mean and standard deviation.
pub fn mean_std_dev(src: &Mat) -> (Vec<f64>, Vec<f64>) {
    let n = src.pixel_count().max(1) as f64;
    let mut sum = vec![0.0f64; src.channels];
    let mut sq = vec![0.0f64; src.channels];
    for px in src.data.chunks_exact(src.channels) {
        for (c, &v) in px.iter().enumerate() {
            sum[c] += v as f64;
            sq[c] += (v as f64) * (v as f64);
        }
    }
    let mean: Vec<f64> = sum.iter().map(|s| s / n).collect();
    let std = sq
        .iter()
        .zip(&mean)
        .map(|(q, m)| (q / n - m * m).max(0.0).sqrt())
        .collect();
    (mean, std)
}

/// 4-neighbour Laplacian of a single-channel matrix as signed values.
pub fn laplacian(gray: &Mat) -> Vec<f32> {
    let mut out = Vec::with_capacity(gray.pixel_count());
    for y in 0..gray.rows as i64 {
        for x in 0..gray.cols as i64 {
            let p = |dx: i64, dy: i64| gray.clamped(x + dx, y + dy)[0] as f32;
            out.push(p(-1, 0) + p(1, 0) + p(0, -1) + p(0, 1) - 4.0 * p(0, 0));
        }
    }
    out
}

/// Connected regions (4-connectivity) of a single-channel mask's non-zero
/// pixels, as bounding box plus pixel count.
pub fn connected_components(mask: &Mat) -> Vec<(BoundingBox, usize)> {
    let (w, h) = (mask.cols as usize, mask.rows as usize);
    let mut visited = vec![false; w * h];
    let mut regions = Vec::new();
    let mut queue = std::collections::VecDeque::new();

    for start in 0..w * h {
        if visited[start] || mask.data[start] == 0 {
            continue;
        }
        visited[start] = true;
        queue.push_back(start);
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (w, h, 0, 0);
        let mut area = 0;
        while let Some(i) = queue.pop_front() {
            let (x, y) = (i % w, i / w);
            area += 1;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
            let neighbours = [
                (x > 0).then(|| i - 1),
                (x + 1 < w).then(|| i + 1),
                (y > 0).then(|| i - w),
                (y + 1 < h).then(|| i + w),
            ];
            for n in neighbours.into_iter().flatten() {
                if !visited[n] && mask.data[n] != 0 {
                    visited[n] = true;
                    queue.push_back(n);
                }
            }
        }
        regions.push((
            BoundingBox {
                x: min_x as u32,
                y: min_y as u32,
                width: (max_x - min_x + 1) as u32,
                height: (max_y - min_y + 1) as u32,
            },
            area,
        ));
    }
    regions
}
