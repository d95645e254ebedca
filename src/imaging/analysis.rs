//! Per-pixel colour scan used by the canvas and software backends.
//!
//! Each channel is quantized into 32-wide buckets (8 per channel, 512 bucket
//! triples in total). Buckets are ranked by pixel count, ties broken by bucket
//! index, and the top five become the dominant colours. A bucket's reported
//! colour is the mean of the pixels that fell into it, so a solid image
//! reports its exact colour at 100 %.

use super::backend::DominantColor;
use super::calculations::{hex_color, luminance};

pub const BUCKET_WIDTH: u32 = 32;
pub const MAX_DOMINANT_COLORS: usize = 5;

const BUCKETS_PER_CHANNEL: usize = (256 / BUCKET_WIDTH) as usize;

/// Statistics gathered by [`scan_pixels`].
#[derive(Debug, Clone, PartialEq)]
pub struct PixelScan {
    pub dominant_colors: Vec<DominantColor>,
    pub brightness: f32,
    pub contrast: f32,
    pub sharpness: f32,
}

#[derive(Clone, Copy, Default)]
struct Bucket {
    count: u64,
    sums: [u64; 3],
}

#[inline]
fn bucket_index(r: u8, g: u8, b: u8) -> usize {
    let q = |c: u8| (c as u32 / BUCKET_WIDTH) as usize;
    (q(r) * BUCKETS_PER_CHANNEL + q(g)) * BUCKETS_PER_CHANNEL + q(b)
}

/// Scan interleaved pixels with `channels` bytes per pixel (3 or 4; alpha is
/// ignored).
pub fn scan_pixels(data: &[u8], width: u32, height: u32, channels: usize) -> PixelScan {
    let total = (width as usize * height as usize).max(1);
    let mut buckets = vec![Bucket::default(); BUCKETS_PER_CHANNEL.pow(3)];
    let mut lum = Vec::with_capacity(total);
    let mut lum_sum = 0.0f64;

    for px in data.chunks_exact(channels) {
        let (r, g, b) = (px[0], px[1], px[2]);
        let bucket = &mut buckets[bucket_index(r, g, b)];
        bucket.count += 1;
        bucket.sums[0] += r as u64;
        bucket.sums[1] += g as u64;
        bucket.sums[2] += b as u64;

        let y = luminance(r, g, b);
        lum_sum += y as f64;
        lum.push(y);
    }

    let mut ranked: Vec<(usize, Bucket)> = buckets
        .into_iter()
        .enumerate()
        .filter(|(_, b)| b.count > 0)
        .collect();
    ranked.sort_by(|(ia, a), (ib, b)| b.count.cmp(&a.count).then(ia.cmp(ib)));

    let dominant_colors = ranked
        .into_iter()
        .take(MAX_DOMINANT_COLORS)
        .map(|(_, bucket)| {
            let mean = |sum: u64| ((sum as f64 / bucket.count as f64).round()) as u8;
            let color = [mean(bucket.sums[0]), mean(bucket.sums[1]), mean(bucket.sums[2])];
            DominantColor {
                color,
                percentage: (bucket.count as f64 * 100.0 / total as f64) as f32,
                hex: hex_color(color),
            }
        })
        .collect();

    let mean = lum_sum / total as f64;
    let variance = lum
        .iter()
        .map(|&y| {
            let d = y as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / total as f64;

    PixelScan {
        dominant_colors,
        brightness: (mean / 255.0) as f32,
        contrast: (variance.sqrt() / 255.0) as f32,
        sharpness: laplacian_energy(&lum, width as usize, height as usize),
    }
}

/// Mean absolute 4-neighbour Laplacian of the luminance plane, scaled to
/// `0.0..=1.0`. Images smaller than 3×3 have no interior and score 0.
fn laplacian_energy(lum: &[f32], width: usize, height: usize) -> f32 {
    if width < 3 || height < 3 || lum.len() < width * height {
        return 0.0;
    }
    let mut sum = 0.0f64;
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let i = y * width + x;
            let lap = lum[i - 1] + lum[i + 1] + lum[i - width] + lum[i + width] - 4.0 * lum[i];
            sum += lap.abs() as f64;
        }
    }
    let interior = ((width - 2) * (height - 2)) as f64;
    ((sum / interior) / 255.0).min(1.0) as f32
}
