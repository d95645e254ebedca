//! A minimal 2D drawing surface with a canvas-style context.
//!
//! [`Surface`] is an RGBA bitmap, transparent when created. Drawing goes
//! through a [`Context2d`] borrowed from the destination surface: it carries
//! the current affine transform and filter chain, and `draw_image` renders a
//! source surface through both, source-over onto the destination.

use crate::imaging::calculations::{clamp_u8, fit_radius};
use crate::imaging::sampling::{self, Edge};
use image::RgbaImage;

/// Largest edge a surface may have.
pub const MAX_SURFACE_DIM: u32 = 32_767;

#[derive(Debug, Clone, PartialEq)]
pub enum CssFilter {
    /// Gaussian blur with this standard deviation in pixels.
    Blur(f32),
    Brightness(f32),
    Contrast(f32),
    Grayscale(f32),
    Sepia(f32),
    Invert(f32),
}

impl CssFilter {
    /// Colour filters map one pixel at a time; blur is a no-op here.
    fn map_pixel(&self, px: &mut [u8]) {
        let [r, g, b] = [px[0] as f32, px[1] as f32, px[2] as f32];
        let out = match *self {
            CssFilter::Blur(_) => return,
            CssFilter::Brightness(a) => [r * a, g * a, b * a],
            CssFilter::Contrast(a) => {
                let f = |c: f32| (c - 127.5) * a + 127.5;
                [f(r), f(g), f(b)]
            }
            CssFilter::Grayscale(amount) => {
                let s = 1.0 - amount.clamp(0.0, 1.0);
                matrix(
                    [
                        [0.2126 + 0.7874 * s, 0.7152 - 0.7152 * s, 0.0722 - 0.0722 * s],
                        [0.2126 - 0.2126 * s, 0.7152 + 0.2848 * s, 0.0722 - 0.0722 * s],
                        [0.2126 - 0.2126 * s, 0.7152 - 0.7152 * s, 0.0722 + 0.9278 * s],
                    ],
                    [r, g, b],
                )
            }
            CssFilter::Sepia(amount) => {
                let s = 1.0 - amount.clamp(0.0, 1.0);
                matrix(
                    [
                        [0.393 + 0.607 * s, 0.769 - 0.769 * s, 0.189 - 0.189 * s],
                        [0.349 - 0.349 * s, 0.686 + 0.314 * s, 0.168 - 0.168 * s],
                        [0.272 - 0.272 * s, 0.534 - 0.534 * s, 0.131 + 0.869 * s],
                    ],
                    [r, g, b],
                )
            }
            CssFilter::Invert(amount) => {
                let a = amount.clamp(0.0, 1.0);
                let f = |c: f32| a * (255.0 - c) + (1.0 - a) * c;
                [f(r), f(g), f(b)]
            }
        };
        px[0] = clamp_u8(out[0]);
        px[1] = clamp_u8(out[1]);
        px[2] = clamp_u8(out[2]);
    }
}

fn matrix(m: [[f32; 3]; 3], c: [f32; 3]) -> [f32; 3] {
    [
        m[0][0] * c[0] + m[0][1] * c[1] + m[0][2] * c[2],
        m[1][0] * c[0] + m[1][1] * c[1] + m[1][2] * c[2],
        m[2][0] * c[0] + m[2][1] * c[1] + m[2][2] * c[2],
    ]
}

#[derive(Debug, Clone, PartialEq)]
pub struct Surface {
    bitmap: RgbaImage,
}

impl Surface {
    pub fn new(width: u32, height: u32) -> Result<Self, String> {
        if width == 0 || height == 0 || width > MAX_SURFACE_DIM || height > MAX_SURFACE_DIM {
            return Err(format!("invalid surface size {width}x{height}"));
        }
        Ok(Self {
            bitmap: RgbaImage::new(width, height),
        })
    }

    pub fn width(&self) -> u32 {
        self.bitmap.width()
    }

    pub fn height(&self) -> u32 {
        self.bitmap.height()
    }

    /// Replace the whole surface with tightly packed RGBA.
    pub fn put_image_data(&mut self, rgba: Vec<u8>) -> Result<(), String> {
        let (w, h) = (self.width(), self.height());
        self.bitmap = RgbaImage::from_raw(w, h, rgba)
            .ok_or_else(|| format!("image data does not fill a {w}x{h} surface"))?;
        Ok(())
    }

    pub fn get_image_data(&self) -> Vec<u8> {
        self.bitmap.as_raw().clone()
    }

    pub fn context(&mut self) -> Context2d<'_> {
        Context2d {
            target: self,
            transform: IDENTITY,
            filters: Vec::new(),
            edge: Edge::Transparent,
        }
    }
}

const IDENTITY: [f64; 6] = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];

/// Drawing state bound to one destination surface.
pub struct Context2d<'a> {
    target: &'a mut Surface,
    transform: [f64; 6],
    filters: Vec<CssFilter>,
    edge: Edge,
}

impl Context2d<'_> {
    /// `[a, b, c, d, e, f]`: `x' = a·x + c·y + e`, `y' = b·x + d·y + f`.
    pub fn set_transform(&mut self, m: [f64; 6]) {
        self.transform = m;
    }

    pub fn scale(&mut self, sx: f64, sy: f64) {
        self.transform[0] *= sx;
        self.transform[1] *= sx;
        self.transform[2] *= sy;
        self.transform[3] *= sy;
    }

    pub fn translate(&mut self, tx: f64, ty: f64) {
        let [a, b, c, d, e, f] = self.transform;
        self.transform[4] = a * tx + c * ty + e;
        self.transform[5] = b * tx + d * ty + f;
    }

    pub fn set_filter(&mut self, filters: Vec<CssFilter>) {
        self.filters = filters;
    }

    /// What samples falling outside the source read. Transparent by default;
    /// scaled draws want `Edge::Clamp` so the border ring keeps its colour.
    pub(crate) fn set_edge_mode(&mut self, edge: Edge) {
        self.edge = edge;
    }

    /// Render `source` at the origin through the transform and the filter
    /// chain, composited source-over.
    pub fn draw_image(&mut self, source: &Surface) -> Result<(), String> {
        let [a, b, c, d, e, f] = self.transform;
        let det = a * d - b * c;
        if det.abs() < 1e-12 {
            return Err("non-invertible transform".into());
        }
        let (dw, dh) = (self.target.width(), self.target.height());
        let (sw, sh) = (source.width(), source.height());
        let src = source.bitmap.as_raw();

        let mut layer = vec![0u8; dw as usize * dh as usize * 4];
        for (y, row) in layer.chunks_exact_mut(dw as usize * 4).enumerate() {
            for (x, px) in row.chunks_exact_mut(4).enumerate() {
                let (dx, dy) = (x as f64 + 0.5 - e, y as f64 + 0.5 - f);
                let u = (d * dx - c * dy) / det;
                let v = (-b * dx + a * dy) / det;
                sampling::bilinear(src, sw, sh, 4, u - 0.5, v - 0.5, self.edge, px);
            }
        }

        for filter in &self.filters {
            match filter {
                CssFilter::Blur(sigma) => gaussian_blur(&mut layer, dw, dh, *sigma),
                pointwise => {
                    for px in layer.chunks_exact_mut(4) {
                        pointwise.map_pixel(px);
                    }
                }
            }
        }

        composite_over(&mut self.target.bitmap, &layer);
        Ok(())
    }
}

/// Source-over with straight alpha.
fn composite_over(dst: &mut [u8], src: &[u8]) {
    for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
        let sa = s[3] as f32 / 255.0;
        if sa >= 1.0 {
            d.copy_from_slice(s);
            continue;
        }
        if sa <= 0.0 {
            continue;
        }
        let da = d[3] as f32 / 255.0;
        let out_a = sa + da * (1.0 - sa);
        for i in 0..3 {
            let blended = (s[i] as f32 * sa + d[i] as f32 * da * (1.0 - sa)) / out_a;
            d[i] = clamp_u8(blended);
        }
        d[3] = clamp_u8(out_a * 255.0);
    }
}

/// Separable Gaussian over all four channels with clamped edges.
fn gaussian_blur(data: &mut [u8], width: u32, height: u32, sigma: f32) {
    if !sigma.is_finite() || sigma <= 0.0 {
        return;
    }
    let radius = fit_radius((sigma * 3.0).ceil() as u32, width, height) as i64;
    let weights: Vec<f32> = (-radius..=radius)
        .map(|k| (-(k * k) as f32 / (2.0 * sigma * sigma)).exp())
        .collect();
    let norm: f32 = weights.iter().sum();
    let (w, h) = (width as i64, height as i64);

    for horizontal in [true, false] {
        let src = data.to_vec();
        for y in 0..h {
            for x in 0..w {
                let mut acc = [0.0f32; 4];
                for (k, weight) in (-radius..=radius).zip(&weights) {
                    let (sx, sy) = if horizontal {
                        ((x + k).clamp(0, w - 1), y)
                    } else {
                        (x, (y + k).clamp(0, h - 1))
                    };
                    let i = (sy * w + sx) as usize * 4;
                    for (c, a) in acc.iter_mut().enumerate() {
                        *a += src[i + c] as f32 * weight;
                    }
                }
                let o = (y * w + x) as usize * 4;
                for (c, a) in acc.iter().enumerate() {
                    data[o + c] = clamp_u8(a / norm);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface_from(rgba: &[u8], w: u32, h: u32) -> Surface {
        let mut s = Surface::new(w, h).unwrap();
        s.put_image_data(rgba.to_vec()).unwrap();
        s
    }

    #[test]
    fn new_surface_is_transparent_and_bounded() {
        let s = Surface::new(2, 1).unwrap();
        assert_eq!(s.get_image_data(), vec![0; 8]);
        assert!(Surface::new(0, 4).is_err());
        assert!(Surface::new(MAX_SURFACE_DIM + 1, 1).is_err());
    }

    #[test]
    fn put_rejects_wrong_length() {
        let mut s = Surface::new(2, 2).unwrap();
        assert!(s.put_image_data(vec![0; 15]).is_err());
    }

    #[test]
    fn identity_draw_copies() {
        let rgba: Vec<u8> = (0..16u8).map(|i| if i % 4 == 3 { 255 } else { i * 10 }).collect();
        let src = surface_from(&rgba, 2, 2);
        let mut dst = Surface::new(2, 2).unwrap();
        dst.context().draw_image(&src).unwrap();
        assert_eq!(dst.get_image_data(), rgba);
    }

    #[test]
    fn edge_mode_decides_the_border_ring() {
        let src = surface_from(&[50, 60, 70, 255].repeat(4), 2, 2);
        let mut soft = Surface::new(6, 6).unwrap();
        let mut ctx = soft.context();
        ctx.scale(3.0, 3.0);
        ctx.draw_image(&src).unwrap();
        drop(ctx);
        assert!(soft.get_image_data()[3] < 255);

        let mut clamped = Surface::new(6, 6).unwrap();
        let mut ctx = clamped.context();
        ctx.scale(3.0, 3.0);
        ctx.set_edge_mode(Edge::Clamp);
        ctx.draw_image(&src).unwrap();
        drop(ctx);
        assert_eq!(clamped.get_image_data(), [50, 60, 70, 255].repeat(36));
    }

    #[test]
    fn translate_moves_the_window() {
        let rgba = [
            1, 1, 1, 255, 2, 2, 2, 255, //
            3, 3, 3, 255, 4, 4, 4, 255,
        ];
        let src = surface_from(&rgba, 2, 2);
        let mut dst = Surface::new(1, 1).unwrap();
        let mut ctx = dst.context();
        ctx.translate(-1.0, -1.0);
        ctx.draw_image(&src).unwrap();
        drop(ctx);
        assert_eq!(dst.get_image_data(), vec![4, 4, 4, 255]);
    }

    #[test]
    fn brightness_and_contrast_formulas() {
        let mut px = [100u8, 200, 50, 255];
        CssFilter::Brightness(0.5).map_pixel(&mut px);
        assert_eq!(px, [50, 100, 25, 255]);
        let mut px = [100u8, 200, 127, 9];
        CssFilter::Contrast(1.0).map_pixel(&mut px);
        assert_eq!(px, [100, 200, 127, 9]);
        CssFilter::Contrast(0.0).map_pixel(&mut px);
        assert_eq!(px, [128, 128, 128, 9]);
    }

    #[test]
    fn full_grayscale_and_invert() {
        let mut px = [255u8, 0, 0, 255];
        CssFilter::Grayscale(1.0).map_pixel(&mut px);
        assert_eq!(px, [54, 54, 54, 255]);
        CssFilter::Invert(1.0).map_pixel(&mut px);
        assert_eq!(px, [201, 201, 201, 255]);
    }

    #[test]
    fn zero_amount_filters_are_identity() {
        let mut px = [12u8, 34, 56, 255];
        CssFilter::Sepia(0.0).map_pixel(&mut px);
        CssFilter::Grayscale(0.0).map_pixel(&mut px);
        assert_eq!(px, [12, 34, 56, 255]);
    }

    #[test]
    fn singular_transform_is_an_error() {
        let src = Surface::new(1, 1).unwrap();
        let mut dst = Surface::new(1, 1).unwrap();
        let mut ctx = dst.context();
        ctx.scale(0.0, 1.0);
        assert!(ctx.draw_image(&src).is_err());
    }
}
