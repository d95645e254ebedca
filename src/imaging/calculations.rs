//! Pure calculation functions for geometry and filter parameters.
//!
//! All functions here are pure and testable without any pixels or backends.
//! Backends call into this module so that the numbers (rotated canvas size,
//! kernel sizes, crop bounds) agree no matter which engine runs the pixels.

use super::params::CropRect;

/// ITU-R BT.601 luma weights.
pub const LUMA_R: f32 = 0.299;
pub const LUMA_G: f32 = 0.587;
pub const LUMA_B: f32 = 0.114;

/// Luminance of an 8-bit RGB triple, in `0.0..=255.0`.
#[inline]
pub fn luminance(r: u8, g: u8, b: u8) -> f32 {
    LUMA_R * r as f32 + LUMA_G * g as f32 + LUMA_B * b as f32
}

/// Round and clamp a channel value to `u8`.
#[inline]
pub fn clamp_u8(value: f32) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(0.0, 255.0) as u8
}

/// Full-range YCbCr back to RGB with the luma weights above; `cb` and `cr`
/// are centred on zero.
pub fn ycbcr_to_rgb(y: f32, cb: f32, cr: f32) -> [u8; 3] {
    let r = y + 2.0 * (1.0 - LUMA_R) * cr;
    let b = y + 2.0 * (1.0 - LUMA_B) * cb;
    let g = (y - LUMA_R * r - LUMA_B * b) / LUMA_G;
    [clamp_u8(r), clamp_u8(g), clamp_u8(b)]
}

/// `#rrggbb` for an RGB triple.
pub fn hex_color(color: [u8; 3]) -> String {
    format!("#{:02x}{:02x}{:02x}", color[0], color[1], color[2])
}

/// Sine and cosine of `degrees`, exact for multiples of 90°.
///
/// `f64::cos(PI / 2)` is ~6e-17, which would otherwise leak into canvas sizes
/// and sampling positions for right-angle rotations.
pub fn rotation_trig(degrees: f64) -> (f64, f64) {
    let turns = degrees.rem_euclid(360.0);
    if (turns / 90.0).fract().abs() < 1e-9 {
        match (turns / 90.0).round() as i64 % 4 {
            0 => (0.0, 1.0),
            1 => (1.0, 0.0),
            2 => (0.0, -1.0),
            _ => (-1.0, 0.0),
        }
    } else {
        let rad = degrees.to_radians();
        (rad.sin(), rad.cos())
    }
}

/// Canvas size that holds a `width`×`height` image rotated by `degrees`.
///
/// `new_w = ceil(w·|cos θ| + h·|sin θ|)`, `new_h = ceil(w·|sin θ| + h·|cos θ|)`.
///
/// # Examples
/// ```
/// # use pixelworks::imaging::calculations::rotated_bounds;
/// assert_eq!(rotated_bounds(100, 50, 90.0), (50, 100));
/// assert_eq!(rotated_bounds(100, 100, 45.0), (142, 142));
/// ```
pub fn rotated_bounds(width: u32, height: u32, degrees: f64) -> (u32, u32) {
    let (sin, cos) = rotation_trig(degrees);
    let (w, h) = (width as f64, height as f64);
    let new_w = w * cos.abs() + h * sin.abs();
    let new_h = w * sin.abs() + h * cos.abs();
    // Absorb float noise so exact sizes don't round up by a pixel.
    let snap = |v: f64| ((v - 1e-6).ceil().max(1.0)) as u32;
    (snap(new_w), snap(new_h))
}

/// Inverse mapping for a rotation about the centre of an enlarged canvas.
///
/// Positive angles rotate clockwise in image coordinates (y pointing down).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotationMap {
    sin: f64,
    cos: f64,
    src_cx: f64,
    src_cy: f64,
    dst_cx: f64,
    dst_cy: f64,
    pub dst_width: u32,
    pub dst_height: u32,
}

impl RotationMap {
    pub fn new(src_width: u32, src_height: u32, degrees: f64) -> Self {
        let (sin, cos) = rotation_trig(degrees);
        let (dst_width, dst_height) = rotated_bounds(src_width, src_height, degrees);
        Self {
            sin,
            cos,
            src_cx: src_width as f64 / 2.0,
            src_cy: src_height as f64 / 2.0,
            dst_cx: dst_width as f64 / 2.0,
            dst_cy: dst_height as f64 / 2.0,
            dst_width,
            dst_height,
        }
    }

    /// Source coordinates (pixel-centre convention) that land on the centre of
    /// destination pixel `(x, y)`.
    pub fn source_of(&self, x: u32, y: u32) -> (f64, f64) {
        let dx = x as f64 + 0.5 - self.dst_cx;
        let dy = y as f64 + 0.5 - self.dst_cy;
        let sx = self.cos * dx + self.sin * dy + self.src_cx - 0.5;
        let sy = -self.sin * dx + self.cos * dy + self.src_cy - 0.5;
        (sx, sy)
    }

    /// Forward affine matrix `[a, b, c, d, e, f]` mapping source to destination
    /// (`x' = a·x + c·y + e`, `y' = b·x + d·y + f`), the 2D-context convention.
    pub fn forward_matrix(&self) -> [f64; 6] {
        let (a, b, c, d) = (self.cos, self.sin, -self.sin, self.cos);
        let e = self.dst_cx - (a * self.src_cx + c * self.src_cy);
        let f = self.dst_cy - (b * self.src_cx + d * self.src_cy);
        [a, b, c, d, e, f]
    }

    /// Whether the angle is a multiple of 90°.
    pub fn is_right_angle(&self) -> bool {
        (self.sin == 0.0 || self.cos == 0.0) && (self.sin.abs() + self.cos.abs() == 1.0)
    }

    /// Quarter turns clockwise for right-angle rotations (0..=3).
    pub fn quarter_turns(&self) -> Option<u8> {
        match (self.sin as i8, self.cos as i8) {
            (0, 1) if self.is_right_angle() => Some(0),
            (1, 0) if self.is_right_angle() => Some(1),
            (0, -1) if self.is_right_angle() => Some(2),
            (-1, 0) if self.is_right_angle() => Some(3),
            _ => None,
        }
    }
}

/// Check that `rect` is non-empty and lies inside a `width`×`height` image.
pub fn validate_crop(width: u32, height: u32, rect: &CropRect) -> Result<(), String> {
    if rect.width == 0 || rect.height == 0 {
        return Err(format!(
            "crop rectangle {}x{} is empty",
            rect.width, rect.height
        ));
    }
    let right = rect.x as u64 + rect.width as u64;
    let bottom = rect.y as u64 + rect.height as u64;
    if right > width as u64 || bottom > height as u64 {
        return Err(format!(
            "crop rectangle {}x{}+{}+{} exceeds image bounds {}x{}",
            rect.width, rect.height, rect.x, rect.y, width, height
        ));
    }
    Ok(())
}

/// Check resize targets are non-zero.
pub fn validate_resize(width: u32, height: u32) -> Result<(), String> {
    if width == 0 || height == 0 {
        return Err(format!("invalid resize target {width}x{height}"));
    }
    Ok(())
}

/// Upper bound on any neighbourhood radius derived from an intensity.
pub const MAX_RADIUS: u32 = 1 << 15;

/// Odd Gaussian kernel size for an intensity around 1.0: `2·ceil(2·i) + 1`,
/// with the half-width capped at [`MAX_RADIUS`].
pub fn gaussian_kernel_size(intensity: f32) -> u32 {
    let i = if intensity.is_finite() { intensity.max(0.0) } else { 1.0 };
    let half = ((2.0 * i).ceil().min(MAX_RADIUS as f32)) as u32;
    2 * half + 1
}

/// Sigma implied by a kernel size when none is given
/// (`0.3·((k−1)·0.5 − 1) + 0.8`).
pub fn sigma_for_kernel(kernel: u32) -> f32 {
    0.3 * ((kernel as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

/// Neighbourhood radius for median/box filters, in `1..=MAX_RADIUS`.
pub fn window_radius(intensity: f32) -> u32 {
    if !intensity.is_finite() {
        return 1;
    }
    intensity.max(0.0).round().clamp(1.0, MAX_RADIUS as f32) as u32
}

/// Shrink a radius to the image extent. Past it every extra tap only
/// repeats a border pixel.
pub fn fit_radius(radius: u32, width: u32, height: u32) -> u32 {
    radius.min(width.max(height))
}

/// Cap a blur sigma at the image extent; NaN becomes 1.
pub fn fit_sigma(sigma: f32, width: u32, height: u32) -> f32 {
    if sigma.is_nan() {
        return 1.0;
    }
    sigma.min(width.max(height) as f32)
}

/// Number of posterize levels per channel, at least 2.
pub fn posterize_levels(intensity: f32) -> u32 {
    if !intensity.is_finite() {
        return 4;
    }
    ((intensity.max(0.0) * 4.0).round() as u32).clamp(2, 256)
}

/// Adjustment value in `-1.0..=1.0` for a brightness/contrast filter expressed
/// as an intensity around 1.0.
pub fn adjustment_from_intensity(intensity: f32) -> f32 {
    if !intensity.is_finite() {
        return 0.0;
    }
    (intensity - 1.0).clamp(-1.0, 1.0)
}

/// Clamp an adjustment value into `-1.0..=1.0`; NaN becomes 0.
pub fn clamp_adjustment(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(-1.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ycbcr_inverts_the_luma_weights() {
        assert_eq!(ycbcr_to_rgb(128.0, 0.0, 0.0), [128, 128, 128]);
        let y = LUMA_R * 255.0;
        let cb = -y / (2.0 * (1.0 - LUMA_B));
        let cr = (255.0 - y) / (2.0 * (1.0 - LUMA_R));
        assert_eq!(ycbcr_to_rgb(y, cb, cr), [255, 0, 0]);
        assert_eq!(ycbcr_to_rgb(300.0, 0.0, 0.0), [255, 255, 255]);
    }

    #[test]
    fn kernel_sizes_stay_bounded_for_huge_intensities() {
        assert_eq!(gaussian_kernel_size(1.0), 5);
        assert_eq!(gaussian_kernel_size(3e9), 2 * MAX_RADIUS + 1);
        assert_eq!(gaussian_kernel_size(f32::MAX), 2 * MAX_RADIUS + 1);
        assert_eq!(window_radius(1e12), MAX_RADIUS);
        assert_eq!(window_radius(f32::INFINITY), 1);
        assert_eq!(fit_radius(MAX_RADIUS, 4, 3), 4);
        assert_eq!(fit_sigma(1e12, 6, 9), 9.0);
        assert_eq!(fit_sigma(f32::INFINITY, 6, 9), 9.0);
        assert_eq!(fit_sigma(f32::NAN, 6, 9), 1.0);
        assert_eq!(fit_sigma(0.5, 6, 9), 0.5);
    }

    #[test]
    fn rotated_bounds_right_angles_are_exact() {
        assert_eq!(rotated_bounds(100, 50, 90.0), (50, 100));
        assert_eq!(rotated_bounds(100, 50, -90.0), (50, 100));
        assert_eq!(rotated_bounds(100, 50, 180.0), (100, 50));
        assert_eq!(rotated_bounds(100, 50, 270.0), (50, 100));
        assert_eq!(rotated_bounds(100, 50, 360.0), (100, 50));
    }

    #[test]
    fn rotated_bounds_arbitrary_angle() {
        // 100·cos30 + 50·sin30 = 111.60, 100·sin30 + 50·cos30 = 93.30
        assert_eq!(rotated_bounds(100, 50, 30.0), (112, 94));
        assert_eq!(rotated_bounds(100, 100, 45.0), (142, 142));
    }

    #[test]
    fn rotation_map_quarter_turn_maps_corners() {
        let map = RotationMap::new(4, 2, 90.0);
        assert_eq!((map.dst_width, map.dst_height), (2, 4));
        assert_eq!(map.quarter_turns(), Some(1));
        // Clockwise: destination top-right comes from source top-left.
        let (sx, sy) = map.source_of(1, 0);
        assert!((sx - 0.0).abs() < 1e-9 && (sy - 0.0).abs() < 1e-9);
        // Destination top-left comes from source bottom-left.
        let (sx, sy) = map.source_of(0, 0);
        assert!((sx - 0.0).abs() < 1e-9 && (sy - 1.0).abs() < 1e-9);
    }

    #[test]
    fn rotation_map_identity() {
        let map = RotationMap::new(3, 3, 0.0);
        assert_eq!(map.quarter_turns(), Some(0));
        assert_eq!(map.source_of(2, 1), (2.0, 1.0));
        assert_eq!(map.forward_matrix(), [1.0, 0.0, -0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn rotation_map_non_right_angle() {
        let map = RotationMap::new(10, 10, 45.0);
        assert_eq!(map.quarter_turns(), None);
    }

    #[test]
    fn crop_validation() {
        assert!(validate_crop(10, 10, &CropRect { x: 2, y: 2, width: 8, height: 8 }).is_ok());
        assert!(validate_crop(10, 10, &CropRect { x: 3, y: 0, width: 8, height: 1 }).is_err());
        assert!(validate_crop(10, 10, &CropRect { x: 0, y: 0, width: 0, height: 1 }).is_err());
        assert!(
            validate_crop(10, 10, &CropRect { x: u32::MAX, y: 0, width: 2, height: 1 }).is_err()
        );
    }

    #[test]
    fn kernel_sizes_are_odd() {
        assert_eq!(gaussian_kernel_size(0.0), 1);
        assert_eq!(gaussian_kernel_size(1.0), 5);
        assert_eq!(gaussian_kernel_size(1.2), 7);
        assert_eq!(gaussian_kernel_size(f32::NAN), 5);
        assert!((sigma_for_kernel(5) - 1.1).abs() < 1e-6);
    }

    #[test]
    fn luminance_weights() {
        assert!((luminance(255, 255, 255) - 255.0).abs() < 1e-3);
        assert!((luminance(255, 0, 0) / 255.0 - 0.299).abs() < 1e-6);
    }

    #[test]
    fn hex_formatting() {
        assert_eq!(hex_color([255, 0, 16]), "#ff0010");
    }

    #[test]
    fn intensity_helpers() {
        assert_eq!(window_radius(0.2), 1);
        assert_eq!(window_radius(2.6), 3);
        assert_eq!(posterize_levels(1.0), 4);
        assert_eq!(posterize_levels(0.0), 2);
        assert_eq!(adjustment_from_intensity(1.5), 0.5);
        assert_eq!(adjustment_from_intensity(-3.0), -1.0);
        assert_eq!(clamp_adjustment(f32::NAN), 0.0);
    }
}
