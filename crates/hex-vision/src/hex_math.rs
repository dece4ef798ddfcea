//! Hex-lattice geometry.
//!
//! Axial coordinates `(q, r)` on a flat-top lattice with `s = -q - r`
//! implied. Pixel conversions take a hex radius (centre to corner) and a
//! lattice origin in screenshot pixels.

use hex_capture::PixelPoint;
use serde::{Deserialize, Serialize};
use std::fmt;

const SQRT_3: f64 = 1.732_050_807_568_877_2;

/// Integer position on the hex lattice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AxialCoordinate {
    pub q: i32,
    pub r: i32,
}

impl AxialCoordinate {
    pub const fn new(q: i32, r: i32) -> Self {
        Self { q, r }
    }

    pub fn s(&self) -> i32 {
        -self.q - self.r
    }
}

impl fmt::Display for AxialCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "q{}r{}", self.q, self.r)
    }
}

/// Centre of hex `(q, r)` in pixels.
pub fn axial_to_pixel(q: i32, r: i32, hex_radius: f64, origin: PixelPoint) -> PixelPoint {
    let (qf, rf) = (q as f64, r as f64);
    PixelPoint {
        x: hex_radius * (1.5 * qf) + origin.x,
        y: hex_radius * (SQRT_3 / 2.0 * qf + SQRT_3 * rf) + origin.y,
    }
}

/// Hex containing `point`, by inverse transform and cube rounding.
pub fn pixel_to_axial(point: PixelPoint, hex_radius: f64, origin: PixelPoint) -> AxialCoordinate {
    let px = (point.x - origin.x) / hex_radius;
    let py = (point.y - origin.y) / hex_radius;

    let q = px * 2.0 / 3.0;
    let r = py / SQRT_3 - q / 2.0;
    cube_round(q, r)
}

/// Round fractional axial coordinates while keeping q + r + s = 0.
fn cube_round(q: f64, r: f64) -> AxialCoordinate {
    let s = -q - r;
    let mut rq = q.round();
    let mut rr = r.round();
    let rs = s.round();

    let dq = (rq - q).abs();
    let dr = (rr - r).abs();
    let ds = (rs - s).abs();

    if dq > dr && dq > ds {
        rq = -rr - rs;
    } else if dr > ds {
        rr = -rq - rs;
    }
    // otherwise s carries the largest error and is implied anyway

    AxialCoordinate::new(rq as i32, rr as i32)
}

/// Convert an odd-q offset position (column, row) to axial.
///
/// Rows of constant `row` form visual honeycomb rows, with odd columns
/// shifted half a hex down.
pub fn offset_to_axial(column: i32, row: i32) -> AxialCoordinate {
    AxialCoordinate::new(column, row - column.div_euclid(2))
}

/// Approximate hexagon membership for a point relative to the hex centre.
///
/// Three half-plane tests; cheap and symmetric, which is all masking needs.
pub fn is_in_hex_shape(local_x: f64, local_y: f64, radius: f64) -> bool {
    let dx = local_x.abs();
    let dy = local_y.abs();
    dx <= radius * SQRT_3 / 2.0 && dy <= radius && dx / SQRT_3 + dy <= radius
}

/// One pixel inside a hex mask
#[derive(Debug, Clone, Copy)]
pub struct MaskCell {
    pub x: u32,
    pub y: u32,
    /// Offset from the region centre, in pixels
    pub dx: f64,
    pub dy: f64,
    /// Distance from centre divided by the mask radius
    pub radius: f64,
    /// Angle in radians, [-π, π]
    pub angle: f64,
}

/// Precomputed hex validity mask for a square region.
///
/// Local coordinates are measured from pixel centres, so the mask is exactly
/// symmetric under 180° rotation.
#[derive(Debug, Clone)]
pub struct HexMask {
    size: u32,
    radius: f64,
    inside: Vec<bool>,
    cells: Vec<MaskCell>,
}

impl HexMask {
    pub fn new(size: u32) -> Self {
        let radius = size as f64 / 2.0;
        let half = size as f64 / 2.0;
        let mut inside = vec![false; (size * size) as usize];
        let mut cells = Vec::new();

        for y in 0..size {
            for x in 0..size {
                let dx = x as f64 + 0.5 - half;
                let dy = y as f64 + 0.5 - half;
                if is_in_hex_shape(dx, dy, radius) {
                    inside[(y * size + x) as usize] = true;
                    cells.push(MaskCell {
                        x,
                        y,
                        dx,
                        dy,
                        radius: (dx * dx + dy * dy).sqrt() / radius,
                        angle: dy.atan2(dx),
                    });
                }
            }
        }

        Self {
            size,
            radius,
            inside,
            cells,
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x < self.size && y < self.size && self.inside[(y * self.size + x) as usize]
    }

    /// Masked pixels in row-major order
    pub fn cells(&self) -> &[MaskCell] {
        &self.cells
    }

    pub fn count(&self) -> usize {
        self.cells.len()
    }

    /// The six corner directions of the mask shape, as unit offsets scaled by the radius
    pub fn corner_offsets(&self) -> [(f64, f64); 6] {
        let r = self.radius;
        let hx = r * SQRT_3 / 2.0;
        [
            (0.0, -r),
            (hx, -r / 2.0),
            (hx, r / 2.0),
            (0.0, r),
            (-hx, r / 2.0),
            (-hx, -r / 2.0),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axial_round_trip() {
        let origins = [
            PixelPoint::new(0.0, 0.0),
            PixelPoint::new(960.0, 540.0),
            PixelPoint::new(-13.25, 7.5),
        ];
        for &radius in &[24.0, 17.3, 48.0] {
            for &origin in &origins {
                for q in -12..=12 {
                    for r in -12..=12 {
                        let p = axial_to_pixel(q, r, radius, origin);
                        let back = pixel_to_axial(p, radius, origin);
                        assert_eq!(
                            back,
                            AxialCoordinate::new(q, r),
                            "round trip failed for ({}, {}) radius {} origin {:?}",
                            q,
                            r,
                            radius,
                            origin
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_axial_to_pixel_reference_values() {
        let origin = PixelPoint::new(100.0, 200.0);
        let p = axial_to_pixel(2, -1, 24.0, origin);
        assert!((p.x - (100.0 + 72.0)).abs() < 1e-9);
        // y = 24 * (sqrt3/2 * 2 - sqrt3) = 0
        assert!((p.y - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_pixel_to_axial_near_centre() {
        let origin = PixelPoint::new(0.0, 0.0);
        let centre = axial_to_pixel(3, -2, 20.0, origin);
        let nudged = centre.offset(4.0, -3.0);
        assert_eq!(pixel_to_axial(nudged, 20.0, origin), AxialCoordinate::new(3, -2));
    }

    #[test]
    fn test_is_in_hex_shape_symmetric() {
        let radius = 24.0;
        let mut y = -30.0;
        while y <= 30.0 {
            let mut x = -30.0;
            while x <= 30.0 {
                assert_eq!(
                    is_in_hex_shape(x, y, radius),
                    is_in_hex_shape(-x, -y, radius),
                    "asymmetric at ({}, {})",
                    x,
                    y
                );
                x += 0.25;
            }
            y += 0.25;
        }
    }

    #[test]
    fn test_is_in_hex_shape_bounds() {
        assert!(is_in_hex_shape(0.0, 0.0, 10.0));
        assert!(is_in_hex_shape(0.0, 9.9, 10.0));
        assert!(!is_in_hex_shape(0.0, 10.1, 10.0));
        assert!(!is_in_hex_shape(9.0, 0.0, 10.0));
        // corner region cut by the slanted half-plane
        assert!(!is_in_hex_shape(8.0, 6.0, 10.0));
    }

    #[test]
    fn test_hex_mask_rotation_symmetry() {
        let mask = HexMask::new(48);
        for y in 0..48 {
            for x in 0..48 {
                assert_eq!(mask.contains(x, y), mask.contains(47 - x, 47 - y));
            }
        }
        // area of the hexagon is about 2.6 * R^2
        let expected = 2.598 * 24.0 * 24.0;
        let count = mask.count() as f64;
        assert!(
            (count - expected).abs() / expected < 0.05,
            "mask area {} far from {}",
            count,
            expected
        );
    }

    #[test]
    fn test_offset_to_axial_rows() {
        // odd columns sit half a hex below even ones in the same row
        let origin = PixelPoint::new(0.0, 0.0);
        let even = offset_to_axial(0, 2);
        let odd = offset_to_axial(1, 2);
        let neg_odd = offset_to_axial(-1, 2);
        let pe = axial_to_pixel(even.q, even.r, 10.0, origin);
        let po = axial_to_pixel(odd.q, odd.r, 10.0, origin);
        let pn = axial_to_pixel(neg_odd.q, neg_odd.r, 10.0, origin);
        assert!((po.y - pe.y - 10.0 * SQRT_3 / 2.0).abs() < 1e-9);
        assert!((pn.y - po.y).abs() < 1e-9);
    }
}
