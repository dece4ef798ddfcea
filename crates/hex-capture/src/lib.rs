use anyhow::{Context, Result};
use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Floating-point screen coordinate
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PixelPoint {
    pub x: f64,
    pub y: f64,
}

impl PixelPoint {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn offset(&self, dx: f64, dy: f64) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }
}

/// Axis-aligned pixel bounds (top-left origin)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl PixelRect {
    /// Square of side `side` centred on `center`
    pub fn square_around(center: PixelPoint, side: f64) -> Self {
        Self {
            x: center.x - side / 2.0,
            y: center.y - side / 2.0,
            width: side,
            height: side,
        }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    /// Overlap extent along each axis; zero or negative means disjoint on that axis.
    pub fn overlap_extent(&self, other: &PixelRect) -> (f64, f64) {
        let ox = self.right().min(other.right()) - self.x.max(other.x);
        let oy = self.bottom().min(other.bottom()) - self.y.max(other.y);
        (ox, oy)
    }

    /// True if the rect lies entirely inside a `width`×`height` frame
    pub fn is_within(&self, width: f64, height: f64) -> bool {
        self.x >= 0.0 && self.y >= 0.0 && self.right() <= width && self.bottom() <= height
    }
}

/// Rec.601 luma of an RGBA pixel, scaled to [0, 1]
pub fn luminance(px: &Rgba<u8>) -> f64 {
    (0.299 * px[0] as f64 + 0.587 * px[1] as f64 + 0.114 * px[2] as f64) / 255.0
}

/// A fixed-size square pixel buffer cropped and aligned to one slot.
///
/// Detectors only read it. The hex validity mask is implicit in the size.
#[derive(Debug, Clone)]
pub struct NormalizedRegion {
    image: RgbaImage,
}

impl NormalizedRegion {
    /// Wrap a square image. Returns `None` for empty or non-square buffers.
    pub fn new(image: RgbaImage) -> Option<Self> {
        if image.width() == 0 || image.width() != image.height() {
            return None;
        }
        Some(Self { image })
    }

    pub fn from_fn(size: u32, f: impl FnMut(u32, u32) -> Rgba<u8>) -> Self {
        Self {
            image: RgbaImage::from_fn(size.max(1), size.max(1), f),
        }
    }

    pub fn uniform(size: u32, rgba: [u8; 4]) -> Self {
        Self {
            image: RgbaImage::from_pixel(size.max(1), size.max(1), Rgba(rgba)),
        }
    }

    pub fn size(&self) -> u32 {
        self.image.width()
    }

    pub fn pixel(&self, x: u32, y: u32) -> &Rgba<u8> {
        self.image.get_pixel(x, y)
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }
}

/// Crop a pixel rect from a frame, clamped to the frame bounds.
/// Returns `None` when nothing of the rect lies inside the frame.
pub fn crop_rect(frame: &RgbaImage, rect: &PixelRect) -> Option<RgbaImage> {
    let (w, h) = (frame.width(), frame.height());
    if w == 0 || h == 0 {
        return None;
    }

    let x0 = rect.x.max(0.0).floor() as u32;
    let y0 = rect.y.max(0.0).floor() as u32;
    let x1 = (rect.right().max(0.0).ceil() as u32).min(w);
    let y1 = (rect.bottom().max(0.0).ceil() as u32).min(h);

    if x0 >= x1 || y0 >= y1 {
        return None;
    }

    Some(image::imageops::crop_imm(frame, x0, y0, x1 - x0, y1 - y0).to_image())
}

/// Crop a slot's bounds and resize them to a `size`×`size` normalized region.
pub fn normalize_region(
    frame: &RgbaImage,
    rect: &PixelRect,
    size: u32,
) -> Option<NormalizedRegion> {
    let crop = crop_rect(frame, rect)?;
    let resized = if crop.width() == size && crop.height() == size {
        crop
    } else {
        image::imageops::resize(&crop, size, size, image::imageops::FilterType::Triangle)
    };
    NormalizedRegion::new(resized)
}

/// Sampled pixel access to a screenshot, used by structural scale estimation.
pub trait PixelSource: Send + Sync {
    fn dimensions(&self) -> (u32, u32);

    /// Luminance in [0, 1] at an in-bounds pixel
    fn luminance_at(&self, x: u32, y: u32) -> f64;
}

impl PixelSource for RgbaImage {
    fn dimensions(&self) -> (u32, u32) {
        (self.width(), self.height())
    }

    fn luminance_at(&self, x: u32, y: u32) -> f64 {
        luminance(self.get_pixel(x, y))
    }
}

/// Load a screenshot from disk as RGBA
pub fn load_screenshot(path: &Path) -> Result<RgbaImage> {
    let img = image::open(path)
        .with_context(|| format!("Failed to open screenshot {}", path.display()))?
        .to_rgba8();
    debug!(
        "Loaded screenshot {} ({}x{})",
        path.display(),
        img.width(),
        img.height()
    );
    Ok(img)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crop_rect() {
        let img = RgbaImage::new(1920, 1080);
        let rect = PixelRect {
            x: 960.0,
            y: 540.0,
            width: 192.0,
            height: 108.0,
        };
        let cropped = crop_rect(&img, &rect).unwrap();
        assert_eq!(cropped.width(), 192);
        assert_eq!(cropped.height(), 108);
    }

    #[test]
    fn test_crop_rect_clamps_to_frame() {
        let img = RgbaImage::new(100, 100);
        let rect = PixelRect {
            x: 90.0,
            y: -5.0,
            width: 20.0,
            height: 20.0,
        };
        let cropped = crop_rect(&img, &rect).unwrap();
        assert_eq!(cropped.dimensions(), (10, 15));

        let outside = PixelRect {
            x: 150.0,
            y: 150.0,
            width: 10.0,
            height: 10.0,
        };
        assert!(crop_rect(&img, &outside).is_none());
    }

    #[test]
    fn test_normalize_region_resizes() {
        let img = RgbaImage::from_pixel(200, 200, Rgba([200, 200, 200, 255]));
        let rect = PixelRect::square_around(PixelPoint::new(100.0, 100.0), 35.0);
        let region = normalize_region(&img, &rect, 48).unwrap();
        assert_eq!(region.size(), 48);
        let v = region.pixel(24, 24)[0];
        assert!((199..=201).contains(&v), "uniform crop should stay ~200, got {}", v);
    }

    #[test]
    fn test_non_square_region_rejected() {
        assert!(NormalizedRegion::new(RgbaImage::new(48, 40)).is_none());
        assert!(NormalizedRegion::new(RgbaImage::new(0, 0)).is_none());
    }

    #[test]
    fn test_overlap_extent() {
        let a = PixelRect {
            x: 0.0,
            y: 0.0,
            width: 10.0,
            height: 10.0,
        };
        let b = PixelRect {
            x: 8.0,
            y: 12.0,
            width: 10.0,
            height: 10.0,
        };
        let (ox, oy) = a.overlap_extent(&b);
        assert_eq!(ox, 2.0);
        assert_eq!(oy, -2.0);
        assert!(a.is_within(10.0, 10.0));
        assert!(!b.is_within(10.0, 10.0));
    }

    #[test]
    fn test_luminance_range() {
        assert_eq!(luminance(&Rgba([0, 0, 0, 255])), 0.0);
        assert!((luminance(&Rgba([255, 255, 255, 255])) - 1.0).abs() < 1e-9);
    }
}
