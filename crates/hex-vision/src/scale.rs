use hex_capture::{PixelPoint, PixelSource};
use hex_data::{ScaleSettings, ZoneLayout, KNOWN_ASPECT_RATIOS, SUPPORTED_RESOLUTIONS};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Largest relative aspect error the nearest-match strategy accepts
const MAX_ASPECT_ERROR: f64 = 0.15;

/// Rows/columns darker than this count as letterbox bars
const BAR_LUMINANCE: f64 = 0.04;

/// Confidence reported by the fallback estimate
const FALLBACK_CONFIDENCE: f64 = 0.1;

/// Upper bound on any consolidated confidence
const MAX_CONFIDENCE: f64 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleMethod {
    ResolutionLookup,
    AspectRatio,
    Structural,
    Consolidated,
    Fallback,
}

/// One strategy's opinion of the screenshot scale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleCandidate {
    pub scale_factor: f64,
    pub grid_origin: PixelPoint,
    pub confidence: f64,
    pub method: ScaleMethod,
}

/// Scale of a screenshot relative to the reference layout.
///
/// Built once per screenshot and never modified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleEstimate {
    pub scale_factor: f64,
    pub grid_origin: PixelPoint,
    pub confidence: f64,
    pub method: ScaleMethod,
    /// Every candidate considered, including those below the floor
    pub candidates: Vec<ScaleCandidate>,
}

impl ScaleEstimate {
    /// Estimate built from known values, bypassing the strategies.
    pub fn fixed(scale_factor: f64, grid_origin: PixelPoint) -> Self {
        Self {
            scale_factor,
            grid_origin,
            confidence: MAX_CONFIDENCE,
            method: ScaleMethod::ResolutionLookup,
            candidates: Vec::new(),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.method == ScaleMethod::Fallback
    }
}

/// Live content box of a screenshot, in pixels
#[derive(Debug, Clone, Copy, PartialEq)]
struct ContentBox {
    left: f64,
    top: f64,
    width: f64,
    height: f64,
}

/// Estimates screenshot scale and grid origin from dimensions and,
/// optionally, sampled pixels.
#[derive(Debug, Clone)]
pub struct ScaleEstimator {
    layout: ZoneLayout,
    settings: ScaleSettings,
}

impl ScaleEstimator {
    pub fn new(layout: ZoneLayout, settings: ScaleSettings) -> Self {
        Self { layout, settings }
    }

    /// Run every applicable strategy and consolidate. Never fails; degrades
    /// to a low-confidence fallback instead.
    pub fn estimate(
        &self,
        width: u32,
        height: u32,
        pixels: Option<&dyn PixelSource>,
    ) -> ScaleEstimate {
        if width == 0 || height == 0 {
            warn!("Degenerate screenshot size {}x{}, using fallback scale", width, height);
            return self.fallback(width, height, Vec::new());
        }

        let mut candidates = Vec::new();
        if let Some(c) = self.resolution_lookup(width, height) {
            candidates.push(c);
        }
        if let Some(c) = self.aspect_ratio_match(width, height) {
            candidates.push(c);
        }
        if let Some(source) = pixels {
            if source.dimensions() == (width, height) {
                if let Some(c) = self.structural(source) {
                    candidates.push(c);
                }
            } else {
                warn!(
                    "Pixel source is {:?} but screenshot is {}x{}; skipping structural scale",
                    source.dimensions(),
                    width,
                    height
                );
            }
        }

        for c in &candidates {
            debug!(
                "Scale candidate {:?}: scale={:.3} origin=({:.1}, {:.1}) confidence={:.2}",
                c.method, c.scale_factor, c.grid_origin.x, c.grid_origin.y, c.confidence
            );
        }

        self.consolidate(width, height, candidates)
    }

    fn consolidate(
        &self,
        width: u32,
        height: u32,
        candidates: Vec<ScaleCandidate>,
    ) -> ScaleEstimate {
        let floor = self.settings.confidence_floor;
        let contributing: Vec<&ScaleCandidate> = candidates
            .iter()
            .filter(|c| c.confidence >= floor && c.scale_factor > 0.0 && c.scale_factor.is_finite())
            .collect();

        let total_weight: f64 = contributing.iter().map(|c| c.confidence).sum();
        if contributing.is_empty() || total_weight <= 0.0 {
            warn!(
                "No scale candidate cleared confidence floor {:.2} for {}x{}, using fallback",
                floor, width, height
            );
            return self.fallback(width, height, candidates);
        }

        let scale_factor =
            contributing.iter().map(|c| c.scale_factor * c.confidence).sum::<f64>() / total_weight;
        let origin_x =
            contributing.iter().map(|c| c.grid_origin.x * c.confidence).sum::<f64>() / total_weight;
        let origin_y =
            contributing.iter().map(|c| c.grid_origin.y * c.confidence).sum::<f64>() / total_weight;
        let mean_confidence = total_weight / contributing.len() as f64;

        let method = if contributing.len() == 1 {
            contributing[0].method
        } else {
            ScaleMethod::Consolidated
        };

        debug!(
            "Scale estimate: {:.3} from {} candidate(s), confidence {:.2}",
            scale_factor,
            contributing.len(),
            mean_confidence.min(MAX_CONFIDENCE)
        );

        ScaleEstimate {
            scale_factor,
            grid_origin: PixelPoint::new(origin_x, origin_y),
            confidence: mean_confidence.min(MAX_CONFIDENCE),
            method,
            candidates,
        }
    }

    fn fallback(&self, width: u32, height: u32, candidates: Vec<ScaleCandidate>) -> ScaleEstimate {
        let content = ContentBox {
            left: (width as f64 - self.layout.reference_width) / 2.0,
            top: (height as f64 - self.layout.reference_height) / 2.0,
            width: self.layout.reference_width,
            height: self.layout.reference_height,
        };
        ScaleEstimate {
            scale_factor: 1.0,
            grid_origin: self.origin_in(&content, 1.0),
            confidence: FALLBACK_CONFIDENCE,
            method: ScaleMethod::Fallback,
            candidates,
        }
    }

    /// Fit the reference layout into a content box, centred.
    fn fit(&self, content: &ContentBox) -> (f64, PixelPoint) {
        let scale = (content.width / self.layout.reference_width)
            .min(content.height / self.layout.reference_height);
        let inner = ContentBox {
            left: content.left + (content.width - self.layout.reference_width * scale) / 2.0,
            top: content.top + (content.height - self.layout.reference_height * scale) / 2.0,
            width: self.layout.reference_width * scale,
            height: self.layout.reference_height * scale,
        };
        (scale, self.origin_in(&inner, scale))
    }

    fn origin_in(&self, content: &ContentBox, scale: f64) -> PixelPoint {
        PixelPoint::new(
            content.left + self.layout.reference_grid_origin.x * scale,
            content.top + self.layout.reference_grid_origin.y * scale,
        )
    }

    fn full_frame(width: u32, height: u32) -> ContentBox {
        ContentBox {
            left: 0.0,
            top: 0.0,
            width: width as f64,
            height: height as f64,
        }
    }

    /// Exact match against the supported resolutions table.
    fn resolution_lookup(&self, width: u32, height: u32) -> Option<ScaleCandidate> {
        let known = SUPPORTED_RESOLUTIONS
            .iter()
            .find(|r| r.width == width && r.height == height)?;
        let (scale_factor, grid_origin) = self.fit(&Self::full_frame(width, height));
        debug!("Resolution {}x{} matches {}", width, height, known.label);
        Some(ScaleCandidate {
            scale_factor,
            grid_origin,
            confidence: if known.is_reference_aspect() { 0.9 } else { 0.85 },
            method: ScaleMethod::ResolutionLookup,
        })
    }

    /// Nearest known aspect ratio, for windowed or odd-sized captures.
    fn aspect_ratio_match(&self, width: u32, height: u32) -> Option<ScaleCandidate> {
        let aspect = width as f64 / height as f64;
        let (error, label) = KNOWN_ASPECT_RATIOS
            .iter()
            .map(|&(ratio, label)| ((aspect - ratio).abs() / ratio, label))
            .min_by(|a, b| a.0.total_cmp(&b.0))?;

        if error > MAX_ASPECT_ERROR {
            debug!(
                "Aspect {:.3} too far from any known ratio ({:.3} from {})",
                aspect, error, label
            );
            return None;
        }

        let (scale_factor, grid_origin) = self.fit(&Self::full_frame(width, height));
        Some(ScaleCandidate {
            scale_factor,
            grid_origin,
            confidence: 0.8 * (1.0 - error / MAX_ASPECT_ERROR),
            method: ScaleMethod::AspectRatio,
        })
    }

    /// Infer the live content box from letterbox/pillarbox bars.
    fn structural(&self, source: &dyn PixelSource) -> Option<ScaleCandidate> {
        let (w, h) = source.dimensions();
        if w < 32 || h < 32 {
            return None;
        }

        let rows: Vec<f64> = (0..h).map(|y| row_brightness(source, y)).collect();
        let cols: Vec<f64> = (0..w).map(|x| column_brightness(source, x)).collect();
        let rows = smooth(&rows, 3);
        let cols = smooth(&cols, 3);

        let top = leading_dark(&rows);
        let bottom = leading_dark(&rows.iter().rev().copied().collect::<Vec<_>>());
        let left = leading_dark(&cols);
        let right = leading_dark(&cols.iter().rev().copied().collect::<Vec<_>>());

        let content_w = w as usize - (left + right).min(w as usize);
        let content_h = h as usize - (top + bottom).min(h as usize);
        if content_w < (w as usize) / 2 || content_h < (h as usize) / 2 {
            debug!(
                "Structural scale: content {}x{} too small in {}x{} frame",
                content_w, content_h, w, h
            );
            return None;
        }

        let content = ContentBox {
            left: left as f64,
            top: top as f64,
            width: content_w as f64,
            height: content_h as f64,
        };

        let has_bars = top + bottom + left + right > 0;
        let mut confidence: f64 = if has_bars { 0.6 } else { 0.45 };

        // Bars drawn by the game are symmetric
        let symmetric = top.abs_diff(bottom) <= (h as usize) / 50
            && left.abs_diff(right) <= (w as usize) / 50;
        if has_bars && symmetric {
            confidence += 0.15;
        }

        // A sharp step from bar to content
        if has_bars {
            let step = bar_step(&rows, top, bottom).max(bar_step(&cols, left, right));
            if step > 0.05 {
                confidence += 0.05;
            }
        }

        let aspect = content.width / content.height;
        let reference_aspect = self.layout.reference_width / self.layout.reference_height;
        if (aspect - reference_aspect).abs() / reference_aspect < 0.05 {
            confidence += 0.1;
        }

        let (scale_factor, grid_origin) = self.fit(&content);
        debug!(
            "Structural scale: bars t={} b={} l={} r={}, content {}x{}",
            top, bottom, left, right, content_w, content_h
        );

        Some(ScaleCandidate {
            scale_factor,
            grid_origin,
            confidence: confidence.min(MAX_CONFIDENCE),
            method: ScaleMethod::Structural,
        })
    }
}

/// Average luminance of sampled pixels in a row
fn row_brightness(source: &dyn PixelSource, y: u32) -> f64 {
    let (w, _) = source.dimensions();
    let step = (w / 64).max(1);
    let mut sum = 0.0;
    let mut count = 0u32;
    let mut x = 0;
    while x < w {
        sum += source.luminance_at(x, y);
        count += 1;
        x += step;
    }
    if count > 0 {
        sum / count as f64
    } else {
        0.0
    }
}

/// Average luminance of sampled pixels in a column
fn column_brightness(source: &dyn PixelSource, x: u32) -> f64 {
    let (_, h) = source.dimensions();
    let step = (h / 64).max(1);
    let mut sum = 0.0;
    let mut count = 0u32;
    let mut y = 0;
    while y < h {
        sum += source.luminance_at(x, y);
        count += 1;
        y += step;
    }
    if count > 0 {
        sum / count as f64
    } else {
        0.0
    }
}

fn smooth(data: &[f64], window: usize) -> Vec<f64> {
    let half = window / 2;
    (0..data.len())
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(data.len());
            data[lo..hi].iter().sum::<f64>() / (hi - lo) as f64
        })
        .collect()
}

/// Length of the dark run at the start of a profile
fn leading_dark(profile: &[f64]) -> usize {
    profile.iter().take_while(|&&v| v < BAR_LUMINANCE).count()
}

/// Brightness step across the inner edge of the bars
fn bar_step(profile: &[f64], lead: usize, trail: usize) -> f64 {
    let n = profile.len();
    let mut step: f64 = 0.0;
    if lead > 0 && lead + 2 < n {
        step = step.max(profile[lead + 2] - profile[lead.saturating_sub(2)]);
    }
    if trail > 0 && trail + 2 < n {
        let edge = n - trail;
        step = step.max(profile[edge.saturating_sub(3)] - profile[(edge + 1).min(n - 1)]);
    }
    step
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn estimator() -> ScaleEstimator {
        ScaleEstimator::new(ZoneLayout::default(), ScaleSettings::default())
    }

    #[test]
    fn test_reference_resolution() {
        let est = estimator().estimate(1920, 1080, None);
        assert!((est.scale_factor - 1.0).abs() < 1e-9);
        assert!((est.grid_origin.x - 960.0).abs() < 1e-9);
        assert!((est.grid_origin.y - 540.0).abs() < 1e-9);
        assert_eq!(est.method, ScaleMethod::Consolidated);
        assert!(est.confidence <= 0.95 && est.confidence > 0.8);
    }

    #[test]
    fn test_1440p_scales_up() {
        let est = estimator().estimate(2560, 1440, None);
        assert!((est.scale_factor - 4.0 / 3.0).abs() < 1e-9);
        assert!((est.grid_origin.x - 1280.0).abs() < 1e-9);
        assert!((est.grid_origin.y - 720.0).abs() < 1e-9);
    }

    #[test]
    fn test_ultrawide_pillarbox() {
        let est = estimator().estimate(2560, 1080, None);
        assert!((est.scale_factor - 1.0).abs() < 1e-9, "got {}", est.scale_factor);
        // centred 1920-wide content box
        assert!((est.grid_origin.x - (320.0 + 960.0)).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_shape_falls_back() {
        // 3:1 matches no supported resolution or aspect ratio
        let est = estimator().estimate(3000, 1000, None);
        assert!(est.is_fallback());
        assert_eq!(est.scale_factor, 1.0);
        assert!(est.confidence < 0.3);
    }

    #[test]
    fn test_degenerate_size_falls_back() {
        let est = estimator().estimate(0, 1080, None);
        assert!(est.is_fallback());
        assert!(est.candidates.is_empty());
    }

    #[test]
    fn test_windowed_aspect_match() {
        let est = estimator().estimate(1900, 1070, None);
        assert_eq!(est.method, ScaleMethod::AspectRatio);
        assert!((est.scale_factor - 1900.0 / 1920.0).abs() < 0.01);
    }

    #[test]
    fn test_structural_detects_letterbox() {
        // 1280x960 (4:3) frame with a 16:9 1280x720 picture and black bars
        let mut frame = RgbaImage::from_pixel(1280, 960, Rgba([0, 0, 0, 255]));
        for y in 120..840 {
            for x in 0..1280 {
                frame.put_pixel(x, y, Rgba([90, 100, 110, 255]));
            }
        }
        let est = estimator().estimate(1280, 960, Some(&frame));
        let structural = est
            .candidates
            .iter()
            .find(|c| c.method == ScaleMethod::Structural)
            .expect("structural candidate expected");
        assert!((structural.scale_factor - 1280.0 / 1920.0).abs() < 0.01);
        assert!((structural.grid_origin.y - (120.0 + 540.0 * 1280.0 / 1920.0)).abs() < 3.0);
        assert!(structural.confidence >= 0.8);
        assert!(structural.confidence <= MAX_CONFIDENCE);
        assert!((est.scale_factor - 1280.0 / 1920.0).abs() < 0.01);
    }

    #[test]
    fn test_structural_without_bars() {
        // full-bleed 16:9 content: no bars, aspect bonus only
        let frame = RgbaImage::from_pixel(1280, 720, Rgba([90, 100, 110, 255]));
        let candidate = estimator()
            .structural(&frame)
            .expect("full-bleed frame should still yield a candidate");
        assert!((candidate.confidence - 0.55).abs() < 1e-9, "got {}", candidate.confidence);
        assert!((candidate.scale_factor - 1280.0 / 1920.0).abs() < 1e-9);
    }
}
