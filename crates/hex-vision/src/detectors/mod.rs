//! Independent selection detectors.
//!
//! Each detector scores one normalized region through a single lens and
//! returns a `DetectorResult`. Only pixels inside the hex mask are read.
//! Detectors never panic on bad input; they degrade to an unselected,
//! floor-confidence result instead.

use hex_capture::{luminance, NormalizedRegion};
use hex_data::{DetectorKind, DetectorSettings};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, warn};

use crate::consensus::{DetectorOutcome, DetectorSet, UnavailableReason};
use crate::hex_math::{HexMask, MaskCell};

pub mod brightness;
pub mod color;
pub mod edge;
pub mod pattern;
pub mod templates;

pub use brightness::{BrightnessDetector, BrightnessDiagnostics};
pub use color::{ColorDetector, ColorDiagnostics, DominantColor};
pub use edge::{EdgeDetector, EdgeDiagnostics};
pub use pattern::{PatternDetector, PatternDiagnostics};
pub use templates::{Template, TemplateLibrary};

/// A stateless scorer for one algorithmic lens
pub trait Detector: Send + Sync {
    fn kind(&self) -> DetectorKind;

    fn analyze(&self, region: &NormalizedRegion) -> DetectorResult;
}

/// One detector's judgment of one region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorResult {
    pub kind: DetectorKind,
    pub selected: bool,
    pub confidence: f64,
    pub diagnostics: Diagnostics,
}

impl DetectorResult {
    /// Result for a region the detector could not score
    pub fn degraded(kind: DetectorKind, floor: f64, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        debug!("{} detector degraded: {}", kind, reason);
        Self {
            kind,
            selected: false,
            confidence: floor,
            diagnostics: Diagnostics::Degraded { reason },
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self.diagnostics, Diagnostics::Degraded { .. })
    }
}

/// Algorithm-specific detail, opaque to consensus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Diagnostics {
    Brightness(BrightnessDiagnostics),
    Color(ColorDiagnostics),
    Edge(EdgeDiagnostics),
    Pattern(PatternDiagnostics),
    Degraded { reason: String },
    /// Supplied externally without detail (e.g. calibration fixtures)
    None,
}

/// One sub-vote inside a detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubVote {
    pub name: String,
    pub selected: bool,
    pub weight: f64,
}

impl SubVote {
    pub fn new(name: &str, selected: bool, weight: f64) -> Self {
        Self {
            name: name.to_string(),
            selected,
            weight,
        }
    }
}

/// Outcome of combining sub-votes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tally {
    pub selected: bool,
    /// Weight share of votes matching the decision, in [0.5, 1]
    pub agreement: f64,
}

/// Weighted majority. An exact tie resolves to `tie_break`.
pub fn tally(votes: &[SubVote], tie_break: bool) -> Tally {
    let total: f64 = votes.iter().map(|v| v.weight).sum();
    if total <= 0.0 {
        return Tally {
            selected: tie_break,
            agreement: 0.5,
        };
    }
    let yes: f64 = votes.iter().filter(|v| v.selected).map(|v| v.weight).sum::<f64>() / total;
    let selected = if (yes - 0.5).abs() < 1e-9 {
        tie_break
    } else {
        yes > 0.5
    };
    Tally {
        selected,
        agreement: if selected { yes } else { 1.0 - yes },
    }
}

/// A normalized region seen through its hex mask, with luminance cached.
pub struct MaskedRegion<'a> {
    region: &'a NormalizedRegion,
    mask: &'a HexMask,
    luma: Vec<f64>,
}

impl<'a> MaskedRegion<'a> {
    /// `None` when the region size does not match the mask.
    pub fn new(region: &'a NormalizedRegion, mask: &'a HexMask) -> Option<Self> {
        if region.size() != mask.size() {
            return None;
        }
        let n = mask.size();
        let mut luma = Vec::with_capacity((n * n) as usize);
        for y in 0..n {
            for x in 0..n {
                luma.push(luminance(region.pixel(x, y)));
            }
        }
        Some(Self { region, mask, luma })
    }

    pub fn size(&self) -> u32 {
        self.mask.size()
    }

    pub fn mask(&self) -> &HexMask {
        self.mask
    }

    pub fn cells(&self) -> &[MaskCell] {
        self.mask.cells()
    }

    pub fn count(&self) -> usize {
        self.mask.count()
    }

    pub fn contains(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && self.mask.contains(x as u32, y as u32)
    }

    /// Luminance at any in-region pixel (masked or not)
    pub fn luma(&self, x: u32, y: u32) -> f64 {
        self.luma[(y * self.mask.size() + x) as usize]
    }

    pub fn rgb(&self, x: u32, y: u32) -> [f64; 3] {
        let px = self.region.pixel(x, y);
        [px[0] as f64, px[1] as f64, px[2] as f64]
    }

    /// Luminance of every masked pixel, row-major
    pub fn masked_luma(&self) -> Vec<f64> {
        self.cells().iter().map(|c| self.luma(c.x, c.y)).collect()
    }
}

/// Mean and standard deviation of a sample
pub fn mean_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    if n == 0.0 {
        return (0.0, 0.0);
    }
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Common guard: mask fits the region and enough pixels to be meaningful.
pub(crate) fn prepare<'a>(
    kind: DetectorKind,
    settings: &DetectorSettings,
    region: &'a NormalizedRegion,
    mask: &'a HexMask,
) -> Result<MaskedRegion<'a>, DetectorResult> {
    let masked = MaskedRegion::new(region, mask).ok_or_else(|| {
        DetectorResult::degraded(
            kind,
            settings.confidence_floor,
            format!("region is {}px, expected {}px", region.size(), mask.size()),
        )
    })?;
    if masked.count() < settings.min_masked_pixels {
        return Err(DetectorResult::degraded(
            kind,
            settings.confidence_floor,
            format!(
                "only {} masked pixels (need {})",
                masked.count(),
                settings.min_masked_pixels
            ),
        ));
    }
    Ok(masked)
}

/// Clamp a computed confidence, degrading on non-finite values.
pub(crate) fn finish(
    kind: DetectorKind,
    settings: &DetectorSettings,
    selected: bool,
    confidence: f64,
    diagnostics: Diagnostics,
) -> DetectorResult {
    if !confidence.is_finite() {
        return DetectorResult::degraded(kind, settings.confidence_floor, "non-finite confidence");
    }
    DetectorResult {
        kind,
        selected,
        confidence: confidence.clamp(settings.confidence_floor, 1.0),
        diagnostics,
    }
}

/// Confidence multiplier for regions with few masked pixels
pub(crate) fn pixel_count_penalty(count: usize, settings: &DetectorSettings) -> f64 {
    if count < settings.min_masked_pixels * 2 {
        0.8
    } else {
        1.0
    }
}

/// The four detectors, built once from configuration and shared read-only.
pub struct DetectorBank {
    brightness: Box<dyn Detector>,
    color: Box<dyn Detector>,
    edge: Box<dyn Detector>,
    pattern: Box<dyn Detector>,
}

impl DetectorBank {
    /// Detectors with the built-in template library
    pub fn new(settings: DetectorSettings) -> Self {
        let templates = TemplateLibrary::builtin(settings.region_size);
        Self::with_templates(settings, templates)
    }

    pub fn with_templates(settings: DetectorSettings, templates: TemplateLibrary) -> Self {
        Self {
            brightness: Box::new(BrightnessDetector::new(settings)),
            color: Box::new(ColorDetector::new(settings)),
            edge: Box::new(EdgeDetector::new(settings)),
            pattern: Box::new(PatternDetector::new(settings, templates)),
        }
    }

    /// Swap in a different implementation for the detector's kind.
    pub fn replace(mut self, detector: impl Detector + 'static) -> Self {
        let boxed: Box<dyn Detector> = Box::new(detector);
        match boxed.kind() {
            DetectorKind::Brightness => self.brightness = boxed,
            DetectorKind::Color => self.color = boxed,
            DetectorKind::Edge => self.edge = boxed,
            DetectorKind::Pattern => self.pattern = boxed,
        }
        self
    }

    pub fn get(&self, kind: DetectorKind) -> &dyn Detector {
        match kind {
            DetectorKind::Brightness => self.brightness.as_ref(),
            DetectorKind::Color => self.color.as_ref(),
            DetectorKind::Edge => self.edge.as_ref(),
            DetectorKind::Pattern => self.pattern.as_ref(),
        }
    }

    /// Run one detector, turning a panic into an unavailable outcome.
    pub fn run(&self, kind: DetectorKind, region: &NormalizedRegion) -> DetectorOutcome {
        match catch_unwind(AssertUnwindSafe(|| self.get(kind).analyze(region))) {
            Ok(result) => DetectorOutcome::Available(result),
            Err(_) => {
                warn!("{} detector panicked; marking unavailable", kind);
                DetectorOutcome::Unavailable(UnavailableReason::Crashed)
            }
        }
    }

    /// Run all four detectors sequentially on one region.
    pub fn analyze_all(&self, region: &NormalizedRegion) -> DetectorSet {
        DetectorSet::from_fn(|kind| self.run(kind, region))
    }
}

#[cfg(test)]
pub(crate) mod test_regions {
    //! Synthetic regions shared by detector tests.

    use hex_capture::NormalizedRegion;
    use image::Rgba;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    pub const SIZE: u32 = 48;

    fn radius_at(x: u32, y: u32) -> f64 {
        let half = SIZE as f64 / 2.0;
        let dx = x as f64 + 0.5 - half;
        let dy = y as f64 + 0.5 - half;
        (dx * dx + dy * dy).sqrt() / half
    }

    pub fn gray(v: u8) -> Rgba<u8> {
        Rgba([v, v, v, 255])
    }

    pub fn uniform(v: u8) -> NormalizedRegion {
        NormalizedRegion::uniform(SIZE, [v, v, v, 255])
    }

    /// Dark icon body with a bright gold ring near the border
    pub fn selected_icon() -> NormalizedRegion {
        NormalizedRegion::from_fn(SIZE, |x, y| {
            let r = radius_at(x, y);
            if (0.7..0.9).contains(&r) {
                Rgba([250, 215, 110, 255])
            } else if r < 0.7 {
                let glow = (200.0 * (1.0 - r)) as u8;
                Rgba([60 + glow / 2, 50 + glow / 3, 30, 255])
            } else {
                gray(40)
            }
        })
    }

    /// Dim slate icon with a small glyph in the centre
    pub fn unselected_icon() -> NormalizedRegion {
        NormalizedRegion::from_fn(SIZE, |x, y| {
            let r = radius_at(x, y);
            if r < 0.25 {
                Rgba([120, 125, 135, 255])
            } else {
                Rgba([45, 48, 58, 255])
            }
        })
    }

    /// Seeded noise around a base level
    pub fn noisy(base: u8, amplitude: u8, seed: u64) -> NormalizedRegion {
        let mut rng = StdRng::seed_from_u64(seed);
        let amp = amplitude as i32;
        NormalizedRegion::from_fn(SIZE, |_, _| {
            let v = (base as i32 + rng.gen_range(-amp..=amp)).clamp(0, 255) as u8;
            gray(v)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tally_majority_and_tie() {
        let votes = vec![
            SubVote::new("a", true, 1.0),
            SubVote::new("b", true, 1.0),
            SubVote::new("c", false, 1.0),
        ];
        let t = tally(&votes, false);
        assert!(t.selected);
        assert!((t.agreement - 2.0 / 3.0).abs() < 1e-9);

        let tie = vec![SubVote::new("a", true, 1.0), SubVote::new("b", false, 1.0)];
        assert!(tally(&tie, true).selected);
        assert!(!tally(&tie, false).selected);
    }

    #[test]
    fn test_wrong_size_region_degrades() {
        let bank = DetectorBank::new(DetectorSettings::default());
        let region = NormalizedRegion::uniform(32, [200, 200, 200, 255]);
        for kind in DetectorKind::ALL {
            let result = bank.get(kind).analyze(&region);
            assert!(result.is_degraded(), "{} should degrade on 32px input", kind);
            assert!(!result.selected);
            assert_eq!(result.confidence, DetectorSettings::default().confidence_floor);
        }
    }

    #[test]
    fn test_too_few_masked_pixels_degrades() {
        let settings = DetectorSettings {
            min_masked_pixels: 5000,
            ..DetectorSettings::default()
        };
        let bank = DetectorBank::new(settings);
        let set = bank.analyze_all(&test_regions::selected_icon());
        for kind in DetectorKind::ALL {
            match set.get(kind) {
                DetectorOutcome::Available(r) => assert!(r.is_degraded()),
                other => panic!("expected degraded result, got {:?}", other),
            }
        }
    }

    struct Exploding;

    impl Detector for Exploding {
        fn kind(&self) -> DetectorKind {
            DetectorKind::Color
        }

        fn analyze(&self, _region: &NormalizedRegion) -> DetectorResult {
            panic!("boom")
        }
    }

    #[test]
    fn test_panicking_detector_is_unavailable() {
        let bank = DetectorBank::new(DetectorSettings::default()).replace(Exploding);
        let set = bank.analyze_all(&test_regions::selected_icon());
        assert_eq!(set.color, DetectorOutcome::Unavailable(UnavailableReason::Crashed));
        assert!(set.brightness.result().is_some());
    }

    #[test]
    fn test_bank_runs_every_detector() {
        let bank = DetectorBank::new(DetectorSettings::default());
        let set = bank.analyze_all(&test_regions::selected_icon());
        for kind in DetectorKind::ALL {
            match set.get(kind) {
                DetectorOutcome::Available(r) => {
                    assert_eq!(r.kind, kind);
                    assert!((0.0..=1.0).contains(&r.confidence));
                }
                other => panic!("{} unavailable: {:?}", kind, other),
            }
        }
    }
}
