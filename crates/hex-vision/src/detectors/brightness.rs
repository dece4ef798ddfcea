use hex_capture::NormalizedRegion;
use hex_data::{DetectorKind, DetectorSettings};
use serde::{Deserialize, Serialize};

use super::{
    finish, mean_std, pixel_count_penalty, prepare, tally, Detector, DetectorResult, Diagnostics,
    SubVote,
};
use crate::hex_math::HexMask;

/// Mean luminance above which the threshold vote says "selected"
const BRIGHTNESS_THRESHOLD: f64 = 0.55;
/// Highlight borders are at least as bright as the centre, within this tolerance
const GRADIENT_TOLERANCE: f64 = 0.05;
/// Selected icons sit in a mid-uniformity band: not flat, not noisy
const UNIFORMITY_BAND: (f64, f64) = (0.55, 0.9);
const CENTER_RADIUS: f64 = 0.45;
const EDGE_RADIUS: f64 = 0.7;
/// Distance from the threshold at which the threshold vote is fully certain
const DISTANCE_SPAN: f64 = 0.3;
/// Percentile spread below which a region counts as low contrast
const LOW_CONTRAST: f64 = 0.02;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrightnessDiagnostics {
    pub mean: f64,
    pub std_dev: f64,
    pub contrast: f64,
    pub center_mean: f64,
    pub edge_mean: f64,
    pub gradient: f64,
    pub uniformity: f64,
    pub votes: Vec<SubVote>,
    pub low_contrast: bool,
}

/// Judges selection from luminance statistics and the centre/edge profile.
pub struct BrightnessDetector {
    settings: DetectorSettings,
    mask: HexMask,
}

impl BrightnessDetector {
    pub fn new(settings: DetectorSettings) -> Self {
        Self {
            mask: HexMask::new(settings.region_size),
            settings,
        }
    }
}

impl Detector for BrightnessDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Brightness
    }

    fn analyze(&self, region: &NormalizedRegion) -> DetectorResult {
        let kind = self.kind();
        let masked = match prepare(kind, &self.settings, region, &self.mask) {
            Ok(m) => m,
            Err(degraded) => return degraded,
        };

        let mut values = masked.masked_luma();
        let (mean, std_dev) = mean_std(&values);

        values.sort_by(|a, b| a.total_cmp(b));
        let contrast = percentile(&values, 0.95) - percentile(&values, 0.05);

        let mut center = (0.0, 0usize);
        let mut edge = (0.0, 0usize);
        for cell in masked.cells() {
            let l = masked.luma(cell.x, cell.y);
            if cell.radius < CENTER_RADIUS {
                center.0 += l;
                center.1 += 1;
            } else if cell.radius >= EDGE_RADIUS {
                edge.0 += l;
                edge.1 += 1;
            }
        }
        let center_mean = if center.1 > 0 { center.0 / center.1 as f64 } else { mean };
        let edge_mean = if edge.1 > 0 { edge.0 / edge.1 as f64 } else { mean };
        let gradient = edge_mean - center_mean;
        let uniformity = (1.0 - std_dev / 0.5).clamp(0.0, 1.0);

        let threshold_vote = mean > BRIGHTNESS_THRESHOLD;
        let votes = vec![
            SubVote::new("threshold", threshold_vote, 1.0),
            SubVote::new("gradient", gradient >= -GRADIENT_TOLERANCE, 1.0),
            SubVote::new(
                "uniformity",
                (UNIFORMITY_BAND.0..=UNIFORMITY_BAND.1).contains(&uniformity),
                1.0,
            ),
        ];
        let decision = tally(&votes, threshold_vote);

        let certainty = 0.5 + 0.5 * ((mean - BRIGHTNESS_THRESHOLD).abs() / DISTANCE_SPAN).min(1.0);
        let distance_confidence = if threshold_vote == decision.selected {
            certainty
        } else {
            1.0 - certainty
        };

        let low_contrast = contrast < LOW_CONTRAST;
        let mut confidence = 0.6 * distance_confidence + 0.4 * decision.agreement;
        if low_contrast {
            confidence *= 0.9;
        }
        confidence *= pixel_count_penalty(masked.count(), &self.settings);

        finish(
            kind,
            &self.settings,
            decision.selected,
            confidence,
            Diagnostics::Brightness(BrightnessDiagnostics {
                mean,
                std_dev,
                contrast,
                center_mean,
                edge_mean,
                gradient,
                uniformity,
                votes,
                low_contrast,
            }),
        )
    }
}

/// Nearest-rank percentile of sorted data
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() - 1) as f64 * p).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}
