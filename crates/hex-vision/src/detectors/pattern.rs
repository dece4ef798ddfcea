use hex_capture::NormalizedRegion;
use hex_data::{DetectorKind, DetectorSettings};
use serde::{Deserialize, Serialize};

use super::templates::{Template, TemplateLibrary};
use super::{
    finish, mean_std, pixel_count_penalty, prepare, tally, Detector, DetectorResult, Diagnostics,
    MaskedRegion, SubVote,
};
use crate::hex_math::HexMask;

const MIN_STD_DEV: f64 = 0.01;
/// Mean mirrored difference that maps to zero symmetry
const SYMMETRY_SPAN: f64 = 0.25;
const SYMMETRY_VOTE: f64 = 0.85;
const PATCH: u32 = 4;
/// Masked pixels a patch needs to count toward roughness
const PATCH_MIN_PIXELS: usize = 12;
const ROUGHNESS_VOTE: f64 = 0.08;
const GRANULARITY_VOTE: f64 = 0.06;
const LEVELS: usize = 16;
const LEVEL_SHARE: f64 = 0.01;
const MEAN_VOTE: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternDiagnostics {
    pub best_selected: Option<String>,
    pub best_selected_score: f64,
    pub best_unselected: Option<String>,
    pub best_unselected_score: f64,
    pub symmetry_horizontal: f64,
    pub symmetry_vertical: f64,
    pub symmetry_radial: f64,
    pub symmetry: f64,
    pub roughness: f64,
    pub granularity: f64,
    pub directionality: f64,
    pub mean: f64,
    pub uniformity: f64,
    pub complexity: f64,
    pub votes: Vec<SubVote>,
}

/// Judges selection by template correlation and structural regularity.
pub struct PatternDetector {
    settings: DetectorSettings,
    mask: HexMask,
    templates: TemplateLibrary,
}

impl PatternDetector {
    pub fn new(settings: DetectorSettings, templates: TemplateLibrary) -> Self {
        Self {
            mask: HexMask::new(settings.region_size),
            settings,
            templates,
        }
    }

    /// Best correlation within one library, over all rotations
    fn best_match<'t>(
        templates: &'t [Template],
        values: &[f64],
        mean: f64,
        std_dev: f64,
    ) -> (Option<&'t Template>, f64) {
        let mut best: (Option<&Template>, f64) = (None, -1.0);
        for t in templates {
            for rot in &t.rotations {
                if rot.values.len() != values.len() {
                    continue;
                }
                let score = masked_ncc(values, mean, std_dev, &rot.values, rot.mean, rot.std_dev);
                if score > best.1 {
                    best = (Some(t), score);
                }
            }
        }
        best
    }

    /// Mean absolute difference against a mirrored position, mapped to [0, 1]
    fn symmetry(masked: &MaskedRegion, mirror: impl Fn(u32, u32) -> (u32, u32)) -> f64 {
        let mut diff = 0.0;
        let mut pairs = 0usize;
        for c in masked.cells() {
            let (mx, my) = mirror(c.x, c.y);
            if masked.contains(mx as i64, my as i64) {
                diff += (masked.luma(c.x, c.y) - masked.luma(mx, my)).abs();
                pairs += 1;
            }
        }
        if pairs == 0 {
            return 0.0;
        }
        (1.0 - diff / pairs as f64 / SYMMETRY_SPAN).clamp(0.0, 1.0)
    }

    /// (roughness, granularity, directionality)
    fn texture(masked: &MaskedRegion) -> (f64, f64, f64) {
        let n = masked.size();

        let mut patch_stds = Vec::new();
        for py in (0..n).step_by(PATCH as usize) {
            for px in (0..n).step_by(PATCH as usize) {
                let mut patch = Vec::with_capacity((PATCH * PATCH) as usize);
                for y in py..(py + PATCH).min(n) {
                    for x in px..(px + PATCH).min(n) {
                        if masked.contains(x as i64, y as i64) {
                            patch.push(masked.luma(x, y));
                        }
                    }
                }
                if patch.len() >= PATCH_MIN_PIXELS {
                    patch_stds.push(mean_std(&patch).1);
                }
            }
        }
        let roughness = mean_std(&patch_stds).0;

        let mut sum_dx = 0.0;
        let mut sum_dy = 0.0;
        let mut pairs = 0usize;
        for c in masked.cells() {
            let here = masked.luma(c.x, c.y);
            if masked.contains(c.x as i64 + 1, c.y as i64) {
                sum_dx += (masked.luma(c.x + 1, c.y) - here).abs();
                pairs += 1;
            }
            if masked.contains(c.x as i64, c.y as i64 + 1) {
                sum_dy += (masked.luma(c.x, c.y + 1) - here).abs();
                pairs += 1;
            }
        }
        let granularity = if pairs > 0 { (sum_dx + sum_dy) / pairs as f64 } else { 0.0 };
        let directionality = (sum_dx - sum_dy).abs() / (sum_dx + sum_dy + f64::EPSILON);
        (roughness, granularity, directionality)
    }
}

impl Detector for PatternDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Pattern
    }

    fn analyze(&self, region: &NormalizedRegion) -> DetectorResult {
        let kind = self.kind();
        let masked = match prepare(kind, &self.settings, region, &self.mask) {
            Ok(m) => m,
            Err(degraded) => return degraded,
        };

        let values = masked.masked_luma();
        let (mean, std_dev) = mean_std(&values);
        if std_dev < MIN_STD_DEV {
            return DetectorResult::degraded(
                kind,
                self.settings.confidence_floor,
                format!("no contrast (std {:.4})", std_dev),
            );
        }

        let (sel, sel_score) = Self::best_match(&self.templates.selected, &values, mean, std_dev);
        let (unsel, unsel_score) =
            Self::best_match(&self.templates.unselected, &values, mean, std_dev);
        let template_vote = sel_score > unsel_score;
        let template_strength = ((sel_score - unsel_score).abs() / 2.0).min(1.0);

        let last = masked.size() - 1;
        let symmetry_horizontal = Self::symmetry(&masked, |x, y| (last - x, y));
        let symmetry_vertical = Self::symmetry(&masked, |x, y| (x, last - y));
        let symmetry_radial = Self::symmetry(&masked, |x, y| (last - x, last - y));
        let symmetry = (symmetry_horizontal + symmetry_vertical + symmetry_radial) / 3.0;

        let (roughness, granularity, directionality) = Self::texture(&masked);

        let uniformity = (1.0 - std_dev / 0.5).clamp(0.0, 1.0);
        let mut levels = [0usize; LEVELS];
        for v in &values {
            levels[((v * LEVELS as f64) as usize).min(LEVELS - 1)] += 1;
        }
        let complexity = levels
            .iter()
            .filter(|&&c| c as f64 / values.len() as f64 >= LEVEL_SHARE)
            .count() as f64
            / LEVELS as f64;

        let votes = vec![
            SubVote::new("template", template_vote, 1.0),
            SubVote::new("symmetry", symmetry >= SYMMETRY_VOTE, 1.0),
            SubVote::new(
                "texture",
                roughness < ROUGHNESS_VOTE && granularity < GRANULARITY_VOTE,
                1.0,
            ),
            SubVote::new("characteristics", mean >= MEAN_VOTE, 1.0),
        ];
        let decision = tally(&votes, template_vote);

        let template_support = if template_vote == decision.selected {
            template_strength
        } else {
            0.0
        };
        let confidence = (0.3 + 0.5 * decision.agreement + 0.2 * template_support)
            * pixel_count_penalty(masked.count(), &self.settings);

        finish(
            kind,
            &self.settings,
            decision.selected,
            confidence,
            Diagnostics::Pattern(PatternDiagnostics {
                best_selected: sel.map(|t| t.name.clone()),
                best_selected_score: sel_score,
                best_unselected: unsel.map(|t| t.name.clone()),
                best_unselected_score: unsel_score,
                symmetry_horizontal,
                symmetry_vertical,
                symmetry_radial,
                symmetry,
                roughness,
                granularity,
                directionality,
                mean,
                uniformity,
                complexity,
                votes,
            }),
        )
    }
}

/// Zero-mean normalized cross-correlation over masked samples.
/// Returns a value between -1.0 (inverse) and 1.0 (perfect match).
fn masked_ncc(
    values: &[f64],
    mean: f64,
    std_dev: f64,
    tmpl: &[f64],
    tmpl_mean: f64,
    tmpl_std: f64,
) -> f64 {
    debug_assert_eq!(values.len(), tmpl.len());

    let denom = std_dev * tmpl_std;
    if denom < 1e-10 || values.is_empty() {
        return 0.0;
    }

    let cross: f64 = values
        .iter()
        .zip(tmpl.iter())
        .map(|(v, t)| (v - mean) * (t - tmpl_mean))
        .sum();

    cross / (values.len() as f64 * denom)
}
