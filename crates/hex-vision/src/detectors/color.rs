//! Color-based selection detection.
//!
//! Dominant colors come from a coarse 4-bit histogram whose buckets are
//! merged agglomeratively. The primary/secondary pair is compared against
//! exemplar libraries of selected and unselected icon palettes, and the
//! profile vote is combined with temperature, saturation and a radial glow
//! check.

use hex_capture::NormalizedRegion;
use hex_data::{DetectorKind, DetectorSettings};
use serde::{Deserialize, Serialize};

use super::{
    finish, pixel_count_penalty, prepare, tally, Detector, DetectorResult, Diagnostics,
    MaskedRegion, SubVote,
};
use crate::hex_math::HexMask;

/// Buckets closer than this (RGB distance) are merged into one cluster
const MERGE_DISTANCE: f64 = 40.0;
/// Only the largest buckets seed clustering; the rest join the nearest seed
const MAX_SEEDS: usize = 48;
const DOMINANT_COUNT: usize = 5;
/// Share of pixels a cluster needs to count toward color variety
const VARIETY_SHARE: f64 = 0.05;

const WARM_TEMPERATURE: f64 = 0.05;
const SATURATED: f64 = 0.25;
/// Minimum centre-to-edge luminance drop for a glow
const GLOW_DROP: f64 = 0.08;
const GLOW_BINS: usize = 5;

const PROFILE_WEIGHT: f64 = 0.4;
const TEMPERATURE_WEIGHT: f64 = 0.2;
const SATURATION_WEIGHT: f64 = 0.2;
const GLOW_WEIGHT: f64 = 0.2;

/// A (primary, secondary) color pair typical of one icon state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorExemplar {
    pub name: &'static str,
    pub primary: [f64; 3],
    pub secondary: [f64; 3],
}

const SELECTED_EXEMPLARS: &[ColorExemplar] = &[
    ColorExemplar {
        name: "gold_frame",
        primary: [235.0, 190.0, 70.0],
        secondary: [255.0, 240.0, 180.0],
    },
    ColorExemplar {
        name: "amber_core",
        primary: [140.0, 105.0, 40.0],
        secondary: [245.0, 210.0, 110.0],
    },
    ColorExemplar {
        name: "cyan_highlight",
        primary: [120.0, 200.0, 255.0],
        secondary: [230.0, 245.0, 255.0],
    },
    ColorExemplar {
        name: "white_glow",
        primary: [250.0, 250.0, 235.0],
        secondary: [200.0, 170.0, 90.0],
    },
];

const UNSELECTED_EXEMPLARS: &[ColorExemplar] = &[
    ColorExemplar {
        name: "slate",
        primary: [55.0, 58.0, 66.0],
        secondary: [95.0, 98.0, 110.0],
    },
    ColorExemplar {
        name: "grey",
        primary: [90.0, 90.0, 95.0],
        secondary: [40.0, 40.0, 45.0],
    },
    ColorExemplar {
        name: "navy",
        primary: [30.0, 35.0, 60.0],
        secondary: [70.0, 80.0, 110.0],
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DominantColor {
    pub rgb: [f64; 3],
    /// Share of masked pixels in this cluster
    pub share: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorDiagnostics {
    pub dominant: Vec<DominantColor>,
    pub temperature: f64,
    pub saturation: f64,
    pub variety: usize,
    pub contrast_ratio: f64,
    pub glow_profile: Vec<f64>,
    pub glow_strength: f64,
    pub best_selected: String,
    pub best_unselected: String,
    pub profile_strength: f64,
    pub votes: Vec<SubVote>,
}

#[derive(Debug, Clone, Copy)]
struct Cluster {
    sum: [f64; 3],
    count: usize,
}

impl Cluster {
    fn centroid(&self) -> [f64; 3] {
        let n = self.count.max(1) as f64;
        [self.sum[0] / n, self.sum[1] / n, self.sum[2] / n]
    }

    fn absorb(&mut self, other: &Cluster) {
        for i in 0..3 {
            self.sum[i] += other.sum[i];
        }
        self.count += other.count;
    }
}

fn rgb_distance(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)).sqrt()
}

fn relative_luminance(rgb: &[f64; 3]) -> f64 {
    (0.299 * rgb[0] + 0.587 * rgb[1] + 0.114 * rgb[2]) / 255.0
}

/// Judges selection from the icon's palette and glow.
pub struct ColorDetector {
    settings: DetectorSettings,
    mask: HexMask,
}

impl ColorDetector {
    pub fn new(settings: DetectorSettings) -> Self {
        Self {
            mask: HexMask::new(settings.region_size),
            settings,
        }
    }

    fn clusters(masked: &MaskedRegion) -> Vec<Cluster> {
        let mut buckets = vec![
            Cluster {
                sum: [0.0; 3],
                count: 0
            };
            16 * 16 * 16
        ];
        for cell in masked.cells() {
            let rgb = masked.rgb(cell.x, cell.y);
            let key = ((rgb[0] as usize) >> 4) << 8
                | ((rgb[1] as usize) >> 4) << 4
                | (rgb[2] as usize) >> 4;
            let bucket = &mut buckets[key];
            for i in 0..3 {
                bucket.sum[i] += rgb[i];
            }
            bucket.count += 1;
        }

        let mut filled: Vec<Cluster> = buckets.into_iter().filter(|b| b.count > 0).collect();
        filled.sort_by(|a, b| b.count.cmp(&a.count));

        let rest = if filled.len() > MAX_SEEDS {
            filled.split_off(MAX_SEEDS)
        } else {
            Vec::new()
        };
        let mut clusters = filled;
        for small in rest {
            let c = small.centroid();
            if let Some(nearest) = clusters.iter_mut().min_by(|a, b| {
                rgb_distance(&a.centroid(), &c).total_cmp(&rgb_distance(&b.centroid(), &c))
            }) {
                nearest.absorb(&small);
            }
        }

        // Agglomerative merge of the closest pair until nothing is within range
        loop {
            let mut best: Option<(usize, usize, f64)> = None;
            for i in 0..clusters.len() {
                for j in (i + 1)..clusters.len() {
                    let d = rgb_distance(&clusters[i].centroid(), &clusters[j].centroid());
                    if d < MERGE_DISTANCE && best.map_or(true, |(_, _, bd)| d < bd) {
                        best = Some((i, j, d));
                    }
                }
            }
            match best {
                Some((i, j, _)) => {
                    let other = clusters.swap_remove(j);
                    clusters[i].absorb(&other);
                }
                None => break,
            }
        }

        clusters.sort_by(|a, b| b.count.cmp(&a.count));
        clusters
    }

    fn glow_profile(masked: &MaskedRegion) -> Vec<f64> {
        let mut sums = [0.0; GLOW_BINS];
        let mut counts = [0usize; GLOW_BINS];
        for cell in masked.cells() {
            let bin = ((cell.radius * GLOW_BINS as f64) as usize).min(GLOW_BINS - 1);
            sums[bin] += masked.luma(cell.x, cell.y);
            counts[bin] += 1;
        }
        sums.iter()
            .zip(counts.iter())
            .map(|(s, &c)| if c > 0 { s / c as f64 } else { 0.0 })
            .collect()
    }

    /// Nearest exemplar by primary distance plus half the secondary distance
    fn nearest(
        primary: &[f64; 3],
        secondary: &[f64; 3],
        library: &[ColorExemplar],
    ) -> (String, f64) {
        library
            .iter()
            .map(|e| {
                let d = rgb_distance(primary, &e.primary)
                    + 0.5 * rgb_distance(secondary, &e.secondary);
                (e.name.to_string(), d)
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .unwrap_or_else(|| (String::new(), f64::INFINITY))
    }
}

impl Detector for ColorDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Color
    }

    fn analyze(&self, region: &NormalizedRegion) -> DetectorResult {
        let kind = self.kind();
        let masked = match prepare(kind, &self.settings, region, &self.mask) {
            Ok(m) => m,
            Err(degraded) => return degraded,
        };
        let total = masked.count() as f64;

        let clusters = Self::clusters(&masked);
        let dominant: Vec<DominantColor> = clusters
            .iter()
            .take(DOMINANT_COUNT)
            .map(|c| DominantColor {
                rgb: c.centroid(),
                share: c.count as f64 / total,
            })
            .collect();
        let variety = clusters
            .iter()
            .filter(|c| c.count as f64 / total >= VARIETY_SHARE)
            .count();

        let Some(primary) = dominant.first().map(|d| d.rgb) else {
            return DetectorResult::degraded(
                kind,
                self.settings.confidence_floor,
                "no dominant color",
            );
        };
        let secondary = dominant.get(1).map_or(primary, |d| d.rgb);

        let dominant_share: f64 = dominant.iter().map(|d| d.share).sum();
        let temperature = dominant
            .iter()
            .map(|d| (d.rgb[0] - d.rgb[2]) / 255.0 * d.share)
            .sum::<f64>()
            / dominant_share.max(f64::EPSILON);

        let saturation = masked
            .cells()
            .iter()
            .map(|c| {
                let rgb = masked.rgb(c.x, c.y);
                let max = rgb[0].max(rgb[1]).max(rgb[2]);
                let min = rgb[0].min(rgb[1]).min(rgb[2]);
                if max > 0.0 {
                    (max - min) / max
                } else {
                    0.0
                }
            })
            .sum::<f64>()
            / total;

        let lum_primary = relative_luminance(&primary);
        let lum_secondary = relative_luminance(&secondary);
        let contrast_ratio =
            (lum_primary.max(lum_secondary) + 0.05) / (lum_primary.min(lum_secondary) + 0.05);

        let glow_profile = Self::glow_profile(&masked);
        let falling_steps = glow_profile.windows(2).filter(|w| w[1] < w[0] - 0.005).count();
        let glow_strength = glow_profile[0] - glow_profile[GLOW_BINS - 1];
        let glow = falling_steps >= GLOW_BINS - 2 && glow_strength >= GLOW_DROP;

        let (best_selected, d_selected) = Self::nearest(&primary, &secondary, SELECTED_EXEMPLARS);
        let (best_unselected, d_unselected) =
            Self::nearest(&primary, &secondary, UNSELECTED_EXEMPLARS);
        let profile_vote = d_selected < d_unselected;
        let profile_strength =
            (d_unselected - d_selected).abs() / (d_selected + d_unselected + f64::EPSILON);

        let votes = vec![
            SubVote::new("profile", profile_vote, PROFILE_WEIGHT),
            SubVote::new("temperature", temperature > WARM_TEMPERATURE, TEMPERATURE_WEIGHT),
            SubVote::new("saturation", saturation > SATURATED, SATURATION_WEIGHT),
            SubVote::new("glow", glow, GLOW_WEIGHT),
        ];
        let decision = tally(&votes, profile_vote);

        let margin = 2.0 * decision.agreement - 1.0;
        let profile_support = if profile_vote == decision.selected {
            profile_strength
        } else {
            0.0
        };
        let confidence = (0.35 + 0.35 * margin + 0.3 * profile_support)
            * pixel_count_penalty(masked.count(), &self.settings);

        finish(
            kind,
            &self.settings,
            decision.selected,
            confidence,
            Diagnostics::Color(ColorDiagnostics {
                dominant,
                temperature,
                saturation,
                variety,
                contrast_ratio,
                glow_profile,
                glow_strength,
                best_selected,
                best_unselected,
                profile_strength,
                votes,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::test_regions;
    use image::Rgba;

    fn detector() -> ColorDetector {
        ColorDetector::new(DetectorSettings::default())
    }

    fn diagnostics(result: &DetectorResult) -> &ColorDiagnostics {
        match &result.diagnostics {
            Diagnostics::Color(d) => d,
            other => panic!("unexpected diagnostics {:?}", other),
        }
    }

    #[test]
    fn test_gold_icon_is_selected() {
        let result = detector().analyze(&test_regions::selected_icon());
        let d = diagnostics(&result);
        assert!(result.selected, "votes {:?}", d.votes);
        assert!(d.temperature > WARM_TEMPERATURE);
        assert!(result.confidence > 0.5);
    }

    #[test]
    fn test_slate_icon_is_unselected() {
        let result = detector().analyze(&test_regions::unselected_icon());
        let d = diagnostics(&result);
        assert!(!result.selected, "votes {:?}", d.votes);
        assert_eq!(d.best_unselected, "slate");
    }

    #[test]
    fn test_uniform_region_has_one_cluster() {
        let result = detector().analyze(&test_regions::uniform(128));
        let d = diagnostics(&result);
        assert_eq!(d.dominant.len(), 1);
        assert!((d.dominant[0].share - 1.0).abs() < 1e-9);
        assert_eq!(d.variety, 1);
        assert!((d.contrast_ratio - 1.0).abs() < 1e-9);
        assert_eq!(d.saturation, 0.0);
    }

    #[test]
    fn test_close_colors_merge() {
        // two shades 10 apart in every channel land in different buckets but merge
        let region = NormalizedRegion::from_fn(test_regions::SIZE, |x, _| {
            if x < 24 {
                Rgba([90, 90, 90, 255])
            } else {
                Rgba([100, 100, 100, 255])
            }
        });
        let d = diagnostics(&detector().analyze(&region)).clone();
        assert_eq!(d.dominant.len(), 1);
    }

    #[test]
    fn test_radial_glow_detected() {
        let region = NormalizedRegion::from_fn(test_regions::SIZE, |x, y| {
            let dx = x as f64 + 0.5 - 24.0;
            let dy = y as f64 + 0.5 - 24.0;
            let r = (dx * dx + dy * dy).sqrt() / 24.0;
            let v = (240.0 * (1.0 - r).max(0.0) + 15.0) as u8;
            Rgba([v, v, v / 2, 255])
        });
        let d = diagnostics(&detector().analyze(&region)).clone();
        assert!(d.glow_strength > GLOW_DROP, "profile {:?}", d.glow_profile);
        assert!(d.votes.iter().any(|v| v.name == "glow" && v.selected));
    }
}
