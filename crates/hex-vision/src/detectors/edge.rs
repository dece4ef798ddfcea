//! Edge-based selection detection.
//!
//! A masked Sobel pass produces per-pixel gradient magnitude and direction. Neighbours
//! outside the hex mask take the centre pixel's value, so the mask outline
//! itself never reads as an edge. Four sub-votes look at the border:
//! ring continuity, corner strength, radial edge distribution and bright
//! border coverage.

use hex_capture::NormalizedRegion;
use hex_data::{DetectorKind, DetectorSettings};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use super::{
    finish, mean_std, pixel_count_penalty, prepare, tally, Detector, DetectorResult, Diagnostics,
    MaskedRegion, SubVote,
};
use crate::hex_math::HexMask;

type Kernel3 = [[f64; 3]; 3];

const SOBEL_KERNEL_X: Kernel3 = [[-1.0, 0.0, 1.0], [-2.0, 0.0, 2.0], [-1.0, 0.0, 1.0]];
const SOBEL_KERNEL_Y: Kernel3 = [[-1.0, -2.0, -1.0], [0.0, 0.0, 0.0], [1.0, 2.0, 1.0]];

/// Normalized magnitude counted as an edge
const EDGE_THRESHOLD: f64 = 0.15;
/// Magnitude for a strong edge (bright border check)
const STRONG_EDGE: f64 = 0.35;
const BRIGHT_LUMINANCE: f64 = 0.6;
/// Luminance spread below which edges are meaningless
const MIN_STD_DEV: f64 = 0.01;

const ANGLE_BINS: usize = 36;
/// Radii (as a fraction of the mask radius) sampled by the continuity check
const BORDER_RING: [f64; 4] = [0.72, 0.76, 0.8, 0.84];
const CORNER_INSET: f64 = 0.85;
const INNER_ZONE: f64 = 0.33;
const OUTER_ZONE: f64 = 0.66;

const CONTINUITY_VOTE: f64 = 0.5;
const CORNER_VOTE: f64 = 0.3;
const OUTER_RATIO_VOTE: f64 = 0.5;
const BRIGHT_COVERAGE_VOTE: f64 = 0.6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeDiagnostics {
    pub edge_density: f64,
    pub mean_magnitude: f64,
    pub border_coverage: f64,
    pub gap_uniformity: f64,
    pub continuity: f64,
    pub corner_strength: f64,
    /// Edge density in the centre, inner and outer zones
    pub zone_density: [f64; 3],
    pub outer_ratio: f64,
    pub bright_border_coverage: f64,
    /// Mean |cos| between gradient direction and the radial direction over
    /// outer-zone edges; 1.0 for a ring drawn around the centre
    pub radial_alignment: f64,
    pub votes: Vec<SubVote>,
}

/// Per-pixel gradient magnitude and direction over the masked region
struct Gradient {
    size: u32,
    mag: Vec<f64>,
    /// Radians, image coordinates (y down)
    dir: Vec<f64>,
}

impl Gradient {
    fn compute(masked: &MaskedRegion) -> Self {
        let n = masked.size();
        let mut mag = vec![0.0; (n * n) as usize];
        let mut dir = vec![0.0; (n * n) as usize];
        for cell in masked.cells() {
            let centre = masked.luma(cell.x, cell.y);
            let mut sum_x = 0.0;
            let mut sum_y = 0.0;
            for ky in 0..3 {
                for kx in 0..3 {
                    let nx = cell.x as i64 + kx as i64 - 1;
                    let ny = cell.y as i64 + ky as i64 - 1;
                    let v = if masked.contains(nx, ny) {
                        masked.luma(nx as u32, ny as u32)
                    } else {
                        centre
                    };
                    sum_x += v * SOBEL_KERNEL_X[ky][kx];
                    sum_y += v * SOBEL_KERNEL_Y[ky][kx];
                }
            }
            let idx = (cell.y * n + cell.x) as usize;
            // a unit step yields 4 on either kernel
            mag[idx] = ((sum_x * sum_x + sum_y * sum_y).sqrt() / 4.0).min(1.0);
            dir[idx] = sum_y.atan2(sum_x);
        }
        Self { size: n, mag, dir }
    }

    fn at(&self, x: u32, y: u32) -> f64 {
        self.mag[(y * self.size + x) as usize]
    }

    fn direction(&self, x: u32, y: u32) -> f64 {
        self.dir[(y * self.size + x) as usize]
    }
}

fn angle_bin(angle: f64) -> usize {
    (((angle + PI) / (2.0 * PI) * ANGLE_BINS as f64) as usize).min(ANGLE_BINS - 1)
}

/// Judges selection from the shape and brightness of the icon border.
pub struct EdgeDetector {
    settings: DetectorSettings,
    mask: HexMask,
}

impl EdgeDetector {
    pub fn new(settings: DetectorSettings) -> Self {
        Self {
            mask: HexMask::new(settings.region_size),
            settings,
        }
    }

    /// Share of ring directions with an edge, times the evenness of the gaps
    fn continuity(masked: &MaskedRegion, grad: &Gradient) -> (f64, f64) {
        let half = masked.size() as f64 / 2.0;
        let radius = masked.mask().radius();
        let hits: Vec<usize> = (0..ANGLE_BINS)
            .filter(|&i| {
                let theta = i as f64 * 2.0 * PI / ANGLE_BINS as f64;
                BORDER_RING.iter().any(|&rho| {
                    let x = (half + rho * radius * theta.cos()).floor() as i64;
                    let y = (half + rho * radius * theta.sin()).floor() as i64;
                    masked.contains(x, y) && grad.at(x as u32, y as u32) > EDGE_THRESHOLD
                })
            })
            .collect();

        let coverage = hits.len() as f64 / ANGLE_BINS as f64;
        if hits.len() < 2 {
            return (coverage, 0.0);
        }
        let gaps: Vec<f64> = hits
            .iter()
            .enumerate()
            .map(|(k, &i)| {
                let next = hits[(k + 1) % hits.len()];
                ((next + ANGLE_BINS - i) % ANGLE_BINS).max(1) as f64
            })
            .collect();
        let (mean, std) = mean_std(&gaps);
        let uniformity = if mean > 0.0 {
            (1.0 - std / mean).clamp(0.0, 1.0)
        } else {
            0.0
        };
        (coverage, uniformity)
    }

    fn corner_strength(masked: &MaskedRegion, grad: &Gradient) -> f64 {
        let half = masked.size() as f64 / 2.0;
        let corners = masked.mask().corner_offsets();
        let total: f64 = corners
            .iter()
            .map(|&(dx, dy)| {
                let cx = (half + dx * CORNER_INSET).floor() as i64;
                let cy = (half + dy * CORNER_INSET).floor() as i64;
                let mut best: f64 = 0.0;
                for oy in -1..=1 {
                    for ox in -1..=1 {
                        let (x, y) = (cx + ox, cy + oy);
                        if masked.contains(x, y) {
                            best = best.max(grad.at(x as u32, y as u32));
                        }
                    }
                }
                best
            })
            .sum();
        total / corners.len() as f64
    }
}

impl Detector for EdgeDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Edge
    }

    fn analyze(&self, region: &NormalizedRegion) -> DetectorResult {
        let kind = self.kind();
        let masked = match prepare(kind, &self.settings, region, &self.mask) {
            Ok(m) => m,
            Err(degraded) => return degraded,
        };

        let (_, std_dev) = mean_std(&masked.masked_luma());
        if std_dev < MIN_STD_DEV {
            return DetectorResult::degraded(
                kind,
                self.settings.confidence_floor,
                format!("no contrast (std {:.4})", std_dev),
            );
        }

        let grad = Gradient::compute(&masked);

        let mut edge_count = 0usize;
        let mut mag_sum = 0.0;
        let mut zone_pixels = [0usize; 3];
        let mut zone_edges = [0usize; 3];
        let mut bright_bins = [false; ANGLE_BINS];
        let mut alignment_sum = 0.0;
        for cell in masked.cells() {
            let m = grad.at(cell.x, cell.y);
            mag_sum += m;
            let zone = if cell.radius < INNER_ZONE {
                0
            } else if cell.radius < OUTER_ZONE {
                1
            } else {
                2
            };
            zone_pixels[zone] += 1;
            if m > EDGE_THRESHOLD {
                edge_count += 1;
                zone_edges[zone] += 1;
                if zone == 2 {
                    alignment_sum += (grad.direction(cell.x, cell.y) - cell.angle).cos().abs();
                }
            }
            if zone == 2 && m > STRONG_EDGE && masked.luma(cell.x, cell.y) > BRIGHT_LUMINANCE {
                bright_bins[angle_bin(cell.angle)] = true;
            }
        }

        let count = masked.count() as f64;
        let edge_density = edge_count as f64 / count;
        let mean_magnitude = mag_sum / count;
        let mut zone_density = [0.0; 3];
        for i in 0..3 {
            if zone_pixels[i] > 0 {
                zone_density[i] = zone_edges[i] as f64 / zone_pixels[i] as f64;
            }
        }
        let density_sum: f64 = zone_density.iter().sum();
        let outer_ratio = if density_sum > 0.0 {
            zone_density[2] / density_sum
        } else {
            0.0
        };
        let bright_border_coverage =
            bright_bins.iter().filter(|&&b| b).count() as f64 / ANGLE_BINS as f64;
        let radial_alignment = if zone_edges[2] > 0 {
            alignment_sum / zone_edges[2] as f64
        } else {
            0.0
        };

        let (border_coverage, gap_uniformity) = Self::continuity(&masked, &grad);
        let continuity = border_coverage * gap_uniformity;
        let corner_strength = Self::corner_strength(&masked, &grad);

        let border_vote = continuity >= CONTINUITY_VOTE;
        let votes = vec![
            SubVote::new("border", border_vote, 1.0),
            SubVote::new("corners", corner_strength >= CORNER_VOTE, 1.0),
            SubVote::new("distribution", outer_ratio >= OUTER_RATIO_VOTE, 1.0),
            SubVote::new("bright_border", bright_border_coverage >= BRIGHT_COVERAGE_VOTE, 1.0),
        ];
        let decision = tally(&votes, border_vote);

        let border_signal = (continuity + bright_border_coverage) / 2.0;
        let strength = if decision.selected {
            border_signal
        } else {
            1.0 - border_signal
        };
        let confidence = (0.3 + 0.5 * decision.agreement + 0.2 * strength)
            * pixel_count_penalty(masked.count(), &self.settings);

        finish(
            kind,
            &self.settings,
            decision.selected,
            confidence,
            Diagnostics::Edge(EdgeDiagnostics {
                edge_density,
                mean_magnitude,
                border_coverage,
                gap_uniformity,
                continuity,
                corner_strength,
                zone_density,
                outer_ratio,
                bright_border_coverage,
                radial_alignment,
                votes,
            }),
        )
    }
}
