//! Rule-based fusion of the four detector judgments for one slot.

use hex_data::{ConfigError, ConsensusThresholds, DetectorKind, DetectorWeights, RecognitionConfig};
use hex_state::{ConsensusResult, ConsensusRule};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

use crate::detectors::DetectorResult;

/// Confidence multiplier when at least two detectors are independently sure
const HIGH_CONFIDENCE_BOOST: f64 = 1.1;
/// Confidence lost per unavailable detector
const UNAVAILABLE_PENALTY: f64 = 0.1;
/// Discount applied when a single detector decides alone
const SINGLE_DETECTOR_FACTOR: f64 = 0.8;
const STRONG_MAJORITY: f64 = 0.7;
const WEAK_BASE_FACTOR: f64 = 0.6;
const WEAK_OVERALL_FACTOR: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableReason {
    /// The detector panicked
    Crashed,
    /// The detector exceeded its time budget
    TimedOut,
    /// Confidence fell below the configured minimum
    BelowFloor,
    /// No region could be extracted for the slot
    MissingRegion,
}

/// A detector's contribution to one slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum DetectorOutcome {
    Available(DetectorResult),
    Unavailable(UnavailableReason),
}

impl DetectorOutcome {
    pub fn result(&self) -> Option<&DetectorResult> {
        match self {
            DetectorOutcome::Available(r) => Some(r),
            DetectorOutcome::Unavailable(_) => None,
        }
    }
}

/// One outcome per known detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorSet {
    pub brightness: DetectorOutcome,
    pub color: DetectorOutcome,
    pub edge: DetectorOutcome,
    pub pattern: DetectorOutcome,
}

impl DetectorSet {
    pub fn from_fn(mut f: impl FnMut(DetectorKind) -> DetectorOutcome) -> Self {
        Self {
            brightness: f(DetectorKind::Brightness),
            color: f(DetectorKind::Color),
            edge: f(DetectorKind::Edge),
            pattern: f(DetectorKind::Pattern),
        }
    }

    /// Every detector unavailable for the same reason
    pub fn unavailable(reason: UnavailableReason) -> Self {
        Self::from_fn(|_| DetectorOutcome::Unavailable(reason))
    }

    pub fn get(&self, kind: DetectorKind) -> &DetectorOutcome {
        match kind {
            DetectorKind::Brightness => &self.brightness,
            DetectorKind::Color => &self.color,
            DetectorKind::Edge => &self.edge,
            DetectorKind::Pattern => &self.pattern,
        }
    }

    pub fn set(&mut self, kind: DetectorKind, outcome: DetectorOutcome) {
        match kind {
            DetectorKind::Brightness => self.brightness = outcome,
            DetectorKind::Color => self.color = outcome,
            DetectorKind::Edge => self.edge = outcome,
            DetectorKind::Pattern => self.pattern = outcome,
        }
    }

    pub fn available_count(&self) -> usize {
        DetectorKind::ALL
            .iter()
            .filter(|&&k| self.get(k).result().is_some())
            .count()
    }
}

/// A detector that made it through screening, with its active weight
#[derive(Debug, Clone, Copy, PartialEq)]
struct Vote {
    kind: DetectorKind,
    selected: bool,
    confidence: f64,
    weight: f64,
}

/// Fuses detector outcomes into one decision. Holds only immutable
/// configuration, so one engine can serve many concurrent slots.
#[derive(Debug, Clone)]
pub struct ConsensusEngine {
    weights: DetectorWeights,
    thresholds: ConsensusThresholds,
}

impl ConsensusEngine {
    pub fn new(
        weights: DetectorWeights,
        thresholds: ConsensusThresholds,
    ) -> Result<Self, ConfigError> {
        weights.validate()?;
        thresholds.validate()?;
        Ok(Self { weights, thresholds })
    }

    pub fn from_config(config: &RecognitionConfig) -> Result<Self, ConfigError> {
        Self::new(config.weights, config.thresholds)
    }

    pub fn thresholds(&self) -> &ConsensusThresholds {
        &self.thresholds
    }

    pub fn weights(&self) -> &DetectorWeights {
        &self.weights
    }

    /// Outcomes as consensus sees them: confidences clamped to [0, 1] and
    /// results under the minimum confidence marked `BelowFloor`.
    pub fn screen_outcomes(&self, set: &DetectorSet) -> DetectorSet {
        DetectorSet::from_fn(|kind| match set.get(kind) {
            DetectorOutcome::Available(r) => {
                let confidence = if r.confidence.is_finite() {
                    r.confidence.clamp(0.0, 1.0)
                } else {
                    0.0
                };
                if confidence < self.thresholds.minimum_confidence {
                    debug!("{} below confidence floor ({:.2}), excluded", kind, confidence);
                    DetectorOutcome::Unavailable(UnavailableReason::BelowFloor)
                } else {
                    DetectorOutcome::Available(DetectorResult {
                        confidence,
                        ..r.clone()
                    })
                }
            }
            unavailable => unavailable.clone(),
        })
    }

    /// Drop unavailable and below-floor results, and renormalize the
    /// remaining weights to sum to 1.
    fn screen(&self, set: &DetectorSet) -> (Vec<Vote>, BTreeSet<DetectorKind>) {
        let screened = self.screen_outcomes(set);
        let mut votes = Vec::new();
        let mut unavailable = BTreeSet::new();
        for kind in DetectorKind::ALL {
            match screened.get(kind) {
                DetectorOutcome::Available(r) => votes.push(Vote {
                    kind,
                    selected: r.selected,
                    confidence: r.confidence,
                    weight: self.weights.get(kind),
                }),
                DetectorOutcome::Unavailable(reason) => {
                    debug!("{} unavailable: {:?}", kind, reason);
                    unavailable.insert(kind);
                }
            }
        }

        let total: f64 = votes.iter().map(|v| v.weight).sum();
        if total > 0.0 {
            for v in &mut votes {
                v.weight /= total;
            }
        } else if !votes.is_empty() {
            // every remaining detector is weighted zero: fall back to equal shares
            let share = 1.0 / votes.len() as f64;
            for v in &mut votes {
                v.weight = share;
            }
        }
        (votes, unavailable)
    }

    /// Renormalized weights of the detectors that will vote
    pub fn active_weights(&self, set: &DetectorSet) -> Vec<(DetectorKind, f64)> {
        self.screen(set).0.into_iter().map(|v| (v.kind, v.weight)).collect()
    }

    pub fn fuse(&self, set: &DetectorSet) -> ConsensusResult {
        let (votes, unavailable) = self.screen(set);
        let t = &self.thresholds;

        if votes.is_empty() {
            return ConsensusResult {
                selected: false,
                confidence: 0.0,
                weighted_votes: 0.0,
                agreement: 0.0,
                supporting: BTreeSet::new(),
                conflicting: BTreeSet::new(),
                unavailable,
                rule: ConsensusRule::NoEvidence,
                ambiguous: true,
                reliable: false,
            };
        }

        let weighted_votes: f64 = votes
            .iter()
            .map(|v| v.weight * if v.selected { v.confidence } else { 1.0 - v.confidence })
            .sum();

        let high_count = votes.iter().filter(|v| v.confidence >= t.high_confidence).count();
        let mut overall: f64 = votes.iter().map(|v| v.weight * v.confidence).sum();
        if high_count >= 2 {
            overall *= HIGH_CONFIDENCE_BOOST;
        }
        overall *= (1.0 - UNAVAILABLE_PENALTY * unavailable.len() as f64).max(0.0);
        let overall = overall.clamp(0.0, 1.0);

        let agreement = agreement(&votes);

        let (selected, confidence, rule) = if votes.len() == 1 {
            let only = votes[0];
            (only.selected, SINGLE_DETECTOR_FACTOR * only.confidence, ConsensusRule::SoleDetector)
        } else if overall >= t.high_confidence && agreement >= t.consensus {
            (weighted_votes > 0.5, overall.min(agreement), ConsensusRule::HighConfidence)
        } else if weighted_votes > STRONG_MAJORITY || weighted_votes < 1.0 - STRONG_MAJORITY {
            let base = (weighted_votes - 0.5).abs() * 2.0;
            (weighted_votes > 0.5, base.min(overall), ConsensusRule::StrongMajority)
        } else if high_count == 1 && votes.len() <= 2 {
            let sure = votes
                .iter()
                .find(|v| v.confidence >= t.high_confidence)
                .copied()
                .unwrap_or(votes[0]);
            (
                sure.selected,
                SINGLE_DETECTOR_FACTOR * sure.confidence,
                ConsensusRule::SingleHighConfidence,
            )
        } else {
            let base = (weighted_votes - 0.5).abs() * 2.0;
            (
                weighted_votes > 0.5,
                (WEAK_BASE_FACTOR * base).min(WEAK_OVERALL_FACTOR * overall),
                ConsensusRule::WeakConsensus,
            )
        };
        let confidence = confidence.clamp(0.0, 1.0);

        let supporting: BTreeSet<DetectorKind> =
            votes.iter().filter(|v| v.selected == selected).map(|v| v.kind).collect();
        let conflicting: BTreeSet<DetectorKind> =
            votes.iter().filter(|v| v.selected != selected).map(|v| v.kind).collect();

        let ambiguous = confidence < t.consensus
            || agreement < t.consensus
            || supporting.len().abs_diff(conflicting.len()) <= 1;
        let reliable = confidence >= t.high_confidence
            && agreement >= t.consensus
            && supporting.len() >= 2
            && votes.len() >= 3;

        ConsensusResult {
            selected,
            confidence,
            weighted_votes,
            agreement,
            supporting,
            conflicting,
            unavailable,
            rule,
            ambiguous,
            reliable,
        }
    }
}

/// Pairwise agreement, each pair weighted by its mean confidence.
fn agreement(votes: &[Vote]) -> f64 {
    if votes.len() < 2 {
        return 1.0;
    }
    let mut weighted = 0.0;
    let mut total_weight = 0.0;
    let mut plain = 0.0;
    let mut pairs = 0usize;
    for (i, a) in votes.iter().enumerate() {
        for b in &votes[i + 1..] {
            let decision = if a.selected == b.selected { 1.0 } else { 0.0 };
            let score = 0.7 * decision + 0.3 * (1.0 - (a.confidence - b.confidence).abs());
            let pair_weight = (a.confidence + b.confidence) / 2.0;
            weighted += score * pair_weight;
            total_weight += pair_weight;
            plain += score;
            pairs += 1;
        }
    }
    if total_weight > 0.0 {
        weighted / total_weight
    } else {
        plain / pairs as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::Diagnostics;

    fn engine() -> ConsensusEngine {
        ConsensusEngine::new(DetectorWeights::default(), ConsensusThresholds::default()).unwrap()
    }

    fn vote(kind: DetectorKind, selected: bool, confidence: f64) -> DetectorOutcome {
        DetectorOutcome::Available(DetectorResult {
            kind,
            selected,
            confidence,
            diagnostics: Diagnostics::None,
        })
    }

    fn set(entries: [(bool, f64); 4]) -> DetectorSet {
        let mut i = 0;
        DetectorSet::from_fn(|kind| {
            let (selected, confidence) = entries[i];
            i += 1;
            vote(kind, selected, confidence)
        })
    }

    #[test]
    fn test_all_confident_is_reliable() {
        let result = engine().fuse(&set([(true, 0.9), (true, 0.92), (true, 0.95), (true, 0.9)]));
        assert!(result.selected);
        assert!(result.confidence >= 0.8, "confidence {}", result.confidence);
        assert!(result.reliable);
        assert!(!result.ambiguous);
        assert_eq!(result.rule, ConsensusRule::HighConfidence);
        assert_eq!(result.supporting.len(), 4);
        assert!(result.conflicting.is_empty());
    }

    #[test]
    fn test_sole_detector_decides() {
        for &(selected, confidence) in &[(true, 0.3), (false, 0.95), (true, 0.85)] {
            let mut s = DetectorSet::unavailable(UnavailableReason::TimedOut);
            s.set(DetectorKind::Edge, vote(DetectorKind::Edge, selected, confidence));
            let result = engine().fuse(&s);
            assert_eq!(result.selected, selected);
            assert_eq!(result.agreement, 1.0);
            assert_eq!(result.rule, ConsensusRule::SoleDetector);
            assert!((result.confidence - 0.8 * confidence).abs() < 1e-9);
            assert_eq!(result.unavailable.len(), 3);
        }
    }

    #[test]
    fn test_active_weights_renormalize() {
        let mut s = set([(true, 0.9), (true, 0.9), (false, 0.9), (true, 0.9)]);
        s.set(DetectorKind::Color, DetectorOutcome::Unavailable(UnavailableReason::Crashed));
        s.set(DetectorKind::Pattern, vote(DetectorKind::Pattern, true, 0.05));

        let active = engine().active_weights(&s);
        assert_eq!(active.len(), 2);
        let total: f64 = active.iter().map(|(_, w)| w).sum();
        assert!((total - 1.0).abs() < 1e-9, "active weights sum to {}", total);
        // brightness 0.30 and edge 0.25 keep their ratio
        assert!((active[0].1 - 0.30 / 0.55).abs() < 1e-9);
    }

    #[test]
    fn test_below_floor_is_unavailable() {
        let result = engine().fuse(&set([(true, 0.9), (true, 0.9), (true, 0.9), (false, 0.02)]));
        assert!(result.unavailable.contains(&DetectorKind::Pattern));
        assert!(!result.conflicting.contains(&DetectorKind::Pattern));
        assert!(result.selected);
    }

    #[test]
    fn test_screen_outcomes_records_reasons() {
        let mut s = set([(true, 1.7), (true, 0.9), (true, 0.9), (false, 0.02)]);
        s.set(DetectorKind::Edge, DetectorOutcome::Unavailable(UnavailableReason::TimedOut));

        let screened = engine().screen_outcomes(&s);
        assert_eq!(
            screened.pattern,
            DetectorOutcome::Unavailable(UnavailableReason::BelowFloor),
            "below-floor result should be marked, not silently dropped"
        );
        assert_eq!(screened.edge, DetectorOutcome::Unavailable(UnavailableReason::TimedOut));
        assert_eq!(screened.brightness.result().map(|r| r.confidence), Some(1.0));
        assert_eq!(screened.available_count(), 2);
    }

    #[test]
    fn test_strong_majority() {
        let result = engine().fuse(&set([(true, 0.75), (true, 0.75), (true, 0.75), (true, 0.75)]));
        assert_eq!(result.rule, ConsensusRule::StrongMajority);
        assert!(result.selected);
        assert!((result.confidence - 0.5).abs() < 1e-9);
        assert!(result.ambiguous);
        assert!(!result.reliable);
    }

    #[test]
    fn test_single_high_confidence_fallback() {
        let mut s = DetectorSet::unavailable(UnavailableReason::Crashed);
        s.set(DetectorKind::Brightness, vote(DetectorKind::Brightness, true, 0.85));
        s.set(DetectorKind::Color, vote(DetectorKind::Color, false, 0.7));
        let result = engine().fuse(&s);
        assert_eq!(result.rule, ConsensusRule::SingleHighConfidence);
        assert!(result.selected);
        assert!((result.confidence - 0.68).abs() < 1e-9);
        assert!(result.ambiguous);
    }

    #[test]
    fn test_weak_consensus_is_discounted() {
        let result = engine().fuse(&set([(true, 0.6), (false, 0.6), (true, 0.6), (false, 0.6)]));
        assert_eq!(result.rule, ConsensusRule::WeakConsensus);
        assert!(result.selected);
        assert!(result.confidence < 0.05, "confidence {}", result.confidence);
        assert!(result.ambiguous);
        assert_eq!(result.supporting.len(), 2);
        assert_eq!(result.conflicting.len(), 2);
    }

    #[test]
    fn test_no_evidence() {
        let result = engine().fuse(&DetectorSet::unavailable(UnavailableReason::MissingRegion));
        assert_eq!(result.rule, ConsensusRule::NoEvidence);
        assert!(!result.selected);
        assert_eq!(result.confidence, 0.0);
        assert!(result.needs_review());
    }

    #[test]
    fn test_out_of_range_confidence_is_clamped() {
        let result =
            engine().fuse(&set([(true, 1.7), (true, 1.2), (true, 0.95), (true, f64::NAN)]));
        assert!(result.confidence <= 1.0);
        assert!(result.unavailable.contains(&DetectorKind::Pattern));
        assert!(result.selected);
    }

    #[test]
    fn test_invalid_weights_rejected() {
        let weights = DetectorWeights::default().with(DetectorKind::Color, 0.5);
        assert!(matches!(
            ConsensusEngine::new(weights, ConsensusThresholds::default()),
            Err(ConfigError::WeightSum(_))
        ));
    }

    #[test]
    fn test_detector_set_serializes() {
        let s = set([(true, 0.9), (false, 0.4), (true, 0.7), (true, 0.8)]);
        let json = serde_json::to_string(&s).unwrap();
        assert!(json.contains("\"available\""));
        let back: DetectorSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }
}
