//! Offline weight and threshold tuning from labelled samples.
//!
//! Calibration never touches a live configuration. It reads one
//! `RecognitionConfig` and returns a new one, to be swapped in between
//! batches.

use anyhow::{Context, Result};
use hex_data::{CalibrationSettings, ConfigError, DetectorKind, DetectorWeights, RecognitionConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::consensus::{ConsensusEngine, DetectorSet};

/// Bounds for the tuned consensus threshold
const CONSENSUS_RANGE: (f64, f64) = (0.5, 0.95);
/// Accuracy assumed for a detector never seen available
const UNOBSERVED_ACCURACY: f64 = 0.5;
/// Upper bound for the high-confidence threshold when calibration moves it
const HIGH_CONFIDENCE_MAX: f64 = 0.99;

/// One slot with a known answer and the detector outcomes recorded for it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSample {
    pub slot_id: String,
    pub actual_selected: bool,
    pub detectors: DetectorSet,
}

/// Read a JSON array of labelled samples.
pub fn load_samples(path: &Path) -> Result<Vec<CalibrationSample>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read samples {}", path.display()))?;
    let samples: Vec<CalibrationSample> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse samples {}", path.display()))?;
    info!("Loaded {} calibration sample(s) from {}", samples.len(), path.display());
    Ok(samples)
}

/// What one calibration pass observed and produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub sample_count: usize,
    /// Per-detector accuracy over the samples where it was available
    pub detector_accuracy: BTreeMap<DetectorKind, f64>,
    pub accuracy_before: f64,
    pub accuracy_after: f64,
    pub weights: DetectorWeights,
    pub consensus_threshold: f64,
    #[serde(default)]
    pub high_confidence: f64,
}

#[derive(Debug, Clone)]
pub struct CalibrationOutcome {
    pub config: RecognitionConfig,
    pub record: CalibrationRecord,
    /// False when nothing changed: too few samples, or every tunable at its bound
    pub applied: bool,
}

/// Append-only log of calibration passes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationHistory {
    pub records: Vec<CalibrationRecord>,
}

impl CalibrationHistory {
    pub fn push(&mut self, record: CalibrationRecord) {
        self.records.push(record);
    }

    pub fn latest(&self) -> Option<&CalibrationRecord> {
        self.records.last()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Calibrator {
    settings: CalibrationSettings,
}

impl Calibrator {
    pub fn new(settings: CalibrationSettings) -> Self {
        Self { settings }
    }

    /// Produce a tuned copy of `config`. Fails only if `config` itself is invalid.
    pub fn calibrate(
        &self,
        config: &RecognitionConfig,
        samples: &[CalibrationSample],
    ) -> Result<CalibrationOutcome, ConfigError> {
        let engine = ConsensusEngine::from_config(config)?;
        let accuracy_before = consensus_accuracy(&engine, samples);
        let detector_accuracy = detector_accuracy(samples, config.thresholds.minimum_confidence);

        if samples.len() < self.settings.min_samples {
            debug!(
                "Calibration skipped: {} sample(s), need {}",
                samples.len(),
                self.settings.min_samples
            );
            return Ok(unchanged(config, samples.len(), detector_accuracy, accuracy_before));
        }

        let accuracy_total: f64 = detector_accuracy.values().sum();
        let rate = self.settings.learning_rate;
        let blended = DetectorKind::ALL.iter().fold(config.weights, |acc, &kind| {
            let share = if accuracy_total > 0.0 {
                let accuracy = detector_accuracy.get(&kind).copied();
                accuracy.unwrap_or(UNOBSERVED_ACCURACY) / accuracy_total
            } else {
                0.25
            };
            acc.with(kind, (1.0 - rate) * config.weights.get(kind) + rate * share)
        });
        let weights = blended.normalized().unwrap_or(config.weights);

        let mut thresholds = config.thresholds;
        let step = self.settings.threshold_step;
        let tighten = accuracy_before < self.settings.target_accuracy;
        let direction = if tighten { step } else { -step };
        thresholds.consensus =
            (thresholds.consensus + direction).clamp(CONSENSUS_RANGE.0, CONSENSUS_RANGE.1);

        // consensus pinned at a bound and weights unmoved: shift the high-confidence bar instead
        if weights == config.weights && thresholds.consensus == config.thresholds.consensus {
            let ceiling = HIGH_CONFIDENCE_MAX.max(config.thresholds.high_confidence);
            thresholds.high_confidence = (thresholds.high_confidence + direction)
                .clamp(thresholds.minimum_confidence, ceiling);
        }

        let mut tuned = config.clone();
        tuned.weights = weights;
        tuned.thresholds = thresholds;
        tuned.validate()?;

        if tuned == *config {
            warn!(
                "Calibration on {} sample(s) changed nothing; every tunable is at its bound",
                samples.len()
            );
            return Ok(unchanged(config, samples.len(), detector_accuracy, accuracy_before));
        }

        let accuracy_after = consensus_accuracy(&ConsensusEngine::from_config(&tuned)?, samples);
        info!(
            "Calibrated on {} sample(s): accuracy {:.2} -> {:.2}, consensus {:.2} -> {:.2}",
            samples.len(),
            accuracy_before,
            accuracy_after,
            config.thresholds.consensus,
            thresholds.consensus
        );

        Ok(CalibrationOutcome {
            record: CalibrationRecord {
                sample_count: samples.len(),
                detector_accuracy,
                accuracy_before,
                accuracy_after,
                weights,
                consensus_threshold: thresholds.consensus,
                high_confidence: thresholds.high_confidence,
            },
            config: tuned,
            applied: true,
        })
    }
}

/// Outcome that hands back `config` untouched
fn unchanged(
    config: &RecognitionConfig,
    sample_count: usize,
    detector_accuracy: BTreeMap<DetectorKind, f64>,
    accuracy: f64,
) -> CalibrationOutcome {
    CalibrationOutcome {
        config: config.clone(),
        record: CalibrationRecord {
            sample_count,
            detector_accuracy,
            accuracy_before: accuracy,
            accuracy_after: accuracy,
            weights: config.weights,
            consensus_threshold: config.thresholds.consensus,
            high_confidence: config.thresholds.high_confidence,
        },
        applied: false,
    }
}

fn consensus_accuracy(engine: &ConsensusEngine, samples: &[CalibrationSample]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let correct = samples
        .iter()
        .filter(|s| engine.fuse(&s.detectors).selected == s.actual_selected)
        .count();
    correct as f64 / samples.len() as f64
}

fn detector_accuracy(samples: &[CalibrationSample], floor: f64) -> BTreeMap<DetectorKind, f64> {
    let mut accuracy = BTreeMap::new();
    for kind in DetectorKind::ALL {
        let mut seen = 0usize;
        let mut correct = 0usize;
        for sample in samples {
            if let Some(r) = sample.detectors.get(kind).result() {
                if r.confidence >= floor {
                    seen += 1;
                    if r.selected == sample.actual_selected {
                        correct += 1;
                    }
                }
            }
        }
        if seen > 0 {
            accuracy.insert(kind, correct as f64 / seen as f64);
        }
    }
    accuracy
}
