use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::{CoreUpgradeType, DetectorKind, REFERENCE_HEIGHT, REFERENCE_WIDTH};

/// Tolerance used when checking that detector weights sum to 1
const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Bounds on the normalized region edge, in pixels
const MIN_REGION_SIZE: u32 = 8;
const MAX_REGION_SIZE: u32 = 512;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("detector weights must sum to 1, got {0:.6}")]
    WeightSum(f64),
    #[error("weight for {kind} must be a finite non-negative number, got {value}")]
    InvalidWeight { kind: DetectorKind, value: f64 },
    #[error("threshold {name} must lie in [0, 1], got {value}")]
    ThresholdOutOfRange { name: &'static str, value: f64 },
    #[error("minimum confidence {minimum} exceeds high-confidence threshold {high}")]
    ThresholdOrder { minimum: f64, high: f64 },
    #[error("invalid layout: {0}")]
    InvalidLayout(String),
    #[error("invalid detector settings: {0}")]
    InvalidDetectorSettings(String),
    #[error("invalid batch settings: {0}")]
    InvalidBatch(String),
    #[error("invalid calibration settings: {0}")]
    InvalidCalibration(String),
}

/// Per-detector voting weights. Must sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorWeights {
    pub brightness: f64,
    pub color: f64,
    pub edge: f64,
    pub pattern: f64,
}

impl Default for DetectorWeights {
    fn default() -> Self {
        Self {
            brightness: 0.30,
            color: 0.25,
            edge: 0.25,
            pattern: 0.20,
        }
    }
}

impl DetectorWeights {
    pub fn get(&self, kind: DetectorKind) -> f64 {
        match kind {
            DetectorKind::Brightness => self.brightness,
            DetectorKind::Color => self.color,
            DetectorKind::Edge => self.edge,
            DetectorKind::Pattern => self.pattern,
        }
    }

    /// Copy with one weight replaced
    pub fn with(mut self, kind: DetectorKind, value: f64) -> Self {
        match kind {
            DetectorKind::Brightness => self.brightness = value,
            DetectorKind::Color => self.color = value,
            DetectorKind::Edge => self.edge = value,
            DetectorKind::Pattern => self.pattern = value,
        }
        self
    }

    pub fn sum(&self) -> f64 {
        DetectorKind::ALL.iter().map(|&k| self.get(k)).sum()
    }

    /// Rescale so the weights sum to 1. Returns `None` when every weight is zero.
    pub fn normalized(&self) -> Option<Self> {
        let total = self.sum();
        if !(total > 0.0) || !total.is_finite() {
            return None;
        }
        Some(
            DetectorKind::ALL
                .iter()
                .fold(*self, |acc, &k| acc.with(k, self.get(k) / total)),
        )
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for kind in DetectorKind::ALL {
            let value = self.get(kind);
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidWeight { kind, value });
            }
        }
        let total = self.sum();
        if (total - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(ConfigError::WeightSum(total));
        }
        Ok(())
    }
}

/// Decision thresholds used by the consensus engine
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusThresholds {
    /// Results below this confidence are treated as unavailable
    pub minimum_confidence: f64,
    pub high_confidence: f64,
    /// Minimum agreement/confidence for an unambiguous decision
    pub consensus: f64,
    /// Boundary between the low and medium confidence bands
    pub ambiguous: f64,
}

impl Default for ConsensusThresholds {
    fn default() -> Self {
        Self {
            minimum_confidence: 0.10,
            high_confidence: 0.80,
            consensus: 0.70,
            ambiguous: 0.50,
        }
    }
}

impl ConsensusThresholds {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let named = [
            ("minimum_confidence", self.minimum_confidence),
            ("high_confidence", self.high_confidence),
            ("consensus", self.consensus),
            ("ambiguous", self.ambiguous),
        ];
        for (name, value) in named {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::ThresholdOutOfRange { name, value });
            }
        }
        if self.minimum_confidence > self.high_confidence {
            return Err(ConfigError::ThresholdOrder {
                minimum: self.minimum_confidence,
                high: self.high_confidence,
            });
        }
        Ok(())
    }
}

/// Offset or position in reference-resolution pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LayoutOffset {
    pub x: f64,
    pub y: f64,
}

impl LayoutOffset {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Core-zone icon centres relative to the grid origin
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoreOffsets {
    pub weapon: LayoutOffset,
    pub body: LayoutOffset,
    pub shield: LayoutOffset,
}

impl Default for CoreOffsets {
    fn default() -> Self {
        Self {
            weapon: LayoutOffset::new(0.0, -48.0),
            body: LayoutOffset::new(-42.0, 24.0),
            shield: LayoutOffset::new(42.0, 24.0),
        }
    }
}

impl CoreOffsets {
    pub fn get(&self, core: CoreUpgradeType) -> LayoutOffset {
        match core {
            CoreUpgradeType::Weapon => self.weapon,
            CoreUpgradeType::Body => self.body,
            CoreUpgradeType::Shield => self.shield,
        }
    }
}

/// Static layout constants, all in reference-resolution units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneLayout {
    pub reference_width: f64,
    pub reference_height: f64,
    pub hex_radius: f64,
    /// Grid origin within the reference layout
    pub reference_grid_origin: LayoutOffset,
    pub core_offsets: CoreOffsets,
    /// Regular-zone origin relative to the grid origin
    pub regular_start_offset: LayoutOffset,
    /// Number of honeycomb columns
    pub grid_width: u32,
    /// Upper bound on honeycomb rows
    pub max_rings: u32,
    /// Icon bounds side as a fraction of the hex's flat-to-flat width
    pub icon_fill: f64,
    /// Allowed overlap between slot bounds, in screenshot pixels
    pub overlap_margin: f64,
}

impl Default for ZoneLayout {
    fn default() -> Self {
        Self {
            reference_width: REFERENCE_WIDTH,
            reference_height: REFERENCE_HEIGHT,
            hex_radius: 24.0,
            reference_grid_origin: LayoutOffset::new(960.0, 540.0),
            core_offsets: CoreOffsets::default(),
            regular_start_offset: LayoutOffset::new(0.0, 120.0),
            grid_width: 7,
            max_rings: 12,
            icon_fill: 0.85,
            overlap_margin: 1.0,
        }
    }
}

impl ZoneLayout {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.reference_width > 0.0 && self.reference_height > 0.0) {
            return Err(ConfigError::InvalidLayout(format!(
                "reference size must be positive, got {}x{}",
                self.reference_width, self.reference_height
            )));
        }
        if !(self.hex_radius > 0.0) || !self.hex_radius.is_finite() {
            return Err(ConfigError::InvalidLayout(format!(
                "hex radius must be positive, got {}",
                self.hex_radius
            )));
        }
        if self.grid_width == 0 {
            return Err(ConfigError::InvalidLayout(
                "grid width must be at least 1".to_string(),
            ));
        }
        if !(self.icon_fill > 0.0 && self.icon_fill <= 1.0) {
            return Err(ConfigError::InvalidLayout(format!(
                "icon fill must lie in (0, 1], got {}",
                self.icon_fill
            )));
        }
        if !(self.overlap_margin >= 0.0) {
            return Err(ConfigError::InvalidLayout(format!(
                "overlap margin must be non-negative, got {}",
                self.overlap_margin
            )));
        }
        let offsets = [
            self.reference_grid_origin,
            self.regular_start_offset,
            self.core_offsets.weapon,
            self.core_offsets.body,
            self.core_offsets.shield,
        ];
        if offsets.iter().any(|o| !o.is_finite()) {
            return Err(ConfigError::InvalidLayout(
                "layout offsets must be finite".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaleSettings {
    /// Candidates below this confidence do not contribute to the estimate
    pub confidence_floor: f64,
}

impl Default for ScaleSettings {
    fn default() -> Self {
        Self {
            confidence_floor: 0.3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorSettings {
    /// Side of the square normalized region, in pixels
    pub region_size: u32,
    pub min_masked_pixels: usize,
    /// Confidence reported by a degraded detector
    pub confidence_floor: f64,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            region_size: 48,
            min_masked_pixels: 100,
            confidence_floor: 0.05,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    /// Slots analysed concurrently
    pub batch_size: usize,
    /// Per-detector, per-slot time budget
    pub detector_timeout_ms: u64,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            batch_size: 16,
            detector_timeout_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationSettings {
    pub min_samples: usize,
    pub learning_rate: f64,
    pub threshold_step: f64,
    pub target_accuracy: f64,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            min_samples: 10,
            learning_rate: 0.2,
            threshold_step: 0.02,
            target_accuracy: 0.9,
        }
    }
}

/// Everything the recognition pipeline is configured with.
///
/// Built once, validated, and shared read-only across a batch. Calibration
/// produces a new value instead of mutating this one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    pub weights: DetectorWeights,
    pub thresholds: ConsensusThresholds,
    pub layout: ZoneLayout,
    pub scale: ScaleSettings,
    pub detectors: DetectorSettings,
    pub batch: BatchSettings,
    pub calibration: CalibrationSettings,
}

impl RecognitionConfig {
    /// Load a configuration file. Missing sections take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: RecognitionConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config {}", path.display()))?;

        tracing::info!(
            "Loaded recognition config from {} (weights {:.2}/{:.2}/{:.2}/{:.2})",
            path.display(),
            config.weights.brightness,
            config.weights.color,
            config.weights.edge,
            config.weights.pattern
        );
        Ok(config)
    }

    /// Write the configuration as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.weights.validate()?;
        self.thresholds.validate()?;
        self.layout.validate()?;

        if !(0.0..=1.0).contains(&self.scale.confidence_floor) {
            return Err(ConfigError::ThresholdOutOfRange {
                name: "scale.confidence_floor",
                value: self.scale.confidence_floor,
            });
        }
        if !(MIN_REGION_SIZE..=MAX_REGION_SIZE).contains(&self.detectors.region_size) {
            return Err(ConfigError::InvalidDetectorSettings(format!(
                "region size must be within {}..={}, got {}",
                MIN_REGION_SIZE, MAX_REGION_SIZE, self.detectors.region_size
            )));
        }
        if !(0.0..=1.0).contains(&self.detectors.confidence_floor) {
            return Err(ConfigError::ThresholdOutOfRange {
                name: "detectors.confidence_floor",
                value: self.detectors.confidence_floor,
            });
        }
        if self.batch.batch_size == 0 {
            return Err(ConfigError::InvalidBatch(
                "batch size must be at least 1".to_string(),
            ));
        }
        if self.batch.detector_timeout_ms == 0 {
            return Err(ConfigError::InvalidBatch(
                "detector timeout must be positive".to_string(),
            ));
        }
        let cal = &self.calibration;
        if !(cal.learning_rate > 0.0 && cal.learning_rate <= 1.0) {
            return Err(ConfigError::InvalidCalibration(format!(
                "learning rate must lie in (0, 1], got {}",
                cal.learning_rate
            )));
        }
        if !(cal.threshold_step >= 0.0 && cal.threshold_step < 0.5) {
            return Err(ConfigError::InvalidCalibration(format!(
                "threshold step must lie in [0, 0.5), got {}",
                cal.threshold_step
            )));
        }
        if !(0.0..=1.0).contains(&cal.target_accuracy) {
            return Err(ConfigError::ThresholdOutOfRange {
                name: "calibration.target_accuracy",
                value: cal.target_accuracy,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(RecognitionConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_weights_not_summing_to_one_rejected() {
        let mut config = RecognitionConfig::default();
        config.weights.pattern = 0.5;
        match config.validate() {
            Err(ConfigError::WeightSum(total)) => assert!((total - 1.3).abs() < 1e-9),
            other => panic!("expected WeightSum error, got {:?}", other),
        }
    }

    #[test]
    fn test_negative_weight_rejected() {
        let weights = DetectorWeights {
            brightness: 1.2,
            color: -0.2,
            edge: 0.0,
            pattern: 0.0,
        };
        assert!(matches!(
            weights.validate(),
            Err(ConfigError::InvalidWeight {
                kind: DetectorKind::Color,
                ..
            })
        ));
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let mut config = RecognitionConfig::default();
        config.thresholds.consensus = 1.2;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ThresholdOutOfRange {
                name: "consensus",
                ..
            })
        ));
    }

    #[test]
    fn test_region_size_bounds() {
        let mut config = RecognitionConfig::default();
        config.detectors.region_size = 4;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidDetectorSettings(_))));

        config.detectors.region_size = u32::MAX;
        assert!(
            matches!(config.validate(), Err(ConfigError::InvalidDetectorSettings(_))),
            "oversized regions must be rejected before anything allocates them"
        );

        config.detectors.region_size = MAX_REGION_SIZE;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_normalized_weights() {
        let weights = DetectorWeights {
            brightness: 2.0,
            color: 1.0,
            edge: 1.0,
            pattern: 0.0,
        };
        let norm = weights.normalized().unwrap();
        assert!((norm.sum() - 1.0).abs() < 1e-12);
        assert!((norm.brightness - 0.5).abs() < 1e-12);
        assert!(DetectorWeights {
            brightness: 0.0,
            color: 0.0,
            edge: 0.0,
            pattern: 0.0
        }
        .normalized()
        .is_none());
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let json =
            r#"{ "thresholds": { "high_confidence": 0.85 }, "layout": { "grid_width": 5 } }"#;
        let config: RecognitionConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.thresholds.high_confidence, 0.85);
        assert_eq!(config.thresholds.consensus, 0.70);
        assert_eq!(config.layout.grid_width, 5);
        assert_eq!(config.layout.hex_radius, 24.0);
        assert_eq!(config.weights, DetectorWeights::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_nonexistent() {
        assert!(RecognitionConfig::load(Path::new("/nonexistent/config.json")).is_err());
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join("hex_data_config_roundtrip.json");
        let mut config = RecognitionConfig::default();
        config.batch.batch_size = 4;
        config.save(&path).unwrap();
        let loaded = RecognitionConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        let _ = std::fs::remove_file(&path);
    }
}
