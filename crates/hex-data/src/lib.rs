use serde::{Deserialize, Serialize};
use std::fmt;

pub mod config;

pub use config::{
    BatchSettings, CalibrationSettings, ConfigError, ConsensusThresholds, CoreOffsets,
    DetectorSettings, DetectorWeights, LayoutOffset, RecognitionConfig, ScaleSettings, ZoneLayout,
};

/// Width of the canonical layout every screenshot is scaled against
pub const REFERENCE_WIDTH: f64 = 1920.0;
/// Height of the canonical layout every screenshot is scaled against
pub const REFERENCE_HEIGHT: f64 = 1080.0;

/// The four independent selection detectors
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorKind {
    Brightness,
    Color,
    Edge,
    Pattern,
}

impl DetectorKind {
    pub const ALL: [DetectorKind; 4] = [
        DetectorKind::Brightness,
        DetectorKind::Color,
        DetectorKind::Edge,
        DetectorKind::Pattern,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DetectorKind::Brightness => "brightness",
            DetectorKind::Color => "color",
            DetectorKind::Edge => "edge",
            DetectorKind::Pattern => "pattern",
        }
    }
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which icon layout a slot belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Zone {
    /// Fixed 3-icon triangle
    Core,
    /// Variable-width honeycomb
    Regular,
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Zone::Core => f.write_str("core"),
            Zone::Regular => f.write_str("regular"),
        }
    }
}

/// Fixed identities of the three core-zone upgrades
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoreUpgradeType {
    Weapon,
    Body,
    Shield,
}

impl CoreUpgradeType {
    pub const ALL: [CoreUpgradeType; 3] = [
        CoreUpgradeType::Weapon,
        CoreUpgradeType::Body,
        CoreUpgradeType::Shield,
    ];

    pub fn slug(&self) -> &'static str {
        match self {
            CoreUpgradeType::Weapon => "weapon",
            CoreUpgradeType::Body => "body",
            CoreUpgradeType::Shield => "shield",
        }
    }
}

/// A screen resolution the game is known to ship with
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KnownResolution {
    pub width: u32,
    pub height: u32,
    pub label: &'static str,
}

impl KnownResolution {
    pub fn aspect(&self) -> f64 {
        self.width as f64 / self.height as f64
    }

    /// True for resolutions whose full frame is the 16:9 reference layout
    pub fn is_reference_aspect(&self) -> bool {
        (self.aspect() - REFERENCE_WIDTH / REFERENCE_HEIGHT).abs() < 0.01
    }
}

/// Supported resolutions, used for exact lookups during scale estimation.
pub const SUPPORTED_RESOLUTIONS: &[KnownResolution] = &[
    KnownResolution { width: 1280, height: 720, label: "720p" },
    KnownResolution { width: 1366, height: 768, label: "WXGA" },
    KnownResolution { width: 1600, height: 900, label: "HD+" },
    KnownResolution { width: 1920, height: 1080, label: "1080p" },
    KnownResolution { width: 2560, height: 1440, label: "1440p" },
    KnownResolution { width: 3200, height: 1800, label: "QHD+" },
    KnownResolution { width: 3840, height: 2160, label: "4K" },
    KnownResolution { width: 1440, height: 900, label: "WXGA+" },
    KnownResolution { width: 1680, height: 1050, label: "WSXGA+" },
    KnownResolution { width: 1920, height: 1200, label: "WUXGA" },
    KnownResolution { width: 2560, height: 1600, label: "WQXGA" },
    KnownResolution { width: 2560, height: 1080, label: "UW-FHD" },
    KnownResolution { width: 3440, height: 1440, label: "UW-QHD" },
    KnownResolution { width: 5120, height: 1440, label: "DQHD" },
    KnownResolution { width: 1024, height: 768, label: "XGA" },
];

/// Aspect ratios used by the nearest-match strategy
pub const KNOWN_ASPECT_RATIOS: &[(f64, &str)] = &[
    (16.0 / 9.0, "16:9"),
    (16.0 / 10.0, "16:10"),
    (21.0 / 9.0, "21:9"),
    (32.0 / 9.0, "32:9"),
    (4.0 / 3.0, "4:3"),
];
