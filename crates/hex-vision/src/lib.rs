pub mod calibration;
pub mod consensus;
pub mod detectors;
pub mod hex_math;
pub mod layout;
pub mod scale;

pub use calibration::{
    CalibrationHistory, CalibrationOutcome, CalibrationRecord, CalibrationSample, Calibrator,
};
pub use consensus::{ConsensusEngine, DetectorOutcome, DetectorSet, UnavailableReason};
pub use detectors::{Detector, DetectorBank, DetectorResult, Diagnostics, TemplateLibrary};
pub use hex_math::{axial_to_pixel, is_in_hex_shape, pixel_to_axial, AxialCoordinate, HexMask};
pub use layout::{CoordinateMap, LayoutError, SlotIdentity, UpgradeSlot, ZoneLayoutMapper};
pub use scale::{ScaleEstimate, ScaleEstimator, ScaleMethod};
