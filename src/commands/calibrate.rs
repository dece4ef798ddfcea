use anyhow::{Context, Result};
use hex_data::RecognitionConfig;
use hex_vision::calibration::load_samples;
use hex_vision::{CalibrationHistory, Calibrator};
use std::path::Path;

/// Tune `config` against a labelled samples file and write the result to `output`.
///
/// When `history` is given, the pass is appended to that JSON log.
pub fn calibrate_file(
    samples_path: &Path,
    config: &RecognitionConfig,
    output: &Path,
    history: Option<&Path>,
) -> Result<serde_json::Value> {
    let samples = load_samples(samples_path)?;
    let outcome = Calibrator::new(config.calibration).calibrate(config, &samples)?;

    if outcome.applied {
        outcome.config.save(output)?;
        tracing::info!("Wrote calibrated config to {}", output.display());
    } else {
        tracing::warn!(
            "Calibration not applied to {} sample(s) (need {}); config left unchanged",
            samples.len(),
            config.calibration.min_samples
        );
    }

    if let Some(path) = history {
        let mut log = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read history {}", path.display()))?;
            serde_json::from_str::<CalibrationHistory>(&content)
                .with_context(|| format!("Failed to parse history {}", path.display()))?
        } else {
            CalibrationHistory::default()
        };
        log.push(outcome.record.clone());
        let content = serde_json::to_string_pretty(&log).context("Failed to serialize history")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write history {}", path.display()))?;
    }

    let r = &outcome.record;
    Ok(serde_json::json!({
        "applied": outcome.applied,
        "sampleCount": r.sample_count,
        "accuracyBefore": r.accuracy_before,
        "accuracyAfter": r.accuracy_after,
        "detectorAccuracy": r.detector_accuracy,
        "weights": r.weights,
        "consensusThreshold": r.consensus_threshold,
        "highConfidence": r.high_confidence,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_data::DetectorKind;
    use hex_vision::{CalibrationSample, DetectorOutcome, DetectorResult, DetectorSet, Diagnostics};

    fn samples(n: usize) -> Vec<CalibrationSample> {
        (0..n)
            .map(|i| {
                let actual = i % 2 == 0;
                CalibrationSample {
                    slot_id: format!("regular:q{}r0", i),
                    actual_selected: actual,
                    detectors: DetectorSet::from_fn(|kind| {
                        DetectorOutcome::Available(DetectorResult {
                            kind,
                            // color is always wrong
                            selected: if kind == DetectorKind::Color { !actual } else { actual },
                            confidence: 0.85,
                            diagnostics: Diagnostics::None,
                        })
                    }),
                }
            })
            .collect()
    }

    fn temp(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("hexscan_{}_{}", std::process::id(), name))
    }

    #[test]
    fn test_calibrate_writes_config_and_history() {
        let samples_path = temp("samples.json");
        let output = temp("tuned.json");
        let history = temp("history.json");
        std::fs::write(&samples_path, serde_json::to_string(&samples(12)).unwrap()).unwrap();

        let config = RecognitionConfig::default();
        let summary = calibrate_file(&samples_path, &config, &output, Some(&history)).unwrap();
        assert_eq!(summary["applied"], true);
        assert_eq!(summary["sampleCount"], 12);

        let tuned = RecognitionConfig::load(&output).unwrap();
        assert!(tuned.weights.color < config.weights.color, "color should lose weight");

        // second pass appends
        calibrate_file(&samples_path, &tuned, &output, Some(&history)).unwrap();
        let log: CalibrationHistory =
            serde_json::from_str(&std::fs::read_to_string(&history).unwrap()).unwrap();
        assert_eq!(log.len(), 2);

        for p in [&samples_path, &output, &history] {
            std::fs::remove_file(p).ok();
        }
    }

    #[test]
    fn test_too_few_samples_writes_nothing() {
        let samples_path = temp("few.json");
        let output = temp("untouched.json");
        std::fs::write(&samples_path, serde_json::to_string(&samples(3)).unwrap()).unwrap();

        let summary =
            calibrate_file(&samples_path, &RecognitionConfig::default(), &output, None).unwrap();
        assert_eq!(summary["applied"], false);
        assert!(!output.exists());
        std::fs::remove_file(&samples_path).ok();
    }

    #[test]
    fn test_missing_samples_file() {
        let err = calibrate_file(
            Path::new("/nonexistent/samples.json"),
            &RecognitionConfig::default(),
            &temp("never.json"),
            None,
        );
        assert!(err.is_err());
    }
}
