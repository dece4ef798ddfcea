use crate::pipeline::RecognitionOrchestrator;
use anyhow::{Context, Result};
use hex_data::RecognitionConfig;
use hex_state::SelectionReport;
use hex_vision::{DetectorBank, TemplateLibrary};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Load a config file, or the defaults when none is given
pub fn load_config(path: Option<&Path>) -> Result<RecognitionConfig> {
    match path {
        Some(p) => RecognitionConfig::load(p),
        None => Ok(RecognitionConfig::default()),
    }
}

/// Resolve the directory holding template PNGs.
///
/// An explicit path wins; otherwise `data/templates` next to the executable's
/// project root, then relative to the working directory.
pub fn resolve_templates_dir(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(dir) = explicit {
        return Some(dir.to_path_buf());
    }
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|p| p.to_path_buf()));
    if let Some(dir) = exe_dir {
        // target/<profile>/hexscan -> project root
        let project_root = dir.parent().and_then(|p| p.parent());
        if let Some(root) = project_root {
            let data = root.join("data").join("templates");
            if data.exists() {
                return Some(data);
            }
        }
    }
    let local = PathBuf::from("data").join("templates");
    local.exists().then_some(local)
}

/// Run a screenshot file through the full recognition pipeline.
pub async fn analyze_file(
    screenshot: &Path,
    config: RecognitionConfig,
    templates_dir: Option<&Path>,
) -> Result<SelectionReport> {
    config.validate()?;
    let bank = match resolve_templates_dir(templates_dir) {
        Some(dir) => {
            tracing::info!("Template directory: {}", dir.display());
            let templates = TemplateLibrary::load(&dir, config.detectors.region_size)?;
            DetectorBank::with_templates(config.detectors, templates)
        }
        None => DetectorBank::new(config.detectors),
    };
    let orchestrator = RecognitionOrchestrator::with_detectors(config, bank)?;

    let frame = hex_capture::load_screenshot(screenshot)?;
    tracing::info!(
        "Analysing {} ({}x{})",
        screenshot.display(),
        frame.width(),
        frame.height()
    );
    orchestrator
        .analyze_screenshot(Arc::new(frame))
        .await
        .with_context(|| format!("Recognition failed for {}", screenshot.display()))
}

/// JSON view of a report for downstream tooling
pub fn report_payload(report: &SelectionReport) -> serde_json::Value {
    let s = &report.statistics;
    serde_json::json!({
        "slots": report.slots.iter().map(|slot| serde_json::json!({
            "slotId": slot.slot_id,
            "zone": slot.zone,
            "selected": slot.result.selected,
            "confidence": slot.result.confidence,
            "band": slot.band,
            "rule": slot.result.rule,
            "ambiguous": slot.result.ambiguous,
            "reliable": slot.result.reliable,
            "needsReview": slot.result.needs_review(),
            "supporting": slot.result.supporting,
            "conflicting": slot.result.conflicting,
            "unavailable": slot.result.unavailable,
        })).collect::<Vec<_>>(),
        "selected": report.selected_ids(),
        "review": report.review_ids(),
        "statistics": {
            "total": s.total,
            "selected": s.selected,
            "unselected": s.unselected,
            "highConfidence": s.high_confidence,
            "mediumConfidence": s.medium_confidence,
            "lowConfidence": s.low_confidence,
            "ambiguous": s.ambiguous,
            "reliable": s.reliable,
            "needsReview": s.needs_review,
            "dropped": s.dropped,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_data::Zone;
    use hex_state::{ConsensusResult, ConsensusRule};
    use image::{Rgba, RgbaImage};
    use std::collections::BTreeSet;

    fn result(selected: bool, confidence: f64) -> ConsensusResult {
        ConsensusResult {
            selected,
            confidence,
            weighted_votes: if selected { 0.9 } else { 0.1 },
            agreement: 0.9,
            supporting: BTreeSet::new(),
            conflicting: BTreeSet::new(),
            unavailable: BTreeSet::new(),
            rule: ConsensusRule::HighConfidence,
            ambiguous: confidence < 0.7,
            reliable: confidence >= 0.8,
        }
    }

    #[test]
    fn test_report_payload_shape() {
        let report = SelectionReport::new(
            vec![
                ("core:weapon".to_string(), Zone::Core, result(true, 0.9)),
                ("regular:q0r0".to_string(), Zone::Regular, result(false, 0.3)),
            ],
            1,
            &RecognitionConfig::default().thresholds,
        );
        let payload = report_payload(&report);
        assert_eq!(payload["slots"].as_array().unwrap().len(), 2);
        assert_eq!(payload["slots"][0]["slotId"], "core:weapon");
        assert_eq!(payload["slots"][0]["selected"], true);
        assert_eq!(payload["slots"][1]["needsReview"], true);
        assert_eq!(payload["selected"], serde_json::json!(["core:weapon"]));
        assert_eq!(payload["statistics"]["dropped"], 1);
        assert_eq!(payload["statistics"]["total"], 2);
    }

    #[test]
    fn test_load_config_defaults_without_path() {
        assert_eq!(load_config(None).unwrap(), RecognitionConfig::default());
        assert!(load_config(Some(Path::new("/nonexistent/hexscan.json"))).is_err());
    }

    #[test]
    fn test_explicit_templates_dir_wins() {
        let dir = Path::new("/some/templates");
        assert_eq!(resolve_templates_dir(Some(dir)), Some(dir.to_path_buf()));
    }

    #[tokio::test]
    async fn test_analyze_file_runs_pipeline() {
        let path = std::env::temp_dir().join(format!("hexscan_analyze_{}.png", std::process::id()));
        RgbaImage::from_pixel(1920, 1080, Rgba([20, 22, 28, 255]))
            .save(&path)
            .unwrap();

        let mut config = RecognitionConfig::default();
        config.layout.max_rings = 1;
        let empty =
            std::env::temp_dir().join(format!("hexscan_no_templates_{}", std::process::id()));
        let report = analyze_file(&path, config, None).await;
        std::fs::remove_file(&path).ok();
        let report = report.unwrap();
        assert_eq!(report.statistics.total, 3 + 7);
        assert!(report.selected_ids().is_empty(), "dark frame has no selected icons");

        // a template directory without state subfolders still runs on the built-ins
        std::fs::create_dir_all(&empty).unwrap();
        let path2 =
            std::env::temp_dir().join(format!("hexscan_analyze2_{}.png", std::process::id()));
        RgbaImage::from_pixel(1920, 1080, Rgba([20, 22, 28, 255]))
            .save(&path2)
            .unwrap();
        let mut config = RecognitionConfig::default();
        config.layout.max_rings = 1;
        let with_empty = analyze_file(&path2, config.clone(), Some(&empty)).await;
        std::fs::remove_dir_all(&empty).ok();
        assert_eq!(with_empty.unwrap().statistics.total, 3 + 7);

        // a template directory that does not exist is an error
        let missing = analyze_file(&path2, config, Some(&empty)).await;
        std::fs::remove_file(&path2).ok();
        assert!(missing.is_err());
    }
}
