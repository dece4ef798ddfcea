//! CLI tool to run a saved screenshot through scale estimation, slot mapping
//! and the detectors, dumping every normalized region for inspection.
//! Usage:
//! cargo run -p hex-vision --features cli --bin inspect_layout -- <screenshot.png> [output_dir]

use hex_data::{CoreUpgradeType, RecognitionConfig, Zone};
use hex_vision::{ConsensusEngine, DetectorBank, DetectorOutcome, ScaleEstimator, ZoneLayoutMapper};
use std::path::PathBuf;

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <screenshot.png> [output_dir]", args[0]);
        std::process::exit(1);
    }

    let input_path = PathBuf::from(&args[1]);
    let output_dir = if args.len() >= 3 {
        PathBuf::from(&args[2])
    } else {
        PathBuf::from("./debug_output")
    };
    let _ = std::fs::create_dir_all(&output_dir);

    let config = RecognitionConfig::default();

    println!("Loading image: {}", input_path.display());
    let img = hex_capture::load_screenshot(&input_path).expect("Failed to open image");
    let (w, h) = (img.width(), img.height());
    println!("Image size: {}x{}", w, h);

    println!("\n=== Scale Estimation ===");
    let estimate =
        ScaleEstimator::new(config.layout.clone(), config.scale).estimate(w, h, Some(&img));
    for c in &estimate.candidates {
        println!(
            "  {:?}: scale={:.3} origin=({:.1}, {:.1}) confidence={:.2}",
            c.method, c.scale_factor, c.grid_origin.x, c.grid_origin.y, c.confidence
        );
    }
    println!(
        "Chosen: {:?} scale={:.3} origin=({:.1}, {:.1}) confidence={:.2}",
        estimate.method,
        estimate.scale_factor,
        estimate.grid_origin.x,
        estimate.grid_origin.y,
        estimate.confidence
    );

    println!("\n=== Slot Layout ===");
    let map = match ZoneLayoutMapper::new(config.layout.clone()).map(&estimate, w, h) {
        Ok(map) => map,
        Err(e) => {
            println!("Layout failed: {}", e);
            return;
        }
    };
    println!(
        "{} slot(s): {} core, {} regular in {} row(s)",
        map.len(),
        map.zone_slots(Zone::Core).count(),
        map.zone_slots(Zone::Regular).count(),
        map.regular_rows()
    );
    for core in CoreUpgradeType::ALL {
        if let Some(slot) = map.core(core) {
            println!("  {}: centre=({:.1}, {:.1})", slot.id, slot.center.x, slot.center.y);
        }
    }

    println!("\n=== Detectors ===");
    let bank = DetectorBank::new(config.detectors);
    let engine = ConsensusEngine::from_config(&config).expect("Default config is valid");
    for slot in map.slots() {
        let region_size = config.detectors.region_size;
        let Some(region) = hex_capture::normalize_region(&img, &slot.bounds, region_size) else {
            println!("  {}: region outside frame", slot.id);
            continue;
        };
        let file_name = format!("{}.png", slot.id.replace(':', "_"));
        let _ = region.image().save(output_dir.join(file_name));

        let set = bank.analyze_all(&region);
        let votes: Vec<String> = hex_data::DetectorKind::ALL
            .iter()
            .map(|&kind| match set.get(kind) {
                DetectorOutcome::Available(r) => {
                    format!("{}={}@{:.2}", kind, r.selected as u8, r.confidence)
                }
                DetectorOutcome::Unavailable(reason) => format!("{}=({:?})", kind, reason),
            })
            .collect();
        let result = engine.fuse(&set);
        println!(
            "  {}: selected={} confidence={:.2} rule={:?}{} [{}]",
            slot.id,
            result.selected,
            result.confidence,
            result.rule,
            if result.needs_review() { " REVIEW" } else { "" },
            votes.join(" ")
        );
    }

    println!("\nRegion images saved to: {}", output_dir.display());
}
