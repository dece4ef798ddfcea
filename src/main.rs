//! hexscan: recognise selected upgrade icons in a screenshot, or tune the
//! recognition config from labelled samples.
//!
//! Usage:
//!   hexscan analyze <screenshot.png> [config.json] [templates_dir]
//!   hexscan calibrate <samples.json> <config.json|-> <output.json> [history.json]

use hexscan::commands;
use std::path::Path;

fn usage(program: &str) -> ! {
    eprintln!("Usage:");
    eprintln!("  {} analyze <screenshot.png> [config.json] [templates_dir]", program);
    eprintln!(
        "  {} calibrate <samples.json> <config.json|-> <output.json> [history.json]",
        program
    );
    std::process::exit(1);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hexscan::init_tracing();

    let args: Vec<String> = std::env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("hexscan");
    if args.len() < 3 {
        usage(program);
    }

    match args[1].as_str() {
        "analyze" => {
            let config = commands::load_config(args.get(3).map(Path::new))?;
            let templates = args.get(4).map(Path::new);
            let report = commands::analyze_file(Path::new(&args[2]), config, templates).await?;
            println!("{}", serde_json::to_string_pretty(&commands::report_payload(&report))?);
        }
        "calibrate" => {
            if args.len() < 5 {
                usage(program);
            }
            let config_path = (args[3] != "-").then(|| Path::new(&args[3]));
            let config = commands::load_config(config_path)?;
            let summary = commands::calibrate_file(
                Path::new(&args[2]),
                &config,
                Path::new(&args[4]),
                args.get(5).map(Path::new),
            )?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        _ => usage(program),
    }
    Ok(())
}
