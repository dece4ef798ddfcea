mod analyze;
mod calibrate;

pub use analyze::{analyze_file, load_config, report_payload, resolve_templates_dir};
pub use calibrate::calibrate_file;
