use anyhow::{bail, Context, Result};
use image::imageops::FilterType;
use std::path::Path;
use tracing::{debug, info, warn};

use super::mean_std;
use crate::hex_math::HexMask;

/// Rotations tried for every template, in degrees
pub const ROTATIONS_DEG: [f64; 3] = [-6.0, 0.0, 6.0];

/// One template pre-sampled over the hex mask at one rotation
#[derive(Debug, Clone)]
pub struct RotatedTemplate {
    pub angle_deg: f64,
    /// Luminance per masked cell, in mask order
    pub values: Vec<f64>,
    pub mean: f64,
    pub std_dev: f64,
}

/// Pre-processed luminance template for masked NCC
#[derive(Debug, Clone)]
pub struct Template {
    pub name: String,
    pub rotations: Vec<RotatedTemplate>,
}

impl Template {
    /// Build from a row-major `size`×`size` luminance grid.
    pub fn from_grid(name: &str, grid: &[f64], mask: &HexMask) -> Self {
        let n = mask.size() as i64;
        let half = mask.size() as f64 / 2.0;
        let rotations = ROTATIONS_DEG
            .iter()
            .map(|&deg| {
                let (sin, cos) = deg.to_radians().sin_cos();
                let values: Vec<f64> = mask
                    .cells()
                    .iter()
                    .map(|c| {
                        // inverse rotation into template space
                        let sx = c.dx * cos + c.dy * sin;
                        let sy = -c.dx * sin + c.dy * cos;
                        let x = ((half + sx).floor() as i64).clamp(0, n - 1);
                        let y = ((half + sy).floor() as i64).clamp(0, n - 1);
                        grid[(y * n + x) as usize]
                    })
                    .collect();
                let (mean, std_dev) = mean_std(&values);
                RotatedTemplate {
                    angle_deg: deg,
                    values,
                    mean,
                    std_dev,
                }
            })
            .collect();
        Self {
            name: name.to_string(),
            rotations,
        }
    }

    /// Build from a radial profile `f(radius, angle)`, radius normalized to the mask.
    pub fn from_profile(name: &str, mask: &HexMask, f: impl Fn(f64, f64) -> f64) -> Self {
        let n = mask.size();
        let half = n as f64 / 2.0;
        let mut grid = Vec::with_capacity((n * n) as usize);
        for y in 0..n {
            for x in 0..n {
                let dx = x as f64 + 0.5 - half;
                let dy = y as f64 + 0.5 - half;
                grid.push(f((dx * dx + dy * dy).sqrt() / mask.radius(), dy.atan2(dx)));
            }
        }
        Self::from_grid(name, &grid, mask)
    }
}

/// Selected and unselected reference appearances
#[derive(Debug, Clone)]
pub struct TemplateLibrary {
    pub selected: Vec<Template>,
    pub unselected: Vec<Template>,
}

impl TemplateLibrary {
    /// Synthetic templates describing the two icon states.
    pub fn builtin(size: u32) -> Self {
        let mask = HexMask::new(size);
        let gauss = |x: f64, sigma: f64| (-(x / sigma).powi(2)).exp();
        Self {
            selected: vec![
                Template::from_profile("ring_glow", &mask, |r, _| 0.35 + 0.6 * gauss(r - 0.8, 0.1)),
                Template::from_profile("bright_frame", &mask, |r, _| {
                    if r > 0.75 {
                        0.95
                    } else {
                        0.45
                    }
                }),
            ],
            unselected: vec![
                Template::from_profile("centre_glyph", &mask, |r, _| 0.2 + 0.5 * gauss(r, 0.3)),
                Template::from_profile("dark_frame", &mask, |r, _| if r > 0.8 { 0.2 } else { 0.5 }),
            ],
        }
    }

    /// Built-ins plus every PNG under `dir/selected/` and `dir/unselected/`.
    ///
    /// A missing state subdirectory is skipped; the built-ins cover both states.
    pub fn load(dir: &Path, size: u32) -> Result<Self> {
        if !dir.is_dir() {
            bail!("Template directory {} does not exist", dir.display());
        }
        let mask = HexMask::new(size);
        let mut library = Self::builtin(size);
        let builtin = library.len();

        for (state, target) in [
            ("selected", &mut library.selected),
            ("unselected", &mut library.unselected),
        ] {
            let sub = dir.join(state);
            if sub.is_dir() {
                target.extend(load_dir(&sub, &mask)?);
            } else {
                warn!("No {} templates in {}, using built-ins only", state, dir.display());
            }
        }

        info!(
            "Loaded {} template(s) from {} ({} selected, {} unselected including built-ins)",
            library.len() - builtin,
            dir.display(),
            library.selected.len(),
            library.unselected.len()
        );
        Ok(library)
    }

    pub fn len(&self) -> usize {
        self.selected.len() + self.unselected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn load_dir(dir: &Path, mask: &HexMask) -> Result<Vec<Template>> {
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))?;
    let mut paths: Vec<_> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("png")))
        .collect();
    paths.sort();

    let mut templates = Vec::new();
    for path in paths {
        match load_template(&path, mask) {
            Ok(t) => templates.push(t),
            Err(e) => warn!("Failed to load template {}: {:#}", path.display(), e),
        }
    }
    debug!("{} template(s) in {}", templates.len(), dir.display());
    Ok(templates)
}

fn load_template(path: &Path, mask: &HexMask) -> Result<Template> {
    let img = image::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let gray = img.to_luma8();
    let resized = image::imageops::resize(&gray, mask.size(), mask.size(), FilterType::Triangle);
    let grid: Vec<f64> = resized.pixels().map(|p| p[0] as f64 / 255.0).collect();
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(Template::from_grid(&name, &grid, mask))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    #[test]
    fn test_builtin_templates_have_contrast() {
        let library = TemplateLibrary::builtin(48);
        assert_eq!(library.selected.len(), 2);
        assert_eq!(library.unselected.len(), 2);
        for t in library.selected.iter().chain(library.unselected.iter()) {
            assert_eq!(t.rotations.len(), ROTATIONS_DEG.len());
            for rot in &t.rotations {
                assert!(rot.std_dev > 0.01, "{} is flat at {}°", t.name, rot.angle_deg);
            }
        }
    }

    #[test]
    fn test_radial_template_is_rotation_stable() {
        let mask = HexMask::new(48);
        let t = Template::from_profile("ring", &mask, |r, _| if r > 0.6 { 1.0 } else { 0.0 });
        let base = &t.rotations[1];
        for rot in &t.rotations {
            assert!((rot.mean - base.mean).abs() < 0.02);
        }
    }

    #[test]
    fn test_load_from_directory() {
        let dir = std::env::temp_dir().join(format!("hexscan_templates_{}", std::process::id()));
        std::fs::create_dir_all(dir.join("selected")).unwrap();
        std::fs::create_dir_all(dir.join("unselected")).unwrap();
        GrayImage::from_fn(64, 64, |x, _| Luma([(x * 4) as u8]))
            .save(dir.join("selected").join("ramp.png"))
            .unwrap();
        GrayImage::from_fn(64, 64, |_, y| Luma([(y * 4) as u8]))
            .save(dir.join("unselected").join("vramp.png"))
            .unwrap();
        std::fs::write(dir.join("selected").join("notes.txt"), "ignored").unwrap();

        let builtin = TemplateLibrary::builtin(48);
        let library = TemplateLibrary::load(&dir, 48).unwrap();
        assert_eq!(
            library.len(),
            builtin.len() + 2,
            "loaded templates are appended to the built-ins"
        );
        assert_eq!(library.selected.len(), builtin.selected.len() + 1);
        assert_eq!(library.selected.last().unwrap().name, "ramp");
        assert_eq!(library.unselected.last().unwrap().name, "vramp");
        assert_eq!(library.selected[0].name, builtin.selected[0].name);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_with_one_state_keeps_builtins() {
        let dir =
            std::env::temp_dir().join(format!("hexscan_templates_half_{}", std::process::id()));
        std::fs::create_dir_all(dir.join("selected")).unwrap();
        GrayImage::from_fn(48, 48, |x, y| Luma([((x + y) * 2) as u8]))
            .save(dir.join("selected").join("diag.png"))
            .unwrap();

        let library = TemplateLibrary::load(&dir, 48).unwrap();
        let builtin = TemplateLibrary::builtin(48);
        assert_eq!(library.selected.len(), builtin.selected.len() + 1);
        assert_eq!(library.unselected.len(), builtin.unselected.len());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_missing_directory_fails() {
        let dir = std::env::temp_dir()
            .join(format!("hexscan_templates_missing_{}", std::process::id()));
        assert!(TemplateLibrary::load(&dir, 48).is_err());
    }
}
