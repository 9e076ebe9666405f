//! PNG snapshots of statistical maps (plotters bitmap backend).
//!
//! Axial cuts side by side: the mean image in grey underneath, supra-threshold
//! voxels painted with a hot (positive) or cold (negative) colour ramp.

use std::path::Path;

use plotters::prelude::*;
use tracing::debug;

use crate::error::AppError;
use crate::plot::ascii::{cut_slices, value_range};

/// Pixels per voxel edge.
const VOXEL_PX: u32 = 6;
/// Gap between panels, in pixels.
const PANEL_GAP: u32 = 4;

/// Red → yellow for `u` in `[0, 1]`.
pub fn hot_color(u: f64) -> RGBColor {
    let u = u.clamp(0.0, 1.0);
    RGBColor(255, (u * 255.0).round() as u8, 0)
}

/// Blue → cyan for `u` in `[0, 1]`.
pub fn cold_color(u: f64) -> RGBColor {
    let u = u.clamp(0.0, 1.0);
    RGBColor(0, (u * 255.0).round() as u8, 255)
}

fn grey(v: f64, max: f64) -> RGBColor {
    let g = if max > 0.0 && v.is_finite() { (v / max).clamp(0.0, 1.0) } else { 0.0 };
    let g = (g * 200.0).round() as u8;
    RGBColor(g, g, g)
}

fn draw_error<E: std::fmt::Debug>(path: &Path, e: E) -> AppError {
    AppError::input(format!("Failed to draw snapshot '{}': {e:?}", path.display()))
}

/// Colour of one voxel, `None` when it should show the background.
fn overlay_color(v: f32, threshold: f64, v_abs_max: f64) -> Option<RGBColor> {
    let a = (v as f64).abs();
    if !v.is_finite() || v == 0.0 || a < threshold {
        return None;
    }
    let u = (a - threshold) / (v_abs_max - threshold).max(f64::EPSILON);
    Some(if v > 0.0 { hot_color(u) } else { cold_color(u) })
}

/// Write a PNG of `n_cuts` axial slices of `map` over `background`.
pub fn write_snapshot(
    path: &Path,
    map: &[f32],
    background: &[f64],
    dims: [usize; 3],
    threshold: f64,
    n_cuts: usize,
) -> Result<(), AppError> {
    let [nx, ny, nz] = dims;
    let n_vox = nx * ny * nz;
    if n_vox == 0 || map.len() < n_vox || background.len() < n_vox {
        return Err(AppError::input("Snapshot map does not match its grid."));
    }

    let cuts = cut_slices(nz, n_cuts);
    let panel_w = nx as u32 * VOXEL_PX;
    let panel_h = ny as u32 * VOXEL_PX;
    let width = cuts.len() as u32 * (panel_w + PANEL_GAP) + PANEL_GAP;
    let height = panel_h + 2 * PANEL_GAP;

    let bg_max = background.iter().cloned().filter(|v| v.is_finite()).fold(0.0f64, f64::max);
    let (v_min, v_max) = value_range(map).unwrap_or((0.0, 0.0));
    let v_abs_max = v_min.abs().max(v_max.abs());

    let root = BitMapBackend::new(path, (width, height)).into_drawing_area();
    root.fill(&BLACK).map_err(|e| draw_error(path, e))?;

    for (k, &z) in cuts.iter().enumerate() {
        let x0 = PANEL_GAP + k as u32 * (panel_w + PANEL_GAP);
        for y in 0..ny {
            for x in 0..nx {
                let v = x + nx * (y + ny * z);
                let color = overlay_color(map[v], threshold, v_abs_max).unwrap_or_else(|| grey(background[v], bg_max));
                // y grows upwards in the image, downwards in pixels.
                let px = (x0 + x as u32 * VOXEL_PX) as i32;
                let py = (PANEL_GAP + (ny - 1 - y) as u32 * VOXEL_PX) as i32;
                let step = VOXEL_PX as i32;
                root.draw(&Rectangle::new([(px, py), (px + step, py + step)], color.filled()))
                    .map_err(|e| draw_error(path, e))?;
            }
        }
    }

    root.present().map_err(|e| draw_error(path, e))?;
    debug!(path = %path.display(), cuts = ?cuts, "snapshot written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colour_ramps_run_from_dark_to_light() {
        assert_eq!(hot_color(0.0), RGBColor(255, 0, 0));
        assert_eq!(hot_color(2.0), RGBColor(255, 255, 0));
        assert_eq!(cold_color(0.0), RGBColor(0, 0, 255));
        assert!(overlay_color(0.5, 1.0, 4.0).is_none());
        assert_eq!(overlay_color(-4.0, 1.0, 4.0), Some(RGBColor(0, 255, 255)));
    }

    #[test]
    fn writes_a_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.png");
        let dims = [4, 3, 2];
        let map: Vec<f32> = (0..24).map(|i| i as f32 - 12.0).collect();
        let background = vec![100.0; 24];
        write_snapshot(&path, &map, &background, dims, 2.0, 2).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
    }
}
