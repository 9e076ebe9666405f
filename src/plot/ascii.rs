//! ASCII rendering of statistical maps for terminal output.
//!
//! A map is shown as a row of axial (z) slices, `x` left to right and `y`
//! bottom to top. Deterministic output, so it is easy to golden-test.
//!
//! Glyphs:
//! - outside the brain (exactly zero): ` `
//! - below threshold: `.`
//! - positive, increasing magnitude: `+ * # @`
//! - negative, increasing magnitude: `- ~ = %`

const POS_RAMP: [char; 4] = ['+', '*', '#', '@'];
const NEG_RAMP: [char; 4] = ['-', '~', '=', '%'];

/// Gap between slices in a montage.
const SLICE_GAP: &str = "  ";

/// Slice indices shown for `n_cuts` cuts of `nz` slices (centres of equal bins).
pub fn cut_slices(nz: usize, n_cuts: usize) -> Vec<usize> {
    let n = n_cuts.max(1);
    if nz <= n {
        return (0..nz).collect();
    }
    (0..n).map(|k| ((2 * k + 1) * nz) / (2 * n)).collect()
}

/// Finite value range of a map.
pub fn value_range(map: &[f32]) -> Option<(f64, f64)> {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for &v in map.iter().filter(|v| v.is_finite()) {
        min = min.min(v as f64);
        max = max.max(v as f64);
    }
    (min.is_finite() && max.is_finite()).then_some((min, max))
}

fn glyph(v: f32, threshold: f64, v_abs_max: f64) -> char {
    if !v.is_finite() || v == 0.0 {
        return ' ';
    }
    let a = (v as f64).abs();
    if a < threshold {
        return '.';
    }
    let span = (v_abs_max - threshold).max(f64::EPSILON);
    let level = (((a - threshold) / span) * POS_RAMP.len() as f64).floor() as usize;
    let level = level.min(POS_RAMP.len() - 1);
    if v > 0.0 { POS_RAMP[level] } else { NEG_RAMP[level] }
}

fn map_x(col: usize, width: usize, nx: usize) -> usize {
    (col * nx / width.max(1)).min(nx - 1)
}

fn map_y(row: usize, height: usize, ny: usize) -> usize {
    // row 0 is the top of the slice (largest y)
    ny - 1 - (row * ny / height.max(1)).min(ny - 1)
}

/// Render a 3D map (x fastest) as a montage of axial slices.
///
/// `slice_width` caps the characters per slice; larger grids are subsampled.
pub fn render_montage(map: &[f32], dims: [usize; 3], threshold: f64, n_cuts: usize, slice_width: usize) -> String {
    let [nx, ny, nz] = dims;
    if nx == 0 || ny == 0 || nz == 0 || map.len() < nx * ny * nz {
        return "Plot: empty map\n".to_string();
    }

    let width = nx.min(slice_width.max(4));
    let height = ((ny * width) as f64 / nx as f64).round().max(1.0) as usize;
    let cuts = cut_slices(nz, n_cuts);
    let (v_min, v_max) = value_range(map).unwrap_or((0.0, 0.0));
    let v_abs_max = v_min.abs().max(v_max.abs());

    let labels: Vec<String> = cuts.iter().map(|z| format!("z={z}")).collect();
    let col_width: Vec<usize> = labels.iter().map(|l| l.len().max(width)).collect();

    let mut out = String::new();
    let cut_list = cuts.iter().map(|z| z.to_string()).collect::<Vec<_>>().join(", ");
    out.push_str(&format!(
        "Plot: z-slices [{cut_list}] | threshold={threshold:.2} | range=[{v_min:.2}, {v_max:.2}]\n"
    ));

    let label_row: Vec<String> = labels
        .iter()
        .zip(&col_width)
        .map(|(l, &w)| format!("{l:<w$}"))
        .collect();
    out.push_str(label_row.join(SLICE_GAP).trim_end());
    out.push('\n');

    for row in 0..height {
        let y = map_y(row, height, ny);
        let cells: Vec<String> = cuts
            .iter()
            .zip(&col_width)
            .map(|(&z, &w)| {
                let mut line: String = (0..width)
                    .map(|col| {
                        let x = map_x(col, width, nx);
                        glyph(map[x + nx * (y + ny * z)], threshold, v_abs_max)
                    })
                    .collect();
                line.push_str(&" ".repeat(w - width));
                line
            })
            .collect();
        out.push_str(&cells.join(SLICE_GAP));
        out.push('\n');
    }

    out
}
