//! Formatted terminal output.
//!
//! Formatting lives in one place so:
//! - the estimation code stays free of presentation concerns
//! - output changes are localized (and covered by snapshot-style tests)

use crate::design::{ColumnKind, DesignMatrix};
use crate::domain::{AnalysisConfig, NoiseModel};
use crate::glm::FittedModel;
use crate::report::{Peak, Peaks};

/// Progress line printed before each contrast is computed.
pub fn format_progress(index: usize, total: usize, id: &str) -> String {
    format!("Contrast {index:>2} out of {total}: {id}")
}

/// Format the full run summary (data, design and fit diagnostics).
pub fn format_run_summary(fitted: &FittedModel, config: &AnalysisConfig) -> String {
    let mut out = String::new();
    let d = &config.design;

    out.push_str("=== glm - First-level GLM ===\n");
    let [nx, ny, nz] = fitted.mask.dims;
    out.push_str(&format!("Grid: {nx}×{ny}×{nz} | mask: {} voxels\n", fitted.mask.len()));
    out.push_str(&format!(
        "Design: TR={:.3}s | HRF={} | drift={:?} | noise={}\n",
        d.t_r,
        d.hrf_model.display_name(),
        d.drift_model,
        match config.model.noise_model {
            NoiseModel::Ols => "ols",
            NoiseModel::Ar1 => "ar1",
        }
    ));
    out.push_str(&format!(
        "Signal scaling: {}\n",
        if config.model.signal_scaling { "percent signal change" } else { "none" }
    ));

    out.push_str("\nRuns:\n");
    for (k, run) in fitted.runs.iter().enumerate() {
        let dof_min = run.groups.iter().map(|g| g.df_resid).fold(f64::INFINITY, f64::min);
        out.push_str(&format!(
            "  run {:<2} scans={:<4} columns={:<3} rank={:<3} cond={:<10.2} dof={:<6.0} groups={:<3} mean_rho={:.3}\n",
            k + 1,
            run.design.n_scans(),
            run.design.n_columns(),
            run.design.rank(),
            run.design.condition_number(),
            dof_min,
            run.groups.len(),
            run.mean_rho(),
        ));
    }

    if let Some(first) = fitted.runs.first() {
        out.push_str(&format!("\nDesign columns: {}\n", first.design.names.join(", ")));
    }

    out
}

/// Column overview of a design matrix.
pub fn format_design(design: &DesignMatrix) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Design: {} scans × {} columns | rank={} | cond={:.2}\n",
        design.n_scans(),
        design.n_columns(),
        design.rank(),
        design.condition_number()
    ));
    out.push_str(format!("{:<28} {:<10} {:>10} {:>10} {:>10}", "column", "kind", "min", "max", "mean").trim_end());
    out.push('\n');
    out.push_str(format!("{:-<28} {:-<10} {:-<10} {:-<10} {:-<10}", "", "", "", "", "").trim_end());
    out.push('\n');

    for (j, name) in design.names.iter().enumerate() {
        let col = design.matrix.column(j);
        let kind = match design.kinds[j] {
            ColumnKind::Condition => "condition",
            ColumnKind::ConditionBasis => "basis",
            ColumnKind::Confound => "confound",
            ColumnKind::Drift => "drift",
            ColumnKind::Constant => "constant",
        };
        out.push_str(
            format!(
                "{:<28} {:<10} {:>10.4} {:>10.4} {:>10.4}",
                truncate(name, 28),
                kind,
                col.min(),
                col.max(),
                col.mean()
            )
            .trim_end(),
        );
        out.push('\n');
    }

    out
}

/// Format the positive/negative peak tables of one map; `label` names the values.
pub fn format_peaks(id: &str, label: &str, peaks: &Peaks) -> String {
    let mut out = String::new();

    out.push_str(&format!("Top positive {label} ({id}):\n"));
    out.push_str(&format_table(&peaks.positive));
    out.push('\n');

    out.push_str(&format!("Top negative {label} ({id}):\n"));
    out.push_str(&format_table(&peaks.negative));

    out
}

fn format_table(rows: &[Peak]) -> String {
    let mut out = String::new();
    out.push_str(
        format!(
            "{:>4} {:>4} {:>4} {:>9} {:>9} {:>9} {:>12}",
            "i", "j", "k", "x_mm", "y_mm", "z_mm", "value"
        )
        .trim_end(),
    );
    out.push('\n');
    out.push_str(format!("{:-<4} {:-<4} {:-<4} {:-<9} {:-<9} {:-<9} {:-<12}", "", "", "", "", "", "", "").trim_end());
    out.push('\n');

    for p in rows {
        out.push_str(
            format!(
                "{:>4} {:>4} {:>4} {:>9.1} {:>9.1} {:>9.1} {:>12.4}",
                p.voxel[0], p.voxel[1], p.voxel[2], p.world[0], p.world[1], p.world[2], p.value
            )
            .trim_end(),
        );
        out.push('\n');
    }
    if rows.is_empty() {
        out.push_str("(none)\n");
    }

    out
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('.');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DMatrix;

    #[test]
    fn progress_line_pads_index() {
        assert_eq!(format_progress(3, 12, "audio"), "Contrast  3 out of 12: audio");
        assert_eq!(format_progress(10, 12, "visual"), "Contrast 10 out of 12: visual");
    }

    #[test]
    fn peaks_table_snapshot() {
        let peaks = Peaks {
            positive: vec![Peak {
                voxel: [1, 2, 3],
                world: [-4.0, 0.5, 12.0],
                value: 5.25,
            }],
            negative: vec![],
        };
        let txt = format_peaks("a", "z_score", &peaks);
        let expected = concat!(
            "Top positive z_score (a):\n",
            "   i    j    k      x_mm      y_mm      z_mm        value\n",
            "---- ---- ---- --------- --------- --------- ------------\n",
            "   1    2    3      -4.0       0.5      12.0       5.2500\n",
            "\n",
            "Top negative z_score (a):\n",
            "   i    j    k      x_mm      y_mm      z_mm        value\n",
            "---- ---- ---- --------- --------- --------- ------------\n",
            "(none)\n",
        );
        assert_eq!(txt, expected);
    }

    #[test]
    fn design_overview_lists_columns() {
        let design = DesignMatrix {
            names: vec!["speech".into(), "constant".into()],
            kinds: vec![ColumnKind::Condition, ColumnKind::Constant],
            frame_times: vec![0.0, 1.0, 2.0],
            matrix: DMatrix::from_row_slice(3, 2, &[0.0, 1.0, 1.0, 1.0, 0.5, 1.0]),
        };
        let txt = format_design(&design);
        assert!(txt.starts_with("Design: 3 scans × 2 columns | rank=2"));
        assert!(txt.contains("speech                       condition      0.0000     1.0000     0.5000"));
        assert!(txt.contains("constant                     constant       1.0000     1.0000     1.0000"));
    }

    #[test]
    fn long_names_are_truncated() {
        assert_eq!(truncate("abcdef", 4), "abc.");
        assert_eq!(truncate("abc", 4), "abc");
    }
}
