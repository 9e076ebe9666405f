//! Exports: design matrices to CSV, the run summary to JSON.
//!
//! Both are meant to be easy to consume in spreadsheets or downstream scripts.

use std::fs::File;
use std::path::Path;

use crate::design::DesignMatrix;
use crate::domain::RunSummary;
use crate::error::AppError;

/// Write a design matrix as CSV: `frame_time` then one column per regressor.
pub fn write_design_csv(path: &Path, design: &DesignMatrix) -> Result<(), AppError> {
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| AppError::input(format!("Failed to create design CSV '{}': {e}", path.display())))?;

    let mut header = vec!["frame_time".to_string()];
    header.extend(design.names.iter().cloned());
    writer
        .write_record(&header)
        .map_err(|e| AppError::input(format!("Failed to write design CSV header: {e}")))?;

    for (t, &ft) in design.frame_times.iter().enumerate() {
        let mut record = Vec::with_capacity(design.n_columns() + 1);
        record.push(format!("{ft:.4}"));
        record.extend(design.matrix.row(t).iter().map(|v| format!("{v:.10}")));
        writer
            .write_record(&record)
            .map_err(|e| AppError::input(format!("Failed to write design CSV row: {e}")))?;
    }

    writer
        .flush()
        .map_err(|e| AppError::input(format!("Failed to write design CSV '{}': {e}", path.display())))?;
    Ok(())
}

/// Write the run summary as pretty JSON.
pub fn write_summary_json(path: &Path, summary: &RunSummary) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::input(format!("Failed to create summary JSON '{}': {e}", path.display())))?;
    serde_json::to_writer_pretty(file, summary)
        .map_err(|e| AppError::input(format!("Failed to write summary JSON: {e}")))?;
    Ok(())
}

/// Read a run summary JSON file.
pub fn read_summary_json(path: &Path) -> Result<RunSummary, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::input(format!("Failed to open summary JSON '{}': {e}", path.display())))?;
    serde_json::from_reader(file).map_err(|e| AppError::input(format!("Invalid summary JSON: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::ColumnKind;
    use crate::domain::{ContrastRecord, DesignOptions, ModelOptions, OutputType, RunRecord};
    use nalgebra::DMatrix;

    #[test]
    fn design_csv_has_frame_times_and_named_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("design.csv");
        let design = DesignMatrix {
            names: vec!["speech".into(), "constant".into()],
            kinds: vec![ColumnKind::Condition, ColumnKind::Constant],
            frame_times: vec![0.0, 2.5],
            matrix: DMatrix::from_row_slice(2, 2, &[0.25, 1.0, 0.5, 1.0]),
        };
        write_design_csv(&path, &design).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "frame_time,speech,constant");
        assert_eq!(lines[2], "2.5000,0.5000000000,1.0000000000");
    }

    #[test]
    fn summary_json_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.json");
        let summary = RunSummary {
            tool: "glm".into(),
            created_at: chrono::Utc::now(),
            design: DesignOptions::default(),
            model: ModelOptions::default(),
            output_type: OutputType::ZScore,
            grid: [4, 5, 6],
            mask_voxels: 42,
            runs: vec![],
            contrasts: vec![ContrastRecord {
                id: "a".into(),
                expr: "a".into(),
                kind: "t".into(),
                rows: 1,
                map: None,
                snapshot: None,
                min: -1.0,
                max: 2.0,
                n_supra_threshold: 3,
            }],
        };
        write_summary_json(&path, &summary).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"hrf_model\": \"glover\""));
        assert_eq!(read_summary_json(&path).unwrap(), summary);
    }

    #[test]
    fn singular_design_summary_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.json");
        let design = DesignMatrix {
            names: vec!["late".into(), "constant".into()],
            kinds: vec![ColumnKind::Condition, ColumnKind::Constant],
            frame_times: vec![0.0, 2.0, 4.0],
            matrix: DMatrix::from_row_slice(3, 2, &[0.0, 1.0, 0.0, 1.0, 0.0, 1.0]),
        };
        let record = RunRecord::from_design("bold.nii".into(), "events.tsv".into(), &design);
        assert_eq!(record.rank, 1);
        assert_eq!(record.condition_number, None);

        let summary = RunSummary {
            tool: "glm".into(),
            created_at: chrono::Utc::now(),
            design: DesignOptions::default(),
            model: ModelOptions::default(),
            output_type: OutputType::Stat,
            grid: [2, 2, 2],
            mask_voxels: 8,
            runs: vec![record],
            contrasts: vec![],
        };
        write_summary_json(&path, &summary).unwrap();
        assert_eq!(read_summary_json(&path).unwrap(), summary);
    }
}
