//! Nuisance regressors (motion parameters and similar), one row per scan.

use std::fs::File;
use std::path::Path;

use nalgebra::DMatrix;

use crate::error::AppError;
use crate::io::paradigm::{RowError, format_row_errors, normalize_header_name};

/// Named confound columns.
#[derive(Debug, Clone)]
pub struct Confounds {
    pub names: Vec<String>,
    /// `n_scans × names.len()`.
    pub values: DMatrix<f64>,
}

/// Read a confounds table and check it has exactly `n_scans` rows.
pub fn read_confounds(path: &Path, delimiter: u8, n_scans: usize) -> Result<Confounds, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::input(format!("Failed to open confounds file '{}': {e}", path.display())))?;
    parse_confounds(file, delimiter, n_scans)
        .map_err(|e| AppError::new(e.exit_code(), format!("{}: {}", path.display(), e.message())))
}

pub fn parse_confounds<R: std::io::Read>(input: R, delimiter: u8, n_scans: usize) -> Result<Confounds, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .trim(csv::Trim::All)
        .from_reader(input);

    let names: Vec<String> = reader
        .headers()
        .map_err(|e| AppError::input(format!("Failed to read confounds header: {e}")))?
        .iter()
        .map(normalize_header_name)
        .collect();
    if names.is_empty() || names.iter().any(|n| n.is_empty()) {
        return Err(AppError::input("Confounds table needs a non-empty header for every column."));
    }

    let mut rows: Vec<f64> = Vec::new();
    let mut row_errors = Vec::new();
    let mut n_rows = 0usize;

    for (idx, result) in reader.records().enumerate() {
        let line = idx + 2;
        n_rows += 1;
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                row_errors.push(RowError {
                    line,
                    message: format!("parse error: {e}"),
                });
                continue;
            }
        };
        for (col, raw) in record.iter().enumerate() {
            match raw.parse::<f64>() {
                Ok(v) if v.is_finite() => rows.push(v),
                _ => {
                    row_errors.push(RowError {
                        line,
                        message: format!("column '{}': invalid value '{raw}'", names[col]),
                    });
                    rows.push(0.0);
                }
            }
        }
    }

    if !row_errors.is_empty() {
        return Err(AppError::input(format_row_errors("confounds", &row_errors)));
    }
    if n_rows != n_scans {
        return Err(AppError::input(format!(
            "Confounds table has {n_rows} rows but the run has {n_scans} scans."
        )));
    }

    Ok(Confounds {
        values: DMatrix::from_row_slice(n_rows, names.len(), &rows),
        names,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_named_columns() {
        let tsv = "tx\tty\n0.1\t0.2\n0.3\t0.4\n0.5\t0.6\n";
        let c = parse_confounds(tsv.as_bytes(), b'\t', 3).unwrap();
        assert_eq!(c.names, vec!["tx", "ty"]);
        assert_eq!(c.values.shape(), (3, 2));
        assert_eq!(c.values[(2, 1)], 0.6);
    }

    #[test]
    fn row_count_must_match_scans() {
        let tsv = "tx\n0.1\n0.2\n";
        let err = parse_confounds(tsv.as_bytes(), b'\t', 3).unwrap_err();
        assert!(err.message().contains("2 rows"));
    }

    #[test]
    fn non_numeric_cells_are_errors() {
        let tsv = "tx\n0.1\nn/a\n";
        let err = parse_confounds(tsv.as_bytes(), b'\t', 2).unwrap_err();
        assert!(err.message().contains("line 3"));
    }
}
