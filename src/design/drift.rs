//! Low-frequency drift regressors.
//!
//! Every drift model ends with the `constant` column so the design always has
//! an intercept, and names its other columns `drift_1..`.

use std::f64::consts::PI;

use nalgebra::DMatrix;

use crate::domain::DriftModel;
use crate::error::AppError;
use crate::math::orthogonalize_columns;

/// Discrete cosine basis below `high_pass` Hz, plus a constant.
pub fn cosine_drift(frame_times: &[f64], high_pass: f64) -> Result<DMatrix<f64>, AppError> {
    let n = frame_times.len();
    if n < 2 {
        return Err(AppError::input("Cosine drift needs at least two scans."));
    }
    if !(high_pass.is_finite() && high_pass >= 0.0) {
        return Err(AppError::input(format!("Invalid high-pass cutoff {high_pass} Hz.")));
    }
    let dt = frame_times[1] - frame_times[0];
    let order = ((2.0 * n as f64 * high_pass * dt).floor() as usize).max(1);

    let norm = (2.0 / n as f64).sqrt();
    let mut drift = DMatrix::<f64>::zeros(n, order);
    for k in 1..order {
        for t in 0..n {
            drift[(t, k - 1)] = norm * (PI / n as f64 * (t as f64 + 0.5) * k as f64).cos();
        }
    }
    drift.column_mut(order - 1).fill(1.0);
    Ok(drift)
}

/// Orthogonalised polynomial drift up to `order`, constant moved last.
pub fn polynomial_drift(frame_times: &[f64], order: usize) -> DMatrix<f64> {
    let n = frame_times.len();
    let t_max = frame_times.iter().cloned().fold(f64::MIN, f64::max);
    let t_max = if t_max.abs() > 0.0 { t_max } else { 1.0 };

    let mut pol = DMatrix::<f64>::zeros(n, order + 1);
    for k in 0..=order {
        for (t, &ft) in frame_times.iter().enumerate() {
            pol[(t, k)] = (ft / t_max).powi(k as i32);
        }
    }
    orthogonalize_columns(&mut pol);

    // Rotate so the constant (column 0) ends up last.
    let mut out = DMatrix::<f64>::zeros(n, order + 1);
    for k in 1..=order {
        out.set_column(k - 1, &pol.column(k));
    }
    out.set_column(order, &pol.column(0));
    out
}

/// Drift columns and names for the configured model.
pub fn make_drift(
    model: DriftModel,
    frame_times: &[f64],
    high_pass: f64,
    drift_order: usize,
) -> Result<(Vec<String>, DMatrix<f64>), AppError> {
    let matrix = match model {
        DriftModel::Cosine => cosine_drift(frame_times, high_pass)?,
        DriftModel::Polynomial => polynomial_drift(frame_times, drift_order),
        DriftModel::None => DMatrix::from_element(frame_times.len(), 1, 1.0),
    };
    let n_drift = matrix.ncols() - 1;
    let mut names: Vec<String> = (1..=n_drift).map(|k| format!("drift_{k}")).collect();
    names.push("constant".to_string());
    Ok((names, matrix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::frame_times;

    #[test]
    fn cosine_order_follows_cutoff() {
        // floor(2 * 100 * 0.0101 * 2.0) = 4 -> 3 cosines + constant
        let ft = frame_times(100, 2.0, 0.0);
        let (names, d) = make_drift(DriftModel::Cosine, &ft, 0.0101, 1).unwrap();
        assert_eq!(names, vec!["drift_1", "drift_2", "drift_3", "constant"]);
        assert_eq!(d.shape(), (100, 4));
        for k in 0..3 {
            // Cosines are zero-mean and unit-norm.
            assert!(d.column(k).sum().abs() < 1e-9);
            assert!((d.column(k).norm() - 1.0).abs() < 1e-9);
        }
        assert!(d.column(3).iter().all(|&v| v == 1.0));
    }

    #[test]
    fn low_cutoff_still_has_constant() {
        let ft = frame_times(10, 1.0, 0.0);
        let (names, d) = make_drift(DriftModel::Cosine, &ft, 0.0, 1).unwrap();
        assert_eq!(names, vec!["constant"]);
        assert_eq!(d.ncols(), 1);
    }

    #[test]
    fn polynomial_constant_is_last_and_columns_orthogonal() {
        let ft = frame_times(50, 2.0, 0.0);
        let (names, d) = make_drift(DriftModel::Polynomial, &ft, 0.01, 2).unwrap();
        assert_eq!(names, vec!["drift_1", "drift_2", "constant"]);
        assert!(d.column(2).iter().all(|&v| (v - 1.0).abs() < 1e-12));
        assert!(d.column(0).dot(&d.column(2)).abs() < 1e-8);
        assert!(d.column(1).dot(&d.column(0)).abs() < 1e-8);
    }

    #[test]
    fn no_drift_is_constant_only() {
        let ft = frame_times(5, 1.0, 0.0);
        let (names, d) = make_drift(DriftModel::None, &ft, 0.01, 1).unwrap();
        assert_eq!(names, vec!["constant"]);
        assert_eq!(d.shape(), (5, 1));
    }
}
