//! Least-squares building blocks.
//!
//! The GLM solves the same design against tens of thousands of voxel time
//! series, so the expensive part (the pseudo-inverse of the design) is computed
//! once per design/whitening and then applied as a matrix product:
//!
//! ```text
//! β = pinv(X) Y          (p × n_voxels)
//! cov(β) ∝ pinv(X) pinv(X)ᵀ
//! ```
//!
//! All decompositions go through SVD so rank-deficient designs (collinear
//! regressors) still produce the minimum-norm solution instead of failing.

use nalgebra::{DMatrix, DVector, SVD};

use crate::error::AppError;

/// Pseudo-inverse and rank of a design matrix.
#[derive(Debug, Clone)]
pub struct Pinv {
    /// `p × n`.
    pub pinv: DMatrix<f64>,
    pub rank: usize,
}

/// Singular values below `max(σ) * max(n, p) * ε` are treated as zero.
fn svd_tolerance(svd: &SVD<f64, nalgebra::Dyn, nalgebra::Dyn>, n: usize, p: usize) -> f64 {
    let max_sv = svd.singular_values.iter().cloned().fold(0.0f64, f64::max);
    max_sv * (n.max(p) as f64) * f64::EPSILON
}

/// Moore–Penrose pseudo-inverse with numerical rank.
pub fn pseudo_inverse(x: &DMatrix<f64>) -> Result<Pinv, AppError> {
    let (n, p) = x.shape();
    if n == 0 || p == 0 {
        return Err(AppError::numeric("Cannot invert an empty design matrix."));
    }
    if x.iter().any(|v| !v.is_finite()) {
        return Err(AppError::numeric("Design matrix contains non-finite values."));
    }

    let svd = x.clone().svd(true, true);
    let tol = svd_tolerance(&svd, n, p);
    let rank = svd.singular_values.iter().filter(|&&s| s > tol).count();
    let pinv = svd
        .pseudo_inverse(tol)
        .map_err(|e| AppError::numeric(format!("Pseudo-inverse failed: {e}")))?;
    Ok(Pinv { pinv, rank })
}

/// Numerical rank of a matrix.
pub fn matrix_rank(x: &DMatrix<f64>) -> usize {
    let (n, p) = x.shape();
    if n == 0 || p == 0 {
        return 0;
    }
    let svd = x.clone().svd(false, false);
    let tol = svd_tolerance(&svd, n, p);
    svd.singular_values.iter().filter(|&&s| s > tol).count()
}

/// Ratio of the largest to the smallest singular value (∞ when singular).
pub fn condition_number(x: &DMatrix<f64>) -> f64 {
    let svd = x.clone().svd(false, false);
    let max_sv = svd.singular_values.iter().cloned().fold(0.0f64, f64::max);
    let min_sv = svd.singular_values.iter().cloned().fold(f64::INFINITY, f64::min);
    if min_sv <= 0.0 { f64::INFINITY } else { max_sv / min_sv }
}

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let (n, p) = x.shape();
    if n == 0 || p == 0 {
        return None;
    }
    let svd = x.clone().svd(true, true);
    let tol = svd_tolerance(&svd, n, p).max(1e-12);
    let beta = svd.solve(y, tol).ok()?;
    beta.iter().all(|v| v.is_finite()).then_some(beta)
}

/// Gram–Schmidt style orthogonalisation of columns `1..` against the
/// preceding ones, in place. Column 0 is left untouched.
pub fn orthogonalize_columns(x: &mut DMatrix<f64>) {
    let p = x.ncols();
    for i in 1..p {
        let prev = x.columns(0, i).into_owned();
        let target = x.column(i).into_owned();
        if let Some(coef) = solve_least_squares(&prev, &target) {
            let projection = &prev * coef;
            let mut col = x.column_mut(i);
            col -= projection;
        }
    }
}
