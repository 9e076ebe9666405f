//! Distribution helpers for contrast statistics.

use statrs::distribution::{ContinuousCDF, FisherSnedecor, StudentsT};
use statrs::function::erf::erfc_inv;

use crate::error::AppError;

/// p-values are clipped to this range before conversion to z.
const P_MIN: f64 = 1e-300;
const P_MAX: f64 = 1.0 - 1e-16;

/// One-sided upper-tail probability of a Student-t statistic.
pub fn t_sf(t: f64, dof: f64) -> Result<f64, AppError> {
    let dist = StudentsT::new(0.0, 1.0, dof)
        .map_err(|e| AppError::numeric(format!("Invalid t distribution (dof={dof}): {e}")))?;
    Ok(dist.sf(t))
}

/// Upper-tail probability of an F statistic with `(d1, d2)` degrees of freedom.
pub fn f_sf(f: f64, d1: f64, d2: f64) -> Result<f64, AppError> {
    let dist = FisherSnedecor::new(d1, d2)
        .map_err(|e| AppError::numeric(format!("Invalid F distribution ({d1}, {d2}): {e}")))?;
    if f <= 0.0 {
        return Ok(1.0);
    }
    Ok(dist.sf(f))
}

/// Standard normal quantile of the upper tail: `z` with `P(Z > z) = p`.
pub fn z_from_p(p: f64) -> f64 {
    let p = if p.is_nan() { 1.0 } else { p }.clamp(P_MIN, P_MAX);
    // isf(p) = sqrt(2) * erfc^-1(2p), accurate far into the tail.
    std::f64::consts::SQRT_2 * erfc_inv(2.0 * p)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn t_tail_is_symmetric() {
        let upper = t_sf(2.0, 10.0).unwrap();
        let lower = t_sf(-2.0, 10.0).unwrap();
        assert!((upper + lower - 1.0).abs() < 1e-12);
        // scipy.stats.t.sf(2, 10)
        assert!((upper - 0.036_694_017_385_370_16).abs() < 1e-8);
    }

    #[test]
    fn z_of_common_p_values() {
        assert!(z_from_p(0.5).abs() < 1e-9);
        assert!((z_from_p(0.025) - 1.959_963_984_540_054).abs() < 1e-6);
        assert!((z_from_p(0.975) + 1.959_963_984_540_054).abs() < 1e-6);
        assert!(z_from_p(0.0).is_finite());
        assert!(z_from_p(1.0).is_finite());
    }

    #[test]
    fn f_tail_matches_t_squared() {
        // F(1, d) = t(d)^2, two-sided.
        let t: f64 = 2.5;
        let p_f = f_sf(t * t, 1.0, 20.0).unwrap();
        let p_t = 2.0 * t_sf(t, 20.0).unwrap();
        assert!((p_f - p_t).abs() < 1e-9);
    }

    #[test]
    fn invalid_dof_is_an_error() {
        assert!(t_sf(1.0, 0.0).is_err());
    }
}
