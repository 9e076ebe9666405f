//! Hemodynamic response kernels.
//!
//! Canonical HRFs are differences of two gamma densities (peak minus a scaled
//! undershoot), sampled on the oversampled grid `dt = t_r / oversampling` over
//! `time_length` seconds and normalised to unit sum:
//!
//! ```text
//! h(t) = g(t; delay/disp) - ratio * g(t; undershoot/u_disp)
//! ```
//!
//! where `g(·; k)` is the unit-scale gamma density with shape `k`, shifted by
//! `dt / disp`.

use statrs::function::gamma::ln_gamma;

use crate::domain::{HrfFamily, HrfModel};

/// Kernel support in seconds.
pub const HRF_LENGTH: f64 = 32.0;

/// Onset shift used for the finite-difference time derivative.
const TIME_DERIVATIVE_STEP: f64 = 0.1;

/// Dispersion step used for the finite-difference dispersion derivative.
const DISPERSION_DERIVATIVE_STEP: f64 = 0.01;

/// Shape parameters of a gamma-difference HRF.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GammaDifference {
    pub delay: f64,
    pub undershoot: f64,
    pub dispersion: f64,
    pub u_dispersion: f64,
    pub ratio: f64,
}

impl GammaDifference {
    pub const GLOVER: Self = Self {
        delay: 6.0,
        undershoot: 12.0,
        dispersion: 0.9,
        u_dispersion: 0.9,
        ratio: 0.35,
    };

    pub const SPM: Self = Self {
        delay: 6.0,
        undershoot: 16.0,
        dispersion: 1.0,
        u_dispersion: 1.0,
        ratio: 0.167,
    };

    pub fn for_family(family: HrfFamily) -> Self {
        match family {
            HrfFamily::Glover => Self::GLOVER,
            HrfFamily::Spm => Self::SPM,
        }
    }

    /// Sample the kernel.
    pub fn sample(&self, t_r: f64, oversampling: usize, time_length: f64, onset: f64) -> Vec<f64> {
        let dt = t_r / oversampling as f64;
        let n = (time_length / dt).round().max(2.0) as usize;
        let step = time_length / (n as f64 - 1.0);

        let peak_shape = self.delay / self.dispersion;
        let peak_loc = dt / self.dispersion;
        let under_shape = self.undershoot / self.u_dispersion;
        let under_loc = dt / self.u_dispersion;

        let mut hrf: Vec<f64> = (0..n)
            .map(|k| {
                let t = k as f64 * step - onset;
                gamma_pdf(t - peak_loc, peak_shape) - self.ratio * gamma_pdf(t - under_loc, under_shape)
            })
            .collect();

        let sum: f64 = hrf.iter().sum();
        if sum != 0.0 && sum.is_finite() {
            for v in &mut hrf {
                *v /= sum;
            }
        }
        hrf
    }

    /// `(h(onset) - h(onset + 0.1)) / 0.1`.
    pub fn time_derivative(&self, t_r: f64, oversampling: usize, time_length: f64, onset: f64) -> Vec<f64> {
        let h0 = self.sample(t_r, oversampling, time_length, onset);
        let h1 = self.sample(t_r, oversampling, time_length, onset + TIME_DERIVATIVE_STEP);
        h0.iter()
            .zip(&h1)
            .map(|(a, b)| (a - b) / TIME_DERIVATIVE_STEP)
            .collect()
    }

    /// `(h(disp) - h(disp + 0.01)) / 0.01`.
    pub fn dispersion_derivative(&self, t_r: f64, oversampling: usize, time_length: f64, onset: f64) -> Vec<f64> {
        let wider = Self {
            dispersion: self.dispersion + DISPERSION_DERIVATIVE_STEP,
            ..*self
        };
        let h0 = self.sample(t_r, oversampling, time_length, onset);
        let h1 = wider.sample(t_r, oversampling, time_length, onset);
        h0.iter()
            .zip(&h1)
            .map(|(a, b)| (a - b) / DISPERSION_DERIVATIVE_STEP)
            .collect()
    }
}

/// Unit-scale gamma density; zero for `x <= 0`.
fn gamma_pdf(x: f64, shape: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    ((shape - 1.0) * x.ln() - x - ln_gamma(shape)).exp()
}

/// Glover canonical HRF.
pub fn glover_hrf(t_r: f64, oversampling: usize) -> Vec<f64> {
    GammaDifference::GLOVER.sample(t_r, oversampling, HRF_LENGTH, 0.0)
}

/// SPM canonical HRF.
pub fn spm_hrf(t_r: f64, oversampling: usize) -> Vec<f64> {
    GammaDifference::SPM.sample(t_r, oversampling, HRF_LENGTH, 0.0)
}

/// All kernels of an HRF model, in regressor-column order.
///
/// - canonical models: `[hrf, time derivative?, dispersion derivative?]`
/// - FIR: one boxcar of one scan per delay, shifted by `delay` scans
/// - none: the identity kernel
pub fn hrf_kernels(model: HrfModel, t_r: f64, oversampling: usize, fir_delays: &[usize]) -> Vec<Vec<f64>> {
    if let Some(family) = model.family() {
        let shape = GammaDifference::for_family(family);
        let mut kernels = vec![shape.sample(t_r, oversampling, HRF_LENGTH, 0.0)];
        if model.has_time_derivative() {
            kernels.push(shape.time_derivative(t_r, oversampling, HRF_LENGTH, 0.0));
        }
        if model.has_dispersion_derivative() {
            kernels.push(shape.dispersion_derivative(t_r, oversampling, HRF_LENGTH, 0.0));
        }
        return kernels;
    }

    match model {
        HrfModel::Fir => fir_delays
            .iter()
            .map(|&d| {
                let mut k = vec![0.0; d * oversampling];
                k.extend(std::iter::repeat_n(1.0, oversampling));
                k
            })
            .collect(),
        _ => vec![vec![1.0]],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_kernels_sum_to_one_and_peak_near_five_seconds() {
        for (name, h) in [("glover", glover_hrf(2.0, 50)), ("spm", spm_hrf(2.0, 50))] {
            let sum: f64 = h.iter().sum();
            assert!((sum - 1.0).abs() < 1e-9, "{name}: sum {sum}");

            let dt = HRF_LENGTH / (h.len() as f64 - 1.0);
            let (argmax, _) = h
                .iter()
                .enumerate()
                .fold((0, f64::MIN), |acc, (i, &v)| if v > acc.1 { (i, v) } else { acc });
            let peak = argmax as f64 * dt;
            assert!((4.0..6.5).contains(&peak), "{name}: peak at {peak}s");
            assert!(h.iter().any(|&v| v < 0.0), "{name}: undershoot expected");
        }
    }

    #[test]
    fn kernel_length_follows_oversampled_grid() {
        // dt = 2/50 = 0.04 s -> 800 samples over 32 s
        assert_eq!(glover_hrf(2.0, 50).len(), 800);
    }

    #[test]
    fn derivative_models_yield_extra_kernels() {
        assert_eq!(hrf_kernels(HrfModel::Glover, 2.0, 16, &[]).len(), 1);
        assert_eq!(hrf_kernels(HrfModel::GloverDerivative, 2.0, 16, &[]).len(), 2);
        assert_eq!(hrf_kernels(HrfModel::SpmDerivativeDispersion, 2.0, 16, &[]).len(), 3);

        let d = &hrf_kernels(HrfModel::GloverDerivative, 2.0, 16, &[])[1];
        assert!(d.iter().all(|v| v.is_finite()));
        assert!(d.iter().any(|&v| v.abs() > 0.0));
    }

    #[test]
    fn fir_kernels_are_shifted_boxcars() {
        let ks = hrf_kernels(HrfModel::Fir, 2.0, 4, &[0, 2]);
        assert_eq!(ks[0], vec![1.0; 4]);
        assert_eq!(ks[1].len(), 12);
        assert_eq!(&ks[1][..8], &[0.0; 8]);
        assert_eq!(&ks[1][8..], &[1.0; 4]);
    }

    #[test]
    fn gamma_pdf_matches_closed_form() {
        // shape 2, scale 1: x e^{-x}
        let x: f64 = 1.5;
        assert!((gamma_pdf(x, 2.0) - x * (-x).exp()).abs() < 1e-12);
        assert_eq!(gamma_pdf(0.0, 3.0), 0.0);
    }
}
