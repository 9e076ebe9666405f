//! Event regressors: oversampled boxcars convolved with HRF kernels.
//!
//! For each condition:
//!
//! 1. build a boxcar on a high-resolution grid (`oversampling` samples per TR,
//!    starting `min_onset` seconds before the first frame)
//! 2. convolve it with every kernel of the HRF model
//! 3. linearly resample each convolved signal at the frame times
//! 4. orthogonalise derivative columns against the main regressor

use nalgebra::DMatrix;

use crate::domain::{ConditionEvents, DesignOptions, HrfModel};
use crate::error::AppError;
use crate::math::{hrf_kernels, orthogonalize_columns};

/// Acquisition time of each scan: `(slice_time_ref + k) * t_r`.
pub fn frame_times(n_scans: usize, t_r: f64, slice_time_ref: f64) -> Vec<f64> {
    let start = slice_time_ref * t_r;
    (0..n_scans).map(|k| start + k as f64 * t_r).collect()
}

/// The oversampled time grid covering `[min(ft) + min_onset, max(ft) * n/(n-1)]`.
pub fn high_resolution_grid(frame_times: &[f64], oversampling: usize, min_onset: f64) -> Vec<f64> {
    let n = frame_times.len();
    let ft_min = frame_times[0];
    let ft_max = frame_times[n - 1];
    let end = ft_max * (1.0 + 1.0 / (n as f64 - 1.0));
    let start = ft_min + min_onset;

    let n_hr = ((n as f64 - 1.0) / (ft_max - ft_min) * (end - ft_min - min_onset) * oversampling as f64) + 1.0;
    let count = (n_hr.round() as usize).max(2);
    let step = (end - start) / (count as f64 - 1.0);
    (0..count).map(|k| start + k as f64 * step).collect()
}

/// Boxcar of the given events on `grid`.
///
/// Each event adds its modulation from the first grid point at or after its
/// onset up to (excluding) the first point at or after its offset; an event
/// shorter than one grid step still occupies one sample.
pub fn sample_condition(events: &ConditionEvents, grid: &[f64]) -> Vec<f64> {
    let count = grid.len();
    let mut steps = vec![0.0; count];
    let last = count - 1;

    for ((&onset, &duration), &value) in events
        .onsets
        .iter()
        .zip(&events.durations)
        .zip(&events.modulations)
    {
        let t_on = grid.partition_point(|&t| t < onset).min(last);
        let mut t_off = grid.partition_point(|&t| t < onset + duration).min(last);
        if t_off < last && t_off == t_on {
            t_off += 1;
        }
        steps[t_on] += value;
        steps[t_off] -= value;
    }

    let mut acc = 0.0;
    steps
        .into_iter()
        .map(|s| {
            acc += s;
            acc
        })
        .collect()
}

/// Causal convolution truncated to the signal length.
pub fn convolve_truncated(signal: &[f64], kernel: &[f64]) -> Vec<f64> {
    let n = signal.len();
    let mut out = vec![0.0; n];
    for (i, &s) in signal.iter().enumerate() {
        if s == 0.0 {
            continue;
        }
        for (j, &k) in kernel.iter().enumerate().take(n - i) {
            out[i + j] += s * k;
        }
    }
    out
}

/// Linear interpolation of `(grid, values)` at `at`, clamped at the ends.
pub fn resample_linear(grid: &[f64], values: &[f64], at: &[f64]) -> Vec<f64> {
    let last = grid.len() - 1;
    at.iter()
        .map(|&t| {
            let idx = grid.partition_point(|&g| g < t);
            if idx == 0 {
                values[0]
            } else if idx > last {
                values[last]
            } else {
                let (t0, t1) = (grid[idx - 1], grid[idx]);
                let u = if t1 > t0 { (t - t0) / (t1 - t0) } else { 0.0 };
                values[idx - 1] + u * (values[idx] - values[idx - 1])
            }
        })
        .collect()
}

/// Column names produced by `hrf_model` for `condition`.
pub fn regressor_names(condition: &str, hrf_model: HrfModel, fir_delays: &[usize]) -> Vec<String> {
    match hrf_model {
        HrfModel::Fir => fir_delays
            .iter()
            .map(|d| format!("{condition}_delay_{d}"))
            .collect(),
        m => {
            let mut names = vec![condition.to_string()];
            if m.has_time_derivative() {
                names.push(format!("{condition}_derivative"));
            }
            if m.has_dispersion_derivative() {
                names.push(format!("{condition}_dispersion"));
            }
            names
        }
    }
}

/// Regressor columns (`n_scans × k`) and their names for one condition.
pub fn compute_regressor(
    condition: &str,
    events: &ConditionEvents,
    frame_times: &[f64],
    opts: &DesignOptions,
) -> Result<(Vec<String>, DMatrix<f64>), AppError> {
    if frame_times.len() < 2 {
        return Err(AppError::input("At least two scans are needed to build regressors."));
    }
    if opts.oversampling == 0 {
        return Err(AppError::input("Oversampling factor must be positive."));
    }
    if opts.hrf_model == HrfModel::Fir && opts.fir_delays.is_empty() {
        return Err(AppError::input("FIR model needs at least one delay."));
    }

    let grid = high_resolution_grid(frame_times, opts.oversampling, opts.min_onset);
    let boxcar = sample_condition(events, &grid);
    let kernels = hrf_kernels(opts.hrf_model, opts.t_r, opts.oversampling, &opts.fir_delays);

    let n = frame_times.len();
    let mut columns = DMatrix::<f64>::zeros(n, kernels.len());
    for (k, kernel) in kernels.iter().enumerate() {
        let convolved = convolve_truncated(&boxcar, kernel);
        let sampled = resample_linear(&grid, &convolved, frame_times);
        columns.set_column(k, &nalgebra::DVector::from_vec(sampled));
    }

    if opts.hrf_model != HrfModel::Fir && columns.ncols() > 1 {
        orthogonalize_columns(&mut columns);
    }

    Ok((regressor_names(condition, opts.hrf_model, &opts.fir_delays), columns))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events(onsets: &[f64], durations: &[f64]) -> ConditionEvents {
        ConditionEvents {
            onsets: onsets.to_vec(),
            durations: durations.to_vec(),
            modulations: vec![1.0; onsets.len()],
        }
    }

    #[test]
    fn frame_times_include_slice_offset() {
        let ft = frame_times(4, 2.0, 0.5);
        assert_eq!(ft, vec![1.0, 3.0, 5.0, 7.0]);
    }

    #[test]
    fn grid_spans_min_onset_to_one_tr_past_end() {
        let ft = frame_times(11, 1.0, 0.0);
        let grid = high_resolution_grid(&ft, 10, -5.0);
        assert!((grid[0] + 5.0).abs() < 1e-12);
        assert!((grid[grid.len() - 1] - 11.0).abs() < 1e-9);
        let step = grid[1] - grid[0];
        assert!((step - 0.1).abs() < 1e-9, "step {step}");
    }

    #[test]
    fn boxcar_covers_event_duration() {
        let grid: Vec<f64> = (0..20).map(|k| k as f64 * 0.5).collect();
        let reg = sample_condition(&events(&[2.0], &[1.5]), &grid);
        // indices 4 (t=2.0) .. 6 (t=3.0) inclusive, off at 7 (t=3.5)
        assert_eq!(&reg[3..8], &[0.0, 1.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn impulse_events_occupy_one_sample() {
        let grid: Vec<f64> = (0..10).map(|k| k as f64).collect();
        let reg = sample_condition(&events(&[3.0], &[0.0]), &grid);
        assert_eq!(reg.iter().sum::<f64>(), 1.0);
        assert_eq!(reg[3], 1.0);
    }

    #[test]
    fn overlapping_events_accumulate() {
        let grid: Vec<f64> = (0..10).map(|k| k as f64).collect();
        let reg = sample_condition(&events(&[2.0, 2.0], &[2.0, 2.0]), &grid);
        assert_eq!(reg[2], 2.0);
        assert_eq!(reg[4], 0.0);
    }

    #[test]
    fn convolution_is_truncated_and_causal() {
        let out = convolve_truncated(&[0.0, 1.0, 0.0, 0.0], &[1.0, 0.5, 0.25, 0.125]);
        assert_eq!(out, vec![0.0, 1.0, 0.5, 0.25]);
    }

    #[test]
    fn linear_resampling_interpolates_and_clamps() {
        let grid = [0.0, 1.0, 2.0];
        let vals = [0.0, 10.0, 20.0];
        assert_eq!(resample_linear(&grid, &vals, &[-1.0, 0.5, 2.0, 3.0]), vec![0.0, 5.0, 20.0, 20.0]);
    }

    #[test]
    fn block_regressor_rises_after_onset() {
        let opts = DesignOptions {
            t_r: 2.0,
            ..DesignOptions::default()
        };
        let ft = frame_times(40, opts.t_r, 0.0);
        let (names, reg) = compute_regressor("task", &events(&[20.0], &[10.0]), &ft, &opts).unwrap();
        assert_eq!(names, vec!["task"]);
        assert_eq!(reg.shape(), (40, 1));
        // Nothing before the onset, a clear response ~6 s after it.
        assert!(reg[(9, 0)].abs() < 1e-9);
        assert!(reg[(14, 0)] > 0.5);
    }

    #[test]
    fn derivative_columns_are_orthogonal_to_main_regressor() {
        let opts = DesignOptions {
            t_r: 2.0,
            hrf_model: HrfModel::GloverDerivativeDispersion,
            ..DesignOptions::default()
        };
        let ft = frame_times(60, opts.t_r, 0.0);
        let (names, reg) =
            compute_regressor("a", &events(&[10.0, 50.0, 90.0], &[4.0, 4.0, 4.0]), &ft, &opts).unwrap();
        assert_eq!(names, vec!["a", "a_derivative", "a_dispersion"]);
        assert!(reg.column(0).dot(&reg.column(1)).abs() < 1e-8);
        assert!(reg.column(0).dot(&reg.column(2)).abs() < 1e-8);
        assert!(reg.column(1).dot(&reg.column(2)).abs() < 1e-8);
    }

    #[test]
    fn fir_names_follow_delays() {
        assert_eq!(
            regressor_names("c", HrfModel::Fir, &[0, 1, 2]),
            vec!["c_delay_0", "c_delay_1", "c_delay_2"]
        );
    }
}
