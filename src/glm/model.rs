//! First-level GLM estimation.
//!
//! For each run:
//!
//! - extract the in-mask voxel time series (`n_scans × n_voxels`)
//! - optionally convert them to percent signal change
//! - fit the design by OLS, then (for `ar1`) group voxels by the quantised
//!   lag-1 autocorrelation of their OLS residuals and re-fit each group on
//!   pre-whitened data
//!
//! Every group shares one pseudo-inverse; the per-voxel work is matrix
//! products, parallelised across voxel chunks/groups with rayon.

use std::collections::BTreeMap;

use nalgebra::DMatrix;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::design::{DesignMatrix, frame_times, make_first_level_design_matrix};
use crate::domain::{DesignOptions, ModelOptions, NoiseModel, Paradigm};
use crate::error::AppError;
use crate::glm::mask::{Mask, compute_mask};
use crate::io::confounds::Confounds;
use crate::io::nifti::{NiftiHeader, Volume};
use crate::math::pseudo_inverse;

/// Voxels per parallel work item for the OLS pass.
const VOXEL_CHUNK: usize = 2048;

/// One run's inputs, already loaded.
#[derive(Debug, Clone)]
pub struct LoadedRun {
    pub volume: Volume,
    pub paradigm: Paradigm,
    pub confounds: Option<Confounds>,
}

/// Voxels sharing one (whitened) design.
#[derive(Debug, Clone)]
pub struct NoiseGroup {
    /// AR(1) coefficient used for whitening (0 for OLS).
    pub rho: f64,
    /// `pinv(wX) pinv(wX)ᵀ`, `p × p`.
    pub normalized_cov: DMatrix<f64>,
    pub df_resid: f64,
    pub n_voxels: usize,
}

/// Estimates for one run over the mask voxels.
#[derive(Debug, Clone)]
pub struct RunFit {
    pub design: DesignMatrix,
    /// `p × n_voxels`.
    pub betas: DMatrix<f64>,
    /// Residual variance per voxel.
    pub dispersion: Vec<f64>,
    /// Index into `groups` per voxel.
    pub labels: Vec<usize>,
    pub groups: Vec<NoiseGroup>,
}

impl RunFit {
    pub fn n_voxels(&self) -> usize {
        self.dispersion.len()
    }

    /// Mean whitening coefficient over voxels.
    pub fn mean_rho(&self) -> f64 {
        if self.labels.is_empty() {
            return 0.0;
        }
        self.labels.iter().map(|&g| self.groups[g].rho).sum::<f64>() / self.labels.len() as f64
    }
}

/// A fitted model: shared mask plus per-run estimates.
#[derive(Debug, Clone)]
pub struct FittedModel {
    pub mask: Mask,
    /// Spatial header of the first run, used for writing maps.
    pub reference_header: NiftiHeader,
    /// Temporal mean of the first run (raw intensities), for display.
    pub mean_image: Vec<f64>,
    pub runs: Vec<RunFit>,
}

/// Configured first-level model.
#[derive(Debug, Clone)]
pub struct FirstLevelModel {
    pub design: DesignOptions,
    pub model: ModelOptions,
    /// Precomputed mask; computed from the data when `None`.
    pub mask: Option<Mask>,
}

impl FirstLevelModel {
    pub fn new(design: DesignOptions, model: ModelOptions) -> Self {
        Self {
            design,
            model,
            mask: None,
        }
    }

    pub fn with_mask(mut self, mask: Mask) -> Self {
        self.mask = Some(mask);
        self
    }

    /// Validate options that do not depend on the data.
    fn validate(&self) -> Result<(), AppError> {
        let d = &self.design;
        if !(d.t_r.is_finite() && d.t_r > 0.0) {
            return Err(AppError::input(format!("Repetition time must be positive, got {}.", d.t_r)));
        }
        if !(0.0..=1.0).contains(&d.slice_time_ref) {
            return Err(AppError::input(format!(
                "slice_time_ref is a fraction of the TR in [0, 1], got {}.",
                d.slice_time_ref
            )));
        }
        if self.model.noise_model == NoiseModel::Ar1 && self.model.ar_bins == 0 {
            return Err(AppError::input("AR(1) quantisation needs at least one bin."));
        }
        Ok(())
    }

    /// Fit all runs.
    pub fn fit(&self, runs: &[LoadedRun]) -> Result<FittedModel, AppError> {
        self.validate()?;
        let Some(first) = runs.first() else {
            return Err(AppError::empty("No runs to fit."));
        };
        let dims = first.volume.spatial_dims();
        for (k, run) in runs.iter().enumerate() {
            if run.volume.spatial_dims() != dims {
                return Err(AppError::input(format!(
                    "Run {} has spatial shape {:?}, run 1 has {:?}.",
                    k + 1,
                    run.volume.spatial_dims(),
                    dims
                )));
            }
            if run.volume.n_scans() < 2 {
                return Err(AppError::input(format!(
                    "Run {} is not a time series ({} scan).",
                    k + 1,
                    run.volume.n_scans()
                )));
            }
            if let Some(t_r) = run.volume.header.t_r_seconds() {
                if (t_r - self.design.t_r).abs() > 1e-3 && run.volume.n_scans() > 1 {
                    warn!(run = k + 1, header_t_r = t_r, t_r = self.design.t_r, "TR differs from image header");
                }
            }
        }

        let mean_image = first.volume.mean_image();
        let mask = match &self.mask {
            Some(m) => {
                if m.dims != dims {
                    return Err(AppError::input(format!(
                        "Mask shape {:?} does not match images {:?}.",
                        m.dims, dims
                    )));
                }
                m.clone()
            }
            None => {
                let mut mask = compute_mask(&mean_image, dims, self.model.mask_strategy)?;
                for run in &runs[1..] {
                    let other = compute_mask(&run.volume.mean_image(), dims, self.model.mask_strategy)?;
                    mask = mask.intersect(&other)?;
                }
                if mask.is_empty() {
                    return Err(AppError::empty("Run masks do not overlap."));
                }
                mask
            }
        };
        info!(voxels = mask.len(), runs = runs.len(), "fitting first-level model");

        let mut fits = Vec::with_capacity(runs.len());
        for (k, run) in runs.iter().enumerate() {
            let ft = frame_times(run.volume.n_scans(), self.design.t_r, self.design.slice_time_ref);
            let design = make_first_level_design_matrix(&ft, &run.paradigm, &self.design, run.confounds.as_ref())?;

            let mut y = extract_time_series(&run.volume, &mask);
            if self.model.signal_scaling {
                let zero_means = mean_scaling(&mut y);
                if zero_means > 0 {
                    warn!(run = k + 1, voxels = zero_means, "voxels with zero mean were scaled by one");
                }
            }

            let fit = run_glm(&y, &design, self.model.noise_model, self.model.ar_bins)?;
            debug!(
                run = k + 1,
                groups = fit.groups.len(),
                mean_rho = fit.mean_rho(),
                "run fitted"
            );
            fits.push(fit);
        }

        Ok(FittedModel {
            mask,
            reference_header: first.volume.header.clone(),
            mean_image,
            runs: fits,
        })
    }
}

/// `n_scans × n_mask_voxels` matrix of the in-mask time series.
pub fn extract_time_series(volume: &Volume, mask: &Mask) -> DMatrix<f64> {
    let voxels = mask.voxels();
    DMatrix::from_fn(volume.n_scans(), voxels.len(), |t, j| volume.at(voxels[j], t) as f64)
}

/// Convert each column to percent signal change around its mean.
///
/// Columns with zero mean are divided by one instead, giving `100 * (v - 1)`;
/// returns how many.
pub fn mean_scaling(y: &mut DMatrix<f64>) -> usize {
    let mut zero_means = 0;
    for mut col in y.column_iter_mut() {
        let mut mean = col.mean();
        if mean == 0.0 {
            zero_means += 1;
            mean = 1.0;
        }
        col.apply(|v| *v = 100.0 * (*v / mean - 1.0));
    }
    zero_means
}

/// AR(1) pre-whitening: `x[t] - rho * x[t-1]`, first row unchanged.
pub fn whiten(x: &DMatrix<f64>, rho: f64) -> DMatrix<f64> {
    if rho == 0.0 {
        return x.clone();
    }
    let mut out = x.clone();
    for t in 1..x.nrows() {
        for c in 0..x.ncols() {
            out[(t, c)] = x[(t, c)] - rho * x[(t - 1, c)];
        }
    }
    out
}

/// Lag-1 autocorrelation of each residual column.
fn lag1_autocorrelation(resid: &DMatrix<f64>) -> Vec<f64> {
    resid
        .column_iter()
        .map(|col| {
            let denom: f64 = col.iter().map(|v| v * v).sum();
            if denom <= 0.0 {
                return 0.0;
            }
            let num: f64 = (1..col.len()).map(|t| col[t] * col[t - 1]).sum();
            num / denom
        })
        .collect()
}

/// Result of fitting one design against a block of voxel columns.
struct BlockFit {
    betas: DMatrix<f64>,
    dispersion: Vec<f64>,
    residuals: DMatrix<f64>,
}

/// Fit one design (already whitened) to `y`, chunked over voxels.
fn fit_block(x: &DMatrix<f64>, pinv: &DMatrix<f64>, y: &DMatrix<f64>, df: f64) -> BlockFit {
    let n_vox = y.ncols();
    let starts: Vec<usize> = (0..n_vox).step_by(VOXEL_CHUNK).collect();

    let parts: Vec<(DMatrix<f64>, DMatrix<f64>)> = starts
        .par_iter()
        .map(|&start| {
            let width = VOXEL_CHUNK.min(n_vox - start);
            let y_chunk = y.columns(start, width);
            let beta = pinv * y_chunk;
            let resid = y_chunk - x * &beta;
            (beta, resid)
        })
        .collect();

    let p = x.ncols();
    let mut betas = DMatrix::<f64>::zeros(p, n_vox);
    let mut residuals = DMatrix::<f64>::zeros(y.nrows(), n_vox);
    for (&start, (beta, resid)) in starts.iter().zip(&parts) {
        betas.columns_mut(start, beta.ncols()).copy_from(beta);
        residuals.columns_mut(start, resid.ncols()).copy_from(resid);
    }
    let dispersion = residuals.column_iter().map(|c| c.norm_squared() / df).collect();

    BlockFit {
        betas,
        dispersion,
        residuals,
    }
}

/// Fit a GLM with the given noise model.
pub fn run_glm(y: &DMatrix<f64>, design: &DesignMatrix, noise_model: NoiseModel, bins: usize) -> Result<RunFit, AppError> {
    let x = &design.matrix;
    let n = x.nrows();
    if y.nrows() != n {
        return Err(AppError::input(format!(
            "Design has {n} rows but the data has {} scans.",
            y.nrows()
        )));
    }

    let ols = pseudo_inverse(x)?;
    let df = n as f64 - ols.rank as f64;
    if df <= 0.0 {
        return Err(AppError::numeric(format!(
            "No residual degrees of freedom: {n} scans, design rank {}.",
            ols.rank
        )));
    }
    if ols.rank < x.ncols() {
        warn!(rank = ols.rank, columns = x.ncols(), "design matrix is rank deficient");
    }

    let ols_fit = fit_block(x, &ols.pinv, y, df);
    let n_vox = y.ncols();

    if noise_model == NoiseModel::Ols {
        return Ok(RunFit {
            design: design.clone(),
            betas: ols_fit.betas,
            dispersion: ols_fit.dispersion,
            labels: vec![0; n_vox],
            groups: vec![NoiseGroup {
                rho: 0.0,
                normalized_cov: &ols.pinv * ols.pinv.transpose(),
                df_resid: df,
                n_voxels: n_vox,
            }],
        });
    }

    // Group voxels by truncated AR(1) coefficient.
    let ar1 = lag1_autocorrelation(&ols_fit.residuals);
    let mut by_bin: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
    for (v, &r) in ar1.iter().enumerate() {
        let bin = (r * bins as f64).trunc() as i64;
        by_bin.entry(bin).or_default().push(v);
    }
    let bins_f = bins as f64;
    let grouped: Vec<(i64, Vec<usize>)> = by_bin.into_iter().collect();

    let group_fits: Vec<Result<(NoiseGroup, BlockFit), AppError>> = grouped
        .par_iter()
        .map(|(bin, voxels)| {
            let rho = *bin as f64 / bins_f;
            let wx = whiten(x, rho);
            let wpinv = pseudo_inverse(&wx)?;
            let wdf = n as f64 - wpinv.rank as f64;
            if wdf <= 0.0 {
                return Err(AppError::numeric("No residual degrees of freedom after whitening."));
            }
            let y_sub = DMatrix::from_fn(n, voxels.len(), |t, j| y[(t, voxels[j])]);
            let wy = whiten(&y_sub, rho);
            let fit = fit_block(&wx, &wpinv.pinv, &wy, wdf);
            let group = NoiseGroup {
                rho,
                normalized_cov: &wpinv.pinv * wpinv.pinv.transpose(),
                df_resid: wdf,
                n_voxels: voxels.len(),
            };
            Ok((group, fit))
        })
        .collect();

    let p = x.ncols();
    let mut betas = DMatrix::<f64>::zeros(p, n_vox);
    let mut dispersion = vec![0.0; n_vox];
    let mut labels = vec![0usize; n_vox];
    let mut groups = Vec::with_capacity(grouped.len());

    for (g, ((_, voxels), result)) in grouped.iter().zip(group_fits).enumerate() {
        let (group, fit) = result?;
        for (j, &v) in voxels.iter().enumerate() {
            betas.set_column(v, &fit.betas.column(j));
            dispersion[v] = fit.dispersion[j];
            labels[v] = g;
        }
        groups.push(group);
    }

    Ok(RunFit {
        design: design.clone(),
        betas,
        dispersion,
        labels,
        groups,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::ColumnKind;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rand_distr::{Distribution, Normal};

    /// Design: intercept + a square wave, 100 scans.
    fn toy_design() -> DesignMatrix {
        let n = 100;
        let matrix = DMatrix::from_fn(n, 2, |t, c| if c == 0 { if (t / 10) % 2 == 0 { 1.0 } else { 0.0 } } else { 1.0 });
        DesignMatrix {
            names: vec!["task".to_string(), "constant".to_string()],
            kinds: vec![ColumnKind::Condition, ColumnKind::Constant],
            frame_times: (0..n).map(|t| t as f64).collect(),
            matrix,
        }
    }

    fn simulate(design: &DesignMatrix, betas: &[f64], n_vox: usize, rho: f64, seed: u64) -> DMatrix<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::new(0.0, 1.0).unwrap();
        let n = design.n_scans();
        let mut y = DMatrix::zeros(n, n_vox);
        for v in 0..n_vox {
            let mut prev = 0.0;
            for t in 0..n {
                let e = rho * prev + normal.sample(&mut rng);
                prev = e;
                y[(t, v)] = betas[0] * design.matrix[(t, 0)] + betas[1] + e;
            }
        }
        y
    }

    #[test]
    fn ols_recovers_effects_and_noise() {
        let design = toy_design();
        let y = simulate(&design, &[3.0, 10.0], 50, 0.0, 7);
        let fit = run_glm(&y, &design, NoiseModel::Ols, 100).unwrap();

        assert_eq!(fit.groups.len(), 1);
        assert_eq!(fit.groups[0].df_resid, 98.0);
        let mean_task: f64 = fit.betas.row(0).iter().sum::<f64>() / 50.0;
        let mean_disp: f64 = fit.dispersion.iter().sum::<f64>() / 50.0;
        assert!((mean_task - 3.0).abs() < 0.2, "task beta {mean_task}");
        assert!((mean_disp - 1.0).abs() < 0.15, "dispersion {mean_disp}");
    }

    #[test]
    fn ar1_groups_voxels_by_residual_autocorrelation() {
        let design = toy_design();
        let y = simulate(&design, &[2.0, 5.0], 40, 0.5, 11);
        let fit = run_glm(&y, &design, NoiseModel::Ar1, 10).unwrap();

        assert!(fit.groups.len() > 1);
        assert_eq!(fit.groups.iter().map(|g| g.n_voxels).sum::<usize>(), 40);
        assert!(fit.mean_rho() > 0.2 && fit.mean_rho() < 0.6, "rho {}", fit.mean_rho());
        let mean_task: f64 = fit.betas.row(0).iter().sum::<f64>() / 40.0;
        assert!((mean_task - 2.0).abs() < 0.4, "task beta {mean_task}");
        assert!(fit.labels.iter().all(|&g| g < fit.groups.len()));
    }

    #[test]
    fn whitening_leaves_first_row() {
        let x = DMatrix::from_row_slice(3, 1, &[1.0, 2.0, 4.0]);
        let w = whiten(&x, 0.5);
        assert_eq!(w.as_slice(), &[1.0, 1.5, 3.0]);
    }

    #[test]
    fn mean_scaling_gives_percent_change() {
        let mut y = DMatrix::from_row_slice(2, 2, &[90.0, 0.0, 110.0, 0.0]);
        let zeros = mean_scaling(&mut y);
        assert_eq!(zeros, 1);
        assert!((y[(0, 0)] + 10.0).abs() < 1e-12);
        assert!((y[(1, 0)] - 10.0).abs() < 1e-12);
        assert_eq!(y[(0, 1)], -100.0);
    }

    #[test]
    fn saturated_design_has_no_dof() {
        let design = DesignMatrix {
            names: vec!["a".into(), "b".into()],
            kinds: vec![ColumnKind::Condition, ColumnKind::Constant],
            frame_times: vec![0.0, 1.0],
            matrix: DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 0.0, 1.0]),
        };
        let y = DMatrix::from_row_slice(2, 1, &[1.0, 2.0]);
        let err = run_glm(&y, &design, NoiseModel::Ols, 100).unwrap_err();
        assert_eq!(err.exit_code(), 4);
    }

    fn simulated_run() -> LoadedRun {
        let cfg = crate::data::SimulationConfig {
            dims: [10, 10, 8],
            n_scans: 60,
            ..Default::default()
        };
        let sim = crate::data::simulate(&cfg).unwrap();
        LoadedRun {
            volume: sim.volume,
            paradigm: sim.paradigm,
            confounds: None,
        }
    }

    #[test]
    fn user_mask_restricts_the_fit() {
        let run = simulated_run();
        let dims = run.volume.spatial_dims();
        let mut inside = vec![false; dims[0] * dims[1] * dims[2]];
        for x in 3..6 {
            inside[crate::io::nifti::flat_index(dims, x, 5, 4)] = true;
        }
        let mask = Mask::from_bools(dims, inside);

        let fitted = FirstLevelModel::new(DesignOptions::default(), ModelOptions::default())
            .with_mask(mask.clone())
            .fit(std::slice::from_ref(&run))
            .unwrap();
        assert_eq!(fitted.mask, mask);
        assert_eq!(fitted.runs[0].n_voxels(), 3);
        assert_eq!(fitted.runs[0].betas.ncols(), 3);
    }

    #[test]
    fn user_mask_of_another_shape_is_an_input_error() {
        let run = simulated_run();
        let mask = Mask::from_bools([2, 2, 2], vec![true; 8]);
        let err = FirstLevelModel::new(DesignOptions::default(), ModelOptions::default())
            .with_mask(mask)
            .fit(&[run])
            .unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
