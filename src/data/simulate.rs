//! Synthetic BOLD datasets with known activations.
//!
//! The brain is an ellipsoid on a zero background. Each condition gets one
//! spherical activation blob whose time course is the condition's
//! Glover-convolved block regressor; noise is AR(1) Gaussian, in percent of the
//! baseline intensity.

use std::path::{Path, PathBuf};

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;
use tracing::info;

use crate::design::{compute_regressor, frame_times};
use crate::domain::{DesignOptions, DriftModel, Event, HrfModel, Paradigm};
use crate::error::AppError;
use crate::io::nifti::{NiftiHeader, Volume, flat_index, unflatten, write_volume};

/// Blob radius, in voxels.
const BLOB_RADIUS: f64 = 2.0;

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    pub dims: [usize; 3],
    /// Isotropic voxel size (mm).
    pub voxel_size: f32,
    pub n_scans: usize,
    pub t_r: f64,
    pub conditions: Vec<String>,
    /// Seconds of stimulation per block.
    pub block_duration: f64,
    /// Seconds of rest between blocks.
    pub rest_duration: f64,
    /// Peak activation, percent of baseline.
    pub effect_size: f64,
    /// Noise standard deviation, percent of baseline.
    pub noise_sd: f64,
    pub ar1: f64,
    pub baseline: f64,
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            dims: [20, 24, 16],
            voxel_size: 3.0,
            n_scans: 120,
            t_r: 2.0,
            conditions: vec!["audio".to_string(), "visual".to_string()],
            block_duration: 12.0,
            rest_duration: 12.0,
            effect_size: 3.0,
            noise_sd: 1.0,
            ar1: 0.3,
            baseline: 1000.0,
            seed: 42,
        }
    }
}

/// A generated dataset, in memory.
#[derive(Debug, Clone)]
pub struct SimulatedData {
    pub volume: Volume,
    pub paradigm: Paradigm,
    /// Activation centre (voxel indices) per condition, in `conditions` order.
    pub centres: Vec<(String, [usize; 3])>,
    pub n_brain_voxels: usize,
}

/// Paths written by [`write_dataset`].
#[derive(Debug, Clone)]
pub struct DatasetFiles {
    pub bold: PathBuf,
    pub events: PathBuf,
}

fn validate(cfg: &SimulationConfig) -> Result<(), AppError> {
    if cfg.dims.iter().any(|&d| d < 5) {
        return Err(AppError::input(format!("Grid {:?} is too small; use at least 5 per axis.", cfg.dims)));
    }
    if cfg.n_scans < 2 || !(cfg.t_r.is_finite() && cfg.t_r > 0.0) {
        return Err(AppError::input("Need at least two scans and a positive TR."));
    }
    if cfg.conditions.is_empty() || cfg.conditions.iter().any(|c| c.is_empty()) {
        return Err(AppError::input("Need at least one non-empty condition name."));
    }
    if !(cfg.block_duration > 0.0 && cfg.rest_duration >= 0.0) {
        return Err(AppError::input("Block duration must be positive and rest non-negative."));
    }
    if !(cfg.ar1.abs() < 1.0) {
        return Err(AppError::input(format!("AR(1) coefficient must be in (-1, 1), got {}.", cfg.ar1)));
    }
    if !(cfg.noise_sd >= 0.0 && cfg.baseline > 0.0) {
        return Err(AppError::input("Noise must be non-negative and baseline positive."));
    }
    Ok(())
}

/// Alternating blocks cycling through the conditions, rest first.
pub fn block_paradigm(cfg: &SimulationConfig) -> Paradigm {
    let run_length = cfg.n_scans as f64 * cfg.t_r;
    let period = cfg.block_duration + cfg.rest_duration;
    let mut events = Vec::new();
    let mut k = 0;
    loop {
        let onset = cfg.rest_duration + k as f64 * period;
        if onset + cfg.block_duration > run_length {
            break;
        }
        events.push(Event {
            onset,
            duration: cfg.block_duration,
            trial_type: cfg.conditions[k % cfg.conditions.len()].clone(),
            modulation: 1.0,
        });
        k += 1;
    }
    Paradigm::new(events)
}

fn ellipsoid(dims: [usize; 3]) -> (Vec<bool>, [f64; 3], [f64; 3]) {
    let centre = dims.map(|d| (d as f64 - 1.0) / 2.0);
    let radii = dims.map(|d| d as f64 * 0.4);
    let mut inside = vec![false; dims[0] * dims[1] * dims[2]];
    for z in 0..dims[2] {
        for y in 0..dims[1] {
            for x in 0..dims[0] {
                let r2: f64 = [x, y, z]
                    .iter()
                    .enumerate()
                    .map(|(a, &i)| ((i as f64 - centre[a]) / radii[a]).powi(2))
                    .sum();
                inside[flat_index(dims, x, y, z)] = r2 <= 1.0;
            }
        }
    }
    (inside, centre, radii)
}

/// Generate a dataset in memory.
pub fn simulate(cfg: &SimulationConfig) -> Result<SimulatedData, AppError> {
    validate(cfg)?;
    let paradigm = block_paradigm(cfg);
    if paradigm.events.is_empty() {
        return Err(AppError::empty("Run is too short to hold a single block."));
    }

    let dims = cfg.dims;
    let header = NiftiHeader::float32(
        &[dims[0], dims[1], dims[2], cfg.n_scans],
        [cfg.voxel_size; 3],
        cfg.t_r as f32,
    )?;
    let n_vox = dims[0] * dims[1] * dims[2];
    let (brain, centre, radii) = ellipsoid(dims);

    // Blob centres spread along x, half-way to the brain edge.
    let n_cond = cfg.conditions.len();
    let centres: Vec<(String, [usize; 3])> = cfg
        .conditions
        .iter()
        .enumerate()
        .map(|(k, name)| {
            let u = if n_cond > 1 { -0.5 + k as f64 / (n_cond as f64 - 1.0) } else { 0.0 };
            let x = (centre[0] + u * radii[0]).round() as usize;
            (name.clone(), [x, centre[1].round() as usize, centre[2].round() as usize])
        })
        .collect();

    // Unit-peak regressors per condition.
    let ft = frame_times(cfg.n_scans, cfg.t_r, 0.0);
    let opts = DesignOptions {
        t_r: cfg.t_r,
        hrf_model: HrfModel::Glover,
        drift_model: DriftModel::None,
        ..DesignOptions::default()
    };
    let mut regressors = Vec::with_capacity(n_cond);
    for name in &cfg.conditions {
        let (_, reg) = compute_regressor(name, &paradigm.condition_events(name), &ft, &opts)?;
        let col: Vec<f64> = reg.column(0).iter().cloned().collect();
        let peak = col.iter().cloned().fold(0.0f64, f64::max);
        regressors.push(col.into_iter().map(|v| if peak > 0.0 { v / peak } else { 0.0 }).collect::<Vec<f64>>());
    }

    let mut rng = StdRng::seed_from_u64(cfg.seed);
    let normal = Normal::new(0.0, 1.0).map_err(|e| AppError::numeric(format!("Noise distribution error: {e}")))?;
    let innovation = (1.0 - cfg.ar1 * cfg.ar1).sqrt();
    let noise_scale = cfg.baseline * cfg.noise_sd / 100.0;

    let mut data = vec![0.0f32; n_vox * cfg.n_scans];
    let mut n_brain_voxels = 0;
    for v in (0..n_vox).filter(|&v| brain[v]) {
        n_brain_voxels += 1;
        let [x, y, z] = unflatten(dims, v);

        // Percent signal change per condition at this voxel.
        let amplitude: Vec<f64> = centres
            .iter()
            .map(|(_, c)| {
                let d2 = (x as f64 - c[0] as f64).powi(2)
                    + (y as f64 - c[1] as f64).powi(2)
                    + (z as f64 - c[2] as f64).powi(2);
                if d2 <= BLOB_RADIUS * BLOB_RADIUS { cfg.effect_size } else { 0.0 }
            })
            .collect();

        let mut e = normal.sample(&mut rng);
        for t in 0..cfg.n_scans {
            if t > 0 {
                e = cfg.ar1 * e + innovation * normal.sample(&mut rng);
            }
            let psc: f64 = amplitude.iter().zip(&regressors).map(|(a, r)| a * r[t]).sum();
            let value = cfg.baseline * (1.0 + psc / 100.0) + noise_scale * e;
            data[v + t * n_vox] = value as f32;
        }
    }

    let volume = Volume {
        header,
        dims: [dims[0], dims[1], dims[2], cfg.n_scans],
        data,
    };

    Ok(SimulatedData {
        volume,
        paradigm,
        centres,
        n_brain_voxels,
    })
}

/// Write `<prefix>_bold.nii.gz` and `<prefix>_events.tsv`.
pub fn write_dataset(prefix: &Path, data: &SimulatedData) -> Result<DatasetFiles, AppError> {
    let with_suffix = |suffix: &str| {
        let mut s = prefix.as_os_str().to_os_string();
        s.push(suffix);
        PathBuf::from(s)
    };
    let bold = with_suffix("_bold.nii.gz");
    let events = with_suffix("_events.tsv");

    write_volume(&bold, &data.volume.header, &data.volume.data)?;

    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(&events)
        .map_err(|e| AppError::input(format!("Failed to create events file '{}': {e}", events.display())))?;
    writer
        .write_record(["onset", "duration", "trial_type"])
        .map_err(|e| AppError::input(format!("Failed to write events header: {e}")))?;
    for ev in &data.paradigm.events {
        writer
            .write_record([format!("{}", ev.onset), format!("{}", ev.duration), ev.trial_type.clone()])
            .map_err(|e| AppError::input(format!("Failed to write event row: {e}")))?;
    }
    writer
        .flush()
        .map_err(|e| AppError::input(format!("Failed to write events file '{}': {e}", events.display())))?;

    info!(bold = %bold.display(), events = %events.display(), "synthetic dataset written");
    Ok(DatasetFiles { bold, events })
}
