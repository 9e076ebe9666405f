//! Shared analysis pipeline used by `glm fit` and `glm run`.
//!
//! Keeping this in one place avoids duplicating the core workflow:
//! load runs -> design -> mask -> fit -> contrasts -> maps/snapshots -> summary
//!
//! The front-end can then focus on presentation (printing progress, tables and
//! montages).

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info};

use crate::domain::{AnalysisConfig, ContrastRecord, ContrastSpec, RunRecord, RunSummary};
use crate::error::AppError;
use crate::glm::{ContrastKind, FirstLevelModel, FittedModel, LoadedRun, default_contrasts, load_mask};
use crate::io::confounds::read_confounds;
use crate::io::export::{write_design_csv, write_summary_json};
use crate::io::nifti::{read_volume, write_volume};
use crate::io::paradigm::read_paradigm;
use crate::plot::write_snapshot;
use crate::report::{Peaks, rank_peaks};

/// One computed contrast map.
#[derive(Debug, Clone)]
pub struct ContrastOutput {
    pub spec: ContrastSpec,
    pub kind: ContrastKind,
    pub rows: usize,
    /// Full 3D map, zero outside the mask.
    pub map: Vec<f32>,
    pub map_path: Option<PathBuf>,
    pub snapshot_path: Option<PathBuf>,
    pub peaks: Peaks,
    pub n_supra_threshold: usize,
}

/// All computed outputs of a single analysis.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub fitted: FittedModel,
    pub contrasts: Vec<ContrastOutput>,
    pub summary: RunSummary,
}

/// Load images, paradigms and confounds of every run.
pub fn load_runs(config: &AnalysisConfig) -> Result<Vec<LoadedRun>, AppError> {
    config
        .runs
        .iter()
        .map(|run| {
            let volume = read_volume(&run.bold)?;
            info!(
                bold = %run.bold.display(),
                dims = ?volume.dims,
                "image loaded"
            );
            let paradigm = read_paradigm(&run.events, config.delimiter)?;
            let confounds = match &run.confounds {
                Some(path) => Some(read_confounds(path, config.delimiter, volume.n_scans())?),
                None => None,
            };
            Ok(LoadedRun {
                volume,
                paradigm,
                confounds,
            })
        })
        .collect()
}

/// Load the data and fit the first-level model.
pub fn fit_analysis(config: &AnalysisConfig) -> Result<FittedModel, AppError> {
    crate::config::validate(config)?;
    let runs = load_runs(config)?;

    let mut model = FirstLevelModel::new(config.design.clone(), config.model.clone());
    if let Some(path) = &config.model.mask {
        let dims = runs
            .first()
            .map(|r| r.volume.spatial_dims())
            .ok_or_else(|| AppError::empty("No runs to fit."))?;
        model = model.with_mask(load_mask(path, dims)?);
    }
    let fitted = model.fit(&runs)?;

    if let (Some(path), Some(first)) = (&config.output.export_design, fitted.runs.first()) {
        write_design_csv(path, &first.design)?;
        info!(path = %path.display(), "design matrix exported");
    }
    Ok(fitted)
}

/// Contrasts to compute: the configured ones, else one per condition.
pub fn resolve_contrasts(config: &AnalysisConfig, fitted: &FittedModel) -> Vec<ContrastSpec> {
    if !config.contrasts.is_empty() {
        return config.contrasts.clone();
    }
    fitted.runs.first().map(|r| default_contrasts(&r.design)).unwrap_or_default()
}

/// `<prefix><suffix>`, creating the prefix's parent directory.
fn prefixed_path(prefix: &Path, suffix: &str) -> Result<PathBuf, AppError> {
    if let Some(parent) = prefix.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| AppError::input(format!("Failed to create output directory '{}': {e}", parent.display())))?;
    }
    let mut s = prefix.as_os_str().to_os_string();
    s.push(suffix);
    Ok(PathBuf::from(s))
}

/// Compute, write and summarise every contrast.
///
/// `progress(i, n, id)` is called before contrast `i` (1-based) is computed.
pub fn compute_contrasts(
    config: &AnalysisConfig,
    fitted: &FittedModel,
    mut progress: impl FnMut(usize, usize, &str),
) -> Result<Vec<ContrastOutput>, AppError> {
    let specs = resolve_contrasts(config, fitted);
    if specs.is_empty() {
        return Err(AppError::empty("No contrasts to compute: the design has no conditions."));
    }
    let out_cfg = &config.output;
    let output_type = out_cfg.output_type;
    let dims = fitted.mask.dims;

    let mut outputs = Vec::with_capacity(specs.len());
    for (i, spec) in specs.iter().enumerate() {
        progress(i + 1, specs.len(), &spec.id);

        let estimate = fitted
            .compute_contrast(&spec.expr)
            .map_err(|e| AppError::new(e.exit_code(), format!("Contrast '{}': {}", spec.id, e.message())))?;
        let values = estimate.output(output_type)?;
        let map = fitted.mask.unmask(&values);

        let n_supra_threshold = values.iter().filter(|v| v.abs() >= out_cfg.threshold).count();
        let peaks = rank_peaks(&map, &fitted.mask, &fitted.reference_header, out_cfg.top_n);

        let mut map_path = None;
        let mut snapshot_path = None;
        if let Some(prefix) = &out_cfg.prefix {
            let path = prefixed_path(prefix, &format!("_{}.nii.gz", spec.id))?;
            let header = fitted
                .reference_header
                .derived_3d(&format!("{} {}", output_type.display_name(), spec.id));
            write_volume(&path, &header, &map)?;
            debug!(path = %path.display(), "map written");
            map_path = Some(path);

            if out_cfg.snapshots {
                let png = prefixed_path(prefix, &format!("_{}.png", spec.id))?;
                write_snapshot(&png, &map, &fitted.mean_image, dims, out_cfg.threshold, out_cfg.n_cuts)?;
                snapshot_path = Some(png);
            }
        }

        outputs.push(ContrastOutput {
            spec: spec.clone(),
            kind: estimate.kind,
            rows: estimate.dim,
            map,
            map_path,
            snapshot_path,
            peaks,
            n_supra_threshold,
        });
    }
    Ok(outputs)
}

/// Machine-readable summary of a finished analysis.
pub fn build_summary(config: &AnalysisConfig, fitted: &FittedModel, contrasts: &[ContrastOutput]) -> RunSummary {
    let runs = config
        .runs
        .iter()
        .zip(&fitted.runs)
        .map(|(input, run)| RunRecord {
            noise_groups: run.groups.len(),
            mean_rho: run.mean_rho(),
            dof: run.groups.iter().map(|g| g.df_resid).fold(f64::INFINITY, f64::min),
            ..RunRecord::from_design(input.bold.clone(), input.events.clone(), &run.design)
        })
        .collect();

    let contrasts = contrasts
        .iter()
        .map(|c| {
            let in_mask: Vec<f64> = fitted.mask.voxels().iter().map(|&v| c.map[v] as f64).collect();
            ContrastRecord {
                id: c.spec.id.clone(),
                expr: c.spec.expr.clone(),
                kind: match c.kind {
                    ContrastKind::T => "t".to_string(),
                    ContrastKind::F => "F".to_string(),
                },
                rows: c.rows,
                map: c.map_path.clone(),
                snapshot: c.snapshot_path.clone(),
                min: in_mask.iter().cloned().fold(f64::INFINITY, f64::min),
                max: in_mask.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
                n_supra_threshold: c.n_supra_threshold,
            }
        })
        .collect();

    RunSummary {
        tool: "glm".to_string(),
        created_at: Utc::now(),
        design: config.design.clone(),
        model: config.model.clone(),
        output_type: config.output.output_type,
        grid: fitted.mask.dims,
        mask_voxels: fitted.mask.len(),
        runs,
        contrasts,
    }
}

/// Execute the full pipeline and return the computed outputs.
pub fn run_analysis(
    config: &AnalysisConfig,
    progress: impl FnMut(usize, usize, &str),
) -> Result<RunOutput, AppError> {
    let fitted = fit_analysis(config)?;
    let contrasts = compute_contrasts(config, &fitted, progress)?;
    let summary = build_summary(config, &fitted, &contrasts);
    if let Some(path) = &config.output.summary {
        write_summary_json(path, &summary)?;
    }
    Ok(RunOutput {
        fitted,
        contrasts,
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::simulate::{SimulationConfig, simulate, write_dataset};
    use crate::domain::{DesignOptions, ModelOptions, NoiseModel, OutputOptions, OutputType, RunInput};
    use crate::io::export::read_summary_json;
    use crate::io::nifti::flat_index;

    fn analysis(dir: &Path, seed: u64) -> (AnalysisConfig, Vec<(String, [usize; 3])>) {
        let sim_cfg = SimulationConfig {
            dims: [12, 12, 8],
            n_scans: 96,
            seed,
            ..SimulationConfig::default()
        };
        let sim = simulate(&sim_cfg).unwrap();
        let files = write_dataset(&dir.join(format!("sub-{seed}")), &sim).unwrap();

        let config = AnalysisConfig {
            runs: vec![RunInput {
                bold: files.bold,
                events: files.events,
                confounds: None,
            }],
            delimiter: b'\t',
            design: DesignOptions {
                t_r: sim_cfg.t_r,
                ..DesignOptions::default()
            },
            model: ModelOptions::default(),
            contrasts: vec![
                ContrastSpec { id: "audio_minus_visual".into(), expr: "audio - visual".into() },
                ContrastSpec { id: "effects".into(), expr: "audio; visual".into() },
            ],
            output: OutputOptions {
                prefix: Some(dir.join("out").join("sub")),
                snapshots: true,
                summary: Some(dir.join("summary.json")),
                export_design: Some(dir.join("design.csv")),
                ..OutputOptions::default()
            },
        };
        (config, sim.centres)
    }

    #[test]
    fn end_to_end_recovers_simulated_activation() {
        let dir = tempfile::tempdir().unwrap();
        let (config, centres) = analysis(dir.path(), 3);

        let mut seen = Vec::new();
        let out = run_analysis(&config, |i, n, id| seen.push(format!("{i}/{n} {id}"))).unwrap();
        assert_eq!(seen, vec!["1/2 audio_minus_visual", "2/2 effects"]);

        // Background is excluded from the mask.
        assert!(out.fitted.mask.len() > 100);
        assert!(!out.fitted.mask.contains(0));

        let dims = out.fitted.mask.dims;
        let audio = centres.iter().find(|(c, _)| c == "audio").unwrap().1;
        let visual = centres.iter().find(|(c, _)| c == "visual").unwrap().1;
        let diff = &out.contrasts[0];
        assert_eq!(diff.kind, ContrastKind::T);
        assert!(diff.map[flat_index(dims, audio[0], audio[1], audio[2])] > 3.0);
        assert!(diff.map[flat_index(dims, visual[0], visual[1], visual[2])] < -3.0);
        assert!(diff.peaks.positive[0].value > 3.0);

        let effects = &out.contrasts[1];
        assert_eq!(effects.kind, ContrastKind::F);
        assert_eq!(effects.rows, 2);

        for c in &out.contrasts {
            assert!(c.map_path.as_ref().unwrap().exists());
            assert!(c.snapshot_path.as_ref().unwrap().exists());
        }
        let written = read_volume(diff.map_path.as_ref().unwrap()).unwrap();
        assert_eq!(written.dims, [dims[0], dims[1], dims[2], 1]);
        assert_eq!(written.data, diff.map);

        let summary = read_summary_json(&dir.path().join("summary.json")).unwrap();
        assert_eq!(summary.contrasts.len(), 2);
        assert_eq!(summary.runs[0].columns[..2], ["audio".to_string(), "visual".to_string()]);
        assert!(dir.path().join("design.csv").exists());
    }

    #[test]
    fn default_contrasts_follow_conditions_and_fixed_effects_combine_runs() {
        let dir = tempfile::tempdir().unwrap();
        let (mut config, _) = analysis(dir.path(), 5);
        let (second, _) = analysis(dir.path(), 6);
        config.runs.extend(second.runs);
        config.contrasts.clear();
        config.model.noise_model = NoiseModel::Ols;
        config.output = OutputOptions {
            output_type: OutputType::EffectSize,
            ..OutputOptions::default()
        };

        let out = run_analysis(&config, |_, _, _| {}).unwrap();
        let ids: Vec<&str> = out.contrasts.iter().map(|c| c.spec.id.as_str()).collect();
        assert_eq!(ids, vec!["audio", "visual"]);
        assert_eq!(out.fitted.runs.len(), 2);
        assert!(out.contrasts.iter().all(|c| c.map_path.is_none()));
        assert_eq!(out.summary.runs.len(), 2);
    }

    #[test]
    fn unknown_contrast_names_fail_with_input_error() {
        let dir = tempfile::tempdir().unwrap();
        let (mut config, _) = analysis(dir.path(), 9);
        config.contrasts = vec![ContrastSpec { id: "bad".into(), expr: "auditory".into() }];
        config.output = OutputOptions::default();

        let err = run_analysis(&config, |_, _, _| {}).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.message().contains("Contrast 'bad'"));
        assert!(err.message().contains("audio"));
    }
}
