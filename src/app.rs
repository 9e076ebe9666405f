//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments and sets up logging
//! - turns flags or a TOML file into an `AnalysisConfig`
//! - runs the fitting pipeline
//! - prints summaries, montages and peak tables

use std::path::Path;

use clap::Parser;
use tracing::info;

use crate::cli::{Command, DesignArgs, DesignCmdArgs, FitArgs, RunArgs, ShowArgs, SimulateArgs};
use crate::config::{load_analysis, parse_contrast_arg, parse_delimiter, validate};
use crate::domain::{AnalysisConfig, DesignOptions, ModelOptions, OutputOptions, RunInput};
use crate::error::AppError;
use crate::glm::Mask;

pub mod pipeline;

/// Width (characters) of each slice in the montages printed after a fit.
const MONTAGE_WIDTH: usize = 32;

/// Entry point for the `glm` binary.
pub fn run() -> Result<(), AppError> {
    // `.env` may carry RUST_LOG or variables referenced by analysis files.
    dotenvy::dotenv().ok();
    let cli = crate::cli::Cli::parse();
    crate::logging::init_cli_logger(cli.verbose);

    match cli.command {
        Command::Fit(args) => handle_fit(&args),
        Command::Run(args) => handle_run(&args),
        Command::Design(args) => handle_design(&args),
        Command::Simulate(args) => handle_simulate(&args),
        Command::Show(args) => handle_show(&args),
    }
}

fn handle_fit(args: &FitArgs) -> Result<(), AppError> {
    let config = analysis_config_from_args(args)?;
    run_and_print(&config)
}

fn handle_run(args: &RunArgs) -> Result<(), AppError> {
    let mut config = load_analysis(&args.analysis)?;
    if args.no_plot {
        config.output.plot = false;
    }
    run_and_print(&config)
}

fn run_and_print(config: &AnalysisConfig) -> Result<(), AppError> {
    let fitted = pipeline::fit_analysis(config)?;
    println!("{}", crate::report::format_run_summary(&fitted, config));

    let contrasts = pipeline::compute_contrasts(config, &fitted, |i, n, id| {
        println!("{}", crate::report::format_progress(i, n, id));
    })?;
    let summary = pipeline::build_summary(config, &fitted, &contrasts);

    let out = &config.output;
    let label = out.output_type.display_name();
    for c in &contrasts {
        println!();
        if out.plot {
            println!(
                "{}",
                crate::plot::render_montage(&c.map, fitted.mask.dims, out.threshold, out.n_cuts, MONTAGE_WIDTH)
            );
        }
        println!("{}", crate::report::format_peaks(&c.spec.id, label, &c.peaks));
        if let Some(path) = &c.map_path {
            println!("Map written to {}", path.display());
        }
        if let Some(path) = &c.snapshot_path {
            println!("Snapshot written to {}", path.display());
        }
    }

    if let Some(path) = &out.summary {
        crate::io::export::write_summary_json(path, &summary)?;
        println!("Summary written to {}", path.display());
    }
    if let Some(path) = &out.export_design {
        println!("Design matrix written to {}", path.display());
    }
    Ok(())
}

fn design_options_from_args(args: &DesignArgs) -> DesignOptions {
    DesignOptions {
        t_r: args.t_r,
        slice_time_ref: args.slice_time_ref,
        hrf_model: args.hrf_model,
        fir_delays: args.fir_delays.clone(),
        drift_model: args.drift_model,
        high_pass: args.high_pass,
        drift_order: args.drift_order,
        oversampling: args.oversampling,
        min_onset: args.min_onset,
    }
}

/// Build (and validate) an analysis from `glm fit` flags.
pub fn analysis_config_from_args(args: &FitArgs) -> Result<AnalysisConfig, AppError> {
    if args.bold.len() != args.events.len() {
        return Err(AppError::input(format!(
            "Got {} --bold image(s) but {} --events table(s); give one events table per run.",
            args.bold.len(),
            args.events.len()
        )));
    }
    if !args.confounds.is_empty() && args.confounds.len() != args.bold.len() {
        return Err(AppError::input(format!(
            "Got {} --confounds table(s) for {} run(s); give none or one per run.",
            args.confounds.len(),
            args.bold.len()
        )));
    }

    let runs = args
        .bold
        .iter()
        .zip(&args.events)
        .enumerate()
        .map(|(k, (bold, events))| RunInput {
            bold: bold.clone(),
            events: events.clone(),
            confounds: args.confounds.get(k).cloned(),
        })
        .collect();

    let contrasts = args
        .contrasts
        .iter()
        .map(|c| parse_contrast_arg(c))
        .collect::<Result<Vec<_>, _>>()?;

    let config = AnalysisConfig {
        runs,
        delimiter: parse_delimiter(&args.delimiter)?,
        design: design_options_from_args(&args.design),
        model: ModelOptions {
            noise_model: args.noise_model,
            signal_scaling: !args.no_signal_scaling,
            mask: args.mask.clone(),
            mask_strategy: args.mask_strategy,
            ..ModelOptions::default()
        },
        contrasts,
        output: OutputOptions {
            output_type: args.output_type,
            prefix: args.output.clone(),
            plot: args.plot && !args.no_plot,
            snapshots: args.snapshots,
            threshold: args.threshold,
            n_cuts: args.cuts,
            top_n: args.top,
            export_design: args.export_design.clone(),
            summary: args.summary.clone(),
        },
    };
    validate(&config)?;
    Ok(config)
}

fn handle_design(args: &DesignCmdArgs) -> Result<(), AppError> {
    let delimiter = parse_delimiter(&args.delimiter)?;
    let opts = design_options_from_args(&args.design);

    let n_scans = match (args.n_scans, &args.bold) {
        (Some(n), _) => n,
        (None, Some(bold)) => crate::io::nifti::read_volume(bold)?.n_scans(),
        (None, None) => return Err(AppError::input("Give --n-scans or --bold.")),
    };
    let paradigm = crate::io::paradigm::read_paradigm(&args.events, delimiter)?;
    let confounds = match &args.confounds {
        Some(path) => Some(crate::io::confounds::read_confounds(path, delimiter, n_scans)?),
        None => None,
    };

    let frame_times = crate::design::frame_times(n_scans, opts.t_r, opts.slice_time_ref);
    let design = crate::design::make_first_level_design_matrix(&frame_times, &paradigm, &opts, confounds.as_ref())?;
    println!("{}", crate::report::format_design(&design));

    if let Some(path) = &args.export {
        crate::io::export::write_design_csv(path, &design)?;
        println!("Design matrix written to {}", path.display());
    }
    Ok(())
}

fn handle_simulate(args: &SimulateArgs) -> Result<(), AppError> {
    let dims: [usize; 3] = args
        .dims
        .as_slice()
        .try_into()
        .map_err(|_| AppError::input(format!("--dims needs three values, got {:?}.", args.dims)))?;
    let cfg = crate::data::SimulationConfig {
        dims,
        voxel_size: args.voxel_size,
        n_scans: args.n_scans,
        t_r: args.t_r,
        conditions: args.conditions.clone(),
        block_duration: args.block,
        rest_duration: args.rest,
        effect_size: args.effect,
        noise_sd: args.noise,
        ar1: args.ar1,
        seed: args.seed,
        ..crate::data::SimulationConfig::default()
    };

    let data = crate::data::simulate(&cfg)?;
    let files = crate::data::write_dataset(&args.output, &data)?;
    info!(brain_voxels = data.n_brain_voxels, "dataset simulated");

    println!("BOLD image:   {}", files.bold.display());
    println!("Events table: {}", files.events.display());
    println!("Activation centres:");
    for (condition, [i, j, k]) in &data.centres {
        println!("  {condition:<16} voxel ({i}, {j}, {k})");
    }
    Ok(())
}

fn handle_show(args: &ShowArgs) -> Result<(), AppError> {
    let volume = crate::io::nifti::read_volume(&args.map)?;
    let dims = volume.spatial_dims();
    let n = volume.n_voxels();
    if volume.n_scans() > 1 {
        info!(frames = volume.n_scans(), "showing the first frame only");
    }
    let map = &volume.data[..n];

    println!(
        "{}",
        crate::plot::render_montage(map, dims, args.threshold, args.cuts, args.width)
    );

    let inside: Vec<bool> = map.iter().map(|v| v.is_finite() && *v != 0.0).collect();
    let mask = Mask::from_bools(dims, inside);
    let peaks = crate::report::rank_peaks(map, &mask, &volume.header, args.top);
    let id = args
        .map
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| args.map.display().to_string());
    println!("{}", crate::report::format_peaks(&id, "value", &peaks));

    if let Some(path) = &args.snapshot {
        write_show_snapshot(path, map, dims, args)?;
        println!("Snapshot written to {}", path.display());
    }
    Ok(())
}

fn write_show_snapshot(path: &Path, map: &[f32], dims: [usize; 3], args: &ShowArgs) -> Result<(), AppError> {
    let background = vec![0.0; map.len()];
    crate::plot::write_snapshot(path, map, &background, dims, args.threshold, args.cuts)
}
