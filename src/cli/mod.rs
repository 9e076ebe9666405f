//! Command-line parsing for the first-level GLM tool.
//!
//! The goal of this module is to keep **argument parsing** and **command dispatch**
//! separate from the modelling/math code.

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

use crate::domain::{DriftModel, HrfModel, MaskStrategy, NoiseModel, OutputType};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "glm", version, about = "First-level fMRI GLM analysis")]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace). `RUST_LOG` takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit a first-level model, compute contrasts, write statistical maps.
    Fit(FitArgs),
    /// Run an analysis described in a TOML file.
    Run(RunArgs),
    /// Build a design matrix only; print it and optionally export CSV.
    Design(DesignCmdArgs),
    /// Write a synthetic dataset (BOLD image + events table) with known activations.
    Simulate(SimulateArgs),
    /// Print an ASCII montage and peak table of an existing map.
    Show(ShowArgs),
}

/// Design-matrix options shared by `fit` and `design`.
#[derive(Debug, Parser, Clone)]
pub struct DesignArgs {
    /// Repetition time (seconds).
    #[arg(long = "t-r", value_name = "SECONDS")]
    pub t_r: f64,

    /// Fraction of the TR at which the reference slice was acquired.
    #[arg(long, default_value_t = 0.0)]
    pub slice_time_ref: f64,

    /// HRF model.
    #[arg(long, value_enum, default_value_t = HrfModel::Glover)]
    pub hrf_model: HrfModel,

    /// Delays (in scans) of the FIR model.
    #[arg(long, value_delimiter = ',', default_value = "0")]
    pub fir_delays: Vec<usize>,

    /// Drift model.
    #[arg(long, value_enum, default_value_t = DriftModel::Cosine)]
    pub drift_model: DriftModel,

    /// High-pass cutoff (Hz) of the cosine drift model.
    #[arg(long, default_value_t = 0.01)]
    pub high_pass: f64,

    /// Order of the polynomial drift model.
    #[arg(long, default_value_t = 1)]
    pub drift_order: usize,

    /// Temporal oversampling factor used for convolution.
    #[arg(long, default_value_t = 50)]
    pub oversampling: usize,

    /// Earliest onset (seconds, relative to the first scan) that is modelled.
    #[arg(long, default_value_t = -24.0, allow_hyphen_values = true)]
    pub min_onset: f64,
}

/// Options for `glm fit`.
#[derive(Debug, Parser, Clone)]
pub struct FitArgs {
    /// 4D BOLD image (.nii or .nii.gz). Repeat for several runs.
    #[arg(long, value_name = "NIFTI", required = true)]
    pub bold: Vec<PathBuf>,

    /// Events table of each run, in the same order as --bold.
    #[arg(long, value_name = "TSV", required = true)]
    pub events: Vec<PathBuf>,

    /// Confound table of each run, in the same order as --bold.
    #[arg(long, value_name = "TSV")]
    pub confounds: Vec<PathBuf>,

    /// Delimiter of events/confound tables (tab, comma, semicolon, or a character).
    #[arg(long, default_value = "tab")]
    pub delimiter: String,

    #[command(flatten)]
    pub design: DesignArgs,

    /// Temporal noise model.
    #[arg(long, value_enum, default_value_t = NoiseModel::Ar1)]
    pub noise_model: NoiseModel,

    /// Fit raw intensities instead of percent signal change.
    #[arg(long)]
    pub no_signal_scaling: bool,

    /// Mask image (non-zero voxels are analysed).
    #[arg(long, value_name = "NIFTI")]
    pub mask: Option<PathBuf>,

    /// How to compute the mask when --mask is absent.
    #[arg(long, value_enum, default_value_t = MaskStrategy::Background)]
    pub mask_strategy: MaskStrategy,

    /// Contrast as NAME=EXPR, e.g. `audio_minus_visual=audio - visual`. Repeatable.
    /// Without any, one contrast per condition is computed.
    #[arg(long = "contrast", value_name = "NAME=EXPR")]
    pub contrasts: Vec<String>,

    /// Statistic written for each contrast.
    #[arg(long, value_enum, default_value_t = OutputType::ZScore)]
    pub output_type: OutputType,

    /// Output path prefix; maps are written to `<prefix>_<contrast>.nii.gz`.
    #[arg(short, long, value_name = "PREFIX")]
    pub output: Option<PathBuf>,

    /// Render an ASCII montage per contrast (enabled by default).
    #[arg(long, default_value_t = true)]
    pub plot: bool,

    /// Disable the terminal montages.
    #[arg(long)]
    pub no_plot: bool,

    /// Write a PNG snapshot next to each map (needs --output).
    #[arg(long)]
    pub snapshots: bool,

    /// Display threshold (absolute value) for montages, snapshots and peak counts.
    #[arg(long, default_value_t = 3.0)]
    pub threshold: f64,

    /// Number of axial cuts in montages and snapshots.
    #[arg(long, default_value_t = 7)]
    pub cuts: usize,

    /// Show top-N positive and negative peaks per contrast.
    #[arg(long, default_value_t = 10)]
    pub top: usize,

    /// Export the design matrix of the first run to CSV.
    #[arg(long, value_name = "CSV")]
    pub export_design: Option<PathBuf>,

    /// Write a JSON run summary.
    #[arg(long, value_name = "JSON")]
    pub summary: Option<PathBuf>,
}

/// Options for `glm run`.
#[derive(Debug, Parser)]
pub struct RunArgs {
    /// TOML analysis file.
    #[arg(value_name = "TOML")]
    pub analysis: PathBuf,

    /// Disable the terminal montages.
    #[arg(long)]
    pub no_plot: bool,
}

/// Options for `glm design`.
#[derive(Debug, Parser)]
pub struct DesignCmdArgs {
    /// Events table.
    #[arg(long, value_name = "TSV")]
    pub events: PathBuf,

    /// Number of scans (alternatively taken from --bold).
    #[arg(long, required_unless_present = "bold")]
    pub n_scans: Option<usize>,

    /// BOLD image providing the number of scans.
    #[arg(long, value_name = "NIFTI", conflicts_with = "n_scans")]
    pub bold: Option<PathBuf>,

    /// Confound table.
    #[arg(long, value_name = "TSV")]
    pub confounds: Option<PathBuf>,

    /// Delimiter of events/confound tables.
    #[arg(long, default_value = "tab")]
    pub delimiter: String,

    #[command(flatten)]
    pub design: DesignArgs,

    /// Write the design matrix to CSV.
    #[arg(long, value_name = "CSV")]
    pub export: Option<PathBuf>,
}

/// Options for `glm simulate`.
#[derive(Debug, Parser)]
pub struct SimulateArgs {
    /// Output prefix: writes `<prefix>_bold.nii.gz` and `<prefix>_events.tsv`.
    #[arg(short, long, value_name = "PREFIX")]
    pub output: PathBuf,

    /// Grid size as NX,NY,NZ.
    #[arg(long, value_delimiter = ',', num_args = 3, default_values_t = [20, 24, 16])]
    pub dims: Vec<usize>,

    /// Isotropic voxel size (mm).
    #[arg(long, default_value_t = 3.0)]
    pub voxel_size: f32,

    #[arg(long, default_value_t = 120)]
    pub n_scans: usize,

    /// Repetition time (seconds).
    #[arg(long = "t-r", default_value_t = 2.0)]
    pub t_r: f64,

    /// Condition names, cycled through the blocks.
    #[arg(long, value_delimiter = ',', default_value = "audio,visual")]
    pub conditions: Vec<String>,

    /// Block duration (seconds).
    #[arg(long, default_value_t = 12.0)]
    pub block: f64,

    /// Rest between blocks (seconds).
    #[arg(long, default_value_t = 12.0)]
    pub rest: f64,

    /// Peak activation (percent signal change).
    #[arg(long, default_value_t = 3.0)]
    pub effect: f64,

    /// Noise standard deviation (percent of baseline).
    #[arg(long, default_value_t = 1.0)]
    pub noise: f64,

    /// AR(1) coefficient of the noise.
    #[arg(long, default_value_t = 0.3, allow_hyphen_values = true)]
    pub ar1: f64,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

/// Options for `glm show`.
#[derive(Debug, Parser)]
pub struct ShowArgs {
    /// 3D statistical map.
    #[arg(value_name = "NIFTI")]
    pub map: PathBuf,

    #[arg(long, default_value_t = 3.0)]
    pub threshold: f64,

    #[arg(long, default_value_t = 7)]
    pub cuts: usize,

    /// Maximum characters per slice.
    #[arg(long, default_value_t = 32)]
    pub width: usize,

    /// Show top-N positive and negative peaks.
    #[arg(long, default_value_t = 10)]
    pub top: usize,

    /// Also write a PNG snapshot.
    #[arg(long, value_name = "PNG")]
    pub snapshot: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_accepts_repeated_runs_and_contrasts() {
        let cli = Cli::try_parse_from([
            "glm", "-vv", "fit", "--bold", "r1.nii.gz", "--events", "r1.tsv", "--bold", "r2.nii.gz", "--events",
            "r2.tsv", "--t-r", "2.5", "--hrf-model", "glover+derivative", "--contrast", "a=x - y", "--contrast",
            "b=x", "--no-plot",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        let Command::Fit(args) = cli.command else {
            panic!("expected fit");
        };
        assert_eq!(args.bold.len(), 2);
        assert_eq!(args.events[1], PathBuf::from("r2.tsv"));
        assert_eq!(args.design.t_r, 2.5);
        assert_eq!(args.design.hrf_model, HrfModel::GloverDerivative);
        assert_eq!(args.contrasts, vec!["a=x - y", "b=x"]);
        assert!(args.no_plot);
        assert_eq!(args.output_type, OutputType::ZScore);
    }

    #[test]
    fn design_needs_scan_count_or_image() {
        assert!(Cli::try_parse_from(["glm", "design", "--events", "e.tsv", "--t-r", "2"]).is_err());
        let cli = Cli::try_parse_from([
            "glm", "design", "--events", "e.tsv", "--t-r", "2", "--n-scans", "100", "--min-onset", "-10",
        ])
        .unwrap();
        let Command::Design(args) = cli.command else {
            panic!("expected design");
        };
        assert_eq!(args.n_scans, Some(100));
        assert_eq!(args.design.min_onset, -10.0);
    }

    #[test]
    fn simulate_defaults() {
        let cli = Cli::try_parse_from(["glm", "simulate", "-o", "out/sim"]).unwrap();
        let Command::Simulate(args) = cli.command else {
            panic!("expected simulate");
        };
        assert_eq!(args.dims, vec![20, 24, 16]);
        assert_eq!(args.conditions, vec!["audio", "visual"]);
    }
}
