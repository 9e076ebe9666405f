//! Shared domain types.
//!
//! These types are kept lightweight and serializable so they can be:
//!
//! - parsed from CLI flags and TOML analysis files
//! - passed through the design/fit/contrast pipeline
//! - echoed into the JSON run summary

use std::collections::BTreeSet;
use std::path::PathBuf;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Hemodynamic response model used to convolve event regressors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum HrfModel {
    #[serde(rename = "spm")]
    #[value(name = "spm")]
    Spm,
    #[serde(rename = "spm + derivative", alias = "spm+derivative")]
    #[value(name = "spm+derivative", alias = "spm + derivative")]
    SpmDerivative,
    #[serde(rename = "spm + derivative + dispersion", alias = "spm+derivative+dispersion")]
    #[value(name = "spm+derivative+dispersion", alias = "spm + derivative + dispersion")]
    SpmDerivativeDispersion,
    #[serde(rename = "glover")]
    #[value(name = "glover")]
    Glover,
    #[serde(rename = "glover + derivative", alias = "glover+derivative")]
    #[value(name = "glover+derivative", alias = "glover + derivative")]
    GloverDerivative,
    #[serde(rename = "glover + derivative + dispersion", alias = "glover+derivative+dispersion")]
    #[value(name = "glover+derivative+dispersion", alias = "glover + derivative + dispersion")]
    GloverDerivativeDispersion,
    /// Finite impulse response: one regressor per delay (in scans).
    #[serde(rename = "fir")]
    #[value(name = "fir")]
    Fir,
    /// Unconvolved boxcar.
    #[serde(rename = "none")]
    #[value(name = "none")]
    None,
}

/// Which canonical kernel a convolved HRF model is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HrfFamily {
    Spm,
    Glover,
}

impl HrfModel {
    pub fn display_name(self) -> &'static str {
        match self {
            HrfModel::Spm => "spm",
            HrfModel::SpmDerivative => "spm + derivative",
            HrfModel::SpmDerivativeDispersion => "spm + derivative + dispersion",
            HrfModel::Glover => "glover",
            HrfModel::GloverDerivative => "glover + derivative",
            HrfModel::GloverDerivativeDispersion => "glover + derivative + dispersion",
            HrfModel::Fir => "fir",
            HrfModel::None => "none",
        }
    }

    /// Canonical kernel family, `None` for FIR and unconvolved models.
    pub fn family(self) -> Option<HrfFamily> {
        match self {
            HrfModel::Spm | HrfModel::SpmDerivative | HrfModel::SpmDerivativeDispersion => Some(HrfFamily::Spm),
            HrfModel::Glover | HrfModel::GloverDerivative | HrfModel::GloverDerivativeDispersion => {
                Some(HrfFamily::Glover)
            }
            HrfModel::Fir | HrfModel::None => None,
        }
    }

    pub fn has_time_derivative(self) -> bool {
        matches!(
            self,
            HrfModel::SpmDerivative
                | HrfModel::SpmDerivativeDispersion
                | HrfModel::GloverDerivative
                | HrfModel::GloverDerivativeDispersion
        )
    }

    pub fn has_dispersion_derivative(self) -> bool {
        matches!(self, HrfModel::SpmDerivativeDispersion | HrfModel::GloverDerivativeDispersion)
    }
}

/// Slow-drift model appended to the design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DriftModel {
    /// Discrete cosine basis up to the high-pass cutoff.
    Cosine,
    /// Orthogonalised polynomial of order `drift_order`.
    Polynomial,
    /// Constant column only.
    None,
}

/// Temporal noise model for estimation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum NoiseModel {
    /// Ordinary least squares, white noise.
    Ols,
    /// First-order autoregressive noise, voxels grouped by quantised AR coefficient.
    Ar1,
}

/// How to derive the analysis mask when none is supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MaskStrategy {
    /// Voxels differing from the border background value.
    Background,
    /// Histogram threshold on the mean EPI image + largest connected component.
    Epi,
    /// Every finite voxel.
    All,
}

/// Statistic written for each contrast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum OutputType {
    #[value(name = "z_score")]
    ZScore,
    /// t for t contrasts, F for F contrasts.
    #[value(name = "stat")]
    Stat,
    #[value(name = "p_value")]
    PValue,
    #[value(name = "effect_size")]
    EffectSize,
    #[value(name = "effect_variance")]
    EffectVariance,
}

impl OutputType {
    pub fn display_name(self) -> &'static str {
        match self {
            OutputType::ZScore => "z_score",
            OutputType::Stat => "stat",
            OutputType::PValue => "p_value",
            OutputType::EffectSize => "effect_size",
            OutputType::EffectVariance => "effect_variance",
        }
    }
}

/// One trial of the experimental paradigm.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Seconds from the start of the run.
    pub onset: f64,
    /// Seconds; zero for impulse events.
    pub duration: f64,
    pub trial_type: String,
    /// Amplitude of the event in its regressor.
    pub modulation: f64,
}

/// Trial onsets/durations/conditions for one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Paradigm {
    pub events: Vec<Event>,
}

/// Columns of a single condition, as parallel arrays.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConditionEvents {
    pub onsets: Vec<f64>,
    pub durations: Vec<f64>,
    pub modulations: Vec<f64>,
}

impl Paradigm {
    pub fn new(events: Vec<Event>) -> Self {
        Self { events }
    }

    /// Sorted unique condition names.
    pub fn conditions(&self) -> Vec<String> {
        self.events
            .iter()
            .map(|e| e.trial_type.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn condition_events(&self, name: &str) -> ConditionEvents {
        let mut out = ConditionEvents::default();
        for e in self.events.iter().filter(|e| e.trial_type == name) {
            out.onsets.push(e.onset);
            out.durations.push(e.duration);
            out.modulations.push(e.modulation);
        }
        out
    }
}

/// A named contrast expression, e.g. `all_minus_silence = speech + non_speech`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContrastSpec {
    pub id: String,
    pub expr: String,
}

/// Inputs of one acquisition run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInput {
    pub bold: PathBuf,
    pub events: PathBuf,
    #[serde(default)]
    pub confounds: Option<PathBuf>,
}

/// Design-matrix construction options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DesignOptions {
    pub t_r: f64,
    /// Fraction of the TR at which the reference slice was acquired, in `[0, 1]`.
    pub slice_time_ref: f64,
    pub hrf_model: HrfModel,
    /// Delays (in scans) for the FIR model.
    pub fir_delays: Vec<usize>,
    pub drift_model: DriftModel,
    /// High-pass cutoff (Hz) for the cosine drift model.
    pub high_pass: f64,
    pub drift_order: usize,
    /// Temporal oversampling factor for convolution.
    pub oversampling: usize,
    /// Earliest onset (seconds, negative) represented on the oversampled grid.
    pub min_onset: f64,
}

impl Default for DesignOptions {
    fn default() -> Self {
        Self {
            t_r: 2.0,
            slice_time_ref: 0.0,
            hrf_model: HrfModel::Glover,
            fir_delays: vec![0],
            drift_model: DriftModel::Cosine,
            high_pass: 0.01,
            drift_order: 1,
            oversampling: 50,
            min_onset: -24.0,
        }
    }
}

/// Estimation options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelOptions {
    pub noise_model: NoiseModel,
    /// Quantisation bins for AR(1) coefficients.
    pub ar_bins: usize,
    /// Percent-signal-change scaling per voxel.
    pub signal_scaling: bool,
    pub mask: Option<PathBuf>,
    pub mask_strategy: MaskStrategy,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            noise_model: NoiseModel::Ar1,
            ar_bins: 100,
            signal_scaling: true,
            mask: None,
            mask_strategy: MaskStrategy::Background,
        }
    }
}

/// Output/reporting options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputOptions {
    pub output_type: OutputType,
    /// Maps are written to `<prefix>_<contrast_id>.nii.gz` when set.
    pub prefix: Option<PathBuf>,
    /// Print an ASCII z-slice montage per contrast.
    pub plot: bool,
    /// Write a PNG snapshot next to each map.
    pub snapshots: bool,
    /// Display threshold (absolute value) for montages and snapshots.
    pub threshold: f64,
    /// Number of axial cuts in montages and snapshots.
    pub n_cuts: usize,
    /// Peak table length (each sign).
    pub top_n: usize,
    pub export_design: Option<PathBuf>,
    pub summary: Option<PathBuf>,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            output_type: OutputType::ZScore,
            prefix: None,
            plot: true,
            snapshots: false,
            threshold: 3.0,
            n_cuts: 7,
            top_n: 10,
            export_design: None,
            summary: None,
        }
    }
}

/// A full analysis as understood by the pipeline.
///
/// Built from CLI flags or from a TOML analysis file.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisConfig {
    pub runs: Vec<RunInput>,
    /// Delimiter of the events/confounds tables.
    pub delimiter: u8,
    pub design: DesignOptions,
    pub model: ModelOptions,
    /// Empty means one contrast per condition column.
    pub contrasts: Vec<ContrastSpec>,
    pub output: OutputOptions,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(onset: f64, trial_type: &str) -> Event {
        Event {
            onset,
            duration: 1.0,
            trial_type: trial_type.to_string(),
            modulation: 1.0,
        }
    }

    #[test]
    fn conditions_are_sorted_and_unique() {
        let p = Paradigm::new(vec![ev(0.0, "speech"), ev(5.0, "animal"), ev(10.0, "speech")]);
        assert_eq!(p.conditions(), vec!["animal".to_string(), "speech".to_string()]);

        let speech = p.condition_events("speech");
        assert_eq!(speech.onsets, vec![0.0, 10.0]);
        assert_eq!(speech.durations, vec![1.0, 1.0]);
    }

    #[test]
    fn hrf_model_flags() {
        assert!(HrfModel::GloverDerivative.has_time_derivative());
        assert!(!HrfModel::GloverDerivative.has_dispersion_derivative());
        assert_eq!(HrfModel::SpmDerivativeDispersion.family(), Some(HrfFamily::Spm));
        assert_eq!(HrfModel::Fir.family(), None);
    }

    #[test]
    fn hrf_model_accepts_spaced_names() {
        let m: HrfModel = serde_json::from_str("\"glover + derivative\"").unwrap();
        assert_eq!(m, HrfModel::GloverDerivative);
        let m = HrfModel::from_str("glover + derivative", true).unwrap();
        assert_eq!(m, HrfModel::GloverDerivative);
    }
}
