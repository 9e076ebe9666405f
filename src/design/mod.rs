//! First-level design matrix construction.
//!
//! Column order is fixed:
//!
//! 1. task regressors, conditions sorted by name, each followed by its
//!    derivative/dispersion (or FIR delay) columns
//! 2. confound columns, in file order
//! 3. drift columns, `constant` last

pub mod drift;
pub mod regressors;

pub use drift::*;
pub use regressors::*;

use std::collections::HashSet;

use nalgebra::DMatrix;
use tracing::{debug, warn};

use crate::domain::{DesignOptions, Paradigm};
use crate::error::AppError;
use crate::io::confounds::Confounds;
use crate::math::{condition_number, matrix_rank};

/// Role of a design column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnKind {
    /// Main regressor of a condition.
    Condition,
    /// Derivative, dispersion or additional FIR column of a condition.
    ConditionBasis,
    Confound,
    Drift,
    Constant,
}

/// A design matrix with named columns.
#[derive(Debug, Clone)]
pub struct DesignMatrix {
    pub names: Vec<String>,
    pub kinds: Vec<ColumnKind>,
    pub frame_times: Vec<f64>,
    /// `n_scans × names.len()`.
    pub matrix: DMatrix<f64>,
}

impl DesignMatrix {
    pub fn n_scans(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn n_columns(&self) -> usize {
        self.matrix.ncols()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Names of the main condition regressors.
    pub fn condition_columns(&self) -> Vec<&str> {
        self.names
            .iter()
            .zip(&self.kinds)
            .filter(|(_, k)| **k == ColumnKind::Condition)
            .map(|(n, _)| n.as_str())
            .collect()
    }

    pub fn rank(&self) -> usize {
        matrix_rank(&self.matrix)
    }

    pub fn condition_number(&self) -> f64 {
        condition_number(&self.matrix)
    }
}

/// Build the design matrix of one run.
pub fn make_first_level_design_matrix(
    frame_times: &[f64],
    paradigm: &Paradigm,
    opts: &DesignOptions,
    confounds: Option<&Confounds>,
) -> Result<DesignMatrix, AppError> {
    let n = frame_times.len();
    if n < 2 {
        return Err(AppError::input("A design needs at least two scans."));
    }
    if !(opts.t_r.is_finite() && opts.t_r > 0.0) {
        return Err(AppError::input(format!("Repetition time must be positive, got {}.", opts.t_r)));
    }
    if !(0.0..=1.0).contains(&opts.slice_time_ref) {
        return Err(AppError::input(format!(
            "slice_time_ref is a fraction of the TR in [0, 1], got {}.",
            opts.slice_time_ref
        )));
    }
    if frame_times.windows(2).any(|w| !(w[1] > w[0])) {
        return Err(AppError::input("Frame times must be strictly increasing."));
    }

    let mut names: Vec<String> = Vec::new();
    let mut kinds: Vec<ColumnKind> = Vec::new();
    let mut blocks: Vec<DMatrix<f64>> = Vec::new();

    if paradigm.events.is_empty() {
        return Err(AppError::empty("The events table has no events."));
    }

    let last_frame = frame_times[n - 1];
    let first_modelled = frame_times[0] + opts.min_onset;
    for condition in paradigm.conditions() {
        let events = paradigm.condition_events(&condition);
        let late = events.onsets.iter().filter(|&&o| o > last_frame).count();
        let early = events
            .onsets
            .iter()
            .zip(&events.durations)
            .filter(|&(&o, &d)| o <= last_frame && o + d < first_modelled)
            .count();
        if late + early == events.onsets.len() {
            return Err(AppError::empty(format!(
                "Condition '{condition}' has no event between {first_modelled:.1} s and the last scan at {last_frame:.1} s."
            )));
        }
        if late > 0 {
            warn!(condition = %condition, late, "events start after the last scan and are not modelled");
        }
        if early > 0 {
            warn!(condition = %condition, early, "events end before the modelled window");
        }

        let (col_names, columns) = compute_regressor(&condition, &events, frame_times, opts)?;
        for (k, name) in col_names.into_iter().enumerate() {
            kinds.push(if k == 0 { ColumnKind::Condition } else { ColumnKind::ConditionBasis });
            names.push(name);
        }
        blocks.push(columns);
    }

    if let Some(c) = confounds {
        if c.values.nrows() != n {
            return Err(AppError::input(format!(
                "Confounds have {} rows but the run has {n} scans.",
                c.values.nrows()
            )));
        }
        names.extend(c.names.iter().cloned());
        kinds.extend(std::iter::repeat_n(ColumnKind::Confound, c.names.len()));
        blocks.push(c.values.clone());
    }

    let (drift_names, drift) = make_drift(opts.drift_model, frame_times, opts.high_pass, opts.drift_order)?;
    let n_drift = drift_names.len();
    for (k, name) in drift_names.into_iter().enumerate() {
        kinds.push(if k + 1 == n_drift { ColumnKind::Constant } else { ColumnKind::Drift });
        names.push(name);
    }
    blocks.push(drift);

    let mut seen = HashSet::new();
    for name in &names {
        if !seen.insert(name.as_str()) {
            return Err(AppError::input(format!("Duplicate design column name '{name}'.")));
        }
    }

    let p = names.len();
    let mut matrix = DMatrix::<f64>::zeros(n, p);
    let mut col = 0;
    for block in &blocks {
        matrix.columns_mut(col, block.ncols()).copy_from(block);
        col += block.ncols();
    }

    if matrix.iter().any(|v| !v.is_finite()) {
        return Err(AppError::numeric("Design matrix contains non-finite values."));
    }

    let design = DesignMatrix {
        names,
        kinds,
        frame_times: frame_times.to_vec(),
        matrix,
    };
    debug!(
        scans = n,
        columns = p,
        rank = design.rank(),
        "design matrix built"
    );
    Ok(design)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DriftModel, Event, HrfModel};

    fn paradigm() -> Paradigm {
        let mut events = Vec::new();
        for k in 0..4 {
            events.push(Event {
                onset: 10.0 + 40.0 * k as f64,
                duration: 10.0,
                trial_type: "speech".to_string(),
                modulation: 1.0,
            });
            events.push(Event {
                onset: 30.0 + 40.0 * k as f64,
                duration: 10.0,
                trial_type: "animal".to_string(),
                modulation: 1.0,
            });
        }
        Paradigm::new(events)
    }

    #[test]
    fn columns_are_ordered_conditions_drifts_constant() {
        let opts = DesignOptions {
            t_r: 2.0,
            hrf_model: HrfModel::GloverDerivative,
            drift_model: DriftModel::Polynomial,
            drift_order: 2,
            ..DesignOptions::default()
        };
        let ft = frame_times(90, opts.t_r, 0.0);
        let dm = make_first_level_design_matrix(&ft, &paradigm(), &opts, None).unwrap();

        assert_eq!(
            dm.names,
            vec!["animal", "animal_derivative", "speech", "speech_derivative", "drift_1", "drift_2", "constant"]
        );
        assert_eq!(dm.condition_columns(), vec!["animal", "speech"]);
        assert_eq!(dm.kinds[6], ColumnKind::Constant);
        assert_eq!(dm.n_scans(), 90);
        assert_eq!(dm.rank(), 7);
        assert_eq!(dm.column_index("speech"), Some(2));
    }

    #[test]
    fn confounds_go_between_task_and_drift() {
        let opts = DesignOptions {
            t_r: 2.0,
            drift_model: DriftModel::None,
            ..DesignOptions::default()
        };
        let ft = frame_times(90, opts.t_r, 0.0);
        let confounds = Confounds {
            names: vec!["motion".to_string()],
            values: DMatrix::from_fn(90, 1, |i, _| (i as f64 * 0.37).sin()),
        };
        let dm = make_first_level_design_matrix(&ft, &paradigm(), &opts, Some(&confounds)).unwrap();
        assert_eq!(dm.names, vec!["animal", "speech", "motion", "constant"]);
        assert_eq!(dm.kinds[2], ColumnKind::Confound);
        assert_eq!(dm.matrix[(5, 2)], (5.0f64 * 0.37).sin());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let opts = DesignOptions {
            drift_model: DriftModel::None,
            ..DesignOptions::default()
        };
        let ft = frame_times(90, opts.t_r, 0.0);
        let confounds = Confounds {
            names: vec!["speech".to_string()],
            values: DMatrix::zeros(90, 1),
        };
        let err = make_first_level_design_matrix(&ft, &paradigm(), &opts, Some(&confounds)).unwrap_err();
        assert!(err.message().contains("Duplicate"));
    }

    #[test]
    fn non_positive_tr_is_an_input_error() {
        let opts = DesignOptions {
            t_r: 0.0,
            ..DesignOptions::default()
        };
        let ft = frame_times(10, opts.t_r, 0.0);
        let err = make_first_level_design_matrix(&ft, &paradigm(), &opts, None).unwrap_err();
        assert_eq!(err.exit_code(), 2);

        let opts = DesignOptions {
            slice_time_ref: 1.5,
            ..DesignOptions::default()
        };
        let ft = frame_times(10, opts.t_r, 0.0);
        assert_eq!(make_first_level_design_matrix(&ft, &paradigm(), &opts, None).unwrap_err().exit_code(), 2);
    }

    #[test]
    fn conditions_outside_the_run_are_empty_data() {
        let opts = DesignOptions::default();
        let ft = frame_times(20, opts.t_r, 0.0);
        let late = Paradigm::new(vec![Event {
            onset: 500.0,
            duration: 10.0,
            trial_type: "late".to_string(),
            modulation: 1.0,
        }]);
        let err = make_first_level_design_matrix(&ft, &late, &opts, None).unwrap_err();
        assert_eq!(err.exit_code(), 3);
        assert!(err.message().contains("'late'"), "{}", err.message());

        let err = make_first_level_design_matrix(&ft, &Paradigm::default(), &opts, None).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }
}
