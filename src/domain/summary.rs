//! Schema of the JSON run summary.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::design::DesignMatrix;
use crate::domain::{DesignOptions, ModelOptions, OutputType};

/// Machine-readable record of one analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub tool: String,
    pub created_at: DateTime<Utc>,
    pub design: DesignOptions,
    pub model: ModelOptions,
    pub output_type: OutputType,
    pub grid: [usize; 3],
    pub mask_voxels: usize,
    pub runs: Vec<RunRecord>,
    pub contrasts: Vec<ContrastRecord>,
}

/// Per-run design and fit diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub bold: PathBuf,
    pub events: PathBuf,
    pub n_scans: usize,
    pub columns: Vec<String>,
    pub rank: usize,
    /// `None` for a singular design.
    pub condition_number: Option<f64>,
    pub noise_groups: usize,
    pub mean_rho: f64,
    pub dof: f64,
}

impl RunRecord {
    /// Design diagnostics of one run; fit statistics are filled in by the caller.
    pub fn from_design(bold: PathBuf, events: PathBuf, design: &DesignMatrix) -> Self {
        let cond = design.condition_number();
        Self {
            bold,
            events,
            n_scans: design.n_scans(),
            columns: design.names.clone(),
            rank: design.rank(),
            condition_number: cond.is_finite().then_some(cond),
            noise_groups: 0,
            mean_rho: 0.0,
            dof: 0.0,
        }
    }
}

/// One written statistical map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContrastRecord {
    pub id: String,
    pub expr: String,
    /// `t` or `F`.
    pub kind: String,
    pub rows: usize,
    pub map: Option<PathBuf>,
    pub snapshot: Option<PathBuf>,
    pub min: f64,
    pub max: f64,
    /// In-mask voxels with `|value| >= threshold`.
    pub n_supra_threshold: usize,
}
