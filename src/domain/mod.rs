//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - modelling enums (`HrfModel`, `DriftModel`, `NoiseModel`, `OutputType`)
//! - the experimental paradigm (`Event`, `Paradigm`)
//! - the resolved analysis configuration (`AnalysisConfig`)
//! - the JSON run summary schema (`RunSummary`)

pub mod summary;
pub mod types;

pub use summary::*;
pub use types::*;
