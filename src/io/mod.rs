//! Input/output helpers.
//!
//! - NIfTI-1 images (`nifti`)
//! - paradigm and confound tables (`paradigm`, `confounds`)
//! - design CSV and run summary JSON exports (`export`)

pub mod confounds;
pub mod export;
pub mod nifti;
pub mod paradigm;

pub use confounds::*;
pub use export::*;
pub use nifti::{NiftiHeader, Volume, read_volume, write_volume};
pub use paradigm::*;
