//! Numerical utilities: HRF kernels, least squares and distributions.

pub mod hrf;
pub mod ols;
pub mod stats;

pub use hrf::*;
pub use ols::*;
pub use stats::*;
