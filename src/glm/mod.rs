//! Mass-univariate GLM: masking, per-voxel estimation and contrasts.

pub mod contrast;
pub mod mask;
pub mod model;

pub use contrast::{ContrastEstimate, ContrastKind, basis_contrasts, default_contrasts, parse_contrast};
pub use mask::{Mask, compute_mask, load_mask};
pub use model::{FirstLevelModel, FittedModel, LoadedRun, RunFit};
