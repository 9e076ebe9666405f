//! Synthetic datasets with known activations.

pub mod simulate;

pub use simulate::{DatasetFiles, SimulatedData, SimulationConfig, block_paradigm, simulate, write_dataset};
