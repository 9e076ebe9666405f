//! Map rendering: terminal montages and PNG snapshots.

pub mod ascii;
pub mod snapshot;

pub use ascii::{cut_slices, render_montage};
pub use snapshot::write_snapshot;
