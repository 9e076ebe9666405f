//! `fmri-glm` library crate.
//!
//! The binary (`glm`) is a thin wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - the design/model/contrast code is reusable outside the CLI
//! - code stays easy to navigate as the project grows

pub mod app;
pub mod cli;
pub mod config;
pub mod data;
pub mod design;
pub mod domain;
pub mod error;
pub mod glm;
pub mod io;
pub mod logging;
pub mod math;
pub mod plot;
pub mod report;
