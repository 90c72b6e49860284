//! `redseq-cal` library crate.
//!
//! Calibrates a multi-color red-sequence model (mean color, slope, intrinsic
//! scatter and correlations per redshift node) from galaxy catalogs, and the
//! photometric-redshift corrections built on it.
//!
//! The binary (`rscal`) is a thin wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - the calibration can be driven from other tools

pub mod app;
pub mod background;
pub mod calib;
pub mod cli;
pub mod data;
pub mod debug;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod logging;
pub mod math;
pub mod report;
