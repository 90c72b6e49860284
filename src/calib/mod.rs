//! Calibration orchestration and the zred estimator built on its output.
//!
//! Responsibilities:
//! - run the fitting stages in order and assemble a [`ParameterTable`](crate::domain::ParameterTable)
//! - evaluate the fitted model on a redshift grid to get per-galaxy zreds
//! - apply the two correction tracks to raw zreds

pub mod calibrator;
pub mod zred;

pub use calibrator::*;
pub use zred::*;
