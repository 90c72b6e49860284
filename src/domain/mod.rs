//! Domain types used throughout the calibration.
//!
//! This module defines:
//!
//! - the columnar galaxy catalog (`GalaxySample`)
//! - run configuration (`CalibConfig`, `ScatterSeed`)
//! - node grids and the fitted parameter table (`NodeGrids`, `ParameterTable`)

pub mod config;
pub mod galaxy;
pub mod params;

pub use config::*;
pub use galaxy::*;
pub use params::*;
