//! Mathematical utilities: splines, robust statistics, least squares,
//! Gaussian densities, luptitudes, and cosmological distances.

pub mod cosmo;
pub mod gauss;
pub mod luptitude;
pub mod ols;
pub mod robust;
pub mod spline;

pub use cosmo::*;
pub use gauss::*;
pub use ols::*;
pub use robust::*;
pub use spline::*;
