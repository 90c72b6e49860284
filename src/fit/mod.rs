//! Spline-parameterised likelihood fits.
//!
//! Responsibilities:
//!
//! - generate node grids and robust per-node seeds
//! - minimise each objective with a shared downhill simplex
//! - fit diagonal (per color), off-diagonal (per color pair), correction and
//!   mixture models

pub mod correction;
pub mod diagonal;
pub mod ecgmm;
pub mod median;
pub mod nodes;
pub mod offdiag;
pub mod simplex;
pub mod startvals;

pub use correction::*;
pub use diagonal::*;
pub use ecgmm::*;
pub use median::*;
pub use nodes::*;
pub use offdiag::*;
pub use simplex::*;
pub use startvals::*;
