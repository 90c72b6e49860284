//! Input/output helpers.
//!
//! - CSV galaxy ingest + row validation (`ingest`)
//! - zred and catalog CSV exports (`export`)
//! - parameter-table JSON read/write (`params`)

pub mod export;
pub mod ingest;
pub mod params;

pub use export::*;
pub use ingest::*;
pub use params::*;
