//! Catalog sources that are not files on disk.

pub mod sample;

pub use sample::*;
