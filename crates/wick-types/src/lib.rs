//! Pure data types for wick: module specs, chains, outcomes and output formats.
//!
//! This crate is a leaf dependency with no async runtime and no I/O, so module
//! authors can depend on the contract without pulling in the kernel.

pub mod error;
pub mod format;
pub mod module;
pub mod outcome;

// Flat re-exports for convenience
pub use error::*;
pub use format::*;
pub use module::*;
pub use outcome::*;
