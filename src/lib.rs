//! Command-line front end for the tandem scheduler.
//!
//! The scheduling machinery lives in `tandem-exec`; this crate adds TOML
//! configuration and the demo batches driven by the `tandem` binary.

pub mod batch;
pub mod config;
