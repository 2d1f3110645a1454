//! tandem-core: shared errors, IDs, configuration, and the lifecycle event bus.
//!
//! This crate is the foundational dependency for the execution crate and the
//! `tandem` binary. It carries no scheduling logic of its own.

pub mod config;
pub mod error;
pub mod events;
pub mod ids;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
pub use ids::*;
