//! # tandem-exec
//!
//! Scheduling and lifecycle machinery for batches of cancellable work.
//!
//! This crate provides:
//!
//! - **[`Task`]** trait -- the capability a caller implements: an identity, a
//!   blocking `run` that observes a cancellation token, and an optional
//!   `on_done` hook.
//! - **[`Action`]** -- a task wrapped in a thread-safe state machine
//!   (`Idle → Running → Completed | Cancelled | Failed`).
//! - **[`Pool`]** -- runs a batch of actions in [`Mode::Parallel`] or
//!   [`Mode::Series`], accepts new actions while running, and delivers the
//!   aggregated [`Results`] to a completion callback.
//! - **[`Scheduler`]** -- the caller-owned context: bounded worker threads, the
//!   home dispatcher every completion is serialized onto, the [`Registry`] of
//!   active pools, and the lifecycle event bus.

pub mod action;
pub mod context;
pub mod dispatch;
mod env;
pub mod pool;
pub mod registry;
pub mod results;
pub mod scheduler;
pub mod task;

// Re-export key types at the crate root.
pub use action::{Action, ActionState};
pub use context::TaskContext;
pub use dispatch::{Dispatch, HomeThread, Job};
pub use pool::{Mode, Pool, PoolPhase};
pub use registry::Registry;
pub use results::Results;
pub use scheduler::Scheduler;
pub use task::{FnTask, Task};
