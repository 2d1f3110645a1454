//! The [`Task`] trait defines a single unit of work.
//!
//! A task has a stable identity, a blocking body that runs on a worker thread,
//! and an optional hook invoked on the home context after it succeeds.

use std::fmt;
use std::marker::PhantomData;

use tandem_core::Result;

use crate::context::TaskContext;

/// A single unit of work scheduled by an [`Action`](crate::Action).
///
/// Implementors provide the identity used as the [`Results`](crate::Results)
/// key and the body executed off the home context.
pub trait Task: Send + Sync + 'static {
    /// Value produced by a successful run.
    type Output: Clone + Send + Sync + 'static;

    /// Identity of this task. An empty identity is tolerated, but such a task
    /// never appears in pool results.
    fn id(&self) -> &str;

    /// Perform the work on a worker thread.
    ///
    /// Long-running bodies must observe `ctx` (see
    /// [`TaskContext::checkpoint`] and [`TaskContext::sleep`]). Returning
    /// [`Error::Cancelled`](tandem_core::Error::Cancelled) ends the run as
    /// cancelled; any other error fails it.
    fn run(&self, ctx: &TaskContext) -> Result<Self::Output>;

    /// Called on the home context after a successful run, before the owning
    /// pool is notified. The default implementation is a no-op.
    fn on_done(&self, _output: &Self::Output) {}
}

/// A [`Task`] backed by a closure.
pub struct FnTask<F, T> {
    id: String,
    body: F,
    _output: PhantomData<fn() -> T>,
}

impl<F, T> FnTask<F, T>
where
    F: Fn(&TaskContext) -> Result<T> + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn new(id: impl Into<String>, body: F) -> Self {
        Self {
            id: id.into(),
            body,
            _output: PhantomData,
        }
    }
}

impl<F, T> Task for FnTask<F, T>
where
    F: Fn(&TaskContext) -> Result<T> + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    type Output = T;

    fn id(&self) -> &str {
        &self.id
    }

    fn run(&self, ctx: &TaskContext) -> Result<T> {
        (self.body)(ctx)
    }
}

impl<F, T> fmt::Debug for FnTask<F, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTask")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}
