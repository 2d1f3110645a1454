//! Execution context handed to every task run.

use std::future::Future;
use std::time::Duration;

use tandem_core::{Error, Result};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

/// Context passed to [`Task::run`](crate::Task::run).
///
/// Carries the run's cancellation token plus helpers that turn blocking waits
/// into waits that end early when the run is cancelled.
#[derive(Debug, Clone)]
pub struct TaskContext {
    id: String,
    index: Option<usize>,
    cancellation: CancellationToken,
    handle: Handle,
}

impl TaskContext {
    pub(crate) fn new(
        id: String,
        index: Option<usize>,
        cancellation: CancellationToken,
        handle: Handle,
    ) -> Self {
        Self {
            id,
            index,
            cancellation,
            handle,
        }
    }

    /// Identity of the task being run.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Index assigned by the owning pool, or `None` for a standalone run.
    pub fn index(&self) -> Option<usize> {
        self.index
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Token cancelled when this run is cancelled.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Return `Err(Error::Cancelled)` if the run has been cancelled.
    pub fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`, waking early with `Err(Error::Cancelled)` if the
    /// run is cancelled meanwhile.
    pub fn sleep(&self, duration: Duration) -> Result<()> {
        self.block_on(tokio::time::sleep(duration))
    }

    /// Drive `future` to completion on the worker runtime, abandoning it with
    /// `Err(Error::Cancelled)` as soon as the run is cancelled.
    ///
    /// Must only be called from within [`Task::run`](crate::Task::run).
    pub fn block_on<F: Future>(&self, future: F) -> Result<F::Output> {
        let token = self.cancellation.clone();
        self.handle.block_on(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(Error::Cancelled),
                output = future => Ok(output),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::time::Instant;

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap()
    }

    #[test]
    fn checkpoint_reports_cancellation() {
        let rt = runtime();
        let token = CancellationToken::new();
        let ctx = TaskContext::new("one".into(), Some(0), token.clone(), rt.handle().clone());

        assert!(ctx.checkpoint().is_ok());
        token.cancel();
        assert!(ctx.is_cancelled());
        assert_matches!(ctx.checkpoint(), Err(Error::Cancelled));
    }

    #[test]
    fn sleep_completes_when_not_cancelled() {
        let rt = runtime();
        let ctx = TaskContext::new(
            "nap".into(),
            None,
            CancellationToken::new(),
            rt.handle().clone(),
        );

        let handle = rt.spawn_blocking(move || ctx.sleep(Duration::from_millis(10)));
        let result = rt.block_on(handle).unwrap();
        assert!(result.is_ok());
    }

    #[test]
    fn sleep_is_interrupted_by_cancellation() {
        let rt = runtime();
        let token = CancellationToken::new();
        let ctx = TaskContext::new("long".into(), None, token.clone(), rt.handle().clone());

        let started = Instant::now();
        let handle = rt.spawn_blocking(move || ctx.sleep(Duration::from_secs(30)));
        std::thread::sleep(Duration::from_millis(50));
        token.cancel();

        let result = rt.block_on(handle).unwrap();
        assert_matches!(result, Err(Error::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn block_on_returns_future_output() {
        let rt = runtime();
        let ctx = TaskContext::new(
            "calc".into(),
            Some(3),
            CancellationToken::new(),
            rt.handle().clone(),
        );
        assert_eq!(ctx.index(), Some(3));

        let handle = rt.spawn_blocking(move || ctx.block_on(async { 40 + 2 }));
        let value = rt.block_on(handle).unwrap();
        assert_eq!(value.unwrap(), 42);
    }
}
