//! The caller-owned scheduling context.

use std::sync::Arc;
use std::time::Duration;

use tandem_core::config::Config;
use tandem_core::events::{Event, EventBus};
use tandem_core::{PoolId, Result};
use tokio::runtime::{Builder, Runtime};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::action::Action;
use crate::dispatch::{Dispatch, HomeThread};
use crate::env::ExecEnv;
use crate::pool::{Mode, Pool};
use crate::registry::Registry;

/// Owns the worker threads, the home dispatcher, the pool registry and the
/// event bus.
///
/// Dropping the scheduler (or calling [`Scheduler::shutdown`]) cancels every
/// active pool, drains the home context and stops the workers.
pub struct Scheduler {
    env: Arc<ExecEnv>,
    registry: Arc<Registry>,
    home: Arc<HomeThread>,
    runtime: Option<Runtime>,
    grace: Duration,
}

impl Scheduler {
    /// Start a scheduler from configuration.
    ///
    /// # Errors
    ///
    /// [`Error::Io`](tandem_core::Error::Io) if a thread or the worker
    /// runtime cannot be created.
    pub fn new(config: &Config) -> Result<Self> {
        config.log_warnings();

        let max_threads = config.workers.effective_max_threads();
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(max_threads)
            .thread_name(config.workers.thread_name.clone())
            .enable_all()
            .build()?;

        let home = Arc::new(HomeThread::spawn(config.home.thread_name.clone())?);
        let events = Arc::new(EventBus::from_config(&config.events));
        let env = Arc::new(ExecEnv::new(
            runtime.handle().clone(),
            Arc::clone(&home) as Arc<dyn Dispatch>,
            events,
        ));

        info!(max_threads, "Scheduler started");

        Ok(Self {
            env,
            registry: Arc::new(Registry::new()),
            home,
            runtime: Some(runtime),
            grace: config.workers.shutdown_grace(),
        })
    }

    /// Start a scheduler with [`Config::default`].
    pub fn with_defaults() -> Result<Self> {
        Self::new(&Config::default())
    }

    /// Build a pool without starting it.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`](tandem_core::Error::InvalidState) if any
    /// action already belongs to a pool, is running, or appears twice.
    pub fn prepare<T>(&self, mode: Mode, actions: Vec<Action<T>>) -> Result<Pool<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        Pool::new(
            mode,
            actions,
            Arc::clone(&self.env),
            Arc::downgrade(&self.registry),
        )
    }

    /// Build and start a pool running every action at once.
    pub fn parallel<T>(&self, actions: Vec<Action<T>>) -> Result<Pool<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.submit(Mode::Parallel, actions)
    }

    /// Build and start a pool running actions one at a time, in order.
    pub fn series<T>(&self, actions: Vec<Action<T>>) -> Result<Pool<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.submit(Mode::Series, actions)
    }

    fn submit<T>(&self, mode: Mode, actions: Vec<Action<T>>) -> Result<Pool<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        let pool = self.prepare(mode, actions)?;
        pool.execute()?;
        Ok(pool)
    }

    /// Cancel every active pool. Returns the number of pools cancelled.
    pub fn cancel_all(&self) -> usize {
        self.registry.cancel_all()
    }

    /// Identifiers of the pools currently executing.
    pub fn active_pools(&self) -> Vec<PoolId> {
        self.registry.ids()
    }

    pub fn events(&self) -> &Arc<EventBus> {
        self.env.events()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.env.events().subscribe()
    }

    /// Cancel everything and stop the scheduler's threads.
    pub fn shutdown(mut self) {
        self.close();
    }

    pub(crate) fn env(&self) -> &Arc<ExecEnv> {
        &self.env
    }

    fn close(&mut self) {
        if !self.env.close() {
            return;
        }
        let cancelled = self.registry.cancel_all();
        debug!(cancelled, "Scheduler closing");

        self.home.shutdown();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(self.grace);
        }
        info!("Scheduler shut down");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("active_pools", &self.registry.len())
            .field("closed", &self.env.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tandem_core::events::EventPayload;
    use tandem_core::Error;

    fn ok(id: &str) -> Action<u32> {
        Action::from_fn(id, |_ctx| Ok(1))
    }

    #[test]
    fn with_defaults_starts() {
        let scheduler = Scheduler::with_defaults().unwrap();
        assert!(scheduler.active_pools().is_empty());
        scheduler.shutdown();
    }

    #[test]
    fn cancel_all_empties_registry() {
        let scheduler = Scheduler::with_defaults().unwrap();
        let sleeper: Action<u32> = Action::from_fn("sleeper", |ctx| {
            ctx.sleep(Duration::from_secs(30))?;
            Ok(0)
        });
        let pool = scheduler.series(vec![sleeper, ok("after")]).unwrap();
        assert_eq!(scheduler.active_pools(), vec![pool.id()]);

        assert_eq!(scheduler.cancel_all(), 1);
        assert!(scheduler.active_pools().is_empty());
        assert!(pool.wait().unwrap().is_none());
    }

    #[test]
    fn closed_scheduler_rejects_new_work() {
        let scheduler = Scheduler::with_defaults().unwrap();
        let pool = scheduler.prepare(Mode::Parallel, vec![ok("a")]).unwrap();
        let standalone = ok("b");

        scheduler.env.close();
        assert_matches!(pool.execute(), Err(Error::ShutDown));
        assert_matches!(standalone.execute(&scheduler), Err(Error::ShutDown));
    }

    #[test]
    fn lifecycle_events_are_broadcast() {
        let scheduler = Scheduler::with_defaults().unwrap();
        let pool = scheduler.parallel(vec![ok("a"), ok("b")]).unwrap();
        pool.wait().unwrap();

        let recent = scheduler.events().recent_events(10);
        assert!(recent
            .iter()
            .any(|e| matches!(e.payload, EventPayload::PoolDelivered { entries: 2, .. })));
        assert!(recent
            .iter()
            .any(|e| matches!(e.payload, EventPayload::PoolStarted { .. })));
    }
}
