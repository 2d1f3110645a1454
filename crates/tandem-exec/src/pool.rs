//! Pools: batches of actions run in parallel or in series.
//!
//! A pool owns its actions in an arena keyed by index. Indices come from a
//! per-pool counter, so iteration order is also push order and the series head
//! is always the smallest pending index.
//!
//! Every completion reaches the pool on the home context, one at a time, so
//! the decision "is the queue empty / which action runs next" is never made
//! concurrently.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Weak};

use parking_lot::{Condvar, Mutex};
use tandem_core::events::EventPayload;
use tandem_core::{Error, PoolId, Result};
use tracing::{debug, info, warn};

use crate::action::{Action, Attachment, CompletionSink};
use crate::env::ExecEnv;
use crate::registry::{ActivePool, Registry};
use crate::results::Results;

/// Execution order for a pool's actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Start every action at once; deliver after the last one finishes.
    Parallel,
    /// Start actions one at a time in index order.
    Series,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Parallel => "parallel",
            Mode::Series => "series",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "parallel" => Ok(Mode::Parallel),
            "series" => Ok(Mode::Series),
            other => Err(Error::invalid_state(format!(
                "unrecognized pool mode '{other}' (expected parallel or series)"
            ))),
        }
    }
}

/// Where a pool is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolPhase {
    /// Constructed; actions attached but not started.
    Prepared,
    /// Started; no action has finished yet.
    Executing,
    /// At least one action has finished and others are pending.
    Draining,
    /// Every action finished and the results were handed off.
    Delivered,
    /// Cancelled before draining.
    Cancelled,
}

impl PoolPhase {
    pub fn is_finished(&self) -> bool {
        matches!(self, PoolPhase::Delivered | PoolPhase::Cancelled)
    }

    fn is_running(&self) -> bool {
        matches!(self, PoolPhase::Executing | PoolPhase::Draining)
    }
}

type DoneCallback<T> = Box<dyn FnOnce(Results<T>) + Send + 'static>;

struct PoolState<T> {
    phase: PoolPhase,
    queue: BTreeMap<usize, Action<T>>,
    next_index: usize,
    accumulator: Option<Results<T>>,
    /// Copy of the delivered results, served to `wait` and late `done` calls.
    delivered: Option<Results<T>>,
    on_done: Option<DoneCallback<T>>,
    callback_fired: bool,
}

pub(crate) struct PoolCore<T> {
    id: PoolId,
    mode: Mode,
    env: Arc<ExecEnv>,
    registry: Weak<Registry>,
    this: Weak<PoolCore<T>>,
    state: Mutex<PoolState<T>>,
    finished: Condvar,
}

/// A batch of actions driven to completion in one [`Mode`].
///
/// Obtained from [`Scheduler::parallel`](crate::Scheduler::parallel),
/// [`Scheduler::series`](crate::Scheduler::series) or
/// [`Scheduler::prepare`](crate::Scheduler::prepare). Cloning yields another
/// handle to the same pool.
pub struct Pool<T> {
    core: Arc<PoolCore<T>>,
}

impl<T> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T> Pool<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Build a prepared pool and attach `actions` with indices `0..n`.
    pub(crate) fn new(
        mode: Mode,
        actions: Vec<Action<T>>,
        env: Arc<ExecEnv>,
        registry: Weak<Registry>,
    ) -> Result<Self> {
        let core = Arc::new_cyclic(|this| PoolCore {
            id: PoolId::new(),
            mode,
            env,
            registry,
            this: Weak::clone(this),
            state: Mutex::new(PoolState {
                phase: PoolPhase::Prepared,
                queue: BTreeMap::new(),
                next_index: 0,
                accumulator: None,
                delivered: None,
                on_done: None,
                callback_fired: false,
            }),
            finished: Condvar::new(),
        });

        let count = {
            let mut st = core.state.lock();
            core.bind_all(&mut st, actions)?;
            st.queue.len()
        };

        info!(pool_id = %core.id, mode = %mode, actions = count, "Prepared actions for execution");
        core.env.emit(EventPayload::PoolPrepared {
            pool_id: core.id,
            mode: mode.to_string(),
            actions: count,
        });

        Ok(Self { core })
    }

    pub fn id(&self) -> PoolId {
        self.core.id
    }

    pub fn mode(&self) -> Mode {
        self.core.mode
    }

    pub fn phase(&self) -> PoolPhase {
        self.core.state.lock().phase
    }

    /// Number of pending actions.
    pub fn len(&self) -> usize {
        self.core.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.core.state.lock().queue.is_empty()
    }

    /// Start the batch and register the pool as active.
    ///
    /// Series pools start only the first action; parallel pools start all.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] if the pool was already executed or cancelled,
    /// or has no actions; [`Error::ShutDown`] after scheduler shutdown.
    pub fn execute(&self) -> Result<()> {
        let core = &self.core;
        if core.env.is_closed() {
            return Err(Error::ShutDown);
        }

        let mut st = core.state.lock();
        match st.phase {
            PoolPhase::Prepared => {}
            PoolPhase::Cancelled => {
                return Err(Error::invalid_state(format!(
                    "pool {} has been cancelled",
                    core.id
                )));
            }
            _ => {
                return Err(Error::invalid_state(format!(
                    "pool {} has already been executed",
                    core.id
                )));
            }
        }
        core.withdraw_cancelled(&mut st);
        if st.queue.is_empty() {
            return Err(Error::invalid_state(format!(
                "pool {} has no actions to execute",
                core.id
            )));
        }

        st.phase = PoolPhase::Executing;
        st.accumulator = Some(Results::new());
        if let Some(registry) = core.registry.upgrade() {
            registry.register(Arc::clone(&self.core) as Arc<dyn ActivePool>);
        }

        info!(pool_id = %core.id, mode = %core.mode, actions = st.queue.len(), "Executing actions");
        core.env.emit(EventPayload::PoolStarted {
            pool_id: core.id,
            mode: core.mode.to_string(),
        });

        match core.mode {
            Mode::Series => core.start_head(&st),
            Mode::Parallel => {
                for (&index, action) in &st.queue {
                    core.launch(index, action);
                }
            }
        }
        Ok(())
    }

    /// Add actions to the pool, assigning the next sequential indices.
    ///
    /// Before execution the actions join the initial batch. While running, a
    /// parallel pool starts them immediately; a series pool queues them behind
    /// the pending actions and starts one only if nothing was pending.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] if the pool has finished, or if any action is
    /// already bound to a pool, is running, or appears twice. No action is
    /// attached when an error is returned.
    pub fn push(&self, actions: impl IntoIterator<Item = Action<T>>) -> Result<()> {
        let core = &self.core;
        let mut st = core.state.lock();
        if st.phase.is_finished() {
            return Err(Error::invalid_state(format!(
                "pool {} has already finished; cannot push more actions",
                core.id
            )));
        }

        let was_empty = st.queue.is_empty();
        let indices = core.bind_all(&mut st, actions.into_iter().collect())?;
        debug!(pool_id = %core.id, pushed = indices.len(), phase = ?st.phase, "Pushed actions");

        if st.phase.is_running() {
            match core.mode {
                Mode::Parallel => {
                    for index in &indices {
                        if let Some(action) = st.queue.get(index) {
                            core.launch(*index, action);
                        }
                    }
                }
                Mode::Series if was_empty => core.start_head(&st),
                Mode::Series => {}
            }
        }
        Ok(())
    }

    /// Cancel every pending action, discard partial results and deregister.
    ///
    /// The completion callback is never invoked for a cancelled pool. Does not
    /// wait for in-flight runs to stop. Calling this on a finished pool does
    /// nothing.
    pub fn cancel(&self) {
        self.core.cancel_pool();
    }

    /// Set the completion callback, invoked on the home context with the final
    /// results once every action has finished.
    ///
    /// If the batch already drained, the callback is posted to the home context
    /// right away with the delivered results, unless an earlier callback has
    /// already received them. A callback set on a cancelled pool is dropped.
    pub fn done(&self, callback: impl FnOnce(Results<T>) + Send + 'static) -> &Self {
        let core = &self.core;
        let mut st = core.state.lock();
        let phase = st.phase;
        match phase {
            PoolPhase::Delivered => {
                if st.callback_fired {
                    debug!(pool_id = %core.id, "Results already delivered; ignoring callback");
                } else if let Some(results) = st.delivered.clone() {
                    st.callback_fired = true;
                    drop(st);
                    if !core.env.home.post(Box::new(move || callback(results))) {
                        warn!(pool_id = %core.id, "Home context has stopped; dropping callback");
                    }
                }
            }
            PoolPhase::Cancelled => {
                debug!(pool_id = %core.id, "Pool was cancelled; dropping callback");
            }
            _ => st.on_done = Some(Box::new(callback)),
        }
        self
    }

    /// Block until the pool is delivered or cancelled.
    ///
    /// Returns the delivered results, or `None` if the pool was cancelled.
    /// A member cancelled on its own while the pool runs never reports back,
    /// so such a pool only finishes through [`Pool::cancel`].
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] if called on the home context (the pool could
    /// never finish) or before the pool was executed.
    pub fn wait(&self) -> Result<Option<Results<T>>> {
        let core = &self.core;
        if core.env.home.is_current() {
            return Err(Error::invalid_state(
                "Pool::wait called on the home context would deadlock",
            ));
        }

        let mut st = core.state.lock();
        if st.phase == PoolPhase::Prepared {
            return Err(Error::invalid_state(format!(
                "pool {} has not been executed",
                core.id
            )));
        }
        while !st.phase.is_finished() {
            core.finished.wait(&mut st);
        }
        Ok(st.delivered.clone())
    }
}

impl<T> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.core.state.lock();
        f.debug_struct("Pool")
            .field("id", &self.core.id)
            .field("mode", &self.core.mode)
            .field("phase", &st.phase)
            .field("pending", &st.queue.len())
            .finish()
    }
}

impl<T> PoolCore<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Validate and attach `actions`, returning their new indices.
    ///
    /// All-or-nothing: if any attach fails, the ones already attached are
    /// detached again.
    fn bind_all(&self, st: &mut PoolState<T>, actions: Vec<Action<T>>) -> Result<Vec<usize>> {
        for (i, action) in actions.iter().enumerate() {
            if actions[..i].iter().any(|other| other.same(action))
                || st.queue.values().any(|queued| queued.same(action))
            {
                return Err(Error::invalid_state(format!(
                    "action '{}' appears twice in pool {}",
                    action.id(),
                    self.id
                )));
            }
        }

        let sink: Weak<dyn CompletionSink<T>> = self.this.clone();
        let mut attached: Vec<(usize, Action<T>)> = Vec::with_capacity(actions.len());
        for (offset, action) in actions.into_iter().enumerate() {
            let index = st.next_index + offset;
            let attachment = Attachment {
                pool_id: self.id,
                index,
                sink: Weak::clone(&sink),
                home: Arc::clone(&self.env.home),
            };
            if let Err(e) = action.attach(attachment) {
                for (_, done) in &attached {
                    done.detach();
                }
                return Err(e);
            }
            attached.push((index, action));
        }

        st.next_index += attached.len();
        let indices = attached.iter().map(|(index, _)| *index).collect();
        st.queue.extend(attached);
        Ok(indices)
    }

    /// Drop members cancelled while the pool was still prepared.
    fn withdraw_cancelled(&self, st: &mut PoolState<T>) {
        st.queue.retain(|&index, action| {
            if !action.is_cancelled() {
                return true;
            }
            action.detach();
            debug!(pool_id = %self.id, index, action = %action.id(), "Dropped cancelled action before execution");
            false
        });
    }

    /// Start the pending action with the smallest index, unless it is
    /// already running or was cancelled. A cancelled head stalls the series.
    fn start_head(&self, st: &PoolState<T>) {
        if let Some((&index, head)) = st.queue.iter().next() {
            if head.is_executing() || head.is_cancelled() {
                return;
            }
            debug!(pool_id = %self.id, index, action = %head.id(), "Executing next action in the series");
            self.launch(index, head);
        }
    }

    /// Start one action. A start failure is reported back through the home
    /// context like any other failure so the pool keeps draining.
    fn launch(&self, index: usize, action: &Action<T>) {
        if let Err(e) = action.start(&self.env) {
            warn!(pool_id = %self.id, index, action = %action.id(), error = %e, "Failed to start action");
            let sink = self.this.clone();
            let message = e.to_string();
            let posted = self.env.home.post(Box::new(move || {
                if let Some(core) = sink.upgrade() {
                    core.failed(index, message);
                }
            }));
            if !posted {
                warn!(pool_id = %self.id, index, "Home context has stopped; dropping start failure");
            }
        }
    }

    /// A member was cancelled on its own.
    ///
    /// Before execution it simply leaves the batch. Once the pool runs, the
    /// member stays queued: it records nothing and never advances a series.
    fn withdraw(&self, index: usize) {
        let mut st = self.state.lock();
        if st.phase != PoolPhase::Prepared {
            debug!(pool_id = %self.id, index, phase = ?st.phase, "Cancelled action stays queued until the pool is cancelled");
            return;
        }
        if let Some(action) = st.queue.remove(&index) {
            action.detach();
            debug!(pool_id = %self.id, index, action = %action.id(), "Dropped cancelled action before execution");
        }
    }

    /// Remove one finished action from the queue and deliver or advance.
    fn pop(&self, index: usize, outcome: std::result::Result<T, String>) {
        let delivery = {
            let mut st = self.state.lock();
            if !st.phase.is_running() {
                debug!(pool_id = %self.id, index, phase = ?st.phase, "Ignoring outcome for inactive pool");
                return;
            }
            let Some(action) = st.queue.remove(&index) else {
                debug!(pool_id = %self.id, index, "Ignoring outcome for action no longer queued");
                return;
            };
            action.detach();

            let accumulator = st.accumulator.get_or_insert_with(Results::new);
            let recorded = match outcome {
                Ok(output) => accumulator.put(action.id(), output),
                Err(message) => accumulator.put_failure(action.id(), message),
            };
            if !recorded {
                debug!(pool_id = %self.id, index, "No result entry recorded for action");
            }
            info!(
                pool_id = %self.id,
                index,
                action = %action.id(),
                remaining = st.queue.len(),
                "Removing action from pool"
            );

            if st.queue.is_empty() {
                st.phase = PoolPhase::Delivered;
                let results = st.accumulator.take().unwrap_or_default();
                info!(
                    pool_id = %self.id,
                    entries = results.len(),
                    failures = results.failed_ids().len(),
                    "Queue is empty; all actions are done executing"
                );
                self.env.emit(EventPayload::PoolDelivered {
                    pool_id: self.id,
                    entries: results.len(),
                    failures: results.failed_ids().len(),
                });
                self.deregister();

                st.delivered = Some(results.clone());
                let callback = st.on_done.take();
                st.callback_fired = callback.is_some();
                self.finished.notify_all();
                Some((callback, results))
            } else {
                st.phase = PoolPhase::Draining;
                if self.mode == Mode::Series {
                    self.start_head(&st);
                }
                None
            }
        };

        match delivery {
            Some((Some(callback), results)) => callback(results),
            Some((None, _)) => {
                debug!(pool_id = %self.id, "No completion callback yet; holding results");
            }
            None => {}
        }
    }

    fn cancel_pool(&self) {
        let mut st = self.state.lock();
        if st.phase.is_finished() {
            return;
        }
        let was_started = st.phase != PoolPhase::Prepared;
        let pending = std::mem::take(&mut st.queue);
        info!(pool_id = %self.id, pending = pending.len(), "Cancelling all actions");

        // Detach first so cancelled actions do not report back to this pool.
        for action in pending.values() {
            action.detach();
            action.cancel();
        }

        st.phase = PoolPhase::Cancelled;
        st.accumulator = None;
        st.on_done = None;
        self.env.emit(EventPayload::PoolCancelled {
            pool_id: self.id,
            pending: pending.len(),
        });
        if was_started {
            self.deregister();
        }
        self.finished.notify_all();
    }

    fn deregister(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.deregister(self.id);
        }
    }
}

impl<T> Drop for PoolCore<T> {
    fn drop(&mut self) {
        // A pool dropped before it ran must not keep its actions bound.
        for action in self.state.get_mut().queue.values() {
            action.detach();
        }
    }
}

impl<T> CompletionSink<T> for PoolCore<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn completed(&self, index: usize, output: T) {
        self.pop(index, Ok(output));
    }

    fn failed(&self, index: usize, message: String) {
        self.pop(index, Err(message));
    }

    fn cancelled(&self, index: usize) {
        self.withdraw(index);
    }
}

impl<T> ActivePool for PoolCore<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn id(&self) -> PoolId {
        self.id
    }

    fn cancel(&self) {
        self.cancel_pool();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionState;
    use crate::scheduler::Scheduler;
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;
    use tandem_core::config::Config;

    // -- Helpers --------------------------------------------------------------

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn scheduler() -> Scheduler {
        let mut config = Config::default();
        config.workers.max_threads = 8;
        Scheduler::new(&config).unwrap()
    }

    fn instant(id: &str, output: &'static str) -> Action<String> {
        Action::from_fn(id, move |_ctx| Ok(output.to_string()))
    }

    fn delayed(id: &str, millis: u64, output: &'static str) -> Action<String> {
        Action::from_fn(id, move |ctx| {
            ctx.sleep(Duration::from_millis(millis))?;
            Ok(output.to_string())
        })
    }

    // -- Tests ----------------------------------------------------------------

    #[test]
    fn mode_parses_and_rejects_unknown() {
        assert_eq!("parallel".parse::<Mode>().unwrap(), Mode::Parallel);
        assert_eq!(" Series ".parse::<Mode>().unwrap(), Mode::Series);
        assert_matches!("sideways".parse::<Mode>(), Err(Error::InvalidState(_)));
        assert_eq!(Mode::Series.to_string(), "series");
    }

    #[test]
    fn indices_follow_attach_order() {
        let scheduler = scheduler();
        let a = instant("a", "1");
        let b = instant("b", "2");
        let pool = scheduler
            .prepare(Mode::Parallel, vec![a.clone(), b.clone()])
            .unwrap();

        assert_eq!(pool.phase(), PoolPhase::Prepared);
        assert_eq!(a.index(), Some(0));
        assert_eq!(b.index(), Some(1));

        let c = instant("c", "3");
        pool.push(vec![c.clone()]).unwrap();
        assert_eq!(c.index(), Some(2));
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn empty_pool_cannot_execute() {
        let scheduler = scheduler();
        let pool = scheduler
            .prepare(Mode::Series, Vec::<Action<String>>::new())
            .unwrap();
        assert_matches!(pool.execute(), Err(Error::InvalidState(_)));
    }

    #[test]
    fn execute_twice_is_rejected() {
        let scheduler = scheduler();
        let pool = scheduler.parallel(vec![delayed("a", 50, "x")]).unwrap();
        assert_matches!(pool.execute(), Err(Error::InvalidState(_)));
        pool.wait().unwrap();
    }

    #[test]
    fn execute_after_cancel_is_rejected() {
        let scheduler = scheduler();
        let pool = scheduler
            .prepare(Mode::Parallel, vec![instant("a", "x")])
            .unwrap();
        pool.cancel();
        assert_eq!(pool.phase(), PoolPhase::Cancelled);
        assert_matches!(pool.execute(), Err(Error::InvalidState(_)));
    }

    #[test]
    fn action_in_two_pools_is_rejected() {
        let scheduler = scheduler();
        let shared = instant("shared", "x");
        let _first = scheduler
            .prepare(Mode::Series, vec![shared.clone()])
            .unwrap();

        let err = scheduler.parallel(vec![shared]).unwrap_err();
        assert!(err.to_string().contains("already in use"), "got: {err}");
    }

    #[test]
    fn failed_push_attaches_nothing() {
        let scheduler = scheduler();
        let pool = scheduler
            .prepare(Mode::Parallel, vec![instant("a", "x")])
            .unwrap();
        let fresh = instant("fresh", "y");
        let dup = instant("dup", "z");

        let err = pool.push(vec![fresh.clone(), dup.clone(), dup]).unwrap_err();
        assert_matches!(err, Error::InvalidState(_));
        assert_eq!(fresh.index(), None);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn pushed_before_execute_joins_initial_batch() {
        let scheduler = scheduler();
        let pool = scheduler
            .prepare(Mode::Series, vec![instant("one", "Hello")])
            .unwrap();
        pool.push(vec![instant("two", "World")]).unwrap();
        pool.execute().unwrap();

        let results = pool.wait().unwrap().unwrap();
        assert_eq!(results.get("one").map(String::as_str), Some("Hello"));
        assert_eq!(results.get("two").map(String::as_str), Some("World"));
    }

    #[test]
    fn push_into_finished_pool_is_rejected() {
        let scheduler = scheduler();
        let pool = scheduler.parallel(vec![instant("a", "x")]).unwrap();
        pool.wait().unwrap();

        assert_eq!(pool.phase(), PoolPhase::Delivered);
        assert_matches!(
            pool.push(vec![instant("late", "y")]),
            Err(Error::InvalidState(_))
        );
    }

    #[test]
    fn callback_set_after_delivery_fires_once() {
        let scheduler = scheduler();
        let pool = scheduler.parallel(vec![instant("a", "x")]).unwrap();
        pool.wait().unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();
        let counter = Arc::clone(&calls);
        pool.done(move |results| {
            counter.fetch_add(1, Ordering::SeqCst);
            tx.send(results.len()).unwrap();
        });
        assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), 1);

        let counter = Arc::clone(&calls);
        pool.done(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failure_is_recorded_and_pool_still_delivers() {
        let scheduler = scheduler();
        let bad: Action<String> =
            Action::from_fn("bad", |_ctx| Err(Error::task("bad", "no such file")));
        let pool = scheduler
            .series(vec![bad, instant("good", "ok")])
            .unwrap();

        let results = pool.wait().unwrap().unwrap();
        assert_eq!(results.ids(), vec!["good"]);
        assert!(results.failure("bad").unwrap().contains("no such file"));
    }

    #[test]
    fn cancelled_member_holds_back_parallel_delivery() {
        let scheduler = scheduler();
        let fired = Arc::new(AtomicUsize::new(0));
        let slow = delayed("slow", 30_000, "never");
        let quick = delayed("quick", 50, "ok");
        let pool = scheduler
            .parallel(vec![slow.clone(), quick.clone()])
            .unwrap();
        let counter = Arc::clone(&fired);
        pool.done(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        slow.cancel();
        assert_eq!(quick.wait(), ActionState::Completed);
        std::thread::sleep(Duration::from_millis(200));

        assert_eq!(pool.phase(), PoolPhase::Draining);
        assert_eq!(pool.len(), 1);
        assert_eq!(slow.index(), Some(0));
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        pool.cancel();
        assert!(pool.wait().unwrap().is_none());
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cancelled_queued_member_stalls_series() {
        let scheduler = scheduler();
        let first = delayed("first", 50, "1");
        let skipped = instant("skipped", "never");
        let last = instant("last", "3");
        let pool = scheduler
            .series(vec![first.clone(), skipped.clone(), last.clone()])
            .unwrap();

        skipped.cancel();
        assert_eq!(first.wait(), ActionState::Completed);
        std::thread::sleep(Duration::from_millis(200));

        assert_eq!(pool.phase(), PoolPhase::Draining);
        assert_eq!(pool.len(), 2);
        assert_eq!(skipped.state(), ActionState::Cancelled);
        assert_eq!(last.state(), ActionState::Idle);

        pool.cancel();
        assert!(pool.wait().unwrap().is_none());
        assert!(last.is_cancelled());
    }

    #[test]
    fn start_failure_is_recorded_as_failure() {
        let scheduler = scheduler();
        let pool = scheduler.parallel(vec![delayed("slow", 200, "ok")]).unwrap();

        // New runs are refused but the home thread keeps going.
        assert!(scheduler.env().close());
        pool.push(vec![instant("late", "never")]).unwrap();

        let results = pool.wait().unwrap().unwrap();
        assert_eq!(results.get("slow").map(String::as_str), Some("ok"));
        let failure = results.failure("late").unwrap();
        assert!(failure.contains("shut down"), "got: {failure}");
    }

    #[test]
    fn cancelled_before_execute_leaves_the_batch() {
        let scheduler = scheduler();
        let dropped = instant("dropped", "never");
        let pool = scheduler
            .prepare(Mode::Series, vec![dropped.clone(), instant("kept", "ok")])
            .unwrap();

        dropped.cancel();
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(pool.len(), 1);
        assert_eq!(dropped.index(), None);

        pool.execute().unwrap();
        let results = pool.wait().unwrap().unwrap();
        assert_eq!(results.ids(), vec!["kept"]);
    }

    #[test]
    fn dropped_pool_releases_its_actions() {
        let scheduler = scheduler();
        let a = instant("a", "x");
        let pool = scheduler.prepare(Mode::Series, vec![a.clone()]).unwrap();
        assert_eq!(a.index(), Some(0));

        drop(pool);
        assert_eq!(a.index(), None);
        a.execute(&scheduler).unwrap();
        assert_eq!(a.wait(), ActionState::Completed);
    }

    #[test]
    fn wait_on_prepared_pool_is_rejected() {
        let scheduler = scheduler();
        let pool = scheduler
            .prepare(Mode::Parallel, vec![instant("a", "x")])
            .unwrap();
        assert_matches!(pool.wait(), Err(Error::InvalidState(_)));
    }

    #[test]
    fn wait_on_home_context_is_rejected() {
        let scheduler = scheduler();
        let pool = scheduler.parallel(vec![delayed("a", 200, "x")]).unwrap();
        let (tx, rx) = mpsc::channel();

        let inner = pool.clone();
        pool.done(move |_| {
            let waited = inner.wait();
            tx.send(matches!(waited, Err(Error::InvalidState(_)))).unwrap();
        });
        assert!(rx.recv_timeout(TIMEOUT).unwrap());
    }

    #[test]
    fn detached_after_delivery() {
        let scheduler = scheduler();
        let a = instant("a", "x");
        let pool = scheduler.parallel(vec![a.clone()]).unwrap();
        pool.wait().unwrap();

        assert_eq!(a.index(), None);
        assert!(a.is_done());
        // Free to join another pool now.
        let again = scheduler.parallel(vec![a]).unwrap();
        assert_eq!(again.wait().unwrap().unwrap().len(), 1);
    }
}
