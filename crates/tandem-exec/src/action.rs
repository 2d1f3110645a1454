//! [`Action`]: a [`Task`] wrapped in a thread-safe lifecycle.
//!
//! An action moves `Idle → Running → Completed | Cancelled | Failed`. Runs are
//! submitted to the scheduler's worker threads; outcomes are handed back to
//! the home context, where [`Task::on_done`] runs and the owning pool (if any)
//! is notified. A cancelled run never reaches `on_done`, and a running pool
//! treats it as still pending.
//!
//! Cancellation is monotonic: once an action is cancelled, the outcome of the
//! run that was in flight is discarded. Each run carries a generation number
//! so that late outcomes from earlier runs can never overwrite newer state.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::{Condvar, Mutex};
use tandem_core::events::{EventBus, EventPayload};
use tandem_core::{Error, PoolId, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::context::TaskContext;
use crate::dispatch::{panic_message, Dispatch};
use crate::env::ExecEnv;
use crate::scheduler::Scheduler;
use crate::task::{FnTask, Task};

/// Lifecycle state of an [`Action`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionState {
    /// Not running; never run or reset.
    Idle,
    /// The task body is executing on a worker thread.
    Running,
    /// The last run returned a value.
    Completed,
    /// The action was cancelled; any in-flight outcome is discarded.
    Cancelled,
    /// The last run returned an error or panicked.
    Failed(String),
}

impl ActionState {
    /// Whether the state ends a run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ActionState::Completed | ActionState::Cancelled | ActionState::Failed(_)
        )
    }
}

/// Receiver of an attached action's outcomes.
///
/// Every method is invoked on the home context.
pub(crate) trait CompletionSink<T>: Send + Sync {
    fn completed(&self, index: usize, output: T);
    fn failed(&self, index: usize, message: String);
    fn cancelled(&self, index: usize);
}

/// Binding between an action and the pool that owns it.
///
/// Only valid while attached; the pool is reachable solely through the weak
/// sink, never through a strong back-reference.
pub(crate) struct Attachment<T> {
    pub(crate) pool_id: PoolId,
    pub(crate) index: usize,
    pub(crate) sink: Weak<dyn CompletionSink<T>>,
    pub(crate) home: Arc<dyn Dispatch>,
}

impl<T> Clone for Attachment<T> {
    fn clone(&self) -> Self {
        Self {
            pool_id: self.pool_id,
            index: self.index,
            sink: Weak::clone(&self.sink),
            home: Arc::clone(&self.home),
        }
    }
}

/// How a run ended, as carried to the home context.
enum Outcome<T> {
    Completed(T),
    Cancelled,
    Failed(String),
}

struct Slot<T> {
    state: ActionState,
    result: Option<T>,
    attachment: Option<Attachment<T>>,
    cancellation: CancellationToken,
    generation: u64,
    events: Option<Arc<EventBus>>,
}

impl<T> Slot<T> {
    /// Give the next run a live token if the previous one was cancelled.
    fn refresh_token(&mut self) {
        if self.cancellation.is_cancelled() {
            self.cancellation = CancellationToken::new();
        }
    }
}

struct Shared<T> {
    task: Box<dyn Task<Output = T>>,
    slot: Mutex<Slot<T>>,
    settled: Condvar,
}

/// A cancellable unit of work with an identity and a lifecycle.
///
/// `Action` is a cheap handle: clones refer to the same underlying state, so
/// a caller can keep one clone to observe the action while a pool drives
/// another.
pub struct Action<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Action<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Action<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Wrap a task in a new idle action.
    pub fn new(task: impl Task<Output = T>) -> Self {
        Self {
            shared: Arc::new(Shared {
                task: Box::new(task),
                slot: Mutex::new(Slot {
                    state: ActionState::Idle,
                    result: None,
                    attachment: None,
                    cancellation: CancellationToken::new(),
                    generation: 0,
                    events: None,
                }),
                settled: Condvar::new(),
            }),
        }
    }

    /// Build an action from an identity and a closure body.
    pub fn from_fn<F>(id: impl Into<String>, body: F) -> Self
    where
        F: Fn(&TaskContext) -> Result<T> + Send + Sync + 'static,
    {
        Self::new(FnTask::new(id, body))
    }

    pub fn id(&self) -> &str {
        self.shared.task.id()
    }

    /// Index assigned by the owning pool, `None` when detached.
    pub fn index(&self) -> Option<usize> {
        self.shared.slot.lock().attachment.as_ref().map(|a| a.index)
    }

    pub fn state(&self) -> ActionState {
        self.shared.slot.lock().state.clone()
    }

    pub fn is_executing(&self) -> bool {
        self.shared.slot.lock().state == ActionState::Running
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.slot.lock().state == ActionState::Cancelled
    }

    /// Whether the last run completed successfully.
    pub fn is_done(&self) -> bool {
        self.shared.slot.lock().state == ActionState::Completed
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.shared.slot.lock().state, ActionState::Failed(_))
    }

    /// Value of the last successful run. Absent after cancellation.
    pub fn result(&self) -> Option<T> {
        self.shared.slot.lock().result.clone()
    }

    /// Run this action on its own, outside any pool.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] if the action is already running or belongs to
    /// a pool (the pool decides when it runs); [`Error::ShutDown`] if the
    /// scheduler has been shut down.
    pub fn execute(&self, scheduler: &Scheduler) -> Result<()> {
        if let Some(pool_id) = self.pool_id() {
            return Err(Error::invalid_state(format!(
                "action '{}' belongs to pool {pool_id}; the pool starts it",
                self.id()
            )));
        }
        self.start(scheduler.env())
    }

    /// Request cancellation.
    ///
    /// Cancels the token of the in-flight run (if any) and marks the action
    /// cancelled. Safe to call in any state, and more than once.
    ///
    /// An owning pool that is already running is not advanced: the action
    /// records no result and a series stops at it until the pool is cancelled.
    pub fn cancel(&self) {
        let (was_running, generation, attachment, events) = {
            let mut slot = self.shared.slot.lock();
            if slot.state == ActionState::Cancelled {
                return;
            }
            let was_running = slot.state == ActionState::Running;
            slot.cancellation.cancel();
            slot.state = ActionState::Cancelled;
            slot.result = None;
            self.shared.settled.notify_all();
            (
                was_running,
                slot.generation,
                slot.attachment.clone(),
                slot.events.clone(),
            )
        };

        let pool_id = attachment.as_ref().map(|a| a.pool_id);
        let index = attachment.as_ref().map(|a| a.index);
        info!(action = %self.id(), ?index, was_running, "Action was cancelled");

        if was_running {
            if let Some(events) = events {
                events.broadcast(EventPayload::ActionCancelled {
                    pool_id,
                    index,
                    action: self.id().to_owned(),
                });
            }
        }

        // A pool that has not started yet drops the action from its batch.
        if let Some(attachment) = attachment {
            self.deliver(&attachment.home, generation, Outcome::Cancelled);
        }
    }

    /// Return a non-running action to [`ActionState::Idle`], clearing its result.
    pub fn reset(&self) -> Result<()> {
        let mut slot = self.shared.slot.lock();
        if slot.state == ActionState::Running {
            return Err(Error::invalid_state(format!(
                "action '{}' is running and cannot be reset",
                self.id()
            )));
        }
        slot.state = ActionState::Idle;
        slot.result = None;
        slot.refresh_token();
        Ok(())
    }

    /// Block until the action is no longer running and return its state.
    ///
    /// Returns as soon as the worker records the outcome; the `on_done` hook
    /// may still be pending on the home context.
    pub fn wait(&self) -> ActionState {
        let mut slot = self.shared.slot.lock();
        while slot.state == ActionState::Running {
            self.shared.settled.wait(&mut slot);
        }
        slot.state.clone()
    }

    // -- Crate-internal -------------------------------------------------------

    pub(crate) fn same(&self, other: &Action<T>) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    pub(crate) fn pool_id(&self) -> Option<PoolId> {
        self.shared
            .slot
            .lock()
            .attachment
            .as_ref()
            .map(|a| a.pool_id)
    }

    /// Bind to a pool. Clears the outcome of any earlier run.
    pub(crate) fn attach(&self, attachment: Attachment<T>) -> Result<()> {
        let mut slot = self.shared.slot.lock();
        if let Some(existing) = &slot.attachment {
            return Err(Error::invalid_state(format!(
                "action '{}' is already in use by pool {}",
                self.id(),
                existing.pool_id
            )));
        }
        if slot.state == ActionState::Running {
            return Err(Error::invalid_state(format!(
                "action '{}' is running and cannot join a pool",
                self.id()
            )));
        }
        slot.state = ActionState::Idle;
        slot.result = None;
        slot.refresh_token();
        slot.attachment = Some(attachment);
        Ok(())
    }

    /// Submit a run to the worker threads.
    pub(crate) fn start(&self, env: &Arc<ExecEnv>) -> Result<()> {
        if env.is_closed() {
            return Err(Error::ShutDown);
        }

        let (generation, ctx, pool_id) = {
            let mut slot = self.shared.slot.lock();
            if slot.state == ActionState::Running {
                return Err(Error::invalid_state(format!(
                    "action '{}' is already running",
                    self.id()
                )));
            }
            slot.refresh_token();
            slot.generation += 1;
            slot.state = ActionState::Running;
            slot.result = None;
            slot.events = Some(Arc::clone(env.events()));
            let ctx = TaskContext::new(
                self.id().to_owned(),
                slot.attachment.as_ref().map(|a| a.index),
                slot.cancellation.clone(),
                env.workers.clone(),
            );
            (
                slot.generation,
                ctx,
                slot.attachment.as_ref().map(|a| a.pool_id),
            )
        };

        info!(action = %self.id(), index = ?ctx.index(), "Executing action");
        env.emit(EventPayload::ActionStarted {
            pool_id,
            index: ctx.index(),
            action: self.id().to_owned(),
        });

        let action = self.clone();
        let run_env = Arc::clone(env);
        env.workers.spawn_blocking(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| action.shared.task.run(&ctx)));
            action.finish(&run_env, generation, &ctx, outcome);
        });
        Ok(())
    }

    /// Record a run's outcome on the worker thread and hand it to the home
    /// context.
    fn finish(
        &self,
        env: &ExecEnv,
        generation: u64,
        ctx: &TaskContext,
        outcome: std::thread::Result<Result<T>>,
    ) {
        let outcome = if ctx.is_cancelled() {
            Outcome::Cancelled
        } else {
            match outcome {
                Ok(Ok(output)) => Outcome::Completed(output),
                Ok(Err(e)) if e.is_cancelled() => Outcome::Cancelled,
                Ok(Err(e)) => Outcome::Failed(e.to_string()),
                Err(payload) => Outcome::Failed(format!(
                    "task panicked: {}",
                    panic_message(payload.as_ref())
                )),
            }
        };

        let attachment = {
            let mut slot = self.shared.slot.lock();
            if slot.generation != generation || slot.state != ActionState::Running {
                debug!(action = %self.id(), "Discarding outcome of a cancelled or superseded run");
                return;
            }
            slot.state = match &outcome {
                Outcome::Completed(output) => {
                    slot.result = Some(output.clone());
                    ActionState::Completed
                }
                Outcome::Cancelled => ActionState::Cancelled,
                Outcome::Failed(message) => ActionState::Failed(message.clone()),
            };
            self.shared.settled.notify_all();
            slot.attachment.clone()
        };

        let pool_id = attachment.as_ref().map(|a| a.pool_id);
        let index = attachment.as_ref().map(|a| a.index);
        let action = self.id().to_owned();
        match &outcome {
            Outcome::Completed(_) => {
                debug!(action = %action, ?index, "Action finished executing");
                env.emit(EventPayload::ActionCompleted {
                    pool_id,
                    index,
                    action,
                });
            }
            Outcome::Cancelled => {
                info!(action = %action, ?index, "Action was cancelled");
                env.emit(EventPayload::ActionCancelled {
                    pool_id,
                    index,
                    action,
                });
            }
            Outcome::Failed(message) => {
                warn!(action = %action, ?index, error = %message, "Action failed");
                env.emit(EventPayload::ActionFailed {
                    pool_id,
                    index,
                    action,
                    error: message.clone(),
                });
            }
        }

        // Pool-bound actions go through the pool's dispatcher.
        let home = match &attachment {
            Some(attachment) => Arc::clone(&attachment.home),
            None => Arc::clone(&env.home),
        };
        self.deliver(&home, generation, outcome);
    }

    fn deliver(&self, home: &Arc<dyn Dispatch>, generation: u64, outcome: Outcome<T>) {
        let action = self.clone();
        let posted = home.post(Box::new(move || action.settle_on_home(generation, outcome)));
        if !posted {
            debug!(action = %self.id(), "Home context has stopped; dropping notification");
        }
    }

    /// Home-context half of an outcome: run the hook and notify the pool,
    /// unless the state moved on since the outcome was posted.
    fn settle_on_home(&self, generation: u64, outcome: Outcome<T>) {
        let attachment = {
            let slot = self.shared.slot.lock();
            if slot.generation != generation {
                return;
            }
            let current = matches!(
                (&outcome, &slot.state),
                (Outcome::Completed(_), ActionState::Completed)
                    | (Outcome::Cancelled, ActionState::Cancelled)
                    | (Outcome::Failed(_), ActionState::Failed(_))
            );
            if !current {
                return;
            }
            slot.attachment.clone()
        };
        let sink = attachment.and_then(|a| a.sink.upgrade().map(|sink| (a.index, sink)));

        match outcome {
            Outcome::Completed(output) => {
                let hook = panic::catch_unwind(AssertUnwindSafe(|| {
                    self.shared.task.on_done(&output)
                }));
                if let Err(payload) = hook {
                    error!(
                        action = %self.id(),
                        panic = %panic_message(payload.as_ref()),
                        "on_done hook panicked"
                    );
                }
                if let Some((index, sink)) = sink {
                    sink.completed(index, output);
                }
            }
            Outcome::Failed(message) => {
                if let Some((index, sink)) = sink {
                    sink.failed(index, message);
                }
            }
            Outcome::Cancelled => {
                if let Some((index, sink)) = sink {
                    sink.cancelled(index);
                }
            }
        }
    }
}

impl<T> Action<T> {
    /// Unbind from the owning pool. Always succeeds; the last outcome stays
    /// observable.
    pub(crate) fn detach(&self) {
        let mut slot = self.shared.slot.lock();
        slot.attachment = None;
        if slot.state != ActionState::Running {
            slot.refresh_token();
        }
    }
}

impl<T> fmt::Debug for Action<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.shared.slot.lock();
        f.debug_struct("Action")
            .field("id", &self.shared.task.id())
            .field("state", &slot.state)
            .field("index", &slot.attachment.as_ref().map(|a| a.index))
            .finish_non_exhaustive()
    }
}
