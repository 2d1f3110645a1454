//! Shared execution environment threaded through actions and pools.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tandem_core::events::{EventBus, EventPayload};
use tokio::runtime::Handle;

use crate::dispatch::Dispatch;

/// Where runs execute, where completions are delivered, and where lifecycle
/// events go. Owned by a [`Scheduler`](crate::Scheduler).
pub(crate) struct ExecEnv {
    pub(crate) workers: Handle,
    pub(crate) home: Arc<dyn Dispatch>,
    events: Arc<EventBus>,
    closed: AtomicBool,
}

impl ExecEnv {
    pub(crate) fn new(workers: Handle, home: Arc<dyn Dispatch>, events: Arc<EventBus>) -> Self {
        Self {
            workers,
            home,
            events,
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub(crate) fn emit(&self, payload: EventPayload) {
        self.events.broadcast(payload);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Mark the environment closed. Returns `true` for the first caller only.
    pub(crate) fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }
}
