//! Lifecycle event system for diagnostics.
//!
//! [`EventBus`] wraps a `tokio::sync::broadcast` channel with a bounded
//! ring-buffer of recent events so that late subscribers can catch up. Events
//! are advisory: nothing in the scheduler depends on them being received.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::broadcast;

use crate::config::EventConfig;
use crate::ids::{EventId, PoolId};

// ---------------------------------------------------------------------------
// EventPayload
// ---------------------------------------------------------------------------

/// Payload describing what happened.
///
/// Action events carry `pool_id: None` when the action was executed on its
/// own rather than by a pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    // -- Pool lifecycle ------------------------------------------------------
    PoolPrepared {
        pool_id: PoolId,
        mode: String,
        actions: usize,
    },
    PoolStarted {
        pool_id: PoolId,
        mode: String,
    },
    PoolDelivered {
        pool_id: PoolId,
        entries: usize,
        failures: usize,
    },
    PoolCancelled {
        pool_id: PoolId,
        pending: usize,
    },

    // -- Action lifecycle ----------------------------------------------------
    ActionStarted {
        pool_id: Option<PoolId>,
        index: Option<usize>,
        action: String,
    },
    ActionCompleted {
        pool_id: Option<PoolId>,
        index: Option<usize>,
        action: String,
    },
    ActionCancelled {
        pool_id: Option<PoolId>,
        index: Option<usize>,
        action: String,
    },
    ActionFailed {
        pool_id: Option<PoolId>,
        index: Option<usize>,
        action: String,
        error: String,
    },
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// A timestamped event ready for broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique event identifier.
    pub id: EventId,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// What happened.
    pub payload: EventPayload,
}

impl Event {
    /// Create a new event with a fresh ID and the current timestamp.
    pub fn new(payload: EventPayload) -> Self {
        Self {
            id: EventId::new(),
            timestamp: Utc::now(),
            payload,
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Broadcast channel with a bounded ring buffer of recent events.
pub struct EventBus {
    tx: broadcast::Sender<Event>,
    recent: RwLock<VecDeque<Event>>,
    max_recent: usize,
}

impl EventBus {
    /// Create a new event bus.
    ///
    /// `capacity` is the broadcast buffer size; `max_recent` bounds the ring
    /// buffer served by [`recent_events`](Self::recent_events).
    pub fn new(capacity: usize, max_recent: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            recent: RwLock::new(VecDeque::with_capacity(max_recent)),
            max_recent,
        }
    }

    /// Create a bus sized from configuration.
    pub fn from_config(config: &EventConfig) -> Self {
        Self::new(
            config.capacity,
            config.recent.min(crate::config::MAX_RECENT_EVENTS),
        )
    }

    /// Subscribe to the broadcast channel.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Broadcast an event to all current subscribers and store it in the
    /// ring buffer.
    pub fn broadcast(&self, payload: EventPayload) {
        let event = Event::new(payload);

        if self.max_recent > 0 {
            let mut recent = self.recent.write();
            if recent.len() >= self.max_recent {
                recent.pop_back();
            }
            recent.push_front(event.clone());
        }

        if self.tx.send(event).is_err() {
            tracing::trace!("No event subscribers");
        }
    }

    /// Return the `n` most recent events (newest first).
    pub fn recent_events(&self, n: usize) -> Vec<Event> {
        let recent = self.recent.read();
        recent.iter().take(n).cloned().collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::from_config(&EventConfig::default())
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.tx.receiver_count())
            .field("max_recent", &self.max_recent)
            .finish_non_exhaustive()
    }
}
