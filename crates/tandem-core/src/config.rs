//! Scheduler configuration types.
//!
//! The top-level [`Config`] is deserialized by the caller (the `tandem` binary
//! reads it from TOML) and carries the worker, home-thread and event settings.
//! Every section defaults sensibly so an empty document is valid.

use serde::{Deserialize, Serialize};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root scheduler configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub workers: WorkerConfig,
    pub home: HomeConfig,
    pub events: EventConfig,
}

impl Config {
    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.workers.max_threads == 0 {
            warnings.push("workers.max_threads is 0; one worker thread will be used".into());
        }

        if self.workers.thread_name.is_empty() {
            warnings.push("workers.thread_name is empty".into());
        }

        if self.home.thread_name.is_empty() {
            warnings.push("home.thread_name is empty".into());
        }

        if self.events.capacity == 0 {
            warnings.push("events.capacity is 0; a capacity of 1 will be used".into());
        }

        if self.events.recent > MAX_RECENT_EVENTS {
            warnings.push(format!(
                "events.recent {} exceeds the maximum of {MAX_RECENT_EVENTS}",
                self.events.recent
            ));
        }

        warnings
    }

    /// Log every validation warning and return how many there were.
    pub fn log_warnings(&self) -> usize {
        let warnings = self.validate();
        for warning in &warnings {
            tracing::warn!("Config: {warning}");
        }
        warnings.len()
    }
}

/// Upper bound on the number of events kept for late subscribers.
pub const MAX_RECENT_EVENTS: usize = 10_000;

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Bounded worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Maximum number of threads running task bodies at once.
    pub max_threads: usize,
    pub thread_name: String,
    /// How long shutdown waits for in-flight runs after cancelling them.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_ms: u64,
}

fn default_shutdown_grace() -> u64 {
    500
}

impl WorkerConfig {
    /// Thread bound actually applied to the runtime (never zero).
    pub fn effective_max_threads(&self) -> usize {
        self.max_threads.max(1)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_threads: num_cpus::get(),
            thread_name: "tandem-worker".into(),
            shutdown_grace_ms: default_shutdown_grace(),
        }
    }
}

/// Home dispatcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HomeConfig {
    pub thread_name: String,
}

impl Default for HomeConfig {
    fn default() -> Self {
        Self {
            thread_name: "tandem-home".into(),
        }
    }
}

/// Lifecycle event bus settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    /// Broadcast channel buffer size.
    pub capacity: usize,
    /// Number of recent events retained for late subscribers.
    pub recent: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            recent: 100,
        }
    }
}
