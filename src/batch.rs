//! Demo batches: TOML or command-line descriptions of sleeping tasks, and a
//! runner that drives them through a [`Scheduler`].

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::sync::mpsc;
use std::time::Duration;
use tandem_core::Error;
use tandem_exec::{Action, Mode, Results, Scheduler, Task, TaskContext};

/// Value that makes a demo task fail instead of returning.
pub const FAIL_MARKER: &str = "!fail";

/// One demo task: wait `delay_ms`, then return `value`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: String,
    #[serde(default)]
    pub delay_ms: u64,
    #[serde(default)]
    pub value: String,
}

impl FromStr for TaskSpec {
    type Err = Error;

    /// Parse `id:delay_ms:value`. The value may itself contain colons.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let id = parts.next().unwrap_or_default();
        let (Some(delay), Some(value)) = (parts.next(), parts.next()) else {
            return Err(Error::Validation(format!(
                "invalid task '{s}': expected id:delay_ms:value"
            )));
        };
        let delay_ms = delay.trim().parse().map_err(|_| {
            Error::Validation(format!("invalid delay '{delay}' in task '{s}'"))
        })?;
        Ok(Self {
            id: id.to_string(),
            delay_ms,
            value: value.to_string(),
        })
    }
}

/// A batch description as found in a batch file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Batch {
    pub mode: String,
    pub tasks: Vec<TaskSpec>,
    /// Tasks pushed into the pool once it is running.
    pub push: Vec<TaskSpec>,
}

impl Default for Batch {
    fn default() -> Self {
        Self {
            mode: Mode::Parallel.to_string(),
            tasks: Vec::new(),
            push: Vec::new(),
        }
    }
}

impl Batch {
    pub fn mode(&self) -> Result<Mode> {
        Ok(self.mode.parse()?)
    }
}

/// Load a batch from a TOML file.
pub fn load_batch(path: &Path) -> Result<Batch> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read batch file: {:?}", path))?;
    let batch: Batch = toml::from_str(&content)
        .with_context(|| format!("Failed to parse batch file: {:?}", path))?;
    batch.mode()?;
    Ok(batch)
}

/// Task that sleeps (interruptibly) and then returns its configured value.
#[derive(Debug, Clone)]
pub struct DemoTask {
    spec: TaskSpec,
}

impl DemoTask {
    pub fn new(spec: TaskSpec) -> Self {
        Self { spec }
    }

    pub fn action(spec: &TaskSpec) -> Action<String> {
        Action::new(Self::new(spec.clone()))
    }
}

impl Task for DemoTask {
    type Output = String;

    fn id(&self) -> &str {
        &self.spec.id
    }

    fn run(&self, ctx: &TaskContext) -> tandem_core::Result<String> {
        ctx.sleep(Duration::from_millis(self.spec.delay_ms))?;
        if self.spec.value == FAIL_MARKER {
            return Err(Error::task(&self.spec.id, "demo task asked to fail"));
        }
        Ok(self.spec.value.clone())
    }

    fn on_done(&self, output: &String) {
        tracing::debug!(task = %self.spec.id, %output, "Demo task done");
    }
}

/// Run `batch` to completion on `scheduler`.
///
/// Returns `None` if the pool was cancelled, either by `cancel_after`
/// elapsing or by something else cancelling it.
pub fn run_batch(
    scheduler: &Scheduler,
    batch: &Batch,
    cancel_after: Option<Duration>,
) -> Result<Option<Results<String>>> {
    let mode = batch.mode()?;
    let actions: Vec<Action<String>> = batch.tasks.iter().map(DemoTask::action).collect();
    let pool = scheduler.prepare(mode, actions)?;
    pool.done(|results| {
        tracing::info!(
            values = results.len(),
            failures = results.failed_ids().len(),
            "Batch delivered"
        );
    });
    pool.execute()?;

    if !batch.push.is_empty() {
        match pool.push(batch.push.iter().map(DemoTask::action)) {
            Ok(()) => {}
            Err(e) if pool.phase().is_finished() => {
                tracing::warn!("Pool finished before pushed tasks could join: {}", e);
            }
            Err(e) => return Err(e.into()),
        }
    }

    let Some(limit) = cancel_after else {
        return Ok(pool.wait()?);
    };

    let (finished_tx, finished_rx) = mpsc::channel::<()>();
    let outcome = std::thread::scope(|scope| {
        scope.spawn(move || {
            if let Err(mpsc::RecvTimeoutError::Timeout) = finished_rx.recv_timeout(limit) {
                let cancelled = scheduler.cancel_all();
                tracing::info!(cancelled, "Cancel deadline reached");
            }
        });
        let outcome = pool.wait();
        drop(finished_tx);
        outcome
    });
    Ok(outcome?)
}
