//! The home context: a single serialized dispatcher.
//!
//! Every completion hook, pool reaction and completion callback runs on the
//! home context, one job at a time, in the order the jobs were posted. That
//! serialization is what protects pool bookkeeping from concurrent mutation.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle, ThreadId};

use parking_lot::Mutex;
use tandem_core::Result;
use tokio::sync::mpsc;
use tracing::{debug, error};

/// A deferred unit of work for the home context.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// A serialized, in-order executor for [`Job`]s.
///
/// The scheduler ships with [`HomeThread`]; applications with their own event
/// loop can implement this to receive completions there instead.
pub trait Dispatch: Send + Sync {
    /// Queue `job` behind every previously posted job.
    ///
    /// Returns `false` if the dispatcher has stopped and the job was dropped.
    fn post(&self, job: Job) -> bool;

    /// Whether the calling thread is the one running posted jobs.
    fn is_current(&self) -> bool;
}

/// Dedicated thread draining a FIFO channel of jobs.
pub struct HomeThread {
    tx: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
}

impl HomeThread {
    /// Spawn the home thread under the given name.
    pub fn spawn(name: impl Into<String>) -> Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

        let handle = thread::Builder::new().name(name.into()).spawn(move || {
            debug!("Home dispatcher started");
            while let Some(job) = rx.blocking_recv() {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
                    error!(
                        panic = %panic_message(payload.as_ref()),
                        "Home job panicked; continuing with next job"
                    );
                }
            }
            debug!("Home dispatcher stopped (channel closed)");
        })?;

        Ok(Self {
            thread_id: handle.thread().id(),
            tx: Mutex::new(Some(tx)),
            thread: Mutex::new(Some(handle)),
        })
    }

    /// Stop accepting jobs, run the ones already queued, and join the thread.
    ///
    /// Safe to call more than once. When called from the home thread itself
    /// the join is skipped.
    pub fn shutdown(&self) {
        drop(self.tx.lock().take());

        let Some(handle) = self.thread.lock().take() else {
            return;
        };
        if self.is_current() {
            return;
        }
        if handle.join().is_err() {
            error!("Home dispatcher thread terminated abnormally");
        }
    }
}

impl Dispatch for HomeThread {
    fn post(&self, job: Job) -> bool {
        match self.tx.lock().as_ref() {
            Some(tx) => tx.send(job).is_ok(),
            None => false,
        }
    }

    fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }
}

impl Drop for HomeThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for HomeThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HomeThread")
            .field("thread_id", &self.thread_id)
            .field("running", &self.tx.lock().is_some())
            .finish()
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc as std_mpsc;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn jobs_run_in_post_order_on_one_thread() {
        let home = HomeThread::spawn("test-home").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done_rx) = std_mpsc::channel();

        for i in 0..20 {
            let seen = Arc::clone(&seen);
            assert!(home.post(Box::new(move || {
                let name = thread::current().name().map(str::to_owned);
                seen.lock().push((i, name));
            })));
        }
        home.post(Box::new(move || done_tx.send(()).unwrap()));
        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let seen = seen.lock();
        let order: Vec<_> = seen.iter().map(|(i, _)| *i).collect();
        assert_eq!(order, (0..20).collect::<Vec<_>>());
        assert!(seen
            .iter()
            .all(|(_, name)| name.as_deref() == Some("test-home")));
    }

    #[test]
    fn panicking_job_does_not_stop_the_loop() {
        let home = HomeThread::spawn("test-home-panic").unwrap();
        let (tx, rx) = std_mpsc::channel();

        home.post(Box::new(|| panic!("boom")));
        home.post(Box::new(move || tx.send(42).unwrap()));

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
    }

    #[test]
    fn is_current_only_on_home_thread() {
        let home = Arc::new(HomeThread::spawn("test-home-current").unwrap());
        assert!(!home.is_current());

        let (tx, rx) = std_mpsc::channel();
        let inner = Arc::clone(&home);
        home.post(Box::new(move || tx.send(inner.is_current()).unwrap()));
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
    }

    #[test]
    fn post_after_shutdown_is_rejected() {
        let home = HomeThread::spawn("test-home-shutdown").unwrap();
        home.shutdown();
        assert!(!home.post(Box::new(|| {})));
        // Second shutdown is a no-op.
        home.shutdown();
    }

    #[test]
    fn shutdown_drains_queued_jobs() {
        let home = HomeThread::spawn("test-home-drain").unwrap();
        let count = Arc::new(Mutex::new(0));
        for _ in 0..5 {
            let count = Arc::clone(&count);
            home.post(Box::new(move || {
                thread::sleep(Duration::from_millis(5));
                *count.lock() += 1;
            }));
        }
        home.shutdown();
        assert_eq!(*count.lock(), 5);
    }

    #[test]
    fn panic_message_extracts_text() {
        let payload: Box<dyn Any + Send> = Box::new("static str");
        assert_eq!(panic_message(payload.as_ref()), "static str");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic payload");
    }
}
