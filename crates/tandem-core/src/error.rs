//! Unified error type for tandem.
//!
//! Scheduling misuse surfaces synchronously as [`Error::InvalidState`];
//! cancellation is modelled as [`Error::Cancelled`] only so that task bodies
//! can bail out with `?`. The scheduler never reports it to callers as a
//! failure.

/// Unified error type covering all failure modes in tandem.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An operation was attempted in a state that does not allow it.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The work observed its cancellation token and stopped.
    #[error("Cancelled")]
    Cancelled,

    /// A task's work function failed.
    #[error("Task error [{id}]: {message}")]
    Task {
        /// Identity of the task that failed.
        id: String,
        /// Human-readable error description.
        message: String,
    },

    /// The scheduler has been shut down and accepts no more work.
    #[error("Scheduler is shut down")]
    ShutDown,

    /// Configuration or input failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },
}

impl Error {
    /// Convenience constructor for [`Error::InvalidState`].
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Error::InvalidState(message.into())
    }

    /// Convenience constructor for [`Error::Task`].
    pub fn task(id: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Task {
            id: id.into(),
            message: message.into(),
        }
    }

    /// Whether this error means the work was cancelled rather than failed.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
