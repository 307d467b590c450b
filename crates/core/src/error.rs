//! Error types for testkit
//!
//! This module defines all error types used throughout the toolkit.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! Every failure raised by a hook, a policy or a harness is fatal to the test
//! under execution. The messages of [`Error::ShutdownFailed`],
//! [`Error::ThreadLeak`] and [`Error::Configuration`] are asserted verbatim by
//! golden-output tests, so their wording is part of the contract.

use crate::types::LeakedThread;
use std::any::Any;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for testkit operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for testkit
#[derive(Debug, Error)]
pub enum Error {
    /// An extension or check was registered at the wrong scope, or a hook ran
    /// in a context that lacks the data it requires
    #[error("{0}")]
    Configuration(String),

    /// Graceful and forced shutdown both exhausted their timeout
    #[error("Failed to shutdown {name}")]
    ShutdownFailed {
        /// Name of the executor that did not terminate
        name: String,
    },

    /// The calling thread was interrupted while awaiting executor termination
    #[error("Failed to shutdown {name}: interrupted while awaiting termination")]
    InterruptedDuringShutdown {
        /// Name of the executor being shut down
        name: String,
    },

    /// The current thread observed an interruption request
    #[error("interrupted")]
    Interrupted,

    /// A submitted task failed or panicked
    #[error("Task '{task}' failed: {source}")]
    TaskFailed {
        /// Label of the failed task
        task: String,
        /// The failure produced by the task
        #[source]
        source: Arc<Error>,
    },

    /// A queued task was dropped by its executor before it started
    #[error("Task '{task}' was abandoned before it started")]
    TaskAbandoned {
        /// Label of the abandoned task
        task: String,
    },

    /// The value of a future was already taken by an earlier `get`
    #[error("Result of task '{task}' was already consumed")]
    ResultConsumed {
        /// Label of the task
        task: String,
    },

    /// The executor no longer accepts submissions
    #[error("Task rejected: '{0}' is shut down")]
    Rejected(String),

    /// Another party broke the barrier (timeout, interruption or reset)
    #[error("Barrier is broken")]
    BrokenBarrier,

    /// Waiting on the barrier exceeded the timeout; the barrier is now broken
    #[error("Barrier wait timed out after {0:?}")]
    BarrierTimeout(Duration),

    /// Threads started during a test class survived the grace period
    #[error(
        "Potential thread leak detected. Running threads after test that did not exist before: {}",
        format_leaked_threads(.0)
    )]
    ThreadLeak(Vec<LeakedThread>),

    /// Lifecycle callback methods redeclared without their marker
    #[error("Misused lifecycle callback methods: \n{}", .0.join("\n"))]
    Misuse(Vec<String>),

    /// A test body or lifecycle callback panicked or failed an assertion
    #[error("{0}")]
    TestFailed(String),

    /// An argument was outside of the accepted domain
    #[error("{0}")]
    InvalidArgument(String),

    /// The requested operation is not supported
    #[error("{0}")]
    Unsupported(String),

    /// Database access failed
    #[error("Database error: {0}")]
    Database(String),

    /// I/O error (thread spawning, config files)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration file could not be parsed or is invalid
    #[error("Config error: {0}")]
    Config(String),
}

impl Error {
    /// Builds a [`Error::TestFailed`] from a caught panic payload.
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        Error::TestFailed(panic_message(payload))
    }

    /// Wraps a task failure, keeping the original error as the source.
    pub fn task_failed(task: impl Into<String>, source: Arc<Error>) -> Self {
        Error::TaskFailed {
            task: task.into(),
            source,
        }
    }

    /// Returns `true` if this error, or the task failure it wraps, is an
    /// interruption.
    pub fn is_interruption(&self) -> bool {
        match self {
            Error::Interrupted | Error::InterruptedDuringShutdown { .. } => true,
            Error::TaskFailed { source, .. } => source.is_interruption(),
            _ => false,
        }
    }
}

/// Extracts the message of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "(non-string panic)".to_string()
    }
}

fn format_leaked_threads(threads: &[LeakedThread]) -> String {
    threads
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}
