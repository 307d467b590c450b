//! Value types shared between the lifecycle glue and the concurrency crate.

use std::fmt;

/// Observable run state of a registered thread.
///
/// Names follow the JVM thread-state vocabulary because leak reports are
/// compared verbatim against golden messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadState {
    /// Registered but not yet started
    New,
    /// Executing user code
    Runnable,
    /// Waiting to acquire a lock
    Blocked,
    /// Parked without a deadline
    Waiting,
    /// Sleeping or parked with a deadline
    TimedWaiting,
    /// Finished; no longer part of any snapshot
    Terminated,
}

impl ThreadState {
    /// The canonical upper-case name (`TIMED_WAITING`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreadState::New => "NEW",
            ThreadState::Runnable => "RUNNABLE",
            ThreadState::Blocked => "BLOCKED",
            ThreadState::Waiting => "WAITING",
            ThreadState::TimedWaiting => "TIMED_WAITING",
            ThreadState::Terminated => "TERMINATED",
        }
    }
}

impl fmt::Display for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A thread reported by the leak detector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeakedThread {
    /// Thread name
    pub name: String,
    /// State at the time of the report
    pub state: ThreadState,
    /// Whether an interrupt was pending
    pub interrupted: bool,
}

impl fmt::Display for LeakedThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' (state: {}, interrupted: {})",
            self.name, self.state, self.interrupted
        )
    }
}
