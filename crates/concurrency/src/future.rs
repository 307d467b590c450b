//! Handles to the results of submitted tasks.

use crate::thread;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use testkit_core::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

enum Slot<T> {
    Pending,
    Done(std::result::Result<T, Arc<Error>>),
    Consumed,
    Abandoned,
}

struct Shared<T> {
    task: String,
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

impl<T> Shared<T> {
    fn settle(&self, slot: Slot<T>) {
        let mut current = self.slot.lock();
        if matches!(*current, Slot::Pending) {
            *current = slot;
        }
        self.ready.notify_all();
    }
}

/// Result of a task submitted to an executor.
///
/// Clones share the same result. A successful value can be taken once with
/// [`get`](Self::get); a failure is retained and reported to every caller.
pub struct TaskFuture<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for TaskFuture<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for TaskFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskFuture")
            .field("task", &self.shared.task)
            .field("done", &self.is_done())
            .finish()
    }
}

impl<T> TaskFuture<T> {
    /// Label of the task.
    pub fn task(&self) -> &str {
        &self.shared.task
    }

    /// `true` once the task has completed, successfully or not.
    pub fn is_done(&self) -> bool {
        matches!(*self.shared.slot.lock(), Slot::Done(_) | Slot::Consumed)
    }

    /// `true` if the executor dropped the task before it started.
    pub fn is_abandoned(&self) -> bool {
        matches!(*self.shared.slot.lock(), Slot::Abandoned)
    }

    /// Blocks until the task completes or is abandoned.
    ///
    /// Fails with [`Error::Interrupted`] if the calling thread is
    /// interrupted while waiting.
    pub fn wait(&self) -> Result<()> {
        let mut slot = self.shared.slot.lock();
        while matches!(*slot, Slot::Pending) {
            if thread::interrupted() {
                return Err(Error::Interrupted);
            }
            self.shared.ready.wait_for(&mut slot, POLL_INTERVAL);
        }
        Ok(())
    }

    /// Like [`wait`](Self::wait) with a deadline; `Ok(false)` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.shared.slot.lock();
        while matches!(*slot, Slot::Pending) {
            if thread::interrupted() {
                return Err(Error::Interrupted);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            self.shared
                .ready
                .wait_until(&mut slot, deadline.min(now + POLL_INTERVAL));
        }
        Ok(true)
    }

    /// Waits for the task and takes its value.
    pub fn get(&self) -> Result<T> {
        self.wait()?;
        let mut slot = self.shared.slot.lock();
        match std::mem::replace(&mut *slot, Slot::Consumed) {
            Slot::Done(Ok(value)) => Ok(value),
            Slot::Done(Err(error)) => {
                *slot = Slot::Done(Err(Arc::clone(&error)));
                Err(Error::task_failed(self.task(), error))
            }
            Slot::Abandoned => {
                *slot = Slot::Abandoned;
                Err(Error::TaskAbandoned {
                    task: self.task().to_string(),
                })
            }
            Slot::Consumed | Slot::Pending => Err(Error::ResultConsumed {
                task: self.task().to_string(),
            }),
        }
    }

    /// Waits for the task and reports its failure, leaving a successful
    /// value in place.
    pub fn check(&self) -> Result<()> {
        self.wait()?;
        match &*self.shared.slot.lock() {
            Slot::Done(Err(error)) => Err(Error::task_failed(self.task(), Arc::clone(error))),
            Slot::Abandoned => Err(Error::TaskAbandoned {
                task: self.task().to_string(),
            }),
            _ => Ok(()),
        }
    }
}

/// Type-erased view of a [`TaskFuture`], used to track futures of mixed
/// value types.
pub trait PendingTask: Send + Sync {
    /// Label of the task.
    fn task(&self) -> &str;
    /// `true` once the task has completed.
    fn is_done(&self) -> bool;
    /// Waits for the task and reports its failure.
    fn check(&self) -> Result<()>;
}

impl<T: Send> PendingTask for TaskFuture<T> {
    fn task(&self) -> &str {
        TaskFuture::task(self)
    }

    fn is_done(&self) -> bool {
        TaskFuture::is_done(self)
    }

    fn check(&self) -> Result<()> {
        TaskFuture::check(self)
    }
}

/// Shared type-erased future handle.
pub type FutureHandle = Arc<dyn PendingTask>;

/// Producer side of a [`TaskFuture`]. Dropping it without completing marks
/// the future abandoned.
pub(crate) struct Completer<T> {
    shared: Option<Arc<Shared<T>>>,
}

impl<T> Completer<T> {
    pub(crate) fn complete(mut self, result: Result<T>) {
        if let Some(shared) = self.shared.take() {
            shared.settle(Slot::Done(result.map_err(Arc::new)));
        }
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.settle(Slot::Abandoned);
        }
    }
}

pub(crate) fn pair<T>(task: impl Into<String>) -> (TaskFuture<T>, Completer<T>) {
    let shared = Arc::new(Shared {
        task: task.into(),
        slot: Mutex::new(Slot::Pending),
        ready: Condvar::new(),
    });
    (
        TaskFuture {
            shared: Arc::clone(&shared),
        },
        Completer {
            shared: Some(shared),
        },
    )
}

/// Runs a task body, turning a panic into [`Error::TestFailed`].
pub(crate) fn run_task<T, F>(body: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(result) => result,
        Err(payload) => Err(Error::from_panic(payload.as_ref())),
    }
}

/// Futures delivered in the order their tasks complete.
pub struct CompletionQueue<T> {
    completed: Arc<(Mutex<VecDeque<TaskFuture<T>>>, Condvar)>,
}

impl<T> Default for CompletionQueue<T> {
    fn default() -> Self {
        Self {
            completed: Arc::new((Mutex::new(VecDeque::new()), Condvar::new())),
        }
    }
}

impl<T: Send + 'static> CompletionQueue<T> {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Submits `body` to `executor`; its future is queued here on completion.
    pub fn submit<F>(
        &self,
        executor: &crate::ManagedExecutor,
        task: impl Into<String>,
        body: F,
    ) -> Result<TaskFuture<T>>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let (future, completer) = pair(task);
        let delivered = future.clone();
        let completed = Arc::clone(&self.completed);
        executor.execute(move || {
            completer.complete(run_task(body));
            let (queue, ready) = &*completed;
            queue.lock().push_back(delivered);
            ready.notify_one();
        })?;
        Ok(future)
    }

    /// Removes the next completed future, waiting if none is available.
    pub fn take(&self) -> Result<TaskFuture<T>> {
        let (queue, ready) = &*self.completed;
        let mut queue = queue.lock();
        loop {
            if let Some(future) = queue.pop_front() {
                return Ok(future);
            }
            if thread::interrupted() {
                return Err(Error::Interrupted);
            }
            ready.wait_for(&mut queue, POLL_INTERVAL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_is_taken_once() {
        let (future, completer) = pair::<u32>("answer");
        completer.complete(Ok(42));
        assert!(future.is_done());
        assert_eq!(future.get().unwrap(), 42);
        assert!(matches!(future.get(), Err(Error::ResultConsumed { .. })));
        assert!(future.is_done());
    }

    #[test]
    fn failure_is_reported_to_every_caller() {
        let (future, completer) = pair::<u32>("broken");
        completer.complete(Err(Error::TestFailed("nope".to_string())));
        let first = future.check().unwrap_err();
        assert_eq!(first.to_string(), "Task 'broken' failed: nope");
        assert!(matches!(future.get(), Err(Error::TaskFailed { .. })));
        assert!(matches!(future.get(), Err(Error::TaskFailed { .. })));
    }

    #[test]
    fn dropped_completer_abandons_future() {
        let (future, completer) = pair::<()>("queued");
        drop(completer);
        assert!(!future.is_done());
        assert!(future.is_abandoned());
        assert!(matches!(future.get(), Err(Error::TaskAbandoned { .. })));
    }

    #[test]
    fn wait_timeout_expires_while_pending() {
        let (future, _completer) = pair::<()>("slow");
        assert!(!future.wait_timeout(Duration::from_millis(20)).unwrap());
    }

    #[test]
    fn run_task_converts_panics() {
        let result: Result<()> = run_task(|| panic!("kaboom"));
        assert_eq!(result.unwrap_err().to_string(), "kaboom");
    }

    #[test]
    fn erased_handle_reports_failure() {
        let (future, completer) = pair::<String>("erased");
        let handle: FutureHandle = Arc::new(future);
        completer.complete(Err(Error::Interrupted));
        assert!(handle.is_done());
        assert!(handle.check().unwrap_err().is_interruption());
    }
}
