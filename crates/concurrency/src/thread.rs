//! Registry of testkit-managed threads.
//!
//! The standard library neither enumerates live threads nor interrupts them,
//! so every thread spawned through [`Builder`] (directly, or via
//! [`NamedThreadFactory`](crate::NamedThreadFactory) and the executors) is
//! recorded in a process-wide registry for as long as it runs.
//!
//! Interruption is cooperative: [`ThreadHandle::interrupt`] sets a flag and
//! wakes the target if it is blocked in [`sleep`] or [`park_timeout`]. Code
//! running on a registered thread polls [`interrupted`] or observes
//! [`Error::Interrupted`] from the blocking helpers.

use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::panic::Location;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use testkit_core::{Error, Result, ThreadState};
use tracing::trace;

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

static REGISTRY: Lazy<Mutex<BTreeMap<ThreadId, ThreadHandle>>> =
    Lazy::new(|| Mutex::new(BTreeMap::new()));

thread_local! {
    static CURRENT: RefCell<Option<ThreadHandle>> = const { RefCell::new(None) };
}

/// Identifier of a registered thread, unique for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(u64);

impl ThreadId {
    /// Raw numeric value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct Status {
    state: ThreadState,
    interrupted: bool,
    unpark_permit: bool,
}

struct ThreadRecord {
    id: ThreadId,
    name: String,
    daemon: bool,
    spawn_location: &'static Location<'static>,
    spawn_backtrace: Backtrace,
    status: Mutex<Status>,
    // Signalled on interrupt, unpark and termination.
    signal: Condvar,
}

/// Shared handle to a registered thread.
#[derive(Clone)]
pub struct ThreadHandle {
    record: Arc<ThreadRecord>,
}

impl ThreadHandle {
    fn new(
        id: ThreadId,
        name: String,
        daemon: bool,
        spawn_location: &'static Location<'static>,
    ) -> Self {
        Self {
            record: Arc::new(ThreadRecord {
                id,
                name,
                daemon,
                spawn_location,
                spawn_backtrace: Backtrace::force_capture(),
                status: Mutex::new(Status {
                    state: ThreadState::New,
                    interrupted: false,
                    unpark_permit: false,
                }),
                signal: Condvar::new(),
            }),
        }
    }

    /// Registry id.
    pub fn id(&self) -> ThreadId {
        self.record.id
    }

    /// Thread name.
    pub fn name(&self) -> &str {
        &self.record.name
    }

    /// Daemon flag as given to the [`Builder`].
    pub fn is_daemon(&self) -> bool {
        self.record.daemon
    }

    /// Current run state.
    pub fn state(&self) -> ThreadState {
        self.record.status.lock().state
    }

    /// Whether an interrupt is pending. Does not clear the flag.
    pub fn is_interrupted(&self) -> bool {
        self.record.status.lock().interrupted
    }

    /// Requests interruption and wakes the thread if it is blocked in a
    /// registry-aware wait.
    pub fn interrupt(&self) {
        {
            let mut status = self.record.status.lock();
            status.interrupted = true;
            self.record.signal.notify_all();
        }
        trace!(target: "testkit::thread", thread = %self, "Interrupt requested");
    }

    /// Makes the permit available for [`park_timeout`].
    pub fn unpark(&self) {
        let mut status = self.record.status.lock();
        status.unpark_permit = true;
        self.record.signal.notify_all();
    }

    /// `true` until the thread body has returned or unwound.
    pub fn is_alive(&self) -> bool {
        self.state() != ThreadState::Terminated
    }

    /// Waits up to `timeout` for the thread to terminate. Returns `true` if
    /// it did.
    pub fn join_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut status = self.record.status.lock();
        while status.state != ThreadState::Terminated {
            if self
                .record
                .signal
                .wait_until(&mut status, deadline)
                .timed_out()
            {
                return status.state == ThreadState::Terminated;
            }
        }
        true
    }

    /// Source location of the `spawn` call.
    pub fn spawn_location(&self) -> &'static Location<'static> {
        self.record.spawn_location
    }

    /// Backtrace captured when the thread was spawned.
    pub fn spawn_backtrace(&self) -> &Backtrace {
        &self.record.spawn_backtrace
    }

    pub(crate) fn set_state(&self, state: ThreadState) {
        self.record.status.lock().state = state;
    }

    fn take_interrupt(&self) -> bool {
        let mut status = self.record.status.lock();
        std::mem::replace(&mut status.interrupted, false)
    }

    fn terminate(&self) {
        let mut status = self.record.status.lock();
        status.state = ThreadState::Terminated;
        self.record.signal.notify_all();
    }

    fn block_until(&self, deadline: Instant, wake_on_unpark: bool) -> Result<()> {
        let mut status = self.record.status.lock();
        let resumed = status.state;
        status.state = ThreadState::TimedWaiting;
        let outcome = loop {
            if status.interrupted {
                status.interrupted = false;
                break Err(Error::Interrupted);
            }
            if wake_on_unpark && status.unpark_permit {
                status.unpark_permit = false;
                break Ok(());
            }
            if self
                .record
                .signal
                .wait_until(&mut status, deadline)
                .timed_out()
            {
                break Ok(());
            }
        };
        status.state = resumed;
        outcome
    }
}

impl PartialEq for ThreadHandle {
    fn eq(&self, other: &Self) -> bool {
        self.record.id == other.record.id
    }
}

impl Eq for ThreadHandle {}

impl fmt::Display for ThreadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Thread[{},{},{}]",
            self.record.id,
            self.record.name,
            self.state()
        )
    }
}

impl fmt::Debug for ThreadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadHandle")
            .field("id", &self.record.id)
            .field("name", &self.record.name)
            .field("state", &self.state())
            .field("spawned_at", &self.record.spawn_location)
            .finish()
    }
}

/// Point-in-time view of all live registered threads, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct ThreadSnapshot {
    threads: BTreeMap<ThreadId, ThreadHandle>,
}

impl ThreadSnapshot {
    /// Captures the registry.
    pub fn capture() -> Self {
        let threads = REGISTRY
            .lock()
            .iter()
            .filter(|(_, handle)| handle.is_alive())
            .map(|(id, handle)| (*id, handle.clone()))
            .collect();
        Self { threads }
    }

    /// Number of threads in the snapshot.
    pub fn len(&self) -> usize {
        self.threads.len()
    }

    /// `true` if no thread was live.
    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// `true` if the snapshot contains `id`.
    pub fn contains(&self, id: ThreadId) -> bool {
        self.threads.contains_key(&id)
    }

    /// Threads in id order.
    pub fn iter(&self) -> impl Iterator<Item = &ThreadHandle> {
        self.threads.values()
    }

    /// Threads of this snapshot whose id is absent from `earlier`.
    pub fn new_since(&self, earlier: &ThreadSnapshot) -> Vec<ThreadHandle> {
        self.threads
            .iter()
            .filter(|(id, _)| !earlier.contains(**id))
            .map(|(_, handle)| handle.clone())
            .collect()
    }
}

/// Captures all live registered threads.
pub fn snapshot() -> ThreadSnapshot {
    ThreadSnapshot::capture()
}

/// Handle of the calling thread, if it was spawned through the registry.
pub fn current() -> Option<ThreadHandle> {
    CURRENT.with(|current| current.borrow().clone())
}

/// Sleeps for `duration`.
///
/// On a registered thread the sleep reports `TIMED_WAITING` and ends early
/// with [`Error::Interrupted`] when the thread is interrupted; the interrupt
/// flag is cleared in that case.
pub fn sleep(duration: Duration) -> Result<()> {
    match current() {
        Some(handle) => handle.block_until(Instant::now() + duration, false),
        None => {
            std::thread::sleep(duration);
            Ok(())
        }
    }
}

/// Blocks until unparked, interrupted or `timeout` elapses.
///
/// Unregistered threads fall back to [`std::thread::park_timeout`].
pub fn park_timeout(timeout: Duration) -> Result<()> {
    match current() {
        Some(handle) => handle.block_until(Instant::now() + timeout, true),
        None => {
            std::thread::park_timeout(timeout);
            Ok(())
        }
    }
}

/// Tests and clears the calling thread's interrupt flag.
pub fn interrupted() -> bool {
    current().map(|handle| handle.take_interrupt()).unwrap_or(false)
}

/// Tests the calling thread's interrupt flag without clearing it.
pub fn is_interrupted() -> bool {
    current().map(|handle| handle.is_interrupted()).unwrap_or(false)
}

/// Owned permission to join a registered thread.
pub struct JoinHandle<T> {
    inner: std::thread::JoinHandle<T>,
    thread: ThreadHandle,
}

impl<T> JoinHandle<T> {
    /// The spawned thread.
    pub fn thread(&self) -> &ThreadHandle {
        &self.thread
    }

    /// Waits for the thread to finish, returning its result or panic payload.
    pub fn join(self) -> std::thread::Result<T> {
        self.inner.join()
    }

    /// `true` once the thread body has returned.
    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }
}

/// Configuration for a registered thread.
#[derive(Debug, Default)]
pub struct Builder {
    name: Option<String>,
    daemon: bool,
}

impl Builder {
    /// Unnamed, non-daemon thread.
    pub fn new() -> Self {
        Self::default()
    }

    /// Thread name. Defaults to `Thread-<id>`.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Daemon flag, reported by [`ThreadHandle::is_daemon`].
    pub fn daemon(mut self, daemon: bool) -> Self {
        self.daemon = daemon;
        self
    }

    /// Spawns the thread. It is registered before this call returns.
    #[track_caller]
    pub fn spawn<F, T>(self, body: F) -> io::Result<JoinHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let location = Location::caller();
        let id = ThreadId(NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed));
        let name = self.name.unwrap_or_else(|| format!("Thread-{}", id.0));
        let handle = ThreadHandle::new(id, name.clone(), self.daemon, location);

        REGISTRY.lock().insert(id, handle.clone());

        let builder = std::thread::Builder::new().name(name);
        let running = handle.clone();
        match builder.spawn(move || {
            let _registration = Registration::enter(running);
            body()
        }) {
            Ok(inner) => {
                trace!(target: "testkit::thread", thread = %handle, spawned_at = %location, "Thread spawned");
                Ok(JoinHandle {
                    inner,
                    thread: handle,
                })
            }
            Err(e) => {
                handle.terminate();
                REGISTRY.lock().remove(&id);
                Err(e)
            }
        }
    }
}

/// Spawns an unnamed registered thread.
#[track_caller]
pub fn spawn<F, T>(body: F) -> io::Result<JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    Builder::new().spawn(body)
}

/// Binds the handle to the running OS thread and unregisters it on exit,
/// including exit by unwinding.
struct Registration {
    handle: ThreadHandle,
}

impl Registration {
    fn enter(handle: ThreadHandle) -> Self {
        handle.set_state(ThreadState::Runnable);
        CURRENT.with(|current| *current.borrow_mut() = Some(handle.clone()));
        Self { handle }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        REGISTRY.lock().remove(&self.handle.id());
        self.handle.terminate();
        let _ = CURRENT.try_with(|current| current.borrow_mut().take());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawned_thread_sees_itself_as_current() {
        let handle = Builder::new()
            .name("current-check")
            .spawn(|| current().map(|t| t.name().to_string()))
            .unwrap();
        assert_eq!(handle.join().unwrap().as_deref(), Some("current-check"));
    }

    #[test]
    fn unregistered_thread_has_no_current() {
        assert!(current().is_none());
        assert!(!interrupted());
        assert!(sleep(Duration::from_millis(1)).is_ok());
    }

    #[test]
    fn daemon_flag_is_kept_on_the_handle() {
        let daemon = Builder::new().daemon(true).spawn(|| ()).unwrap();
        let plain = spawn(|| ()).unwrap();
        assert!(daemon.thread().is_daemon());
        assert!(!plain.thread().is_daemon());
        daemon.join().unwrap();
        plain.join().unwrap();
    }

    #[test]
    fn default_name_uses_id() {
        let handle = spawn(|| ()).unwrap();
        let expected = format!("Thread-{}", handle.thread().id().as_u64());
        assert_eq!(handle.thread().name(), expected);
        handle.join().unwrap();
    }

    #[test]
    fn interrupt_wakes_sleeper_and_clears_flag() {
        let handle = Builder::new()
            .name("sleeper")
            .spawn(|| {
                let outcome = sleep(Duration::from_secs(30));
                (outcome.is_err(), is_interrupted())
            })
            .unwrap();
        let thread = handle.thread().clone();
        while thread.state() != ThreadState::TimedWaiting {
            std::thread::yield_now();
        }
        thread.interrupt();
        let (was_interrupted, still_flagged) = handle.join().unwrap();
        assert!(was_interrupted);
        assert!(!still_flagged);
    }

    #[test]
    fn unpark_releases_parked_thread() {
        let handle = Builder::new()
            .spawn(|| {
                let started = Instant::now();
                park_timeout(Duration::from_secs(30)).unwrap();
                started.elapsed()
            })
            .unwrap();
        let thread = handle.thread().clone();
        while thread.state() != ThreadState::TimedWaiting {
            std::thread::yield_now();
        }
        thread.unpark();
        assert!(handle.join().unwrap() < Duration::from_secs(30));
    }

    #[test]
    fn terminated_thread_is_joinable_with_timeout() {
        let handle = spawn(|| ()).unwrap();
        let thread = handle.thread().clone();
        assert!(thread.join_timeout(Duration::from_secs(5)));
        assert!(!thread.is_alive());
        assert_eq!(thread.state(), ThreadState::Terminated);
        handle.join().unwrap();
    }

    #[test]
    fn panicking_thread_still_terminates() {
        let handle = spawn(|| panic!("boom")).unwrap();
        let thread = handle.thread().clone();
        assert!(handle.join().is_err());
        assert!(thread.join_timeout(Duration::from_secs(5)));
    }

    #[test]
    fn spawn_location_points_at_caller() {
        let handle = spawn(|| ()).unwrap();
        assert!(handle.thread().spawn_location().file().ends_with("thread.rs"));
        handle.join().unwrap();
    }

    #[test]
    fn display_includes_id_name_and_state() {
        let handle = Builder::new().name("shown").spawn(|| ()).unwrap();
        let thread = handle.thread().clone();
        handle.join().unwrap();
        thread.join_timeout(Duration::from_secs(5));
        assert_eq!(
            thread.to_string(),
            format!("Thread[{},shown,TERMINATED]", thread.id())
        );
    }
}
