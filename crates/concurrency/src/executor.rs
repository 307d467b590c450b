//! Thread-pool executors whose workers live in the thread registry.
//!
//! Two pool shapes are provided:
//! - fixed: exactly `n` workers, started lazily as tasks arrive
//! - cached: a new worker whenever no idle worker is available; idle workers
//!   exit after a keep-alive period
//!
//! Run states only move forward: `Running → Shutdown → Stop → Terminated`.
//! `shutdown` lets queued tasks drain; `shutdown_now` additionally drops the
//! queue and interrupts every worker.

use crate::factory::NamedThreadFactory;
use crate::future::{self, TaskFuture};
use crate::thread::{self, ThreadHandle};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use testkit_core::{panic_message, Error, Result, ThreadState};
use tracing::{debug, error};

/// Keep-alive of idle workers in a cached pool.
pub const CACHED_KEEP_ALIVE: Duration = Duration::from_secs(60);

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Operations the shutdown policy needs from an executor.
pub trait ExecutorService: Send + Sync {
    /// Stops accepting tasks; queued tasks keep running.
    fn shutdown(&self);

    /// Stops accepting tasks, drops the queue and interrupts workers.
    /// Returns the number of queued tasks dropped.
    fn shutdown_now(&self) -> usize;

    /// `true` once shutdown has been requested.
    fn is_shutdown(&self) -> bool;

    /// `true` once shut down and every worker has exited.
    fn is_terminated(&self) -> bool;

    /// Waits up to `timeout` for termination. Fails with
    /// [`Error::Interrupted`] if the caller is interrupted.
    fn await_termination(&self, timeout: Duration) -> Result<bool>;

    /// Drops queued tasks without changing the run state. Executors without
    /// an accessible queue return 0.
    fn clear_queue(&self) -> usize {
        0
    }

    /// Approximate number of queued tasks, if known.
    fn queued_tasks(&self) -> Option<usize> {
        None
    }

    /// Approximate number of running tasks, if known.
    fn active_count(&self) -> Option<usize> {
        None
    }
}

/// Lifecycle of a [`ManagedExecutor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RunState {
    /// Accepting and running tasks
    Running,
    /// Rejecting new tasks, draining the queue
    Shutdown,
    /// Rejecting new tasks, queue dropped, workers interrupted
    Stop,
    /// All workers exited
    Terminated,
}

#[derive(Debug, Clone, Copy)]
enum PoolSize {
    Fixed(usize),
    Cached { keep_alive: Duration },
}

type Job = Box<dyn FnOnce() + Send + 'static>;

struct PoolState {
    run_state: RunState,
    queue: VecDeque<Job>,
    workers: Vec<ThreadHandle>,
    idle: usize,
}

struct ExecutorInner {
    name: String,
    size: PoolSize,
    state: Mutex<PoolState>,
    work_ready: Condvar,
    termination: Condvar,
    active_tasks: AtomicUsize,
    task_sequence: AtomicU64,
}

/// Thread pool whose workers are created by a [`NamedThreadFactory`].
pub struct ManagedExecutor {
    inner: Arc<ExecutorInner>,
    factory: NamedThreadFactory,
}

impl ManagedExecutor {
    /// Pool with exactly `threads` workers. Fails if `threads` is zero.
    pub fn fixed(threads: usize, factory: NamedThreadFactory) -> Result<Self> {
        if threads == 0 {
            return Err(Error::InvalidArgument(
                "fixed pool needs at least one thread".to_string(),
            ));
        }
        Ok(Self::with_size(PoolSize::Fixed(threads), factory))
    }

    /// Unbounded pool reusing idle workers for [`CACHED_KEEP_ALIVE`].
    pub fn cached(factory: NamedThreadFactory) -> Self {
        Self::cached_with_keep_alive(factory, CACHED_KEEP_ALIVE)
    }

    /// Unbounded pool with a custom keep-alive.
    pub fn cached_with_keep_alive(factory: NamedThreadFactory, keep_alive: Duration) -> Self {
        Self::with_size(PoolSize::Cached { keep_alive }, factory)
    }

    fn with_size(size: PoolSize, factory: NamedThreadFactory) -> Self {
        Self {
            inner: Arc::new(ExecutorInner {
                name: factory.prefix().to_string(),
                size,
                state: Mutex::new(PoolState {
                    run_state: RunState::Running,
                    queue: VecDeque::new(),
                    workers: Vec::new(),
                    idle: 0,
                }),
                work_ready: Condvar::new(),
                termination: Condvar::new(),
                active_tasks: AtomicUsize::new(0),
                task_sequence: AtomicU64::new(0),
            }),
            factory,
        }
    }

    /// Name of the pool (the thread-name prefix).
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Submits a value-returning task.
    pub fn submit<T, F>(&self, body: F) -> Result<TaskFuture<T>>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let sequence = self.inner.task_sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let (future, completer) = future::pair(format!("{}-task-{}", self.inner.name, sequence));
        self.execute(move || completer.complete(future::run_task(body)))?;
        Ok(future)
    }

    /// Runs a fire-and-forget job.
    ///
    /// A job that starts a new worker is handed to it directly. Jobs only
    /// wait in the queue when every worker of a fixed pool is busy, or when
    /// an idle worker of a cached pool is there to pick them up.
    pub fn execute<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.inner.state.lock();
        if state.run_state != RunState::Running {
            return Err(Error::Rejected(self.inner.name.clone()));
        }

        let needs_worker = match self.inner.size {
            PoolSize::Fixed(threads) => state.workers.len() < threads,
            PoolSize::Cached { .. } => state.idle <= state.queue.len(),
        };
        if needs_worker {
            let worker = self.spawn_worker(Box::new(job))?;
            state.workers.push(worker);
        } else {
            state.queue.push_back(Box::new(job));
            self.inner.work_ready.notify_one();
        }
        Ok(())
    }

    fn spawn_worker(&self, first_task: Job) -> Result<ThreadHandle> {
        let inner = Arc::clone(&self.inner);
        let handle = self
            .factory
            .new_thread(move || worker_loop(&inner, Some(first_task)))
            .map_err(|e| {
                error!(target: "testkit::executor", pool = %self.inner.name, error = %e, "Failed to add worker");
                e
            })?;
        debug!(target: "testkit::executor", pool = %self.inner.name, worker = %handle.thread().name(), "Worker started");
        Ok(handle.thread().clone())
    }

    /// Current run state.
    pub fn run_state(&self) -> RunState {
        self.inner.state.lock().run_state
    }

    /// Number of queued tasks.
    pub fn queue_len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Number of queued tasks no worker has claimed yet. Jobs of a cached
    /// pool are always claimed by the idle worker they were queued for.
    fn backlog(&self, state: &PoolState) -> usize {
        match self.inner.size {
            PoolSize::Fixed(_) => state.queue.len(),
            PoolSize::Cached { .. } => 0,
        }
    }

    /// Number of live workers.
    pub fn pool_size(&self) -> usize {
        self.inner.state.lock().workers.len()
    }

    /// Number of tasks being executed right now.
    pub fn active_tasks(&self) -> usize {
        self.inner.active_tasks.load(Ordering::Acquire)
    }

    fn drain_queue(state: &mut PoolState) -> Vec<Job> {
        state.queue.drain(..).collect()
    }
}

impl ExecutorService for ManagedExecutor {
    fn shutdown(&self) {
        let mut state = self.inner.state.lock();
        if state.run_state == RunState::Running {
            state.run_state = RunState::Shutdown;
        }
        try_terminate(&self.inner, &mut state);
        self.inner.work_ready.notify_all();
    }

    fn shutdown_now(&self) -> usize {
        let dropped = {
            let mut state = self.inner.state.lock();
            if state.run_state < RunState::Stop {
                state.run_state = RunState::Stop;
            }
            let dropped = Self::drain_queue(&mut state);
            for worker in &state.workers {
                worker.interrupt();
            }
            try_terminate(&self.inner, &mut state);
            self.inner.work_ready.notify_all();
            dropped
        };
        // Jobs own arbitrary captures; drop them outside the pool lock.
        let count = dropped.len();
        drop(dropped);
        count
    }

    fn is_shutdown(&self) -> bool {
        self.run_state() >= RunState::Shutdown
    }

    fn is_terminated(&self) -> bool {
        self.run_state() == RunState::Terminated
    }

    fn await_termination(&self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        loop {
            if state.run_state == RunState::Terminated {
                return Ok(true);
            }
            if thread::interrupted() {
                return Err(Error::Interrupted);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            self.inner
                .termination
                .wait_until(&mut state, deadline.min(now + POLL_INTERVAL));
        }
    }

    fn clear_queue(&self) -> usize {
        let dropped = {
            let mut state = self.inner.state.lock();
            if self.backlog(&state) == 0 {
                return 0;
            }
            Self::drain_queue(&mut state)
        };
        dropped.len()
    }

    fn queued_tasks(&self) -> Option<usize> {
        Some(self.backlog(&self.inner.state.lock()))
    }

    fn active_count(&self) -> Option<usize> {
        Some(self.active_tasks())
    }
}

impl Drop for ManagedExecutor {
    fn drop(&mut self) {
        // Idle workers of a fixed pool would otherwise wait forever.
        ExecutorService::shutdown(self);
    }
}

fn try_terminate(inner: &ExecutorInner, state: &mut PoolState) {
    let drained = state.run_state == RunState::Stop || state.queue.is_empty();
    if state.run_state >= RunState::Shutdown
        && state.run_state != RunState::Terminated
        && state.workers.is_empty()
        && drained
    {
        state.run_state = RunState::Terminated;
        inner.termination.notify_all();
        debug!(target: "testkit::executor", pool = %inner.name, "Executor terminated");
    }
}

/// Decrements `active_tasks` even if the job panics.
struct ActiveTaskGuard<'a> {
    inner: &'a ExecutorInner,
}

impl Drop for ActiveTaskGuard<'_> {
    fn drop(&mut self) {
        self.inner.active_tasks.fetch_sub(1, Ordering::Release);
    }
}

fn worker_loop(inner: &ExecutorInner, first_task: Option<Job>) {
    let me = thread::current();
    let keep_alive = match inner.size {
        PoolSize::Fixed(_) => None,
        PoolSize::Cached { keep_alive } => Some(keep_alive),
    };

    let mut first_task = first_task;
    loop {
        let job = match first_task.take() {
            Some(job) => admit_first_task(inner, job),
            None => next_job(inner, &me, keep_alive),
        };
        let Some(job) = job else { break };

        let _guard = ActiveTaskGuard { inner };
        if let Err(payload) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(job)) {
            error!(
                target: "testkit::executor",
                pool = %inner.name,
                "Task panicked: {}",
                panic_message(payload.as_ref())
            );
        }
    }

    let mut state = inner.state.lock();
    if let Some(me) = &me {
        state.workers.retain(|worker| worker != me);
    }
    try_terminate(inner, &mut state);
}

/// The job a worker was started with runs unless the pool already stopped.
fn admit_first_task(inner: &ExecutorInner, job: Job) -> Option<Job> {
    let stopped = inner.state.lock().run_state >= RunState::Stop;
    if stopped {
        return None;
    }
    inner.active_tasks.fetch_add(1, Ordering::Release);
    Some(job)
}

fn next_job(inner: &ExecutorInner, me: &Option<ThreadHandle>, keep_alive: Option<Duration>) -> Option<Job> {
    let mut state = inner.state.lock();
    loop {
        if state.run_state >= RunState::Stop {
            return None;
        }
        if let Some(job) = state.queue.pop_front() {
            inner.active_tasks.fetch_add(1, Ordering::Release);
            if thread::interrupted() {
                debug!(target: "testkit::executor", pool = %inner.name, "Cleared stale interrupt before task");
            }
            return Some(job);
        }
        if state.run_state == RunState::Shutdown {
            return None;
        }

        state.idle += 1;
        set_state(me, ThreadState::Waiting);
        let timed_out = match keep_alive {
            Some(keep_alive) => inner.work_ready.wait_for(&mut state, keep_alive).timed_out(),
            None => {
                inner.work_ready.wait(&mut state);
                false
            }
        };
        set_state(me, ThreadState::Runnable);
        state.idle -= 1;

        if timed_out && state.queue.is_empty() && state.run_state == RunState::Running {
            return None;
        }
    }
}

fn set_state(me: &Option<ThreadHandle>, state: ThreadState) {
    if let Some(me) = me {
        me.set_state(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;

    #[test]
    fn runs_submitted_tasks() {
        let executor = ManagedExecutor::fixed(2, NamedThreadFactory::new("exec-run-")).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let futures: Vec<_> = (0..10)
            .map(|_| {
                let counter = Arc::clone(&counter);
                executor
                    .submit(move || Ok(counter.fetch_add(1, Ordering::SeqCst)))
                    .unwrap()
            })
            .collect();
        for future in &futures {
            future.get().unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 10);
        assert!(executor.pool_size() <= 2);
        executor.shutdown();
        assert!(executor.await_termination(Duration::from_secs(5)).unwrap());
    }

    #[test]
    fn workers_are_named_by_factory() {
        let executor = ManagedExecutor::fixed(1, NamedThreadFactory::new("exec-name-")).unwrap();
        let name = executor
            .submit(|| Ok(thread::current().map(|t| t.name().to_string())))
            .unwrap()
            .get()
            .unwrap();
        assert_eq!(name.as_deref(), Some("exec-name-1"));
    }

    #[test]
    fn rejects_after_shutdown() {
        let executor = ManagedExecutor::cached(NamedThreadFactory::new("exec-reject-"));
        executor.shutdown();
        assert!(executor.is_shutdown());
        assert!(executor.is_terminated());
        assert!(matches!(
            executor.submit(|| Ok(())),
            Err(Error::Rejected(name)) if name == "exec-reject-"
        ));
    }

    #[test]
    fn panicking_task_fails_its_future_only() {
        let executor = ManagedExecutor::fixed(1, NamedThreadFactory::new("exec-panic-")).unwrap();
        let failed = executor.submit::<(), _>(|| panic!("task blew up")).unwrap();
        let ok = executor.submit(|| Ok(7)).unwrap();
        assert_eq!(
            failed.get().unwrap_err().to_string(),
            format!("Task '{}' failed: task blew up", failed.task())
        );
        assert_eq!(ok.get().unwrap(), 7);
    }

    #[test]
    fn shutdown_now_interrupts_and_drops_queue() {
        let executor = ManagedExecutor::fixed(1, NamedThreadFactory::new("exec-now-")).unwrap();
        let started = Arc::new(Barrier::new(2));
        let gate = Arc::clone(&started);
        let running = executor
            .submit(move || {
                gate.wait();
                thread::sleep(Duration::from_secs(30))
            })
            .unwrap();
        let queued = executor.submit(|| Ok(())).unwrap();
        started.wait();

        assert_eq!(executor.shutdown_now(), 1);
        assert!(executor.await_termination(Duration::from_secs(5)).unwrap());
        assert!(running.get().unwrap_err().is_interruption());
        assert!(queued.is_abandoned());
        assert!(!queued.is_done());
    }

    #[test]
    fn new_worker_takes_its_task_directly() {
        let executor = ManagedExecutor::fixed(2, NamedThreadFactory::new("exec-first-")).unwrap();
        let started = Arc::new(Barrier::new(3));
        let futures: Vec<_> = (0..2)
            .map(|_| {
                let gate = Arc::clone(&started);
                executor
                    .submit(move || {
                        gate.wait();
                        Ok(())
                    })
                    .unwrap()
            })
            .collect();
        assert_eq!(executor.queue_len(), 0);
        assert_eq!(executor.pool_size(), 2);

        let queued = executor.submit(|| Ok(())).unwrap();
        assert_eq!(executor.queue_len(), 1);
        started.wait();
        for future in &futures {
            future.get().unwrap();
        }
        queued.get().unwrap();
    }

    #[test]
    fn cached_pool_has_no_backlog_to_clear() {
        let executor = ManagedExecutor::cached(NamedThreadFactory::new("exec-backlog-"));
        executor.submit(|| Ok(())).unwrap().get().unwrap();
        std::thread::sleep(Duration::from_millis(50));

        let handed_off = executor.submit(|| Ok(5)).unwrap();
        executor.shutdown();
        assert_eq!(executor.queued_tasks(), Some(0));
        assert_eq!(executor.clear_queue(), 0);
        assert_eq!(handed_off.get().unwrap(), 5);
        assert!(executor.await_termination(Duration::from_secs(5)).unwrap());
    }

    #[test]
    fn cached_pool_reuses_idle_workers() {
        let executor = ManagedExecutor::cached(NamedThreadFactory::new("exec-cached-"));
        for _ in 0..5 {
            executor.submit(|| Ok(())).unwrap().get().unwrap();
            std::thread::sleep(Duration::from_millis(50));
        }
        assert!(executor.pool_size() <= 2);
    }

    #[test]
    fn idle_cached_workers_expire() {
        let executor = ManagedExecutor::cached_with_keep_alive(
            NamedThreadFactory::new("exec-expire-"),
            Duration::from_millis(20),
        );
        executor.submit(|| Ok(())).unwrap().get().unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while executor.pool_size() > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(executor.pool_size(), 0);
        assert!(!executor.is_terminated());
    }

    #[test]
    fn zero_sized_fixed_pool_is_rejected() {
        assert!(ManagedExecutor::fixed(0, NamedThreadFactory::new("x")).is_err());
    }
}
