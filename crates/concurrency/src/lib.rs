//! Concurrency harness for testkit
//!
//! This crate provides the thread-facing half of the toolkit:
//! - thread: registry of managed threads with cooperative interruption
//! - NamedThreadFactory: sequentially named worker threads
//! - ManagedExecutor: fixed and cached thread pools
//! - shutdown: graceful-then-forced executor shutdown policy
//! - ExecutorScope: per-test executor lifecycle
//! - ConcurrentTest: run a task on `n` threads and assert each result
//! - ThreadLeakCheck: fail test classes that leave threads behind
//! - CyclicBarrier: rendezvous for tasks that must overlap
//!
//! Only threads spawned through [`thread::Builder`] (directly or through the
//! factory and executors) are visible to the leak check.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod barrier;
pub mod executor;
pub mod factory;
pub mod future;
pub mod leak;
pub mod runner;
pub mod scope;
pub mod shutdown;
pub mod thread;

pub use barrier::CyclicBarrier;
pub use executor::{ExecutorService, ManagedExecutor, RunState};
pub use factory::NamedThreadFactory;
pub use future::{CompletionQueue, FutureHandle, PendingTask, TaskFuture};
pub use leak::{ThreadLeakCheck, TransientThreadFilter};
pub use runner::{ConcurrentTest, IndexedTask};
pub use scope::{ExecutorScope, ScopePhase};
pub use shutdown::shutdown_or_fail;
pub use thread::{ThreadHandle, ThreadId, ThreadSnapshot};
