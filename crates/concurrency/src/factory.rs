//! Thread factory producing sequentially named, registered threads.

use crate::thread::{Builder, JoinHandle};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Creates threads named `<prefix><n>` with `n` starting at 1.
///
/// The counter is atomic, so concurrent callers always receive distinct
/// names. Threads are spawned through the registry and show up in
/// [`ThreadSnapshot`](crate::thread::ThreadSnapshot)s.
#[derive(Debug)]
pub struct NamedThreadFactory {
    prefix: String,
    thread_count: AtomicUsize,
}

impl NamedThreadFactory {
    /// Factory for the given name prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            thread_count: AtomicUsize::new(0),
        }
    }

    /// The name prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Number of names handed out so far.
    pub fn created(&self) -> usize {
        self.thread_count.load(Ordering::Acquire)
    }

    /// Reserves and returns the next thread name.
    pub fn next_name(&self) -> String {
        let n = self.thread_count.fetch_add(1, Ordering::AcqRel) + 1;
        format!("{}{}", self.prefix, n)
    }

    /// Spawns `body` on a new thread carrying the next name.
    #[track_caller]
    pub fn new_thread<F, T>(&self, body: F) -> io::Result<JoinHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        Builder::new().name(self.next_name()).spawn(body)
    }
}
