//! Two-phase executor shutdown: graceful first, interrupting on timeout.

use crate::executor::ExecutorService;
use crate::thread;
use std::time::Duration;
use testkit_core::{Error, Result};
use tracing::{debug, info, warn};

/// Shuts `executor` down or fails the caller.
///
/// 1. `None` succeeds immediately.
/// 2. Graceful: `shutdown`, clear the queue, wait up to `timeout`.
/// 3. Forced, only if step 2 timed out: `shutdown_now`, clear the queue,
///    wait up to `timeout` again.
///
/// Fails with [`Error::ShutdownFailed`] if the forced wait also times out.
/// If the caller is interrupted while waiting, its interrupt flag is
/// restored and [`Error::InterruptedDuringShutdown`] is returned.
pub fn shutdown_or_fail<E>(executor: Option<&E>, name: &str, timeout: Duration) -> Result<()>
where
    E: ExecutorService + ?Sized,
{
    let Some(executor) = executor else {
        return Ok(());
    };
    let outcome = match shutdown_gracefully(executor, name, timeout) {
        Ok(true) => Ok(true),
        Ok(false) => shutdown_now(executor, name, timeout),
        Err(e) => Err(e),
    };
    match outcome {
        Ok(true) => Ok(()),
        Ok(false) => Err(Error::ShutdownFailed {
            name: name.to_string(),
        }),
        Err(Error::Interrupted) => {
            if let Some(me) = thread::current() {
                me.interrupt();
            }
            Err(Error::InterruptedDuringShutdown {
                name: name.to_string(),
            })
        }
        Err(e) => Err(e),
    }
}

/// Requests an orderly shutdown and waits up to `timeout` for termination.
pub fn shutdown_gracefully<E>(executor: &E, name: &str, timeout: Duration) -> Result<bool>
where
    E: ExecutorService + ?Sized,
{
    shutdown(executor, name, timeout, false)
}

/// Interrupts all workers and waits up to `timeout` for termination.
pub fn shutdown_now<E>(executor: &E, name: &str, timeout: Duration) -> Result<bool>
where
    E: ExecutorService + ?Sized,
{
    shutdown(executor, name, timeout, true)
}

fn shutdown<E>(executor: &E, name: &str, timeout: Duration, with_interrupt: bool) -> Result<bool>
where
    E: ExecutorService + ?Sized,
{
    debug!(target: "testkit::shutdown", "Shutting down {}", name);

    if with_interrupt {
        executor.shutdown_now();
    } else {
        executor.shutdown();
    }

    clear_queue(executor, name);

    let terminated = executor.await_termination(timeout)?;
    if terminated {
        info!(target: "testkit::shutdown", "Finished shutdown of '{}'", name);
    } else {
        match executor.active_count() {
            Some(active) => warn!(
                target: "testkit::shutdown",
                "Shutdown of '{}' timed out after {} ms. Active tasks: {}",
                name,
                timeout.as_millis(),
                active
            ),
            None => warn!(
                target: "testkit::shutdown",
                "Shutdown of '{}' timed out after {} ms.",
                name,
                timeout.as_millis()
            ),
        }
    }
    Ok(terminated)
}

fn clear_queue<E>(executor: &E, name: &str)
where
    E: ExecutorService + ?Sized,
{
    if let Some(queued) = executor.queued_tasks().filter(|&queued| queued > 0) {
        warn!(
            target: "testkit::shutdown",
            "Clearing approximately {} elements from queue of '{}'",
            queued,
            name
        );
        executor.clear_queue();
    }
}
