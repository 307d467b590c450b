//! Per-test executors running under the thread-leak check.

use parking_lot::Mutex;
use serial_test::serial;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::common::{init_tracing, join_threads_with_prefix};
use testkit::{thread, Error, ExecutorScope, Extension, Launcher, TestClass, ThreadLeakCheck};
use testkit_concurrency::ScopePhase;

#[test]
#[serial]
fn scoped_workers_are_named_after_the_test_and_do_not_leak() {
    init_tracing();
    let scope = Arc::new(ExecutorScope::new(Duration::from_secs(10)));
    let names = Arc::new(Mutex::new(Vec::new()));
    let (body_scope, body_names) = (Arc::clone(&scope), Arc::clone(&names));

    let class = TestClass::builder("ScopedExecutorTest")
        .extend_with(Arc::new(ThreadLeakCheck::new()))
        .extend_with(Arc::clone(&scope) as Arc<dyn Extension>)
        .test("names_workers", move |_| {
            for _ in 0..3 {
                let names = Arc::clone(&body_names);
                body_scope.execute(move || {
                    let name = thread::current().map(|t| t.name().to_string());
                    names.lock().extend(name);
                })?;
            }
            body_scope.await_all_futures()
        })
        .build();

    let summary = Launcher::run(&class);
    assert!(summary.is_success(), "{:?}", summary.failures);

    let names = names.lock();
    assert_eq!(names.len(), 3);
    for name in names.iter() {
        assert!(
            name.starts_with("ScopedExecutorTest_names_workers"),
            "unexpected worker {}",
            name
        );
    }
    assert_eq!(scope.phase(), ScopePhase::TornDown);
    assert!(scope.executor().is_none());
}

#[test]
#[serial]
fn futures_stay_inspectable_after_teardown() {
    init_tracing();
    let scope = Arc::new(ExecutorScope::new(Duration::from_secs(10)));
    let body_scope = Arc::clone(&scope);

    let class = TestClass::builder("FutureTest")
        .extend_with(Arc::clone(&scope) as Arc<dyn Extension>)
        .test("submits", move |_| {
            body_scope.submit(|| Ok(1))?;
            body_scope.submit(|| Ok(2))?;
            Ok(())
        })
        .build();

    let summary = Launcher::run(&class);
    assert!(summary.is_success(), "{:?}", summary.failures);

    let futures = scope.futures();
    assert_eq!(futures.len(), 2);
    assert!(futures.iter().all(|future| future.is_done()));
}

#[test]
#[serial]
fn uninterruptible_task_fails_the_test() {
    init_tracing();
    let scope = Arc::new(ExecutorScope::new(Duration::from_millis(100)));
    let release = Arc::new(AtomicBool::new(false));
    let (body_scope, spin) = (Arc::clone(&scope), Arc::clone(&release));

    let class = TestClass::builder("StuckTaskTest")
        .extend_with(Arc::clone(&scope) as Arc<dyn Extension>)
        .test("stuck", move |_| {
            let spin = Arc::clone(&spin);
            body_scope.execute(move || {
                while !spin.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(5));
                }
            })?;
            if let Some(executor) = body_scope.executor() {
                while executor.active_tasks() == 0 {
                    std::thread::yield_now();
                }
            }
            Ok(())
        })
        .build();

    let errors = Launcher::run_and_return_errors(&class);
    release.store(true, Ordering::SeqCst);
    join_threads_with_prefix("StuckTaskTest");

    assert_eq!(errors.len(), 1, "{:?}", errors);
    assert!(matches!(errors[0], Error::ShutdownFailed { .. }));
    assert_eq!(errors[0].to_string(), "Failed to shutdown StuckTaskTest_stuck");
}

#[test]
#[serial]
fn leaked_thread_is_reported_next_to_scoped_work() {
    init_tracing();
    let scope = Arc::new(ExecutorScope::new(Duration::from_secs(10)));
    let body_scope = Arc::clone(&scope);

    let class = TestClass::builder("MixedTest")
        .extend_with(Arc::new(
            ThreadLeakCheck::new().with_grace_period(Duration::from_millis(50)),
        ))
        .extend_with(Arc::clone(&scope) as Arc<dyn Extension>)
        .test("leaks", move |_| {
            body_scope.submit(|| Ok(()))?.get()?;
            thread::Builder::new()
                .name("Forgotten")
                .spawn(|| while thread::sleep(Duration::from_millis(20)).is_ok() {})?;
            Ok(())
        })
        .build();

    let errors = Launcher::run_and_return_errors(&class);
    join_threads_with_prefix("Forgotten");

    assert_eq!(errors.len(), 1, "{:?}", errors);
    match &errors[0] {
        Error::ThreadLeak(leaked) => {
            assert_eq!(leaked.len(), 1);
            assert_eq!(leaked[0].name, "Forgotten");
        }
        other => panic!("expected a thread leak, got {:?}", other),
    }
}
