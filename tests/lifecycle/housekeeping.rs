//! Test info, misuse check and file-based configuration.

use serial_test::serial;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use crate::common::init_tracing;
use testkit::{
    ConcurrentTest, Error, ExecutorScope, Launcher, Method, MisuseCheck, TestClass, TestInfo,
    TestkitConfig, ThreadLeakCheck,
};

fn parent_with_lifecycle() -> Arc<TestClass> {
    TestClass::builder("BaseTest")
        .before_each("set_up", |_| Ok(()))
        .after_all("tear_down_all", |_| Ok(()))
        .test("inherited_test", |_| Ok(()))
        .build()
}

#[test]
fn misuse_check_stops_the_class_before_any_test() {
    init_tracing();
    let ran = Arc::new(AtomicUsize::new(0));
    let body_ran = Arc::clone(&ran);

    let class = TestClass::builder("MisusingTest")
        .extends(parent_with_lifecycle())
        .extend_with(Arc::new(MisuseCheck))
        .method(Method::plain("set_up"))
        .method(Method::plain_static("tear_down_all"))
        .test("own_test", move |_| {
            body_ran.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .build();

    let summary = Launcher::run(&class);

    assert_eq!(summary.tests_started, 0);
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert_eq!(summary.failures.len(), 1);
    assert!(matches!(summary.failures[0].error, Error::Misuse(_)));
    assert_eq!(
        summary.failures[0].error.to_string(),
        "Misused lifecycle callback methods: \n\
         fn MisusingTest::set_up()\n\
         static fn MisusingTest::tear_down_all()"
    );
}

#[test]
fn correctly_inheriting_class_passes_misuse_check() {
    init_tracing();
    let info = Arc::new(TestInfo::new());
    let body_info = Arc::clone(&info);

    let class = TestClass::builder("InheritingTest")
        .extends(parent_with_lifecycle())
        .extend_with(Arc::new(MisuseCheck))
        .extend_with(info)
        .method(Method::test("tagged", move |context| {
            assert_eq!(body_info.display_name(), Some(context.display_name()));
            assert!(body_info.tags().contains("slow"));
            Ok(())
        })
        .with_tag("slow"))
        .build();

    let summary = Launcher::run(&class);
    assert!(summary.is_success(), "{:?}", summary.failures);
    assert_eq!(summary.tests_succeeded, 2);
}

#[test]
#[serial]
fn configuration_file_drives_the_helpers() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("testkit.toml");

    TestkitConfig::write_default_if_missing(&path).unwrap();
    let mut config = TestkitConfig::from_file(&path).unwrap();
    assert_eq!(config, TestkitConfig::default());

    config.concurrency_level = 3;
    config.thread_name_prefix = "Configured".to_string();
    config.scope_timeout_ms = 2500;
    config.leak_grace_period_ms = 50;
    config.write_to_file(&path).unwrap();
    let config = TestkitConfig::from_file(&path).unwrap();

    let runs = Arc::new(AtomicUsize::new(0));
    let task_runs = Arc::clone(&runs);
    let mut indexes = Vec::new();
    ConcurrentTest::create(move |index| {
        task_runs.fetch_add(1, Ordering::SeqCst);
        Ok(index)
    })
    .with_config(&config)
    .run_and_assert_each_result(|index| indexes.push(index))
    .unwrap();
    indexes.sort_unstable();

    assert_eq!(runs.load(Ordering::SeqCst), 3);
    assert_eq!(indexes, vec![0, 1, 2]);
    assert_eq!(
        ExecutorScope::from_config(&config).timeout(),
        std::time::Duration::from_millis(2500)
    );
    assert_eq!(
        ThreadLeakCheck::from_config(&config).grace_period(),
        std::time::Duration::from_millis(50)
    );
}

#[test]
fn invalid_configuration_is_rejected() {
    let error = TestkitConfig::from_toml_str("concurrency_level = 0").unwrap_err();
    assert!(matches!(error, Error::Config(_)));
}
