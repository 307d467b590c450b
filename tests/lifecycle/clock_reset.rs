//! A shared test clock wound by tests and reset by the extension.

use chrono::{Duration, FixedOffset, NaiveDate};
use std::sync::Arc;

use crate::common::init_tracing;
use testkit::{
    default_test_instant, Clock, Launcher, MethodOrder, ResetClockExtension, TestClass, TestClock,
    TestInfo,
};

fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

#[test]
fn every_test_starts_at_the_default_instant() {
    init_tracing();
    let clock = Arc::new(TestClock::default_utc());
    let (first, second) = (Arc::clone(&clock), Arc::clone(&clock));

    let class = TestClass::builder("ClockTest")
        .extend_with(Arc::new(ResetClockExtension::new(Arc::clone(&clock))))
        .test("next_day", move |_| {
            assert_eq!(first.today(), date(2016, 1, 1));
            first.wind_forward_to_date(date(2016, 1, 2))?;
            assert_eq!(first.today(), date(2016, 1, 2));
            Ok(())
        })
        .test("next_week", move |_| {
            assert_eq!(second.today(), date(2016, 1, 1));
            second.wind_forward_days(7)?;
            assert_eq!(second.today(), date(2016, 1, 8));
            Ok(())
        })
        .build();

    let summary = Launcher::run(&class);
    assert!(summary.is_success(), "{:?}", summary.failures);
    assert_eq!(summary.tests_succeeded, 2);
    assert_eq!(clock.instant(), default_test_instant());
}

#[test]
fn ordered_tests_share_their_winds_until_the_class_ends() {
    init_tracing();
    let clock = Arc::new(TestClock::default_utc());
    let (wind, check) = (Arc::clone(&clock), Arc::clone(&clock));

    let class = TestClass::builder("OrderedClockTest")
        .method_order(MethodOrder::Declared)
        .extend_with(Arc::new(ResetClockExtension::new(Arc::clone(&clock))))
        .test("wind", move |_| wind.wind_forward_seconds(90))
        .test("check", move |_| {
            assert_eq!(check.instant(), default_test_instant() + Duration::seconds(90));
            Ok(())
        })
        .build();

    let summary = Launcher::run(&class);
    assert!(summary.is_success(), "{:?}", summary.failures);
    assert_eq!(clock.instant(), default_test_instant());
}

#[test]
fn zoned_clock_keeps_its_zone_across_resets() {
    init_tracing();
    let zone = FixedOffset::west_opt(10 * 3600).unwrap();
    let clock = Arc::new(TestClock::new(default_test_instant(), zone));
    let info = Arc::new(TestInfo::new());
    let (body_clock, body_info) = (Arc::clone(&clock), Arc::clone(&info));

    let class = TestClass::builder("ZonedClockTest")
        .extend_with(info)
        .extend_with(Arc::new(ResetClockExtension::new(Arc::clone(&clock))))
        .test("new_years_eve", move |_| {
            assert_eq!(
                body_info.test_method().map(|method| method.name().to_string()),
                Some("new_years_eve".to_string())
            );
            assert_eq!(body_clock.today(), date(2015, 12, 31));
            body_clock.wind_forward_hours(10)
        })
        .build();

    let summary = Launcher::run(&class);
    assert!(summary.is_success(), "{:?}", summary.failures);
    assert_eq!(clock.today(), date(2015, 12, 31));
    assert_eq!(*clock.zone(), zone);

    let as_trait: &dyn Clock = clock.as_ref();
    assert_eq!(as_trait.instant(), default_test_instant());
}
