//! Time sources: the system clock and a manually wound test clock.

use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, TimeZone, Utc};
use parking_lot::Mutex;
use std::fmt;
use testkit_core::{Error, Result};
use tracing::info;

/// `2016-01-01T00:00:00.123456Z` as nanoseconds since the Unix epoch.
pub const DEFAULT_TEST_INSTANT_NANOS: i64 = 1_451_606_400_123_456_000;

/// The instant a [`TestClock::default_utc`] starts at:
/// `2016-01-01T00:00:00.123456Z`.
pub fn default_test_instant() -> DateTime<Utc> {
    Utc.timestamp_nanos(DEFAULT_TEST_INSTANT_NANOS)
}

/// A source of the current instant.
pub trait Clock: Send + Sync {
    /// The current instant.
    fn instant(&self) -> DateTime<Utc>;

    /// The current instant in milliseconds since the Unix epoch.
    fn millis(&self) -> i64 {
        self.instant().timestamp_millis()
    }
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn instant(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
///
/// The instant is shared: every holder of the same `TestClock` observes the
/// winds of every other holder. The zone only affects [`now`](Self::now)
/// and the date arithmetic of the `*_to_date` operations.
pub struct TestClock<Tz: TimeZone = Utc> {
    instant: Mutex<DateTime<Utc>>,
    initial: DateTime<Utc>,
    zone: Tz,
}

impl TestClock<Utc> {
    /// UTC clock at the default test instant.
    pub fn default_utc() -> Self {
        Self::new(default_test_instant(), Utc)
    }
}

impl Default for TestClock<Utc> {
    fn default() -> Self {
        Self::default_utc()
    }
}

impl<Tz: TimeZone> TestClock<Tz> {
    /// Clock at `instant` in `zone`. [`reset`](Self::reset) returns here.
    pub fn new(instant: DateTime<Utc>, zone: Tz) -> Self {
        Self {
            instant: Mutex::new(instant),
            initial: instant,
            zone,
        }
    }

    /// Clock at an RFC 3339 instant such as `2020-12-31T10:10:10.654321Z`.
    pub fn parse(instant: &str, zone: Tz) -> Result<Self> {
        let parsed = DateTime::parse_from_rfc3339(instant).map_err(|e| {
            Error::InvalidArgument(format!("Invalid instant '{}': {}", instant, e))
        })?;
        Ok(Self::new(parsed.with_timezone(&Utc), zone))
    }

    /// The current instant.
    pub fn instant(&self) -> DateTime<Utc> {
        *self.instant.lock()
    }

    /// The instant this clock was created with.
    pub fn initial_instant(&self) -> DateTime<Utc> {
        self.initial
    }

    /// The clock's zone.
    pub fn zone(&self) -> &Tz {
        &self.zone
    }

    /// The current instant in the clock's zone.
    pub fn now(&self) -> DateTime<Tz> {
        self.instant().with_timezone(&self.zone)
    }

    /// The current date in the clock's zone.
    pub fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }

    /// Independent clock in `zone`, starting at this clock's current
    /// instant.
    pub fn with_zone<Z: TimeZone>(&self, zone: Z) -> TestClock<Z> {
        TestClock {
            instant: Mutex::new(self.instant()),
            initial: self.initial,
            zone,
        }
    }

    /// Sets the current instant.
    pub fn change_instant(&self, instant: DateTime<Utc>) {
        *self.instant.lock() = instant;
        info!(target: "testkit::clock", "Setting test time to {}", format_instant(&instant));
    }

    /// Returns to the instant the clock was created with.
    pub fn reset(&self) {
        self.change_instant(self.initial);
    }

    /// Moves the clock forward. Fails for a negative `duration`.
    pub fn wind_forward(&self, duration: Duration) -> Result<DateTime<Utc>> {
        if duration < Duration::zero() {
            return Err(Error::InvalidArgument(format!(
                "Cannot wind clock *forward* by a negative duration: {}",
                IsoDuration(duration)
            )));
        }
        let wound = self.update("forward", duration, |instant| instant.checked_add_signed(duration))?;
        info!(target: "testkit::clock", "Winding test time forward to {}", format_instant(&wound));
        Ok(wound)
    }

    /// Moves the clock forward by `seconds`.
    pub fn wind_forward_seconds(&self, seconds: i64) -> Result<()> {
        self.wind_forward(amount(seconds, "seconds", Duration::try_seconds)?).map(drop)
    }

    /// Moves the clock forward by `hours`.
    pub fn wind_forward_hours(&self, hours: i64) -> Result<()> {
        self.wind_forward(amount(hours, "hours", Duration::try_hours)?).map(drop)
    }

    /// Moves the clock forward by `days` of 24 hours.
    pub fn wind_forward_days(&self, days: i64) -> Result<()> {
        self.wind_forward(amount(days, "days", Duration::try_days)?).map(drop)
    }

    /// Moves the clock forward by whole days until it shows `target`.
    /// Fails if `target` lies in the past.
    pub fn wind_forward_to_date(&self, target: NaiveDate) -> Result<()> {
        let days = (target - self.today()).num_days();
        if days < 0 {
            let now = self.instant();
            let target_instant = now
                .checked_add_signed(Duration::days(days))
                .map(|instant| format_instant(&instant))
                .unwrap_or_else(|| target.to_string());
            Err(Error::InvalidArgument(format!(
                "Cannot wind clock(now={}) *forward* to date in past({})",
                format_instant(&now),
                target_instant
            )))
        } else if days > 0 {
            self.wind_forward_days(days)
        } else {
            info!(target: "testkit::clock", "Keeping test time at {}", format_instant(&self.instant()));
            Ok(())
        }
    }

    /// Moves the clock back. Fails for a negative `duration`.
    pub fn wind_back(&self, duration: Duration) -> Result<DateTime<Utc>> {
        if duration < Duration::zero() {
            return Err(Error::InvalidArgument(format!(
                "Cannot wind clock *backward* by a negative duration: {}",
                IsoDuration(duration)
            )));
        }
        let wound = self.update("backward", duration, |instant| instant.checked_sub_signed(duration))?;
        info!(target: "testkit::clock", "Winding test time back to {}", format_instant(&wound));
        Ok(wound)
    }

    /// Moves the clock back by `seconds`.
    pub fn wind_back_seconds(&self, seconds: i64) -> Result<()> {
        self.wind_back(amount(seconds, "seconds", Duration::try_seconds)?).map(drop)
    }

    /// Moves the clock back by `hours`.
    pub fn wind_back_hours(&self, hours: i64) -> Result<()> {
        self.wind_back(amount(hours, "hours", Duration::try_hours)?).map(drop)
    }

    /// Moves the clock back by `days` of 24 hours.
    pub fn wind_back_days(&self, days: i64) -> Result<()> {
        self.wind_back(amount(days, "days", Duration::try_days)?).map(drop)
    }

    /// Moves the clock back by whole days until it shows `target`.
    /// Fails if `target` lies in the future.
    pub fn wind_back_to_date(&self, target: NaiveDate) -> Result<()> {
        let days = (self.today() - target).num_days();
        if days < 0 {
            let now = self.instant();
            let target_instant = now
                .checked_sub_signed(Duration::days(days))
                .map(|instant| format_instant(&instant))
                .unwrap_or_else(|| target.to_string());
            Err(Error::InvalidArgument(format!(
                "Cannot wind clock(now={}) *backward* to date in the future({})",
                format_instant(&now),
                target_instant
            )))
        } else if days > 0 {
            self.wind_back_days(days)
        } else {
            info!(target: "testkit::clock", "Keeping test time at {}", format_instant(&self.instant()));
            Ok(())
        }
    }

    fn update(
        &self,
        direction: &str,
        duration: Duration,
        f: impl FnOnce(DateTime<Utc>) -> Option<DateTime<Utc>>,
    ) -> Result<DateTime<Utc>> {
        let mut instant = self.instant.lock();
        let wound = f(*instant).ok_or_else(|| {
            Error::InvalidArgument(format!(
                "Cannot wind clock(now={}) *{}* by {}: instant out of range",
                format_instant(&instant),
                direction,
                IsoDuration(duration)
            ))
        })?;
        *instant = wound;
        Ok(wound)
    }
}

/// `value` in `unit`, failing instead of overflowing.
fn amount(value: i64, unit: &str, to_duration: fn(i64) -> Option<Duration>) -> Result<Duration> {
    to_duration(value).ok_or_else(|| {
        Error::InvalidArgument(format!("Duration of {} {} is out of range", value, unit))
    })
}

impl<Tz> Clock for TestClock<Tz>
where
    Tz: TimeZone + Send + Sync,
{
    fn instant(&self) -> DateTime<Utc> {
        TestClock::instant(self)
    }
}

impl<Tz: TimeZone> fmt::Debug for TestClock<Tz>
where
    Tz: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestClock")
            .field("instant", &format_instant(&self.instant()))
            .field("zone", &self.zone)
            .finish()
    }
}

/// Formats an instant with as many fraction digits as needed
/// (`2016-01-01T00:00:00.123456Z`).
pub fn format_instant(instant: &DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// ISO-8601 rendering of a signed duration: `PT-24H`, `PT1M30.5S`, `PT0S`.
pub struct IsoDuration(pub Duration);

impl fmt::Display for IsoDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NANOS_PER_SECOND: i64 = 1_000_000_000;

        let mut seconds = self.0.num_seconds();
        let mut nanos = (self.0 - Duration::seconds(seconds))
            .num_nanoseconds()
            .unwrap_or(0);
        if nanos < 0 {
            seconds -= 1;
            nanos += NANOS_PER_SECOND;
        }
        if seconds == 0 && nanos == 0 {
            return f.write_str("PT0S");
        }

        let effective = if seconds < 0 && nanos > 0 {
            seconds + 1
        } else {
            seconds
        };
        let hours = effective / 3600;
        let minutes = (effective % 3600) / 60;
        let secs = effective % 60;

        let mut out = String::from("PT");
        if hours != 0 {
            out.push_str(&format!("{}H", hours));
        }
        if minutes != 0 {
            out.push_str(&format!("{}M", minutes));
        }
        if secs == 0 && nanos == 0 && out.len() > 2 {
            return f.write_str(&out);
        }
        if seconds < 0 && nanos > 0 && secs == 0 {
            out.push_str("-0");
        } else {
            out.push_str(&secs.to_string());
        }
        if nanos > 0 {
            let fraction = if seconds < 0 {
                NANOS_PER_SECOND - nanos
            } else {
                nanos
            };
            let digits = format!("{:09}", fraction);
            out.push('.');
            out.push_str(digits.trim_end_matches('0'));
        }
        out.push('S');
        f.write_str(&out)
    }
}
