use arrayvec::ArrayString;
use chrono::{DateTime, Datelike, NaiveDateTime};
use core::fmt::{self, Write as _};
use core::str::FromStr;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const SECONDS_PER_HOUR: i64 = 3600;

/// `YYYY-MM-DD HH:MM:SS NNNNNNNNNN`
pub const TIMESTAMP_LEN: usize = 30;

const MAX_RENDERED_YEAR: i32 = 9999;

pub trait Clock: Send {
    /// Current local wall-clock time in whole seconds since the Unix epoch.
    fn now_secs(&self) -> i64;
}

/// Wall-clock value captured once and advanced by a monotonic clock.
#[derive(Debug, Clone, Copy)]
pub struct SyncedClock {
    base_secs: i64,
    anchor: Instant,
}

impl SyncedClock {
    pub fn new(base_secs: i64) -> Self {
        Self {
            base_secs,
            anchor: Instant::now(),
        }
    }

    /// Anchors on a Unix time shifted into local time by `utc_offset_hours`.
    pub fn from_unix(unix_secs: i64, utc_offset_hours: i32) -> Self {
        Self::new(unix_secs + i64::from(utc_offset_hours) * SECONDS_PER_HOUR)
    }

    /// Anchors on the host clock; used when time synchronization fails.
    pub fn from_system(utc_offset_hours: i32) -> Self {
        let unix_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        Self::from_unix(unix_secs, utc_offset_hours)
    }
}

impl Clock for SyncedClock {
    fn now_secs(&self) -> i64 {
        self.base_secs + self.anchor.elapsed().as_secs() as i64
    }
}

/// Externally driven clock. Clones share the same time value.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    secs: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(secs: i64) -> Self {
        Self {
            secs: Arc::new(AtomicI64::new(secs)),
        }
    }

    pub fn set(&self, secs: i64) {
        self.secs.store(secs, Ordering::Release);
    }

    pub fn advance(&self, secs: i64) {
        self.secs.fetch_add(secs, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now_secs(&self) -> i64 {
        self.secs.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    secs: i64,
    counter: u32,
}

impl Timestamp {
    pub fn new(secs: i64, counter: u32) -> Self {
        Self { secs, counter }
    }

    pub fn secs(&self) -> i64 {
        self.secs
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn render(&self) -> ArrayString<TIMESTAMP_LEN> {
        let mut text = ArrayString::new();
        // Years outside 0..=9999 render as the epoch so the text stays fixed width.
        let date = DateTime::from_timestamp(self.secs, 0)
            .filter(|d| (0..=MAX_RENDERED_YEAR).contains(&d.year()))
            .unwrap_or_default()
            .naive_utc();
        let written = write!(text, "{} {:010}", date.format(DATE_FORMAT), self.counter);
        debug_assert!(written.is_ok(), "timestamp exceeds {TIMESTAMP_LEN} bytes");
        text
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed timestamp: {0}")]
pub struct TimestampParseError(String);

impl FromStr for Timestamp {
    type Err = TimestampParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || TimestampParseError(s.to_string());
        let (date, counter) = s.trim().rsplit_once(' ').ok_or_else(malformed)?;
        let date = NaiveDateTime::parse_from_str(date, DATE_FORMAT).map_err(|_| malformed())?;
        let counter = counter.parse::<u32>().map_err(|_| malformed())?;
        Ok(Self::new(date.and_utc().timestamp(), counter))
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.render())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Stamps samples with the disambiguation counter.
///
/// The counter restarts at zero whenever the wall-clock second changes and
/// increments for each further sample in the same second.
#[derive(Debug)]
pub struct TimeSource<C> {
    clock: C,
    previous_secs: Option<i64>,
    counter: u32,
}

impl<C: Clock> TimeSource<C> {
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            previous_secs: None,
            counter: 0,
        }
    }

    pub fn stamp(&mut self) -> Timestamp {
        let now = self.clock.now_secs();

        if self.previous_secs == Some(now) {
            self.counter = self.counter.saturating_add(1);
        } else {
            self.counter = 0;
        }
        self.previous_secs = Some(now);

        Timestamp::new(now, self.counter)
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }
}
