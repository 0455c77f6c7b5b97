// crates/ph5-core/src/core/time.rs
// ============================================================================
// Module: PH5 Time Model
// Description: Epoch + microsecond time values with PH5 column encoding.
// Purpose: Provide ordered, exact time values and a host-supplied clock.
// Dependencies: serde, time
// ============================================================================

//! ## Overview
//! PH5 tables store times as a group of four columns (`epoch_l`,
//! `micro_seconds_i`, `type_s`, `ascii_s`). [`Ph5Time`] keeps the epoch and
//! microsecond parts as integers so that min/max aggregation and ordering are
//! exact. Wall-clock reads go through [`Clock`] so that catalog stamps and
//! backup names are reproducible in tests.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::cmp::Ordering;
use std::fmt;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Deserialize;
use serde::Serialize;
use time::OffsetDateTime;
use time::macros::format_description;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Microseconds per second.
pub const MICROS_PER_SECOND: i64 = 1_000_000;

/// Type label written into `type_s` columns.
pub const TIME_TYPE_BOTH: &str = "BOTH";

// ============================================================================
// SECTION: Time Values
// ============================================================================

/// A PH5 time value: whole epoch seconds plus microseconds.
///
/// # Invariants
/// - `micro_seconds` is in `0 .. 1_000_000` for values built by this module.
/// - Ordering is by `(epoch, micro_seconds)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ph5Time {
    /// Seconds since the Unix epoch.
    pub epoch: i64,
    /// Sub-second part in microseconds.
    pub micro_seconds: i32,
}

impl Ph5Time {
    /// Creates a time from whole seconds and microseconds, carrying any
    /// out-of-range microseconds into the seconds part.
    #[must_use]
    pub fn new(epoch: i64, micro_seconds: i32) -> Self {
        Self::from_micros(
            epoch.saturating_mul(MICROS_PER_SECOND).saturating_add(i64::from(micro_seconds)),
        )
    }

    /// Creates a time from whole epoch seconds.
    #[must_use]
    pub const fn from_epoch(epoch: i64) -> Self {
        Self {
            epoch,
            micro_seconds: 0,
        }
    }

    /// Creates a time from total microseconds since the epoch.
    #[must_use]
    pub fn from_micros(total: i64) -> Self {
        let epoch = total.div_euclid(MICROS_PER_SECOND);
        let micros = total.rem_euclid(MICROS_PER_SECOND);
        Self {
            epoch,
            micro_seconds: i32::try_from(micros).unwrap_or(0),
        }
    }

    /// Returns total microseconds since the epoch.
    #[must_use]
    pub fn as_micros(self) -> i64 {
        self.epoch.saturating_mul(MICROS_PER_SECOND).saturating_add(i64::from(self.micro_seconds))
    }

    /// Returns this time shifted by a number of microseconds.
    #[must_use]
    pub fn add_micros(self, micros: i64) -> Self {
        Self::from_micros(self.as_micros().saturating_add(micros))
    }

    /// Returns the `ctime`-style text written into `ascii_s` columns
    /// (`Wed Oct 18 12:00:00 2026`, UTC).
    #[must_use]
    pub fn ascii(self) -> String {
        let format = format_description!(
            "[weekday repr:short] [month repr:short] [day padding:space] \
             [hour]:[minute]:[second] [year]"
        );
        OffsetDateTime::from_unix_timestamp(self.epoch)
            .ok()
            .and_then(|value| value.format(&format).ok())
            .unwrap_or_default()
    }
}

impl PartialOrd for Ph5Time {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ph5Time {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch.cmp(&other.epoch).then(self.micro_seconds.cmp(&other.micro_seconds))
    }
}

impl fmt::Display for Ph5Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}", self.epoch, self.micro_seconds)
    }
}

// ============================================================================
// SECTION: Clock
// ============================================================================

/// Source of wall-clock time for catalog stamps and backup names.
pub trait Clock {
    /// Returns the current time.
    fn now(&self) -> Ph5Time;
}

/// Clock backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Ph5Time {
        let elapsed = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        Ph5Time::from_micros(i64::try_from(elapsed.as_micros()).unwrap_or(i64::MAX))
    }
}

/// Clock that always returns the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub Ph5Time);

impl Clock for FixedClock {
    fn now(&self) -> Ph5Time {
        self.0
    }
}

/// Returns the `<YYYY><DOY>` stamp used in backup file names.
#[must_use]
pub fn year_day_stamp(at: Ph5Time) -> String {
    match OffsetDateTime::from_unix_timestamp(at.epoch) {
        Ok(value) => format!("{:04}{:03}", value.year(), value.ordinal()),
        Err(_) => "0000000".to_string(),
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
