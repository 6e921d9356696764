//! # Reset Clock
//!
//! Computes the instants at which a tracker's window rolls over. Boundaries
//! sit on a grid anchored at local midnight of the current day and spaced by
//! whole windows, so two trackers with the same window always reset together
//! no matter when each one was registered.

use chrono::{DateTime, TimeDelta, TimeZone, Timelike, Utc};
use thiserror::Error;

const SECONDS_PER_HOUR: f64 = 3600.0;
const MICROS_PER_SECOND: f64 = 1_000_000.0;
/// Upper bound for a window: one hundred years.
const MAX_WINDOW_SECONDS: f64 = 100.0 * 366.0 * 86_400.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum WindowError {
    #[error("window of {0} seconds is not a positive finite duration")]
    NotPositive(f64),

    #[error("window of {0} seconds exceeds the supported maximum")]
    TooLong(f64),
}

/// A validated reset period, kept at microsecond resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Window {
    micros: i64,
}

impl Window {
    /// Builds a window from the hours carried by a registration payload.
    pub fn from_hours(hours: f64) -> Result<Self, WindowError> {
        Self::from_seconds(hours * SECONDS_PER_HOUR)
    }

    pub fn from_seconds(seconds: f64) -> Result<Self, WindowError> {
        if !seconds.is_finite() || seconds <= 0.0 {
            return Err(WindowError::NotPositive(seconds));
        }
        if seconds > MAX_WINDOW_SECONDS {
            return Err(WindowError::TooLong(seconds));
        }
        let micros = (seconds * MICROS_PER_SECOND).round() as i64;
        if micros < 1 {
            return Err(WindowError::NotPositive(seconds));
        }
        Ok(Self { micros })
    }

    pub fn seconds(&self) -> f64 {
        self.micros as f64 / MICROS_PER_SECOND
    }

    pub fn as_delta(&self) -> TimeDelta {
        TimeDelta::microseconds(self.micros)
    }
}

/// Start of the local day containing `now`, computed as `now` minus the
/// wall-clock seconds elapsed since midnight in `tz`.
///
/// Sub-second precision of `now` is kept, matching the HomA savers that
/// subtract whole hours, minutes and seconds from the current timestamp.
pub fn local_day_start<Tz: TimeZone>(now: DateTime<Utc>, tz: &Tz) -> DateTime<Utc> {
    let since_midnight = now.with_timezone(tz).num_seconds_from_midnight();
    now - TimeDelta::seconds(i64::from(since_midnight))
}

/// First grid instant, starting at local midnight and stepping by `window`,
/// that lies strictly after `now`.
pub fn next_reset_boundary<Tz: TimeZone>(
    window: Window,
    now: DateTime<Utc>,
    tz: &Tz,
) -> DateTime<Utc> {
    let day_start = local_day_start(now, tz);
    // Always bounded by one day plus sub-second slack, so it fits in i64.
    let elapsed = (now - day_start).num_microseconds().unwrap_or(0).max(0);
    let steps = elapsed / window.micros + 1;
    day_start + TimeDelta::microseconds(window.micros * steps)
}
