//! UTC minute boundary arithmetic. Sender and receiver processes are started independently,
//!  and they line up their measurement windows by waiting for the same minute boundary rather
//!  than by talking to each other.
//!
//! All functions are pure. Naive timestamps are interpreted as UTC (see [assume_utc]).

use chrono::{DateTime, NaiveDateTime, TimeDelta, Timelike, Utc};
use std::time::Duration;

pub fn assume_utc(naive: NaiveDateTime) -> DateTime<Utc> {
    naive.and_utc()
}

fn minute_floor(now: DateTime<Utc>) -> DateTime<Utc> {
    now - TimeDelta::seconds(now.second() as i64) - TimeDelta::nanoseconds(now.nanosecond() as i64)
}

fn is_minute_boundary(ts: DateTime<Utc>) -> bool {
    ts.second() == 0 && ts.nanosecond() == 0
}

/// Returns `now` itself if it is exactly on a minute boundary, and the start of the following
///  minute otherwise.
pub fn next_minute_boundary(now: DateTime<Utc>) -> DateTime<Utc> {
    if is_minute_boundary(now) {
        return now;
    }
    minute_floor(now) + TimeDelta::minutes(1)
}

/// Returns the first minute boundary strictly after `ts`. This is where a receive measurement
///  window that started at `ts` ends.
pub fn minute_boundary_after(ts: DateTime<Utc>) -> DateTime<Utc> {
    minute_floor(ts) + TimeDelta::minutes(1)
}

/// Seconds from `now` until `target`, clamped to 0.0 if `target` is already reached
pub fn wait_seconds(target: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    wait_duration(target, now).as_secs_f64()
}

pub fn wait_duration(target: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (target - now).to_std()
        .unwrap_or(Duration::ZERO)
}

pub fn format_utc(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

pub fn format_utc_millis(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S%.3f UTC").to_string()
}
