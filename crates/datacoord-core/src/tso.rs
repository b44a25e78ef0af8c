//! Hybrid logical timestamps.
//!
//! A timestamp packs wall-clock milliseconds in the high bits and an 18-bit
//! logical counter in the low bits, so values issued within the same
//! millisecond still order strictly.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

/// Hybrid timestamp issued by the allocator.
pub type Timestamp = u64;

/// Number of low bits reserved for the logical counter.
pub const LOGICAL_BITS: u32 = 18;

/// Mask selecting the logical counter.
pub const LOGICAL_MASK: u64 = (1 << LOGICAL_BITS) - 1;

/// Composes a hybrid timestamp from physical milliseconds and a logical counter.
#[must_use]
pub fn compose_ts(physical_ms: i64, logical: u64) -> Timestamp {
    ((physical_ms.max(0) as u64) << LOGICAL_BITS) | (logical & LOGICAL_MASK)
}

/// Splits a hybrid timestamp into its wall-clock time and logical counter.
#[must_use]
pub fn parse_ts(ts: Timestamp) -> (DateTime<Utc>, u64) {
    let physical = physical_ms(ts);
    let time = Utc
        .timestamp_millis_opt(physical)
        .single()
        .unwrap_or_default();
    (time, ts & LOGICAL_MASK)
}

/// Returns the physical milliseconds carried by a hybrid timestamp.
#[must_use]
pub fn physical_ms(ts: Timestamp) -> i64 {
    (ts >> LOGICAL_BITS) as i64
}

/// Hybrid timestamp for a wall-clock instant with a zero logical part.
#[must_use]
pub fn from_datetime(time: DateTime<Utc>) -> Timestamp {
    compose_ts(time.timestamp_millis(), 0)
}

/// Hybrid timestamp for the current wall-clock time.
#[must_use]
pub fn now() -> Timestamp {
    from_datetime(Utc::now())
}

/// Moves a timestamp back by `duration`, clamping at the epoch.
///
/// The logical part is dropped; the result is the earliest timestamp of the
/// resulting millisecond.
#[must_use]
pub fn subtract(ts: Timestamp, duration: Duration) -> Timestamp {
    let millis = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
    compose_ts(physical_ms(ts).saturating_sub(millis), 0)
}

/// Seconds elapsed from `start` to `end`, negative when `end` precedes `start`.
#[must_use]
pub fn elapsed_secs(start: Timestamp, end: Timestamp) -> i64 {
    (physical_ms(end) - physical_ms(start)) / 1000
}
