//! Sender clock conversions
//!
//! The capture host stamps frames with 100 ns ticks counted from
//! 0001-01-01T00:00:00 UTC. Delay is computed by subtracting that stamp from
//! the receipt time converted into the same domain.

use chrono::{DateTime, Utc};

/// Ticks in one millisecond.
pub const TICKS_PER_MILLISECOND: i64 = 10_000;

/// Ticks between 0001-01-01 and the Unix epoch.
pub const UNIX_EPOCH_TICKS: i64 = 621_355_968_000_000_000;

/// Convert a UTC timestamp into sender ticks.
pub fn ticks_from_datetime(time: DateTime<Utc>) -> i64 {
    let seconds = time.timestamp();
    let sub_ticks = i64::from(time.timestamp_subsec_nanos()) / 100;
    UNIX_EPOCH_TICKS + seconds * 10_000_000 + sub_ticks
}

/// Current wall-clock time in sender ticks.
pub fn now_ticks() -> i64 {
    ticks_from_datetime(Utc::now())
}

/// Delay between send and receipt in whole milliseconds.
///
/// Integer division truncates toward zero; the result is negative when the
/// sender's clock runs ahead of ours.
pub fn delay_ms(sender_ticks: i64, receipt_ticks: i64) -> f64 {
    (receipt_ticks.saturating_sub(sender_ticks) / TICKS_PER_MILLISECOND) as f64
}
