//! Average-bandwidth pacing.

use std::time::Duration;

/// How long to sleep so that `written` bytes over `elapsed` stay at or
/// below `bytes_per_sec`.
///
/// Returns `None` when the transfer is already behind schedule.
pub fn pace(written: u64, elapsed: Duration, bytes_per_sec: u64) -> Option<Duration> {
    if bytes_per_sec == 0 {
        return None;
    }
    let expected = Duration::from_secs_f64(written as f64 / bytes_per_sec as f64);
    expected.checked_sub(elapsed).filter(|d| !d.is_zero())
}
