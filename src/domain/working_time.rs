use crate::domain::session_state::TimestampMs;

pub const WORKING_MESSAGE: &str = "Working";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSample {
    pub at: TimestampMs,
    pub message: String,
}

impl StatusSample {
    pub fn is_working(&self) -> bool {
        self.message == WORKING_MESSAGE
    }
}

/// Sums the intervals opened by a "Working" sample and closed by the next
/// non-"Working" sample, or by `now` when nothing closes them.
///
/// `samples` must be ordered by time. Samples older than `window_start` are
/// clamped to it, so a device that was already working when the window began
/// is credited from the window start onwards.
pub fn working_time_ms(
    samples: &[StatusSample],
    window_start: Option<TimestampMs>,
    now: TimestampMs,
) -> i64 {
    let clamp = |at: TimestampMs| match window_start {
        Some(start) if at < start => start,
        _ => at,
    };

    let mut total = 0_i64;
    let mut open: Option<TimestampMs> = None;

    for sample in samples {
        let at = clamp(sample.at);
        if sample.is_working() {
            open.get_or_insert(at);
        } else if let Some(started) = open.take() {
            total += at.millis_since(started);
        }
    }

    if let Some(started) = open {
        total += now.millis_since(started);
    }

    total
}

pub fn average_daily_ms(total_ms: i64, window_days: u32) -> i64 {
    total_ms / i64::from(window_days.max(1))
}

pub fn is_stale(last_updated: Option<TimestampMs>, now: TimestampMs, stale_after_ms: i64) -> bool {
    match last_updated {
        Some(updated) => now.millis_since(updated) > stale_after_ms,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::{StatusSample, average_daily_ms, is_stale, working_time_ms};
    use crate::domain::session_state::TimestampMs;

    fn sample(message: &str, at: i64) -> StatusSample {
        StatusSample {
            at: TimestampMs(at),
            message: message.to_string(),
        }
    }

    #[test]
    fn sums_closed_and_trailing_open_intervals() {
        let samples = [
            sample("Working", 1_000),
            sample("Idle", 4_000),
            sample("Working", 10_000),
        ];

        let total = working_time_ms(&samples, None, TimestampMs(15_000));

        assert_eq!(total, (4_000 - 1_000) + (15_000 - 10_000));
    }

    #[test]
    fn repeated_working_samples_keep_first_opening() {
        let samples = [
            sample("Working", 1_000),
            sample("Working", 2_000),
            sample("Working", 3_000),
            sample("Disconnected", 6_000),
        ];

        assert_eq!(working_time_ms(&samples, None, TimestampMs(9_000)), 5_000);
    }

    #[test]
    fn non_working_samples_alone_yield_zero() {
        let samples = [sample("Connected", 1_000), sample("Idle", 2_000)];

        assert_eq!(working_time_ms(&samples, None, TimestampMs(9_000)), 0);
        assert_eq!(working_time_ms(&[], None, TimestampMs(9_000)), 0);
    }

    #[test]
    fn clamps_samples_before_window_start() {
        let samples = [
            sample("Working", 1_000),
            sample("Idle", 6_000),
            sample("Working", 7_000),
            sample("Idle", 8_000),
        ];

        let total = working_time_ms(&samples, Some(TimestampMs(5_000)), TimestampMs(9_000));

        assert_eq!(total, 1_000 + 1_000);
    }

    #[test]
    fn interval_closed_before_window_contributes_nothing() {
        let samples = [sample("Working", 1_000), sample("Idle", 2_000)];

        let total = working_time_ms(&samples, Some(TimestampMs(5_000)), TimestampMs(9_000));

        assert_eq!(total, 0);
    }

    #[test]
    fn averages_over_window_days() {
        assert_eq!(average_daily_ms(14 * 3_600_000, 14), 3_600_000);
        assert_eq!(average_daily_ms(5_000, 0), 5_000);
    }

    #[test]
    fn staleness_respects_threshold() {
        assert!(is_stale(None, TimestampMs(0), 600_000));
        assert!(!is_stale(Some(TimestampMs(0)), TimestampMs(600_000), 600_000));
        assert!(is_stale(Some(TimestampMs(0)), TimestampMs(600_001), 600_000));
    }
}
