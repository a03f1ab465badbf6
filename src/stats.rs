//! Per-stream throughput statistics.
//!
//! A [`StatsTracker`] accumulates message count, byte volume and timing
//! for one [`StreamKind`](crate::StreamKind). Rates are gated by a
//! silence window: a tracker whose last message is older than the window
//! contributes nothing, so a burst that has stopped does not keep the
//! displayed rate inflated.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

// ============================================================================
// StreamStats
// ============================================================================

/// Counters for one stream session.
///
/// `average_message_size` is always `round(bytes_sent / message_count)`,
/// or 0 before the first message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStats {
    /// Messages received since the last reset.
    pub message_count: u64,
    /// When the session started.
    pub start_time: DateTime<Utc>,
    /// When the last message arrived.
    pub last_message_time: Option<DateTime<Utc>>,
    /// Total payload bytes received.
    pub bytes_sent: u64,
    /// Rounded mean payload size.
    pub average_message_size: u32,
}

impl StreamStats {
    /// Stats for a session starting at `start_time`.
    #[inline]
    #[must_use]
    pub fn starting_at(start_time: DateTime<Utc>) -> Self {
        Self {
            message_count: 0,
            start_time,
            last_message_time: None,
            bytes_sent: 0,
            average_message_size: 0,
        }
    }
}

impl Default for StreamStats {
    fn default() -> Self {
        Self::starting_at(DateTime::<Utc>::UNIX_EPOCH)
    }
}

// ============================================================================
// StatsTracker
// ============================================================================

/// Accumulates [`StreamStats`] for one stream.
#[derive(Debug, Clone, Default)]
pub struct StatsTracker {
    stats: StreamStats,
}

impl StatsTracker {
    /// Creates a cleared tracker.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new session at `now`, discarding previous counters.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.stats = StreamStats::starting_at(now);
    }

    /// Zeroes everything, including the start time.
    pub fn clear(&mut self) {
        self.stats = StreamStats::default();
    }

    /// Records one message of `bytes` received at `now`.
    pub fn record(&mut self, bytes: u32, now: DateTime<Utc>) {
        let stats = &mut self.stats;
        stats.message_count = stats.message_count.saturating_add(1);
        stats.bytes_sent = stats.bytes_sent.saturating_add(u64::from(bytes));
        stats.last_message_time = Some(now);
        stats.average_message_size = rounded_average(stats.bytes_sent, stats.message_count);
    }

    /// Messages per second, or 0 if the stream has been silent for `window`.
    #[must_use]
    pub fn rate(&self, window: Duration, now: DateTime<Utc>) -> u32 {
        windowed_rate([self], window, now)
    }

    /// Returns `true` if a message arrived less than `window` before `now`.
    #[must_use]
    pub fn is_recent(&self, window: Duration, now: DateTime<Utc>) -> bool {
        let Some(last) = self.stats.last_message_time else {
            return false;
        };
        let Ok(window) = chrono::Duration::from_std(window) else {
            return true;
        };
        now.signed_duration_since(last) < window
    }

    /// Current counters.
    #[inline]
    #[must_use]
    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    /// Whole seconds elapsed since the session started.
    #[must_use]
    pub fn elapsed_secs(&self, now: DateTime<Utc>) -> i64 {
        now.signed_duration_since(self.stats.start_time)
            .num_seconds()
            .max(0)
    }
}

// ============================================================================
// Rate Helpers
// ============================================================================

/// Combined rate of several trackers.
///
/// Sums the message counts of trackers heard from within `window` and
/// scales to messages per second: `round(count / window_ms * 1000)`.
#[must_use]
pub fn windowed_rate<'a>(
    trackers: impl IntoIterator<Item = &'a StatsTracker>,
    window: Duration,
    now: DateTime<Utc>,
) -> u32 {
    let window_ms = window.as_millis();
    if window_ms == 0 {
        return 0;
    }

    let recent: u128 = trackers
        .into_iter()
        .filter(|tracker| tracker.is_recent(window, now))
        .map(|tracker| u128::from(tracker.stats.message_count))
        .sum();

    let per_second = (recent * 1000 * 2 + window_ms) / (window_ms * 2);
    u32::try_from(per_second).unwrap_or(u32::MAX)
}

/// `round(total / count)` in integers, rounding halves up.
fn rounded_average(total: u64, count: u64) -> u32 {
    if count == 0 {
        return 0;
    }
    let total = u128::from(total);
    let count = u128::from(count);
    u32::try_from((total * 2 + count) / (count * 2)).unwrap_or(u32::MAX)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    const WINDOW: Duration = Duration::from_secs(5);

    fn epoch() -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH
    }

    fn at_ms(ms: i64) -> DateTime<Utc> {
        epoch() + chrono::Duration::milliseconds(ms)
    }

    #[test]
    fn test_record_updates_counters() {
        let mut tracker = StatsTracker::new();
        tracker.reset(epoch());

        for (i, size) in [10, 20, 30].into_iter().enumerate() {
            tracker.record(size, at_ms(i as i64 * 100));
        }

        let stats = tracker.stats();
        assert_eq!(stats.message_count, 3);
        assert_eq!(stats.bytes_sent, 60);
        assert_eq!(stats.average_message_size, 20);
        assert_eq!(stats.last_message_time, Some(at_ms(200)));
    }

    #[test]
    fn test_average_rounds_half_up() {
        let mut tracker = StatsTracker::new();
        tracker.record(1, epoch());
        tracker.record(2, epoch());
        assert_eq!(tracker.stats().average_message_size, 2);
    }

    #[test]
    fn test_empty_average_is_zero() {
        let tracker = StatsTracker::new();
        assert_eq!(tracker.stats().average_message_size, 0);
        assert_eq!(tracker.stats().message_count, 0);
    }

    #[test]
    fn test_reset_sets_start_time() {
        let mut tracker = StatsTracker::new();
        tracker.record(10, epoch());
        tracker.reset(at_ms(1000));

        assert_eq!(tracker.stats(), &StreamStats::starting_at(at_ms(1000)));
    }

    #[test]
    fn test_clear_returns_to_epoch() {
        let mut tracker = StatsTracker::new();
        tracker.reset(at_ms(1000));
        tracker.record(10, at_ms(1200));
        tracker.clear();

        assert_eq!(tracker.stats(), &StreamStats::default());
    }

    #[test]
    fn test_rate_counts_recent_tracker() {
        let mut tracker = StatsTracker::new();
        for _ in 0..10 {
            tracker.record(5, at_ms(0));
        }
        // 10 messages over a 5s window = 2/s
        assert_eq!(tracker.rate(WINDOW, at_ms(4999)), 2);
    }

    #[test]
    fn test_rate_silent_tracker_is_zero() {
        let mut tracker = StatsTracker::new();
        for _ in 0..10 {
            tracker.record(5, at_ms(0));
        }
        assert_eq!(tracker.rate(WINDOW, at_ms(5000)), 0);
        assert_eq!(tracker.rate(WINDOW, at_ms(60_000)), 0);
    }

    #[test]
    fn test_rate_without_messages_is_zero() {
        let tracker = StatsTracker::new();
        assert_eq!(tracker.rate(WINDOW, at_ms(0)), 0);
    }

    #[test]
    fn test_windowed_rate_skips_silent_trackers() {
        let mut live = StatsTracker::new();
        let mut silent = StatsTracker::new();
        for _ in 0..7 {
            live.record(1, at_ms(9000));
        }
        for _ in 0..100 {
            silent.record(1, at_ms(0));
        }

        // only the 7 live messages count: round(7 / 5000 * 1000) = 1
        assert_eq!(windowed_rate([&live, &silent], WINDOW, at_ms(10_000)), 1);
    }

    #[test]
    fn test_windowed_rate_zero_window() {
        let mut tracker = StatsTracker::new();
        tracker.record(1, at_ms(0));
        assert_eq!(windowed_rate([&tracker], Duration::ZERO, at_ms(0)), 0);
    }

    #[test]
    fn test_elapsed_secs() {
        let mut tracker = StatsTracker::new();
        tracker.reset(at_ms(1000));
        assert_eq!(tracker.elapsed_secs(at_ms(13_999)), 12);
        assert_eq!(tracker.elapsed_secs(at_ms(0)), 0);
    }

    proptest! {
        #[test]
        fn prop_average_matches_bytes(sizes in proptest::collection::vec(0u32..100_000, 0..64)) {
            let mut tracker = StatsTracker::new();
            for size in &sizes {
                tracker.record(*size, epoch());
            }

            let stats = tracker.stats();
            prop_assert_eq!(stats.message_count, sizes.len() as u64);
            if stats.message_count == 0 {
                prop_assert_eq!(stats.average_message_size, 0);
            } else {
                let product = stats.message_count * u64::from(stats.average_message_size);
                prop_assert!(stats.bytes_sent.abs_diff(product) <= stats.message_count / 2 + 1);
            }
        }
    }
}
