use crate::tsql::timeunit::{HOUR, MINUTE, SECOND};

const FALLBACK_MAX_POINTS: i64 = 1000;

/// Picks the bucket width (same unit as `start`/`end`) for a time grouping.
///
/// An unspecified interval (`0`) becomes one minute for spans under two hours
/// and one minute per two-hour slice otherwise. Whatever the origin, the width
/// is then widened until the span yields at most `max_points` buckets, and
/// widths of a second or more are rounded up to whole seconds so SQL
/// bucketing by `toIntervalSecond` matches it exactly.
pub fn adjust_interval(start: i64, end: i64, interval: i64, max_points: i64) -> i64 {
    let span = end.saturating_sub(start);
    let mut interval = interval;
    if interval <= 0 {
        interval = if span < 2 * HOUR {
            MINUTE
        } else {
            (span / (2 * HOUR)) * MINUTE
        };
    }
    let points = if max_points <= 0 { FALLBACK_MAX_POINTS } else { max_points };
    if span > 0 {
        let min_interval = (span + points - 1) / points;
        if interval < min_interval {
            interval = min_interval;
        }
    }
    if interval >= SECOND && interval % SECOND != 0 {
        interval = (interval / SECOND + 1).saturating_mul(SECOND);
    }
    interval.max(1)
}

/// Number of buckets `[start, end)` splits into.
#[cfg(test)]
pub(crate) fn bucket_count(start: i64, end: i64, interval: i64) -> i64 {
    if interval <= 0 || end <= start {
        return 0;
    }
    (end - start + interval - 1) / interval
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_interval_short_span() {
        assert_eq!(adjust_interval(0, HOUR, 0, 512), MINUTE);
    }

    #[test]
    fn default_interval_long_span() {
        // 24h -> 12 two-hour slices -> 12 minutes
        assert_eq!(adjust_interval(0, 24 * HOUR, 0, 512), 12 * MINUTE);
    }

    #[test]
    fn requested_interval_is_widened_to_cap() {
        let interval = adjust_interval(0, 24 * HOUR, SECOND, 100);
        assert!(bucket_count(0, 24 * HOUR, interval) <= 100);
        assert_eq!(adjust_interval(0, HOUR, 5 * MINUTE, 512), 5 * MINUTE);
    }

    #[test]
    fn widened_interval_is_whole_seconds() {
        // 72h / 512 = 506.25s
        let interval = adjust_interval(0, 72 * HOUR, MINUTE, 512);
        assert_eq!(interval, 507 * SECOND);
        assert!(bucket_count(0, 72 * HOUR, interval) <= 512);
        assert_eq!(adjust_interval(0, 999, 0, 1000), 1);
    }

    #[test]
    fn cap_holds_for_awkward_spans() {
        for (span, points) in [(7 * HOUR + 13, 512), (1_000_003, 7), (3 * HOUR, 1), (999, 1000), (HOUR, 0)] {
            for requested in [0, 1, SECOND, 7 * MINUTE] {
                let interval = adjust_interval(100, 100 + span, requested, points);
                let cap = if points <= 0 { 1000 } else { points };
                assert!(bucket_count(100, 100 + span, interval) <= cap, "span={span} points={points}");
            }
        }
    }
}
