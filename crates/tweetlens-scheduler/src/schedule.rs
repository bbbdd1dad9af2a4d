use chrono::{DateTime, Duration, Timelike, Utc};

/// First UTC instant at which aligned triggers start: the next full hour
/// strictly after `from`, plus `grace`.
///
/// Starting at 14:02 with a 5 minute grace yields 15:05, not 14:05.
pub fn aligned_start(from: DateTime<Utc>, grace: Duration) -> DateTime<Utc> {
    let hour_start = from
        - Duration::minutes(from.minute() as i64)
        - Duration::seconds(from.second() as i64)
        - Duration::nanoseconds(from.nanosecond() as i64);
    hour_start + Duration::hours(1) + grace
}

/// How long to wait from `now` until [`aligned_start`].
pub fn delay_until_aligned_start(now: DateTime<Utc>, grace: Duration) -> std::time::Duration {
    (aligned_start(now, grace) - now)
        .to_std()
        .unwrap_or(std::time::Duration::ZERO)
}
