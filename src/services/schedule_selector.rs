use crate::models::Schedule;
use chrono::{DateTime, Utc};

/// Active schedules whose `[start_time, end_time)` window contains `now`.
pub fn matching_schedules<'a>(
    schedules: &'a [Schedule],
    now: DateTime<Utc>,
) -> impl Iterator<Item = &'a Schedule> + 'a {
    schedules.iter().filter(move |s| s.is_active && s.contains(now))
}

/// Pick the schedule that applies at `now`, or `None` for the link's base target.
///
/// Active schedules of a link never overlap when written through the store, but
/// if several match anyway the earliest `start_time` wins, then the lowest id.
pub fn select_schedule(schedules: &[Schedule], now: DateTime<Utc>) -> Option<&Schedule> {
    matching_schedules(schedules, now)
        .min_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.id.cmp(&b.id)))
}
